//! fwscale-api — HTTP transport for the autoscale coordinator.
//!
//! Extracts heartbeats from requests, hands them to a fresh
//! `HeartbeatSync`, and serializes the answer. Also exposes read-only
//! views of the coordination records.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/heartbeat` | Heartbeat from a cluster VM |
//! | GET | `/api/v1/health-checks` | List health-check records |
//! | GET | `/api/v1/health-checks/{vm_id}` | Get one VM's health-check record |
//! | GET | `/api/v1/primary` | Current primary record |
//! | DELETE | `/api/v1/vms/{vm_id}` | Forget a VM that left the cluster |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use fwscale_autoscale::Platform;
use fwscale_core::AutoscaleSettings;
use fwscale_state::RecordStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn RecordStore>,
    pub platform: Arc<dyn Platform>,
    pub settings: AutoscaleSettings,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/heartbeat", post(handlers::heartbeat))
        .route("/health-checks", get(handlers::list_health_checks))
        .route("/health-checks/{vm_id}", get(handlers::get_health_check))
        .route("/primary", get(handlers::get_primary))
        .route("/vms/{vm_id}", delete(handlers::remove_vm))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
