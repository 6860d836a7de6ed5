//! HTTP handlers.
//!
//! Inspection handlers answer with the `ApiResponse` envelope. The
//! heartbeat handler answers in the shape cluster VMs expect: a bare
//! `{"primary-ip": ..}` object, or an empty body when no primary is known.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use fwscale_autoscale::{AutoscaleError, HeartbeatRequest, HeartbeatSync};
use fwscale_core::epoch_millis;
use fwscale_state::{PrimaryFilter, PrimaryRecord, VoteState};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn autoscale_error_response(e: &AutoscaleError) -> axum::response::Response {
    match e {
        AutoscaleError::VmNotFound(_) => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        _ => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Heartbeat ──────────────────────────────────────────────────

/// Heartbeat body sent by cluster VMs.
#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub instance: String,
    pub sequence: u64,
    /// Seconds until the VM's next heartbeat.
    pub interval: u64,
}

#[derive(Serialize)]
struct PrimaryIpBody {
    #[serde(rename = "primary-ip")]
    primary_ip: String,
}

/// POST /api/v1/heartbeat
pub async fn heartbeat(
    State(state): State<ApiState>,
    Json(body): Json<HeartbeatBody>,
) -> impl IntoResponse {
    let req = HeartbeatRequest {
        vm_id: body.instance,
        seq: body.sequence,
        interval_ms: body.interval.saturating_mul(1000),
        arrival_time: epoch_millis(),
    };
    let mut sync = HeartbeatSync::new(state.store, state.platform, state.settings);

    match sync.handle_heartbeat(req).await {
        Ok(resp) => {
            debug!(classification = ?resp.classification, primary_ip = ?resp.primary_ip, "heartbeat handled");
            match resp.primary_ip {
                Some(primary_ip) => Json(PrimaryIpBody { primary_ip }).into_response(),
                None => StatusCode::OK.into_response(),
            }
        }
        Err(e) => {
            if !matches!(e, AutoscaleError::VmNotFound(_)) {
                error!(error = %e, "heartbeat failed");
            }
            autoscale_error_response(&e)
        }
    }
}

// ── Health checks ──────────────────────────────────────────────

/// GET /api/v1/health-checks
pub async fn list_health_checks(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_health_check_records() {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/health-checks/{vm_id}
pub async fn get_health_check(
    State(state): State<ApiState>,
    Path(vm_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_health_check_record(&vm_id) {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("health check not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Primary ────────────────────────────────────────────────────

/// Primary record with its vote state as of the request.
#[derive(Serialize)]
struct PrimaryView {
    #[serde(flatten)]
    record: PrimaryRecord,
    effective_vote_state: VoteState,
}

/// GET /api/v1/primary
pub async fn get_primary(State(state): State<ApiState>) -> impl IntoResponse {
    let filter = PrimaryFilter::cluster(&state.settings.preferred_scaling_group);
    match state.store.get_primary_record(&filter) {
        Ok(Some(record)) => {
            let effective_vote_state = record.effective_vote_state(epoch_millis());
            ApiResponse::ok(PrimaryView {
                record,
                effective_vote_state,
            })
            .into_response()
        }
        Ok(None) => error_response("no primary elected", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── VMs ────────────────────────────────────────────────────────

/// DELETE /api/v1/vms/{vm_id}
pub async fn remove_vm(
    State(state): State<ApiState>,
    Path(vm_id): Path<String>,
) -> impl IntoResponse {
    let sync = HeartbeatSync::new(state.store, state.platform, state.settings);
    match sync.handle_vm_removed(&vm_id) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("health check not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => autoscale_error_response(&e),
    }
}
