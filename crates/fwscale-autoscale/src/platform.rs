//! Platform collaborator interface.
//!
//! Everything cloud-specific (VM lookup, scaling-group membership,
//! notifications, tagging) sits behind [`Platform`]. Calls are I/O
//! boundaries; the orchestrator holds no cross-request state across them.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use fwscale_core::{VirtualMachine, VmRole, WaitError};

/// Boxed future returned by every platform call.
pub type PlatformFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, PlatformError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform api error: {0}")]
    Api(String),

    /// Bounded polling for infrastructure convergence ran out.
    #[error("infrastructure did not converge: {0}")]
    Wait(#[from] WaitError),
}

/// Cloud operations the orchestrator depends on.
pub trait Platform: Send + Sync {
    /// Look up a VM in any scaling group the cluster knows about.
    fn get_vm<'a>(&'a self, vm_id: &'a str) -> PlatformFuture<'a, Option<VirtualMachine>>;

    /// Mark a freshly booted VM as in service. Called on its first heartbeat.
    fn on_vm_launched<'a>(&'a self, vm: &'a VirtualMachine) -> PlatformFuture<'a, ()>;

    /// Record the VM's cluster role on the VM itself.
    fn tag_vm_role<'a>(&'a self, vm: &'a VirtualMachine, role: VmRole) -> PlatformFuture<'a, ()>;

    /// Remove a VM from its scaling group, waiting until it is gone.
    fn delete_vm_from_scaling_group<'a>(&'a self, vm_id: &'a str) -> PlatformFuture<'a, ()>;

    fn send_autoscale_notifications<'a>(
        &'a self,
        vm: &'a VirtualMachine,
        message: &'a str,
        subject: &'a str,
    ) -> PlatformFuture<'a, ()>;
}
