//! In-memory platform backed by a static VM inventory.
//!
//! The daemon runs against this when no cloud adapter is wired in, and the
//! orchestrator tests use it to observe side effects (launch hooks, role
//! tags, notifications, removals).

use std::collections::HashMap;
use std::convert::Infallible;

use tokio::sync::RwLock;
use tracing::{debug, info};

use fwscale_core::{wait_for, PollOptions, VirtualMachine, VmId, VmRole, VmState};

use crate::platform::{Platform, PlatformError, PlatformFuture};

/// A notification sent through [`Platform::send_autoscale_notifications`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub vm_id: VmId,
    pub subject: String,
    pub message: String,
}

/// Platform whose scaling groups are a fixed list of VMs held in memory.
pub struct InventoryPlatform {
    vms: RwLock<HashMap<VmId, VirtualMachine>>,
    launched: RwLock<Vec<VmId>>,
    roles: RwLock<HashMap<VmId, VmRole>>,
    notifications: RwLock<Vec<Notification>>,
    poll: PollOptions,
}

impl InventoryPlatform {
    pub fn new(vms: impl IntoIterator<Item = VirtualMachine>) -> Self {
        Self {
            vms: RwLock::new(vms.into_iter().map(|vm| (vm.id.clone(), vm)).collect()),
            launched: RwLock::new(Vec::new()),
            roles: RwLock::new(HashMap::new()),
            notifications: RwLock::new(Vec::new()),
            poll: PollOptions::default(),
        }
    }

    /// Override how removal convergence is polled.
    pub fn with_poll_options(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    pub async fn insert_vm(&self, vm: VirtualMachine) {
        self.vms.write().await.insert(vm.id.clone(), vm);
    }

    pub async fn vm_count(&self) -> usize {
        self.vms.read().await.len()
    }

    /// VMs whose launch hook has fired, in order.
    pub async fn launched(&self) -> Vec<VmId> {
        self.launched.read().await.clone()
    }

    pub async fn role_of(&self, vm_id: &str) -> Option<VmRole> {
        self.roles.read().await.get(vm_id).copied()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }
}

impl Platform for InventoryPlatform {
    fn get_vm<'a>(&'a self, vm_id: &'a str) -> PlatformFuture<'a, Option<VirtualMachine>> {
        Box::pin(async move { Ok(self.vms.read().await.get(vm_id).cloned()) })
    }

    fn on_vm_launched<'a>(&'a self, vm: &'a VirtualMachine) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            let mut vms = self.vms.write().await;
            let Some(entry) = vms.get_mut(&vm.id) else {
                return Err(PlatformError::Api(format!("vm {} is not in inventory", vm.id)));
            };
            if entry.state == VmState::Creating {
                entry.state = VmState::Running;
            }
            drop(vms);
            self.launched.write().await.push(vm.id.clone());
            info!(vm_id = %vm.id, group = %vm.scaling_group_name, "vm launch complete");
            Ok(())
        })
    }

    fn tag_vm_role<'a>(&'a self, vm: &'a VirtualMachine, role: VmRole) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.roles.write().await.insert(vm.id.clone(), role);
            debug!(vm_id = %vm.id, ?role, "vm role tagged");
            Ok(())
        })
    }

    fn delete_vm_from_scaling_group<'a>(&'a self, vm_id: &'a str) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            {
                let mut vms = self.vms.write().await;
                let Some(vm) = vms.get_mut(vm_id) else {
                    return Err(PlatformError::Api(format!(
                        "vm {vm_id} is not in any scaling group"
                    )));
                };
                vm.state = VmState::Terminating;
                vms.remove(vm_id);
            }

            let vms = &self.vms;
            wait_for(self.poll, move |_attempt| async move {
                let gone = !vms.read().await.contains_key(vm_id);
                Ok::<_, Infallible>(gone.then_some(()))
            })
            .await?;

            info!(%vm_id, "vm removed from scaling group");
            Ok(())
        })
    }

    fn send_autoscale_notifications<'a>(
        &'a self,
        vm: &'a VirtualMachine,
        message: &'a str,
        subject: &'a str,
    ) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.notifications.write().await.push(Notification {
                vm_id: vm.id.clone(),
                subject: subject.to_string(),
                message: message.to_string(),
            });
            debug!(vm_id = %vm.id, %subject, "autoscale notification sent");
            Ok(())
        })
    }
}
