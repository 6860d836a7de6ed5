//! Cluster member identity types.
//!
//! A `VirtualMachine` is an immutable snapshot of one firewall instance as
//! reported by the platform for the duration of a single request. It is
//! never cached across requests.

use serde::{Deserialize, Serialize};

/// Unique identifier for a virtual machine.
pub type VmId = String;

/// Lifecycle state of a virtual machine as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Creating,
    #[default]
    Running,
    Stopping,
    Terminating,
    Unknown,
}

/// Identity snapshot of a cluster member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualMachine {
    pub id: VmId,
    pub scaling_group_name: String,
    pub primary_private_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_public_ip: Option<String>,
    pub virtual_network_id: String,
    pub subnet_id: String,
    #[serde(default)]
    pub state: VmState,
}

/// Role a VM plays in its cluster, used for tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmRole {
    Primary,
    Secondary,
}

/// Value equality between two VM snapshots.
///
/// Two snapshots describe the same cluster member when id, scaling group,
/// private IP, network and subnet all agree. Public IP and lifecycle state
/// are allowed to drift between snapshots.
pub fn vm_equals(a: &VirtualMachine, b: &VirtualMachine) -> bool {
    a.id == b.id
        && a.scaling_group_name == b.scaling_group_name
        && a.primary_private_ip == b.primary_private_ip
        && a.virtual_network_id == b.virtual_network_id
        && a.subnet_id == b.subnet_id
}

impl VirtualMachine {
    /// Whether the platform reports this VM as serving traffic.
    pub fn is_running(&self) -> bool {
        self.state == VmState::Running
    }
}
