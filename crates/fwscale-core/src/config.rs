//! fwscale.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{VirtualMachine, VmState};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FwscaleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub settings: AutoscaleSettings,
    /// Static VM inventory used when no cloud adapter is wired in.
    #[serde(default, rename = "vm")]
    pub vms: Vec<VirtualMachine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

/// Autoscale settings consumed by the health evaluator and the election.
///
/// Loaded once per process and passed by value into each request; no
/// component reads settings from ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscaleSettings {
    /// Grace period added to the expected heartbeat arrival time.
    #[serde(default = "default_delay_allowance_ms")]
    pub heartbeat_delay_allowance_ms: u64,
    /// Number of late heartbeats after which a VM is unhealthy.
    #[serde(default = "default_loss_count_max")]
    pub heartbeat_loss_count_max: u32,
    /// Consecutive on-time heartbeats required to leave out-of-sync.
    #[serde(default = "default_sync_recovery_threshold")]
    pub sync_recovery_threshold: u32,
    /// Only VMs in this scaling group may become primary.
    #[serde(default = "default_preferred_scaling_group")]
    pub preferred_scaling_group: String,
    #[serde(default = "default_election_timeout_secs")]
    pub election_timeout_secs: u64,
    /// Remove unhealthy VMs from their scaling group instead of tracking
    /// their recovery.
    #[serde(default)]
    pub terminate_unhealthy_vm: bool,
}

impl Default for AutoscaleSettings {
    fn default() -> Self {
        Self {
            heartbeat_delay_allowance_ms: default_delay_allowance_ms(),
            heartbeat_loss_count_max: default_loss_count_max(),
            sync_recovery_threshold: default_sync_recovery_threshold(),
            preferred_scaling_group: default_preferred_scaling_group(),
            election_timeout_secs: default_election_timeout_secs(),
            terminate_unhealthy_vm: false,
        }
    }
}

impl AutoscaleSettings {
    /// Election window in milliseconds.
    pub fn election_duration_ms(&self) -> u64 {
        self.election_timeout_secs.saturating_mul(1000)
    }
}

fn default_port() -> u16 {
    8443
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/fwscale")
}

fn default_delay_allowance_ms() -> u64 {
    2000
}

fn default_loss_count_max() -> u32 {
    3
}

fn default_sync_recovery_threshold() -> u32 {
    3
}

fn default_preferred_scaling_group() -> String {
    "primary".to_string()
}

fn default_election_timeout_secs() -> u64 {
    90
}

impl FwscaleConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FwscaleConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with a single-VM inventory in the preferred group.
    pub fn scaffold(scaling_group: &str, vm_id: &str, private_ip: &str) -> Self {
        FwscaleConfig {
            server: ServerConfig::default(),
            settings: AutoscaleSettings {
                preferred_scaling_group: scaling_group.to_string(),
                ..AutoscaleSettings::default()
            },
            vms: vec![VirtualMachine {
                id: vm_id.to_string(),
                scaling_group_name: scaling_group.to_string(),
                primary_private_ip: private_ip.to_string(),
                primary_public_ip: None,
                virtual_network_id: "vnet-0".to_string(),
                subnet_id: "subnet-0".to_string(),
                state: VmState::Running,
            }],
        }
    }
}
