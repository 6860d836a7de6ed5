//! Heartbeat sync strategies.
//!
//! The orchestrator holds a `HeartbeatSyncStrategy` rather than calling
//! [`evaluate`] directly, so a platform can swap in a different policy.

use fwscale_core::{AutoscaleSettings, VirtualMachine};
use fwscale_state::HealthCheckRecord;

use crate::evaluator::{evaluate, Evaluation, Heartbeat, HeartbeatSyncConfig};

/// Decides how a heartbeat changes a VM's health-check record.
pub trait HeartbeatSyncStrategy: Send + Sync {
    fn evaluate(
        &self,
        stored: Option<&HealthCheckRecord>,
        vm: &VirtualMachine,
        heartbeat: &Heartbeat,
    ) -> Evaluation;

    /// Whether unhealthy VMs are removed rather than tracked for recovery.
    fn terminates_unhealthy(&self) -> bool;
}

/// Heartbeats are expected at the interval each VM announces.
#[derive(Debug, Clone)]
pub struct ConstantIntervalSync {
    config: HeartbeatSyncConfig,
}

impl ConstantIntervalSync {
    pub fn new(config: HeartbeatSyncConfig) -> Self {
        Self { config }
    }

    pub fn from_settings(settings: &AutoscaleSettings) -> Self {
        Self::new(HeartbeatSyncConfig::from(settings))
    }

    pub fn config(&self) -> &HeartbeatSyncConfig {
        &self.config
    }
}

impl HeartbeatSyncStrategy for ConstantIntervalSync {
    fn evaluate(
        &self,
        stored: Option<&HealthCheckRecord>,
        vm: &VirtualMachine,
        heartbeat: &Heartbeat,
    ) -> Evaluation {
        evaluate(stored, vm, heartbeat, &self.config)
    }

    fn terminates_unhealthy(&self) -> bool {
        self.config.terminate_on_unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Classification;
    use fwscale_core::VmState;

    fn vm() -> VirtualMachine {
        VirtualMachine {
            id: "i-1".to_string(),
            scaling_group_name: "fgt-byol".to_string(),
            primary_private_ip: "10.0.1.10".to_string(),
            primary_public_ip: None,
            virtual_network_id: "vpc-1".to_string(),
            subnet_id: "subnet-a".to_string(),
            state: VmState::Running,
        }
    }

    #[test]
    fn strategy_tracks_a_heartbeat_sequence() {
        let strategy = ConstantIntervalSync::from_settings(&AutoscaleSettings::default());
        assert!(!strategy.terminates_unhealthy());

        let first = strategy.evaluate(
            None,
            &vm(),
            &Heartbeat {
                seq: 1,
                interval_ms: 30_000,
                arrival_time: 0,
            },
        );
        assert_eq!(first.classification, Classification::FirstHeartbeat);

        let second = strategy.evaluate(
            Some(&first.record),
            &vm(),
            &Heartbeat {
                seq: 2,
                interval_ms: 30_000,
                arrival_time: 30_000,
            },
        );
        assert_eq!(second.classification, Classification::OnTime);
        assert_eq!(second.record.seq, 2);
    }

    #[test]
    fn strategy_reports_termination_policy() {
        let settings = AutoscaleSettings {
            terminate_unhealthy_vm: true,
            ..AutoscaleSettings::default()
        };
        let strategy = ConstantIntervalSync::from_settings(&settings);
        assert!(strategy.terminates_unhealthy());
        assert!(strategy.config().terminate_on_unhealthy);
    }
}
