//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::sync::Arc;

use lpm_common::config::LpmConfig;
use lpm_logging::{lpm_info, LogContext};
use lpm_metrics::MigrationMetrics;
use lpm_transport::ShellConnector;

use crate::controller::ControllerSession;
use crate::error::{LpmError, Result};
use crate::host::HostSession;
use crate::model::{ManagedSystem, Partition};
use crate::preflight::PreflightValidator;
use crate::rmc::ConnectionHealthMonitor;

/// Everything a scenario shares between its legs: the immutable configuration,
/// the open host and controller sessions, and the metric handles.
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    config: Arc<LpmConfig>,
    host: HostSession,
    controller: ControllerSession,
    connector: Arc<dyn ShellConnector>,
    metrics: Option<MigrationMetrics>,
}

impl ScenarioContext {
    /// Open the host and originating controller sessions.
    pub fn connect(
        config: Arc<LpmConfig>,
        connector: Arc<dyn ShellConnector>,
        metrics: Option<MigrationMetrics>,
    ) -> Result<Self> {
        let host_shell = connector
            .connect(&config.host)
            .map_err(|source| LpmError::HostCommand {
                action: "connecting".to_owned(),
                host: config.host.address.clone(),
                managed_system: config.controller.managed_system.clone(),
                partition: config.partition.name.clone(),
                source,
            })?;
        let host = HostSession::new(config.host.address.clone(), host_shell);
        let partition = Partition::new(
            config.partition.name.clone(),
            config.partition.host_ip.clone(),
        );
        let controller = ControllerSession::connect(
            connector.as_ref(),
            config.controller.endpoint.clone(),
            ManagedSystem::new(config.controller.managed_system.as_str()),
            partition,
        )?;
        lpm_info!(
            context = LogContext::new()
                .with_partition(&config.partition.name)
                .with_controller(&config.controller.endpoint.address),
            "scenario sessions open ({} topology)",
            config.scenario.topology.as_str()
        );
        Ok(Self {
            config,
            host,
            controller,
            connector,
            metrics,
        })
    }

    pub fn config(&self) -> &LpmConfig {
        &self.config
    }

    pub fn host(&self) -> &HostSession {
        &self.host
    }

    pub fn controller(&self) -> &ControllerSession {
        &self.controller
    }

    pub fn connector(&self) -> Arc<dyn ShellConnector> {
        self.connector.clone()
    }

    pub fn metrics(&self) -> Option<MigrationMetrics> {
        self.metrics.clone()
    }

    /// Managed system the partition starts (and must end) on.
    pub fn source_system(&self) -> ManagedSystem {
        ManagedSystem::new(self.config.controller.managed_system.as_str())
    }

    pub fn target_system(&self) -> ManagedSystem {
        ManagedSystem::new(self.config.controller.target_managed_system.as_str())
    }

    pub fn preflight(&self) -> PreflightValidator {
        PreflightValidator::new(self.config.preflight.clone())
    }

    /// RMC monitor bound to the partition's host.
    pub fn monitor(&self) -> ConnectionHealthMonitor {
        ConnectionHealthMonitor::new(self.host.clone(), self.config.rmc.clone(), self.metrics.clone())
    }
}
