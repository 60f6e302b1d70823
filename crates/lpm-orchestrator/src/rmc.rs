//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! RMC channel health between a partition and its managed system.
//!
//! The connection state is never cached: every [`ConnectionHealthMonitor::is_active`]
//! call asks the controller again. Recovery escalates from a subsystem reset to
//! a full RSCT reconfiguration, and the time spent polling across both phases
//! is bounded by the configured first and second phase windows.

use std::time::Duration;

use lpm_common::config::RmcConfig;
use lpm_logging::{log_system_event, lpm_debug, lpm_info, lpm_warn, LogContext, SystemEventOutcome};
use lpm_metrics::MigrationMetrics;

use crate::controller::ControllerSession;
use crate::error::{LpmError, Result};
use crate::host::HostSession;
use crate::model::ManagedSystem;

/// How [`ConnectionHealthMonitor::ensure_active`] got the channel up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    /// No recovery was needed.
    AlreadyActive,
    /// The rmcctrl reset sequence was enough.
    Reset,
    /// RSCT had to be reconfigured.
    Reconfigure,
}

impl RecoveryPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryPhase::AlreadyActive => "already-active",
            RecoveryPhase::Reset => "reset",
            RecoveryPhase::Reconfigure => "reconfigure",
        }
    }
}

/// Whether diagnostic output confirms an RMC connection for `host_ip`.
///
/// The address must stand as a whole token: `110.0.0.5 has RMC connection.`
/// does not confirm `10.0.0.5`.
pub fn confirms_rmc(output: &str, host_ip: &str) -> bool {
    if host_ip.is_empty() {
        return false;
    }
    let phrase = format!("{} has RMC connection.", host_ip);
    output.lines().any(|line| {
        line.match_indices(phrase.as_str()).any(|(at, _)| {
            line[..at]
                .chars()
                .next_back()
                .map_or(true, |prev| !(prev.is_ascii_alphanumeric() || prev == '.' || prev == ':'))
        })
    })
}

/// Polls and restores the RMC channel of one host.
#[derive(Debug, Clone)]
pub struct ConnectionHealthMonitor {
    host: HostSession,
    config: RmcConfig,
    metrics: Option<MigrationMetrics>,
}

impl ConnectionHealthMonitor {
    pub fn new(host: HostSession, config: RmcConfig, metrics: Option<MigrationMetrics>) -> Self {
        Self {
            host,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &RmcConfig {
        &self.config
    }

    /// Ask the controller whether the session's partition has RMC on `managed_system`.
    /// A failing diagnostic counts as inactive.
    pub async fn is_active(&self, managed_system: &ManagedSystem, session: &ControllerSession) -> bool {
        let partition = session.partition();
        let ctx = LogContext::new()
            .with_managed_system(managed_system.as_str())
            .with_partition(&partition.name)
            .with_controller(session.address());
        match session
            .rmc_diagnostics(managed_system, self.config.diagnostic_timeout)
            .await
        {
            Ok(output) => {
                let active = confirms_rmc(output.text(), &partition.host_ip);
                lpm_debug!(context = ctx, "rmc active: {}", active);
                active
            }
            Err(err) => {
                lpm_warn!(context = ctx, "rmc diagnostics failed: {}", err);
                false
            }
        }
    }

    /// Return once RMC is active, recovering it if needed.
    pub async fn ensure_active(
        &self,
        managed_system: &ManagedSystem,
        session: &ControllerSession,
    ) -> Result<RecoveryPhase> {
        if self.is_active(managed_system, session).await {
            return Ok(RecoveryPhase::AlreadyActive);
        }
        let partition = &session.partition().name;
        let ctx = LogContext::new()
            .with_managed_system(managed_system.as_str())
            .with_partition(partition)
            .with_controller(session.address());

        lpm_info!(context = ctx.clone(), "rmc inactive, resetting subsystem");
        self.record(managed_system, "reset");
        self.reset().await;
        if self
            .poll_until_active(managed_system, session, self.config.first_phase_timeout)
            .await
        {
            log_system_event(Some(&ctx), "rmc.recovery", "restored by reset", SystemEventOutcome::Success);
            return Ok(RecoveryPhase::Reset);
        }

        lpm_info!(context = ctx.clone(), "rmc still inactive, reconfiguring rsct");
        self.record(managed_system, "reconfigure");
        self.reconfigure().await;
        if self
            .poll_until_active(managed_system, session, self.config.second_phase_timeout)
            .await
        {
            log_system_event(
                Some(&ctx),
                "rmc.recovery",
                "restored by reconfiguration",
                SystemEventOutcome::Success,
            );
            return Ok(RecoveryPhase::Reconfigure);
        }

        self.record(managed_system, "exhausted");
        let err = LpmError::RmcUnavailable {
            managed_system: managed_system.to_string(),
            partition: partition.clone(),
            waited: self.config.total_wait(),
        };
        log_system_event(Some(&ctx), "rmc.recovery", &err.to_string(), SystemEventOutcome::Fault);
        Err(err)
    }

    async fn poll_until_active(
        &self,
        managed_system: &ManagedSystem,
        session: &ControllerSession,
        window: Duration,
    ) -> bool {
        let poll = async {
            loop {
                if self.is_active(managed_system, session).await {
                    return;
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };
        tokio::time::timeout(window, poll).await.is_ok()
    }

    async fn reset(&self) {
        for action in &self.config.reset_actions {
            let command = format!("{} {}", self.config.rmcctrl_path, action);
            self.run_logged(&command).await;
        }
    }

    async fn reconfigure(&self) {
        let recfgct = self.config.recfgct_path.clone();
        self.run_logged(&recfgct).await;
        let refresh = format!("{} -p", self.config.rmcctrl_path);
        self.run_logged(&refresh).await;
    }

    // Recovery commands commonly exit non-zero while RSCT restarts.
    async fn run_logged(&self, command: &str) {
        if let Err(err) = self.host.run(command, self.config.command_timeout).await {
            lpm_warn!(
                context = LogContext::new().with_controller(self.host.address()),
                "{} failed: {}",
                command,
                err
            );
        }
    }

    fn record(&self, managed_system: &ManagedSystem, phase: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rmc_recovery(managed_system.as_str(), phase);
        }
    }
}
