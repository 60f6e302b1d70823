//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! Single-controller migrate operation and outcome classification.
//!
//! A move only counts as successful when the migrate command returns and the
//! partition is afterwards listed on the destination. Anything else is
//! diagnosed against the source system so the failure names where the
//! partition was left and in which state.

use std::time::Duration;

use lpm_common::config::ViosConfig;
use lpm_logging::{log_system_event, lpm_info, lpm_warn, LogContext, SystemEventOutcome};
use lpm_metrics::MigrationMetrics;
use lpm_transport::CommandError;
use tokio::time::Instant;

use crate::controller::{ControllerSession, MigrateCommand, MigrateOperation};
use crate::error::{LpmError, Result};
use crate::host::HostSession;
use crate::model::{FailureDiagnosis, ManagedSystem, MigrationLeg, MigrationOutcome};
use crate::preflight::PreflightValidator;
use crate::rmc::ConnectionHealthMonitor;
use crate::vnic::AdapterMapping;

/// One migrate operation between two managed systems.
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub leg: MigrationLeg,
    pub source: ManagedSystem,
    pub destination: ManagedSystem,
    pub options: Option<String>,
    pub adapter_mapping: AdapterMapping,
    pub deadline: Duration,
}

impl MigrationRequest {
    pub fn new(
        leg: MigrationLeg,
        source: ManagedSystem,
        destination: ManagedSystem,
        deadline: Duration,
    ) -> Self {
        Self {
            leg,
            source,
            destination,
            options: None,
            adapter_mapping: AdapterMapping::empty(),
            deadline,
        }
    }

    pub fn with_options(mut self, options: Option<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_adapter_mapping(mut self, mapping: AdapterMapping) -> Self {
        self.adapter_mapping = mapping;
        self
    }

    /// Turn a non-successful outcome into the leg-tagged error that aborts the scenario.
    pub fn check(&self, partition: &str, outcome: &MigrationOutcome) -> Result<()> {
        match outcome {
            MigrationOutcome::Success => Ok(()),
            MigrationOutcome::Failed(diagnosis) => Err(LpmError::MigrationFailed {
                leg: self.leg,
                partition: partition.to_owned(),
                from_system: self.source.to_string(),
                to_system: self.destination.to_string(),
                reason: diagnosis.to_string(),
            }),
            MigrationOutcome::TimedOut => Err(LpmError::MigrationTimedOut {
                leg: self.leg,
                partition: partition.to_owned(),
                from_system: self.source.to_string(),
                to_system: self.destination.to_string(),
                deadline: self.deadline,
            }),
        }
    }
}

/// Explain why the partition did not arrive, from the source system's view.
pub async fn diagnose(session: &ControllerSession, source: &ManagedSystem) -> FailureDiagnosis {
    match session.is_partition_on(source).await {
        Ok(true) => match session.partition_state(source).await {
            Ok(state) => FailureDiagnosis::RemainsOnSource {
                managed_system: source.clone(),
                state,
            },
            Err(err) => FailureDiagnosis::Unknown {
                detail: Some(err.to_string()),
            },
        },
        Ok(false) => FailureDiagnosis::Unknown { detail: None },
        Err(err) => FailureDiagnosis::Unknown {
            detail: Some(err.to_string()),
        },
    }
}

/// Every configured VIOS must be a mover service partition.
pub async fn verify_mover_service_partitions(
    source_session: &ControllerSession,
    target_session: &ControllerSession,
    vios: &ViosConfig,
    source: &ManagedSystem,
    target: &ManagedSystem,
) -> Result<()> {
    if !vios.is_declared() {
        return Ok(());
    }
    let sides = [
        (source_session, source, &vios.source),
        (target_session, target, &vios.target),
    ];
    for (session, system, names) in sides {
        for name in names {
            if !session.is_msp_enabled(system, name).await? {
                return Err(LpmError::MspNotEnabled {
                    vios: name.clone(),
                    managed_system: system.to_string(),
                    partition: source_session.partition().name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Drives migrate operations through a single controller.
#[derive(Debug, Clone)]
pub struct MigrationOrchestrator {
    host: HostSession,
    session: ControllerSession,
    preflight: PreflightValidator,
    monitor: ConnectionHealthMonitor,
    validate_first: bool,
    metrics: Option<MigrationMetrics>,
}

impl MigrationOrchestrator {
    pub fn new(
        host: HostSession,
        session: ControllerSession,
        preflight: PreflightValidator,
        monitor: ConnectionHealthMonitor,
    ) -> Self {
        Self {
            host,
            session,
            preflight,
            monitor,
            validate_first: false,
            metrics: None,
        }
    }

    pub fn with_validate_first(mut self, validate_first: bool) -> Self {
        self.validate_first = validate_first;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<MigrationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn session(&self) -> &ControllerSession {
        &self.session
    }

    /// Preflight, RMC on the source, the move itself, then RMC on the destination.
    ///
    /// Precondition failures are errors; the move's own result is the returned outcome.
    pub async fn migrate(&self, request: &MigrationRequest) -> Result<MigrationOutcome> {
        let partition = self.session.partition().name.clone();
        let leg = request.leg.as_str();
        let ctx = LogContext::new()
            .with_managed_system(request.source.as_str())
            .with_partition(&partition)
            .with_controller(self.session.address())
            .with_leg(leg);

        self.preflight
            .validate(&self.host, &request.source, self.session.partition())
            .await?;
        self.monitor.ensure_active(&request.source, &self.session).await?;

        let started = Instant::now();
        let outcome = self.attempt(request, &partition).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_migration(leg, outcome.label(), started.elapsed());
        }

        let event = format!("migration.{}", leg);
        match &outcome {
            MigrationOutcome::Success => {
                log_system_event(
                    Some(&ctx),
                    &event,
                    &format!("partition resident on {}", request.destination),
                    SystemEventOutcome::Success,
                );
                self.monitor
                    .ensure_active(&request.destination, &self.session)
                    .await?;
            }
            MigrationOutcome::Failed(diagnosis) => {
                log_system_event(Some(&ctx), &event, &diagnosis.to_string(), SystemEventOutcome::Fault);
            }
            MigrationOutcome::TimedOut => {
                log_system_event(
                    Some(&ctx),
                    &event,
                    &format!("no result within {:?}", request.deadline),
                    SystemEventOutcome::Fault,
                );
            }
        }
        Ok(outcome)
    }

    async fn attempt(&self, request: &MigrationRequest, partition: &str) -> MigrationOutcome {
        if self.validate_first {
            let validate = render(request, partition, MigrateOperation::Validate);
            if let Err(err) = self.session.run(&validate, request.deadline).await {
                lpm_warn!("validation rejected {}: {}", partition, err);
                return MigrationOutcome::Failed(FailureDiagnosis::Unknown {
                    detail: Some(format!("validation failed: {}", err)),
                });
            }
        }

        let migrate = render(request, partition, MigrateOperation::Migrate);
        lpm_info!("{}", migrate);
        match self.session.run(&migrate, request.deadline).await {
            Ok(_) => match self.session.is_partition_on(&request.destination).await {
                Ok(true) => MigrationOutcome::Success,
                Ok(false) => {
                    MigrationOutcome::Failed(diagnose(&self.session, &request.source).await)
                }
                Err(err) => MigrationOutcome::Failed(FailureDiagnosis::Unknown {
                    detail: Some(err.to_string()),
                }),
            },
            Err(CommandError::TimedOut { .. }) => {
                let diagnosis = diagnose(&self.session, &request.source).await;
                lpm_warn!("migrate timed out; {}", diagnosis);
                MigrationOutcome::TimedOut
            }
            Err(err) => {
                lpm_warn!("migrate failed: {}", err);
                MigrationOutcome::Failed(diagnose(&self.session, &request.source).await)
            }
        }
    }
}

fn render(request: &MigrationRequest, partition: &str, operation: MigrateOperation) -> String {
    let mapping = request.adapter_mapping.as_argument();
    MigrateCommand {
        operation,
        source: &request.source,
        destination: &request.destination,
        partition,
        remote: None,
        adapter_mapping: &mapping,
        options: request.options.as_deref(),
    }
    .to_string()
}
