//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! Migration between managed systems owned by two independent controllers.
//!
//! The originating controller is told who the counterpart is (`-u`/`--ip`);
//! completion and RMC health on the arrival side are then checked through a
//! session opened against the counterpart controller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lpm_common::config::{CompletionMode, CrossConfig, EndpointConfig, Topology, ViosConfig};
use lpm_logging::{log_system_event, lpm_info, lpm_warn, LogContext, SystemEventOutcome};
use lpm_metrics::MigrationMetrics;
use lpm_transport::{CommandError, ShellConnector};
use tokio::time::Instant;

use crate::context::ScenarioContext;
use crate::controller::{ControllerSession, MigrateCommand, MigrateOperation};
use crate::driver::MigrationDriver;
use crate::error::{LpmError, Result};
use crate::host::HostSession;
use crate::migration::{diagnose, verify_mover_service_partitions};
use crate::model::{ManagedSystem, MigrationLeg, MigrationOutcome};
use crate::preflight::PreflightValidator;
use crate::rmc::ConnectionHealthMonitor;

/// Drives a move whose source and destination sit under different controllers.
#[derive(Debug, Clone)]
pub struct CrossControllerCoordinator {
    host: HostSession,
    local: ControllerSession,
    remote: EndpointConfig,
    connector: Arc<dyn ShellConnector>,
    preflight: PreflightValidator,
    monitor: ConnectionHealthMonitor,
    completion: CrossConfig,
    options: Option<String>,
    vios: ViosConfig,
    source: ManagedSystem,
    destination: ManagedSystem,
    deadline: Duration,
    metrics: Option<MigrationMetrics>,
}

impl CrossControllerCoordinator {
    /// Requires a `[remote_controller]` in the scenario configuration.
    pub fn new(ctx: &ScenarioContext) -> Result<Self> {
        let config = ctx.config();
        let remote = config.remote_controller.clone().ok_or_else(|| {
            LpmError::Configuration(format!(
                "cross-controller migration of partition {} from managed system {} needs a remote controller",
                config.partition.name, config.controller.managed_system
            ))
        })?;
        Ok(Self {
            host: ctx.host().clone(),
            local: ctx.controller().clone(),
            remote,
            connector: ctx.connector(),
            preflight: ctx.preflight(),
            monitor: ctx.monitor(),
            completion: config.cross.clone(),
            options: config.scenario.options.clone(),
            vios: config.vios.clone(),
            source: ctx.source_system(),
            destination: ctx.target_system(),
            deadline: config.scenario.lpm_timeout,
            metrics: ctx.metrics(),
        })
    }

    pub fn local(&self) -> &ControllerSession {
        &self.local
    }

    pub fn remote(&self) -> &EndpointConfig {
        &self.remote
    }

    /// Open a session against `endpoint` scoped to `managed_system`.
    pub fn open_session(
        &self,
        endpoint: &EndpointConfig,
        managed_system: &ManagedSystem,
    ) -> Result<ControllerSession> {
        ControllerSession::connect(
            self.connector.as_ref(),
            endpoint.clone(),
            managed_system.clone(),
            self.local.partition().clone(),
        )
    }

    /// Issue the move on `originating`, wait for it per the completion policy and
    /// confirm arrival through a session opened against `counterpart`.
    pub async fn migrate_across_controllers(
        &self,
        leg: MigrationLeg,
        originating: &ControllerSession,
        counterpart: &EndpointConfig,
        source: &ManagedSystem,
        destination: &ManagedSystem,
        deadline: Duration,
    ) -> Result<MigrationOutcome> {
        let partition = self.local.partition().name.clone();
        let ctx = LogContext::new()
            .with_managed_system(source.as_str())
            .with_partition(&partition)
            .with_controller(originating.address())
            .with_leg(leg.as_str());

        self.preflight
            .validate(&self.host, source, self.local.partition())
            .await?;
        self.monitor.ensure_active(source, originating).await?;

        let command = MigrateCommand {
            operation: MigrateOperation::Migrate,
            source,
            destination,
            partition: &partition,
            remote: Some(counterpart),
            adapter_mapping: "",
            options: self.options.as_deref(),
        }
        .to_string();

        let started = Instant::now();
        lpm_info!(context = ctx.clone(), "{}", command);
        let arrival = match originating.run(&command, deadline).await {
            Ok(_) => self
                .open_session(counterpart, destination)
                .map_err(|err| LpmError::MigrationFailed {
                    leg,
                    partition: partition.clone(),
                    from_system: source.to_string(),
                    to_system: destination.to_string(),
                    reason: format!("cannot confirm arrival through {}: {}", counterpart.address, err),
                })?,
            Err(CommandError::TimedOut { .. }) => {
                let diagnosis = diagnose(originating, source).await;
                lpm_warn!(context = ctx.clone(), "migrate timed out; {}", diagnosis);
                return Ok(self.finish(&ctx, leg, started, MigrationOutcome::TimedOut));
            }
            Err(err) => {
                lpm_warn!(context = ctx.clone(), "migrate failed: {}", err);
                let outcome = MigrationOutcome::Failed(diagnose(originating, source).await);
                return Ok(self.finish(&ctx, leg, started, outcome));
            }
        };

        let outcome = match self.await_arrival(&arrival, destination, deadline).await {
            Arrival::Resident => MigrationOutcome::Success,
            Arrival::Absent => MigrationOutcome::Failed(diagnose(originating, source).await),
            Arrival::Expired => MigrationOutcome::TimedOut,
        };
        let outcome = self.finish(&ctx, leg, started, outcome);
        if outcome.is_success() {
            self.monitor.ensure_active(destination, &arrival).await?;
        }
        Ok(outcome)
    }

    async fn await_arrival(
        &self,
        arrival: &ControllerSession,
        destination: &ManagedSystem,
        deadline: Duration,
    ) -> Arrival {
        match self.completion.completion {
            CompletionMode::FixedSleep => {
                lpm_info!("waiting {:?} for the move to settle", deadline);
                tokio::time::sleep(deadline).await;
                match arrival.is_partition_on(destination).await {
                    Ok(true) => Arrival::Resident,
                    Ok(false) => Arrival::Absent,
                    Err(err) => {
                        lpm_warn!("residency check failed: {}", err);
                        Arrival::Absent
                    }
                }
            }
            CompletionMode::Poll => {
                let interval = self.completion.poll_interval;
                let poll = async {
                    loop {
                        if let Ok(true) = arrival.is_partition_on(destination).await {
                            return;
                        }
                        tokio::time::sleep(interval).await;
                    }
                };
                match tokio::time::timeout(deadline, poll).await {
                    Ok(()) => Arrival::Resident,
                    Err(_) => Arrival::Expired,
                }
            }
        }
    }

    fn finish(
        &self,
        ctx: &LogContext<'_>,
        leg: MigrationLeg,
        started: Instant,
        outcome: MigrationOutcome,
    ) -> MigrationOutcome {
        if let Some(metrics) = &self.metrics {
            metrics.observe_migration(leg.as_str(), outcome.label(), started.elapsed());
        }
        let event = format!("migration.{}", leg);
        match &outcome {
            MigrationOutcome::Success => log_system_event(
                Some(ctx),
                &event,
                "partition resident on the counterpart controller",
                SystemEventOutcome::Success,
            ),
            MigrationOutcome::Failed(diagnosis) => {
                log_system_event(Some(ctx), &event, &diagnosis.to_string(), SystemEventOutcome::Fault)
            }
            MigrationOutcome::TimedOut => {
                log_system_event(Some(ctx), &event, "no result before the deadline", SystemEventOutcome::Fault)
            }
        }
        outcome
    }
}

#[async_trait]
impl MigrationDriver for CrossControllerCoordinator {
    fn topology(&self) -> Topology {
        Topology::Cross
    }

    fn partition(&self) -> &str {
        &self.local.partition().name
    }

    fn source(&self) -> &ManagedSystem {
        &self.source
    }

    fn destination(&self) -> &ManagedSystem {
        &self.destination
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn prepare(&self) -> Result<()> {
        let remote = self.open_session(&self.remote, &self.destination)?;
        verify_mover_service_partitions(&self.local, &remote, &self.vios, &self.source, &self.destination)
            .await
    }

    async fn forward(&self) -> Result<MigrationOutcome> {
        self.migrate_across_controllers(
            MigrationLeg::Forward,
            &self.local,
            &self.remote,
            &self.source,
            &self.destination,
            self.deadline,
        )
        .await
    }

    /// Issued on a fresh remote session, targeting the local controller.
    async fn reverse(&self) -> Result<MigrationOutcome> {
        let originating = self.open_session(&self.remote, &self.destination)?;
        self.migrate_across_controllers(
            MigrationLeg::Return,
            &originating,
            self.local.endpoint(),
            &self.destination,
            &self.source,
            self.deadline,
        )
        .await
    }
}

enum Arrival {
    Resident,
    Absent,
    Expired,
}
