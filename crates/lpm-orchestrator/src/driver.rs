//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! Topology-independent round trip.
//!
//! A [`MigrationDriver`] knows how to move the partition to its destination and
//! back. [`run_round_trip`] runs both legs in order and stops at the first
//! leg that does not end with the partition on the expected system.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lpm_common::config::{Topology, ViosConfig};
use lpm_logging::{log_system_event, LogContext, SystemEventOutcome};
use serde::Serialize;
use tokio::time::Instant;

use crate::context::ScenarioContext;
use crate::cross::CrossControllerCoordinator;
use crate::error::{LpmError, Result};
use crate::migration::{verify_mover_service_partitions, MigrationOrchestrator, MigrationRequest};
use crate::model::{ManagedSystem, MigrationLeg, MigrationOutcome};
use crate::vnic::{resolve_plan, AdapterMapping, AdapterMappingBuilder, MappingDirection, VnicPlan};

/// One way of moving a partition out and back.
#[async_trait]
pub trait MigrationDriver: Send + Sync + fmt::Debug {
    fn topology(&self) -> Topology;

    /// Name of the partition being moved.
    fn partition(&self) -> &str;

    /// Original placement.
    fn source(&self) -> &ManagedSystem;

    fn destination(&self) -> &ManagedSystem;

    /// Deadline applied to each migrate operation.
    fn deadline(&self) -> Duration;

    /// Checks run once before the first leg.
    async fn prepare(&self) -> Result<()>;

    async fn forward(&self) -> Result<MigrationOutcome>;

    async fn reverse(&self) -> Result<MigrationOutcome>;
}

/// Both systems under one controller.
#[derive(Debug, Clone)]
pub struct LocalMigrationDriver {
    orchestrator: MigrationOrchestrator,
    source: ManagedSystem,
    destination: ManagedSystem,
    options: Option<String>,
    vios: ViosConfig,
    plan: Option<VnicPlan>,
    deadline: Duration,
}

impl LocalMigrationDriver {
    /// `plan` carries the resolved vNIC identifiers, if adapter remapping is configured.
    pub fn new(ctx: &ScenarioContext, plan: Option<VnicPlan>) -> Self {
        let config = ctx.config();
        let orchestrator = MigrationOrchestrator::new(
            ctx.host().clone(),
            ctx.controller().clone(),
            ctx.preflight(),
            ctx.monitor(),
        )
        .with_validate_first(config.scenario.validate_first)
        .with_metrics(ctx.metrics());
        Self {
            orchestrator,
            source: ctx.source_system(),
            destination: ctx.target_system(),
            options: config.scenario.options.clone(),
            vios: config.vios.clone(),
            plan,
            deadline: config.scenario.lpm_timeout,
        }
    }

    fn mapping(&self, direction: MappingDirection) -> Result<AdapterMapping> {
        match &self.plan {
            Some(plan) => AdapterMappingBuilder::new(plan).build(direction).map_err(|err| match err {
                LpmError::Configuration(reason) => LpmError::Configuration(format!(
                    "vnic mapping for partition {} on managed system {}: {}",
                    self.orchestrator.session().partition().name,
                    self.source,
                    reason
                )),
                other => other,
            }),
            None => Ok(AdapterMapping::empty()),
        }
    }

    fn request(&self, leg: MigrationLeg) -> Result<MigrationRequest> {
        let (from, to, direction) = match leg {
            MigrationLeg::Forward => (&self.source, &self.destination, MappingDirection::There),
            MigrationLeg::Return => (&self.destination, &self.source, MappingDirection::Back),
        };
        Ok(MigrationRequest::new(leg, from.clone(), to.clone(), self.deadline)
            .with_options(self.options.clone())
            .with_adapter_mapping(self.mapping(direction)?))
    }
}

#[async_trait]
impl MigrationDriver for LocalMigrationDriver {
    fn topology(&self) -> Topology {
        Topology::Single
    }

    fn partition(&self) -> &str {
        &self.orchestrator.session().partition().name
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
        let session = self.orchestrator.session();
        verify_mover_service_partitions(session, session, &self.vios, &self.source, &self.destination)
            .await
    }

    async fn forward(&self) -> Result<MigrationOutcome> {
        let request = self.request(MigrationLeg::Forward)?;
        self.orchestrator.migrate(&request).await
    }

    async fn reverse(&self) -> Result<MigrationOutcome> {
        let request = self.request(MigrationLeg::Return)?;
        self.orchestrator.migrate(&request).await
    }
}

/// Result of one leg.
#[derive(Debug, Clone, Serialize)]
pub struct LegReport {
    pub leg: MigrationLeg,
    pub source: ManagedSystem,
    pub destination: ManagedSystem,
    pub outcome: MigrationOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

/// Summary of a completed round trip.
#[derive(Debug, Clone, Serialize)]
pub struct RoundTripReport {
    pub topology: Topology,
    pub partition: String,
    pub legs: Vec<LegReport>,
}

impl RoundTripReport {
    /// Whether every leg ended with the partition where it was sent.
    pub fn is_success(&self) -> bool {
        self.legs.iter().all(|leg| leg.outcome.is_success())
    }
}

/// Move the partition out and back. A leg that does not succeed aborts the
/// round trip with an error tagged with that leg.
pub async fn run_round_trip(driver: &dyn MigrationDriver) -> Result<RoundTripReport> {
    driver.prepare().await?;
    let mut report = RoundTripReport {
        topology: driver.topology(),
        partition: driver.partition().to_owned(),
        legs: Vec::with_capacity(2),
    };
    for leg in [MigrationLeg::Forward, MigrationLeg::Return] {
        let (from, to) = match leg {
            MigrationLeg::Forward => (driver.source(), driver.destination()),
            MigrationLeg::Return => (driver.destination(), driver.source()),
        };
        let started_at = Utc::now();
        let started = Instant::now();
        let outcome = match leg {
            MigrationLeg::Forward => driver.forward().await?,
            MigrationLeg::Return => driver.reverse().await?,
        };
        MigrationRequest::new(leg, from.clone(), to.clone(), driver.deadline())
            .check(driver.partition(), &outcome)?;
        report.legs.push(LegReport {
            leg,
            source: from.clone(),
            destination: to.clone(),
            outcome,
            started_at,
            elapsed_secs: started.elapsed().as_secs_f64(),
        });
    }
    log_system_event(
        Some(&LogContext::new().with_partition(driver.partition())),
        "round-trip",
        &format!("partition back on {}", driver.source()),
        SystemEventOutcome::Success,
    );
    Ok(report)
}

/// Pick the driver for the configured topology.
pub async fn driver_for(ctx: &ScenarioContext) -> Result<Box<dyn MigrationDriver>> {
    match ctx.config().scenario.topology {
        Topology::Single => {
            let plan = resolve_plan(ctx.config(), ctx.controller()).await?;
            Ok(Box::new(LocalMigrationDriver::new(ctx, plan)))
        }
        Topology::Cross => Ok(Box::new(CrossControllerCoordinator::new(ctx)?)),
    }
}
