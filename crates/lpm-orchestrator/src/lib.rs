//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! Live partition migration state machine: host preflight, RMC health with
//! bounded recovery, vNIC adapter remapping, the migrate operation itself and
//! the single- and cross-controller round trips built on top of it.

pub mod context;
pub mod controller;
pub mod cross;
pub mod driver;
pub mod error;
pub mod host;
pub mod migration;
pub mod model;
pub mod preflight;
pub mod rmc;
pub mod vnic;

pub use context::ScenarioContext;
pub use controller::{ControllerSession, MigrateCommand, MigrateOperation};
pub use cross::CrossControllerCoordinator;
pub use driver::{driver_for, run_round_trip, LegReport, LocalMigrationDriver, MigrationDriver, RoundTripReport};
pub use error::{LpmError, Result};
pub use host::{HostSession, OsLevel, PackageManager};
pub use migration::{MigrationOrchestrator, MigrationRequest};
pub use model::{FailureDiagnosis, ManagedSystem, MigrationLeg, MigrationOutcome, Partition};
pub use preflight::{PreflightReport, PreflightTarget, PreflightValidator};
pub use rmc::{confirms_rmc, ConnectionHealthMonitor, RecoveryPhase};
pub use vnic::{
    resolve_plan, AdapterMapping, AdapterMappingBuilder, AdapterTuple, MappingDirection, SideAdapters, VnicPlan,
};
