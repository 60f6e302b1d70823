//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::time::Duration;

use lpm_transport::CommandError;
use thiserror::Error;

use crate::model::MigrationLeg;

pub type Result<T, E = LpmError> = std::result::Result<T, E>;

/// Fatal conditions that abort a migration scenario.
#[derive(Debug, Error)]
pub enum LpmError {
    #[error("host {host} of partition {partition} on managed system {managed_system} is missing required packages: {}", packages.join(", "))]
    MissingPackages {
        host: String,
        managed_system: String,
        partition: String,
        packages: Vec<String>,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("firewall service {service} on host {host} of partition {partition} on managed system {managed_system} could not be controlled: {source}")]
    FirewallControl {
        host: String,
        managed_system: String,
        partition: String,
        service: String,
        #[source]
        source: CommandError,
    },
    #[error("rsct services on host {host} of partition {partition} on managed system {managed_system} are still inoperative after a restart")]
    RsctInactive {
        host: String,
        managed_system: String,
        partition: String,
    },
    #[error("{action} on host {host} of partition {partition} on managed system {managed_system} failed: {source}")]
    HostCommand {
        action: String,
        host: String,
        managed_system: String,
        partition: String,
        #[source]
        source: CommandError,
    },
    #[error("mover service partition (MSP) for VIOS {vios} in managed system {managed_system} is not enabled for partition {partition}")]
    MspNotEnabled {
        vios: String,
        managed_system: String,
        partition: String,
    },
    #[error("RMC connection for partition {partition} on managed system {managed_system} is down after {waited:?} of recovery")]
    RmcUnavailable {
        managed_system: String,
        partition: String,
        waited: Duration,
    },
    #[error("{leg} migration of partition {partition} from {from_system} to {to_system} failed: {reason}")]
    MigrationFailed {
        leg: MigrationLeg,
        partition: String,
        from_system: String,
        to_system: String,
        reason: String,
    },
    #[error("{leg} migration of partition {partition} from {from_system} to {to_system} did not complete within {deadline:?}")]
    MigrationTimedOut {
        leg: MigrationLeg,
        partition: String,
        from_system: String,
        to_system: String,
        deadline: Duration,
    },
    #[error("{action} for partition {partition} on managed system {managed_system} failed: {source}")]
    Command {
        action: String,
        managed_system: String,
        partition: String,
        #[source]
        source: CommandError,
    },
}

impl LpmError {
    /// Wrap an unexpected command failure with the identifiers it concerns.
    pub fn command(
        action: impl Into<String>,
        managed_system: impl Into<String>,
        partition: impl Into<String>,
        source: CommandError,
    ) -> Self {
        LpmError::Command {
            action: action.into(),
            managed_system: managed_system.into(),
            partition: partition.into(),
            source,
        }
    }

    /// Leg a migration error belongs to, if any.
    pub fn leg(&self) -> Option<MigrationLeg> {
        match self {
            LpmError::MigrationFailed { leg, .. } | LpmError::MigrationTimedOut { leg, .. } => {
                Some(*leg)
            }
            _ => None,
        }
    }
}
