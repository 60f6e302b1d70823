//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::fmt;

use serde::Serialize;

/// Physical host platform as named by its management controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ManagedSystem(String);

impl ManagedSystem {
    /// Wrap a controller-side managed system name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as understood by the controller CLI.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManagedSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The logical partition being moved, plus the OS address RMC diagnostics are scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Partition name on the controller.
    pub name: String,
    /// IP address of the partition's operating system.
    pub host_ip: String,
}

impl Partition {
    /// Partition identity.
    pub fn new(name: impl Into<String>, host_ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host_ip: host_ip.into(),
        }
    }
}

/// Direction of a migration within a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationLeg {
    /// Original placement to the destination system.
    Forward,
    /// Back to the original placement.
    Return,
}

impl MigrationLeg {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationLeg::Forward => "forward",
            MigrationLeg::Return => "return",
        }
    }
}

impl fmt::Display for MigrationLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort explanation of a failed migrate operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FailureDiagnosis {
    /// The partition is still listed on the system it was leaving.
    RemainsOnSource {
        /// System the partition was supposed to leave.
        managed_system: ManagedSystem,
        /// State string reported by the controller, verbatim.
        state: String,
    },
    /// Placement could not be established.
    Unknown {
        /// Any detail gathered while diagnosing.
        detail: Option<String>,
    },
}

impl fmt::Display for FailureDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDiagnosis::RemainsOnSource {
                managed_system,
                state,
            } => write!(
                f,
                "partition is still on managed system {} in {} state",
                managed_system, state
            ),
            FailureDiagnosis::Unknown { detail: Some(detail) } => {
                write!(f, "unknown failure ({})", detail)
            }
            FailureDiagnosis::Unknown { detail: None } => f.write_str("unknown failure"),
        }
    }
}

/// Classified result of one migrate attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "diagnosis", rename_all = "kebab-case")]
pub enum MigrationOutcome {
    /// The partition is resident on the destination.
    Success,
    /// The controller rejected or aborted the move.
    Failed(FailureDiagnosis),
    /// The migrate operation did not return before its deadline.
    TimedOut,
}

impl MigrationOutcome {
    /// Whether the partition reached the destination.
    pub fn is_success(&self) -> bool {
        matches!(self, MigrationOutcome::Success)
    }

    /// Label used in metrics and reports.
    pub fn label(&self) -> &'static str {
        match self {
            MigrationOutcome::Success => "success",
            MigrationOutcome::Failed(_) => "failed",
            MigrationOutcome::TimedOut => "timed-out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remains_on_source_diagnosis_names_system_and_state() {
        let diagnosis = FailureDiagnosis::RemainsOnSource {
            managed_system: ManagedSystem::new("srcSys"),
            state: "Migrating - Running".into(),
        };
        let text = diagnosis.to_string();
        assert!(text.contains("srcSys"));
        assert!(text.contains("Migrating - Running"));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(MigrationOutcome::Success.label(), "success");
        assert_eq!(MigrationOutcome::TimedOut.label(), "timed-out");
        assert!(!MigrationOutcome::Failed(FailureDiagnosis::Unknown { detail: None }).is_success());
    }
}
