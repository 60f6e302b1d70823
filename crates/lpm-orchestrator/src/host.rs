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

use lpm_transport::{CommandError, CommandOutput, SharedShell};
use tracing::debug;

use crate::error::Result;

/// Default deadline for short host-side queries.
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(60);

/// Package database used by the partition's operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Rpm,
    Dpkg,
}

/// Operating system level as reported by `/etc/os-release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsLevel {
    pub id: String,
    pub version: Option<String>,
    pub package_manager: PackageManager,
}

impl OsLevel {
    /// Parse the `KEY=value` lines of an os-release file.
    pub fn parse(os_release: &str) -> Option<Self> {
        let mut id = None;
        let mut id_like = String::new();
        let mut version = None;
        for line in os_release.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_owned();
            match key {
                "ID" => id = Some(value.to_lowercase()),
                "ID_LIKE" => id_like = value.to_lowercase(),
                "VERSION_ID" => version = Some(value),
                _ => {}
            }
        }
        let id = id.filter(|id| !id.is_empty())?;
        let debian_family = ["debian", "ubuntu"]
            .iter()
            .any(|family| id == *family || id_like.split_whitespace().any(|like| like == *family));
        let package_manager = if debian_family {
            PackageManager::Dpkg
        } else {
            PackageManager::Rpm
        };
        Some(Self {
            id,
            version,
            package_manager,
        })
    }

    fn package_query(&self, package: &str) -> String {
        match self.package_manager {
            PackageManager::Rpm => format!("rpm -q {}", package),
            PackageManager::Dpkg => format!("dpkg -s {}", package),
        }
    }
}

/// Command channel to the partition's operating system.
#[derive(Debug, Clone)]
pub struct HostSession {
    address: String,
    shell: SharedShell,
}

impl HostSession {
    pub fn new(address: impl Into<String>, shell: SharedShell) -> Self {
        Self {
            address: address.into(),
            shell,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, CommandError> {
        self.shell.run(command, timeout).await
    }

    /// Detect the OS level used to pick the package query. `None` when
    /// os-release carries no `ID`.
    pub async fn os_level(&self) -> Result<Option<OsLevel>, CommandError> {
        let output = self.run("cat /etc/os-release", DEFAULT_HOST_TIMEOUT).await?;
        let level = OsLevel::parse(output.text());
        if let Some(level) = &level {
            debug!(host = %self.address, os = %level.id, version = ?level.version, "detected os level");
        }
        Ok(level)
    }

    /// Whether `package` is installed. A failing query means it is not; an
    /// unreachable host is an error.
    pub async fn package_installed(&self, os: &OsLevel, package: &str) -> Result<bool, CommandError> {
        match self.run(&os.package_query(package), DEFAULT_HOST_TIMEOUT).await {
            Ok(_) => Ok(true),
            Err(CommandError::Failed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
