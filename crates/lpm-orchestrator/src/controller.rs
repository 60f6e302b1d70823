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
use std::time::Duration;

use lpm_common::config::EndpointConfig;
use lpm_transport::{CommandError, CommandOutput, SharedShell, ShellConnector};
use tracing::debug;

use crate::error::{LpmError, Result};
use crate::model::{ManagedSystem, Partition};

/// Default deadline for controller inventory queries.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Capability to issue commands against one management controller on behalf
/// of one partition. Holds no partition state of its own.
#[derive(Debug, Clone)]
pub struct ControllerSession {
    endpoint: EndpointConfig,
    shell: SharedShell,
    managed_system: ManagedSystem,
    partition: Partition,
}

impl ControllerSession {
    pub fn new(
        endpoint: EndpointConfig,
        shell: SharedShell,
        managed_system: ManagedSystem,
        partition: Partition,
    ) -> Self {
        Self {
            endpoint,
            shell,
            managed_system,
            partition,
        }
    }

    /// Open a session to a controller that is only known at run time.
    pub fn connect(
        connector: &dyn ShellConnector,
        endpoint: EndpointConfig,
        managed_system: ManagedSystem,
        partition: Partition,
    ) -> Result<Self> {
        let shell = connector.connect(&endpoint).map_err(|err| {
            LpmError::command(
                format!("connecting to controller {}", endpoint.address),
                managed_system.as_str(),
                partition.name.as_str(),
                err,
            )
        })?;
        debug!(controller = %endpoint.address, managed_system = %managed_system, partition = %partition.name, "controller session opened");
        Ok(Self::new(endpoint, shell, managed_system, partition))
    }

    pub fn address(&self) -> &str {
        &self.endpoint.address
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Managed system this session was opened for.
    pub fn managed_system(&self) -> &ManagedSystem {
        &self.managed_system
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, CommandError> {
        self.shell.run(command, timeout).await
    }

    async fn query(&self, system: &ManagedSystem, action: &str, command: String) -> Result<CommandOutput> {
        self.run(&command, DEFAULT_QUERY_TIMEOUT)
            .await
            .map_err(|err| LpmError::command(action, system.as_str(), self.partition.name.as_str(), err))
    }

    /// Names of all partitions defined on `system`.
    pub async fn partitions_on(&self, system: &ManagedSystem) -> Result<Vec<String>> {
        let output = self
            .query(
                system,
                "listing partitions",
                format!("lssyscfg -m {} -r lpar -F name", system),
            )
            .await?;
        Ok(output
            .lines()
            .into_iter()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Whether the session's partition is listed on `system`.
    pub async fn is_partition_on(&self, system: &ManagedSystem) -> Result<bool> {
        let names = self.partitions_on(system).await?;
        Ok(names.iter().any(|name| *name == self.partition.name))
    }

    async fn lpar_attribute(&self, system: &ManagedSystem, lpar: &str, attribute: &str) -> Result<String> {
        let output = self
            .query(
                system,
                &format!("reading {} of {}", attribute, lpar),
                format!(
                    "lssyscfg -m {} -r lpar --filter lpar_names={} -F {}",
                    system, lpar, attribute
                ),
            )
            .await?;
        output.first_line().map(str::to_owned).ok_or_else(|| {
            LpmError::Configuration(format!(
                "controller {} returned no {} for {} on managed system {} (partition {})",
                self.endpoint.address, attribute, lpar, system, self.partition.name
            ))
        })
    }

    /// State string of the session's partition on `system`, verbatim.
    pub async fn partition_state(&self, system: &ManagedSystem) -> Result<String> {
        let name = self.partition.name.clone();
        self.lpar_attribute(system, &name, "state").await
    }

    /// Numeric partition id of `lpar` (usually a VIOS) on `system`.
    pub async fn lpar_id(&self, system: &ManagedSystem, lpar: &str) -> Result<String> {
        self.lpar_attribute(system, lpar, "lpar_id").await
    }

    /// Whether `vios` has the mover service partition attribute set.
    pub async fn is_msp_enabled(&self, system: &ManagedSystem, vios: &str) -> Result<bool> {
        Ok(self.lpar_attribute(system, vios, "msp").await? == "1")
    }

    /// SR-IOV adapter id of the adapter at `location` on `system`.
    pub async fn adapter_id(&self, system: &ManagedSystem, location: &str) -> Result<String> {
        let output = self
            .query(
                system,
                &format!("resolving adapter {}", location),
                format!(
                    "lshwres -m {} -r sriov --rsubtype adapter -F phys_loc,adapter_id",
                    system
                ),
            )
            .await?;
        output
            .lines()
            .into_iter()
            .filter_map(|line| line.trim().split_once(','))
            .find(|(phys_loc, _)| *phys_loc == location)
            .map(|(_, id)| id.trim().to_owned())
            .ok_or_else(|| {
                LpmError::Configuration(format!(
                    "no SR-IOV adapter at {} on managed system {} for partition {}",
                    location, system, self.partition.name
                ))
            })
    }

    /// Ask the controller whether the partition's RMC connection is up.
    pub async fn rmc_diagnostics(
        &self,
        system: &ManagedSystem,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let command = format!(
            "diagrmc -m {} --ip {} -p {} --autocorrect",
            system, self.partition.host_ip, self.partition.name
        );
        self.run(&command, timeout).await
    }
}

/// `migrlpar` operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateOperation {
    /// Move the partition.
    Migrate,
    /// Only check that a move would be accepted.
    Validate,
}

impl MigrateOperation {
    fn flag(&self) -> &'static str {
        match self {
            MigrateOperation::Migrate => "m",
            MigrateOperation::Validate => "v",
        }
    }
}

/// Rendered `migrlpar` invocation.
#[derive(Debug, Clone)]
pub struct MigrateCommand<'a> {
    pub operation: MigrateOperation,
    pub source: &'a ManagedSystem,
    pub destination: &'a ManagedSystem,
    pub partition: &'a str,
    /// Controller managing the destination when it is not the issuing one.
    pub remote: Option<&'a EndpointConfig>,
    /// Pre-rendered adapter mapping argument, empty when no remapping applies.
    pub adapter_mapping: &'a str,
    pub options: Option<&'a str>,
}

impl fmt::Display for MigrateCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "migrlpar -o {} -m {} -t {} -p {}",
            self.operation.flag(),
            self.source,
            self.destination,
            self.partition
        )?;
        if let Some(remote) = self.remote {
            write!(f, " -u {} --ip {}", remote.username, remote.address)?;
        }
        if !self.adapter_mapping.is_empty() {
            write!(f, " {}", self.adapter_mapping)?;
        }
        if let Some(options) = self.options.map(str::trim).filter(|o| !o.is_empty()) {
            write!(f, " {}", options)?;
        }
        Ok(())
    }
}
