//! ---
//! lpm_section: "01-core-functionality"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Shared primitives and utilities for the migration harness."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, DurationSeconds, PickFirst};
use tracing::debug;

use crate::logging::LogFormat;

/// Virtual slots that can carry a dedicated vNIC. Any other slot turns
/// adapter remapping off.
pub const VNIC_SLOTS: RangeInclusive<i64> = 3..=2999;

fn default_lpm_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_ssh_port() -> u16 {
    22
}

fn default_required_packages() -> Vec<String> {
    [
        "src",
        "rsct.core",
        "rsct.core.utils",
        "rsct.basic",
        "rsct.opt.storagerm",
        "DynamicRM",
    ]
    .iter()
    .map(|pkg| (*pkg).to_owned())
    .collect()
}

fn default_firewall_service() -> String {
    "firewalld.service".to_owned()
}

fn default_first_phase_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_second_phase_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_rmc_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_rmc_command_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_diagnostic_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_rmcctrl_path() -> String {
    "/opt/rsct/bin/rmcctrl".to_owned()
}

fn default_reset_actions() -> Vec<String> {
    ["-z", "-A", "-p"].iter().map(|a| (*a).to_owned()).collect()
}

fn default_recfgct_path() -> String {
    "/usr/sbin/rsct/install/bin/recfgct".to_owned()
}

fn default_cross_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_vnic_bandwidth() -> String {
    "2".to_owned()
}

/// Primary configuration object for a migration scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpmConfig {
    #[serde(default)]
    pub scenario: ScenarioConfig,
    pub partition: PartitionConfig,
    pub host: EndpointConfig,
    pub controller: ControllerConfig,
    #[serde(default)]
    pub remote_controller: Option<EndpointConfig>,
    #[serde(default)]
    pub vios: ViosConfig,
    #[serde(default)]
    pub vnic: Option<VnicConfig>,
    #[serde(default)]
    pub preflight: PreflightConfig,
    #[serde(default)]
    pub rmc: RmcConfig,
    #[serde(default)]
    pub cross: CrossConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`LpmConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedLpmConfig {
    pub config: LpmConfig,
    pub source: PathBuf,
}

impl LpmConfig {
    pub const ENV_CONFIG_PATH: &str = "LPM_CONFIG";

    /// Load configuration from disk, respecting the `LPM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedLpmConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedLpmConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedLpmConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<LpmConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Adapter remapping is only requested when the declared slot is within
    /// [`VNIC_SLOTS`]. The adapter lists of any other slot are ignored.
    pub fn vnic_plan(&self) -> Option<&VnicConfig> {
        self.vnic
            .as_ref()
            .filter(|vnic| vnic.slot_num.is_some_and(|slot| VNIC_SLOTS.contains(&slot)))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.partition.name.trim().is_empty() {
            return Err(anyhow!("partition name must not be empty"));
        }
        if self.partition.host_ip.trim().is_empty() {
            return Err(anyhow!(
                "partition '{}' must declare the host ip used for RMC diagnostics",
                self.partition.name
            ));
        }
        self.controller.validate()?;
        if self.scenario.lpm_timeout.is_zero() {
            return Err(anyhow!("scenario.lpm_timeout must be greater than zero"));
        }
        if matches!(self.scenario.topology, Topology::Cross) && self.remote_controller.is_none() {
            return Err(anyhow!(
                "cross topology requires a [remote_controller] table"
            ));
        }
        self.rmc.validate()?;
        if let Some(vnic) = self.vnic_plan() {
            vnic.validate(&self.vios)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for LpmConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: LpmConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Which controller layout drives the migration.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One controller manages both source and destination.
    #[default]
    Single,
    /// Source and destination are managed by independent controllers.
    Cross,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Single => "single",
            Topology::Cross => "cross",
        }
    }
}

impl std::str::FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "local" => Ok(Topology::Single),
            "cross" => Ok(Topology::Cross),
            other => Err(format!("unknown topology: {}", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub topology: Topology,
    /// Deadline applied to each migrate operation.
    #[serde(default = "default_lpm_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub lpm_timeout: Duration,
    /// Extra arguments appended verbatim to the migrate command.
    #[serde(default)]
    pub options: Option<String>,
    /// Run a validate-only pass before each real move.
    #[serde(default)]
    pub validate_first: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            lpm_timeout: default_lpm_timeout(),
            options: None,
            validate_first: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub name: String,
    pub host_ip: String,
}

/// Address and credentials of a host or controller reachable over SSH.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: default_ssh_port(),
            username: username.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    pub managed_system: String,
    pub target_managed_system: String,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.managed_system.trim().is_empty() || self.target_managed_system.trim().is_empty() {
            return Err(anyhow!(
                "controller {} must declare both managed_system and target_managed_system",
                self.endpoint.address
            ));
        }
        if self.managed_system == self.target_managed_system {
            return Err(anyhow!(
                "source and target managed system are both '{}'",
                self.managed_system
            ));
        }
        Ok(())
    }
}

/// VIOS partitions taking part in the move, per side.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ViosConfig {
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub target: Vec<String>,
}

impl ViosConfig {
    pub fn is_declared(&self) -> bool {
        !self.source.is_empty() && !self.target.is_empty()
    }
}

/// Dedicated vNIC continuity declared for the migration.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VnicConfig {
    #[serde(default)]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub slot_num: Option<i64>,
    #[serde(default = "default_vnic_bandwidth")]
    pub bandwidth: String,
    #[serde(default)]
    pub adapters: Vec<String>,
    #[serde(default)]
    pub target_adapters: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub target_ports: Vec<String>,
}

impl VnicConfig {
    pub fn validate(&self, vios: &ViosConfig) -> Result<()> {
        let count = self.adapters.len();
        if count == 0 {
            return Err(anyhow!("vnic slot declared without any adapters"));
        }
        let lists = [
            ("target_adapters", self.target_adapters.len()),
            ("ports", self.ports.len()),
            ("target_ports", self.target_ports.len()),
        ];
        for (name, len) in lists {
            if len != count {
                return Err(anyhow!(
                    "vnic.{} lists {} entries but {} adapters are declared",
                    name,
                    len,
                    count
                ));
            }
        }
        if vios.source.len() < count || vios.target.len() < count {
            return Err(anyhow!(
                "vnic mapping needs one source and one target VIOS per adapter ({} adapters)",
                count
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    #[serde(default = "default_required_packages")]
    pub required_packages: Vec<String>,
    #[serde(default = "default_firewall_service")]
    pub firewall_service: String,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            required_packages: default_required_packages(),
            firewall_service: default_firewall_service(),
        }
    }
}

/// Timings and commands used to recover the RMC channel.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RmcConfig {
    #[serde(default = "default_first_phase_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub first_phase_timeout: Duration,
    #[serde(default = "default_second_phase_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub second_phase_timeout: Duration,
    #[serde(default = "default_rmc_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_rmc_command_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub command_timeout: Duration,
    #[serde(default = "default_diagnostic_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub diagnostic_timeout: Duration,
    #[serde(default = "default_rmcctrl_path")]
    pub rmcctrl_path: String,
    #[serde(default = "default_reset_actions")]
    pub reset_actions: Vec<String>,
    #[serde(default = "default_recfgct_path")]
    pub recfgct_path: String,
}

impl RmcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.first_phase_timeout.is_zero() || self.second_phase_timeout.is_zero() {
            return Err(anyhow!("rmc phase timeouts must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("rmc.poll_interval must be greater than zero"));
        }
        Ok(())
    }

    /// Upper bound on the time spent polling before RMC is declared unavailable.
    pub fn total_wait(&self) -> Duration {
        self.first_phase_timeout + self.second_phase_timeout
    }
}

impl Default for RmcConfig {
    fn default() -> Self {
        Self {
            first_phase_timeout: default_first_phase_timeout(),
            second_phase_timeout: default_second_phase_timeout(),
            poll_interval: default_rmc_poll_interval(),
            command_timeout: default_rmc_command_timeout(),
            diagnostic_timeout: default_diagnostic_timeout(),
            rmcctrl_path: default_rmcctrl_path(),
            reset_actions: default_reset_actions(),
            recfgct_path: default_recfgct_path(),
        }
    }
}

/// How the cross-controller path decides the remote move has finished.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionMode {
    /// Sleep for the whole deadline before checking the destination.
    #[default]
    FixedSleep,
    /// Poll destination residency until the deadline.
    Poll,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossConfig {
    #[serde(default)]
    pub completion: CompletionMode,
    #[serde(default = "default_cross_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
}

impl Default for CrossConfig {
    fn default() -> Self {
        Self {
            completion: CompletionMode::default(),
            poll_interval: default_cross_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [partition]
        name = "lpar01"
        host_ip = "10.0.0.5"

        [host]
        address = "10.0.0.5"
        username = "root"

        [controller]
        address = "hmc01"
        username = "hscroot"
        password = "abc123"
        managed_system = "srcSys"
        target_managed_system = "dstSys"
    "#;

    #[test]
    fn minimal_config_applies_defaults() {
        let config: LpmConfig = MINIMAL.parse().unwrap();
        assert_eq!(config.scenario.topology, Topology::Single);
        assert_eq!(config.scenario.lpm_timeout, Duration::from_secs(300));
        assert_eq!(config.rmc.first_phase_timeout, Duration::from_secs(60));
        assert_eq!(config.rmc.second_phase_timeout, Duration::from_secs(300));
        assert_eq!(config.rmc.reset_actions, vec!["-z", "-A", "-p"]);
        assert_eq!(config.preflight.required_packages.len(), 6);
        assert_eq!(config.controller.endpoint.port, 22);
        assert!(config.vnic_plan().is_none());
    }

    #[test]
    fn slot_number_accepts_string_or_integer() {
        let quoted = format!(
            "{MINIMAL}\n[vios]\nsource = [\"vios1\"]\ntarget = [\"vios2\"]\n[vnic]\nslot_num = \"150\"\nadapters = [\"U78D3.001\"]\ntarget_adapters = [\"U78D4.001\"]\nports = [\"0\"]\ntarget_ports = [\"1\"]\n"
        );
        let config: LpmConfig = quoted.parse().unwrap();
        assert_eq!(config.vnic_plan().unwrap().slot_num, Some(150));

        let bare = quoted.replace("\"150\"", "150");
        let config: LpmConfig = bare.parse().unwrap();
        assert_eq!(config.vnic_plan().unwrap().slot_num, Some(150));
        assert_eq!(config.vnic_plan().unwrap().bandwidth, "2");
    }

    #[test]
    fn cross_topology_requires_remote_controller() {
        let content = format!("[scenario]\ntopology = \"cross\"\n{MINIMAL}");
        let err = content.parse::<LpmConfig>().unwrap_err();
        assert!(err.to_string().contains("remote_controller"));
    }

    #[test]
    fn vnic_lists_must_line_up() {
        let content = format!(
            "{MINIMAL}\n[vios]\nsource = [\"vios1\"]\ntarget = [\"vios2\"]\n[vnic]\nslot_num = 150\nadapters = [\"a\", \"b\"]\ntarget_adapters = [\"c\"]\nports = [\"0\", \"1\"]\ntarget_ports = [\"0\", \"1\"]\n"
        );
        let err = content.parse::<LpmConfig>().unwrap_err();
        assert!(err.to_string().contains("target_adapters"));
    }

    #[test]
    fn out_of_range_slot_skips_adapter_checks() {
        for slot in ["0", "2", "3000", "4096", "-1"] {
            let content = format!("{MINIMAL}\n[vnic]\nslot_num = {slot}\n");
            let config: LpmConfig = content.parse().unwrap();
            assert!(config.vnic_plan().is_none(), "slot {slot}");
            assert!(config.vnic.is_some());
        }

        let mismatched = format!(
            "{MINIMAL}\n[vnic]\nslot_num = \"4096\"\nadapters = [\"a\", \"b\"]\ntarget_adapters = [\"c\"]\n"
        );
        assert!(mismatched.parse::<LpmConfig>().unwrap().vnic_plan().is_none());
    }

    #[test]
    fn identical_managed_systems_are_rejected() {
        let content = MINIMAL.replace("dstSys", "srcSys");
        assert!(content.parse::<LpmConfig>().is_err());
    }
}
