//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Live partition migration drivers and their collaborators."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! Host-side preconditions checked before every migrate operation.

use lpm_common::config::PreflightConfig;
use lpm_logging::{log_system_event, lpm_info, lpm_warn, LogContext, SystemEventOutcome};
use lpm_transport::CommandError;

use crate::error::{LpmError, Result};
use crate::host::{HostSession, OsLevel, DEFAULT_HOST_TIMEOUT};
use crate::model::{ManagedSystem, Partition};

/// `systemctl status` exit code for a unit that is loaded but not running.
pub const SERVICE_NOT_RUNNING: i32 = 3;

const RSCT_STATUS: &str = "lssrc -a | grep 'rsct \\| rsct_rm'";
const RSCT_START: &str = "startsrc -g rsct_rm; startsrc -g rsct";
const RSCT_RECHECK: &str = "lssrc -a";
const INOPERATIVE: &str = "inoperative";

/// What preflight found and changed on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub os_level: OsLevel,
    /// The firewall was running and has been stopped.
    pub firewall_was_running: bool,
    /// RSCT subsystems were inoperative and have been restarted.
    pub rsct_restarted: bool,
}

/// The host under check, with the managed system and partition its errors name.
#[derive(Debug, Clone, Copy)]
pub struct PreflightTarget<'a> {
    pub host: &'a HostSession,
    pub managed_system: &'a ManagedSystem,
    pub partition: &'a Partition,
}

impl PreflightTarget<'_> {
    fn address(&self) -> String {
        self.host.address().to_owned()
    }

    fn log_context(&self) -> LogContext {
        LogContext::new()
            .with_managed_system(self.managed_system.as_str())
            .with_partition(&self.partition.name)
            .with_controller(self.host.address())
    }

    fn host_command(&self, action: impl Into<String>, source: CommandError) -> LpmError {
        LpmError::HostCommand {
            action: action.into(),
            host: self.address(),
            managed_system: self.managed_system.to_string(),
            partition: self.partition.name.clone(),
            source,
        }
    }
}

/// Verifies that a host can take part in a migration.
#[derive(Debug, Clone)]
pub struct PreflightValidator {
    config: PreflightConfig,
}

impl PreflightValidator {
    pub fn new(config: PreflightConfig) -> Self {
        Self { config }
    }

    /// Packages, firewall and RSCT, in that order. Any failure aborts.
    pub async fn validate(
        &self,
        host: &HostSession,
        managed_system: &ManagedSystem,
        partition: &Partition,
    ) -> Result<PreflightReport> {
        let target = PreflightTarget {
            host,
            managed_system,
            partition,
        };
        let ctx = target.log_context();
        let outcome = async {
            let os_level = self.os_level(&target).await?;
            self.check_packages(&target, &os_level).await?;
            let firewall_was_running = self.stop_firewall(&target).await?;
            let rsct_restarted = self.ensure_rsct(&target).await?;
            Ok::<_, LpmError>(PreflightReport {
                os_level,
                firewall_was_running,
                rsct_restarted,
            })
        }
        .await;

        match outcome {
            Ok(report) => {
                log_system_event(
                    Some(&ctx),
                    "preflight",
                    "host is ready for migration",
                    SystemEventOutcome::Success,
                );
                Ok(report)
            }
            Err(err) => {
                log_system_event(
                    Some(&ctx),
                    "preflight",
                    &err.to_string(),
                    SystemEventOutcome::Fault,
                );
                Err(err)
            }
        }
    }

    /// OS level of the host; a host without an os-release `ID` cannot be checked.
    pub async fn os_level(&self, target: &PreflightTarget<'_>) -> Result<OsLevel> {
        target
            .host
            .os_level()
            .await
            .map_err(|source| target.host_command("reading /etc/os-release", source))?
            .ok_or_else(|| {
                LpmError::Configuration(format!(
                    "host {} of partition {} on managed system {} does not report an ID in /etc/os-release",
                    target.host.address(),
                    target.partition.name,
                    target.managed_system
                ))
            })
    }

    /// Query every required package and report the full missing set.
    pub async fn check_packages(&self, target: &PreflightTarget<'_>, os: &OsLevel) -> Result<()> {
        let mut missing = Vec::new();
        for package in &self.config.required_packages {
            let installed = target
                .host
                .package_installed(os, package)
                .await
                .map_err(|source| target.host_command(format!("querying package {}", package), source))?;
            if !installed {
                missing.push(package.clone());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        Err(LpmError::MissingPackages {
            host: target.address(),
            managed_system: target.managed_system.to_string(),
            partition: target.partition.name.clone(),
            packages: missing,
        })
    }

    /// Stop the firewall if it is running. Returns whether a stop was issued.
    pub async fn stop_firewall(&self, target: &PreflightTarget<'_>) -> Result<bool> {
        let host = target.host;
        let service = &self.config.firewall_service;
        let status = host
            .run(&format!("systemctl status {}", service), DEFAULT_HOST_TIMEOUT)
            .await;
        match status {
            Ok(_) => {}
            Err(err) if err.exit_code() == Some(SERVICE_NOT_RUNNING) => {
                lpm_info!("{} is not running on {}", service, host.address());
                return Ok(false);
            }
            Err(source) => return Err(self.firewall_error(target, source)),
        }

        host.run(&format!("systemctl stop {}", service), DEFAULT_HOST_TIMEOUT)
            .await
            .map_err(|source| self.firewall_error(target, source))?;
        lpm_info!("stopped {} on {}", service, host.address());
        Ok(true)
    }

    fn firewall_error(&self, target: &PreflightTarget<'_>, source: CommandError) -> LpmError {
        LpmError::FirewallControl {
            host: target.address(),
            managed_system: target.managed_system.to_string(),
            partition: target.partition.name.clone(),
            service: self.config.firewall_service.clone(),
            source,
        }
    }

    /// Restart RSCT subsystems once if any is inoperative.
    pub async fn ensure_rsct(&self, target: &PreflightTarget<'_>) -> Result<bool> {
        if !rsct_inoperative(target, RSCT_STATUS).await? {
            return Ok(false);
        }
        lpm_warn!(
            context = target.log_context(),
            "rsct subsystems inoperative, restarting"
        );
        target
            .host
            .run(RSCT_START, DEFAULT_HOST_TIMEOUT)
            .await
            .map_err(|source| target.host_command("starting rsct subsystems", source))?;
        if rsct_inoperative(target, RSCT_RECHECK).await? {
            return Err(LpmError::RsctInactive {
                host: target.address(),
                managed_system: target.managed_system.to_string(),
                partition: target.partition.name.clone(),
            });
        }
        Ok(true)
    }
}

async fn rsct_inoperative(target: &PreflightTarget<'_>, command: &str) -> Result<bool> {
    match target.host.run(command, DEFAULT_HOST_TIMEOUT).await {
        Ok(output) => Ok(output.contains(INOPERATIVE)),
        // grep exits 1 when nothing matches
        Err(CommandError::Failed { output, .. }) => Ok(output.contains(INOPERATIVE)),
        Err(source) => Err(target.host_command("querying rsct subsystems", source)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lpm_transport::{ScriptedReply, ScriptedShell};

    use super::*;

    const RHEL: &str = "ID=\"rhel\"\nVERSION_ID=\"9.4\"\n";

    fn host(shell: ScriptedShell) -> (HostSession, Arc<ScriptedShell>) {
        let shell = Arc::new(shell.with("os-release", ScriptedReply::ok(RHEL)));
        (HostSession::new("10.0.0.5", shell.clone()), shell)
    }

    fn validator() -> PreflightValidator {
        PreflightValidator::new(PreflightConfig::default())
    }

    fn system() -> ManagedSystem {
        ManagedSystem::new("srcSys")
    }

    fn partition() -> Partition {
        Partition::new("lpar01", "10.0.0.5")
    }

    fn assert_names_scope(err: &LpmError) {
        let message = err.to_string();
        assert!(message.contains("srcSys"), "{message}");
        assert!(message.contains("lpar01"), "{message}");
    }

    #[tokio::test]
    async fn missing_package_set_is_reported_in_full() {
        let (host, _) = host(
            ScriptedShell::new("root@10.0.0.5")
                .with("rpm -q DynamicRM", ScriptedReply::exit(1))
                .with("rpm -q rsct.basic", ScriptedReply::exit(1)),
        );
        let (system, partition) = (system(), partition());
        let target = PreflightTarget {
            host: &host,
            managed_system: &system,
            partition: &partition,
        };
        let os = host.os_level().await.unwrap().unwrap();
        let err = validator().check_packages(&target, &os).await.unwrap_err();
        assert_names_scope(&err);
        match err {
            LpmError::MissingPackages { packages, .. } => {
                assert_eq!(packages, vec!["rsct.basic", "DynamicRM"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn firewall_not_running_is_absorbed() {
        let (host, shell) = host(
            ScriptedShell::new("root@10.0.0.5").with("systemctl status", ScriptedReply::exit(3)),
        );
        let (system, partition) = (system(), partition());
        let target = PreflightTarget {
            host: &host,
            managed_system: &system,
            partition: &partition,
        };
        assert!(!validator().stop_firewall(&target).await.unwrap());
        assert_eq!(shell.count("systemctl stop"), 0);
    }

    #[tokio::test]
    async fn running_firewall_is_stopped() {
        let (host, shell) = host(ScriptedShell::new("root@10.0.0.5"));
        let (system, partition) = (system(), partition());
        let target = PreflightTarget {
            host: &host,
            managed_system: &system,
            partition: &partition,
        };
        assert!(validator().stop_firewall(&target).await.unwrap());
        assert_eq!(shell.count("systemctl stop firewalld.service"), 1);
    }

    #[tokio::test]
    async fn other_firewall_status_codes_abort() {
        let (system, partition) = (system(), partition());
        for code in [1, 4, 5] {
            let (host, _) = host(
                ScriptedShell::new("root@10.0.0.5")
                    .with("systemctl status", ScriptedReply::exit(code)),
            );
            let target = PreflightTarget {
                host: &host,
                managed_system: &system,
                partition: &partition,
            };
            let err = validator().stop_firewall(&target).await.unwrap_err();
            assert!(matches!(err, LpmError::FirewallControl { .. }), "code {code}");
            assert_names_scope(&err);
        }
    }

    #[tokio::test]
    async fn inoperative_rsct_is_restarted_once() {
        let (host, shell) = host(
            ScriptedShell::new("root@10.0.0.5")
                .with("grep 'rsct", ScriptedReply::ok(" rsct_rm  rsct_rm  inoperative"))
                .with("lssrc -a", ScriptedReply::ok(" rsct_rm  rsct_rm  12345  active")),
        );
        let (system, partition) = (system(), partition());
        let target = PreflightTarget {
            host: &host,
            managed_system: &system,
            partition: &partition,
        };
        assert!(validator().ensure_rsct(&target).await.unwrap());
        assert_eq!(shell.count("startsrc"), 1);
    }

    #[tokio::test]
    async fn rsct_still_inoperative_is_fatal() {
        let (host, _) = host(
            ScriptedShell::new("root@10.0.0.5")
                .with("lssrc -a", ScriptedReply::ok(" rsct  rsct  inoperative")),
        );
        let err = validator()
            .validate(&host, &system(), &partition())
            .await
            .unwrap_err();
        assert!(matches!(err, LpmError::RsctInactive { .. }));
        assert_names_scope(&err);
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_host_names_system_and_partition() {
        let shell = Arc::new(ScriptedShell::new("root@10.0.0.5").with("os-release", ScriptedReply::Hang));
        let host = HostSession::new("10.0.0.5", shell);
        let err = validator()
            .validate(&host, &system(), &partition())
            .await
            .unwrap_err();
        assert!(matches!(err, LpmError::HostCommand { .. }));
        assert_names_scope(&err);
    }

    #[tokio::test]
    async fn os_release_without_id_names_system_and_partition() {
        let shell = Arc::new(ScriptedShell::new("root@10.0.0.5").with("os-release", ScriptedReply::ok("NAME=Linux\n")));
        let host = HostSession::new("10.0.0.5", shell);
        let err = validator()
            .validate(&host, &system(), &partition())
            .await
            .unwrap_err();
        assert!(matches!(err, LpmError::Configuration(_)));
        assert_names_scope(&err);
    }

    #[tokio::test]
    async fn healthy_host_passes() {
        let (host, _) = host(
            ScriptedShell::new("root@10.0.0.5")
                .with("systemctl status", ScriptedReply::exit(3))
                .with("lssrc -a", ScriptedReply::ok(" rsct  rsct  4242  active")),
        );
        let report = validator()
            .validate(&host, &system(), &partition())
            .await
            .unwrap();
        assert!(!report.firewall_was_running);
        assert!(!report.rsct_restarted);
        assert_eq!(report.os_level.id, "rhel");
    }
}
