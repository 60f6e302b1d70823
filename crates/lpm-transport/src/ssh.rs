//! ---
//! lpm_section: "05-external-interfaces"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Command channels to hosts and management controllers."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lpm_common::config::EndpointConfig;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{CommandError, CommandOutput, RemoteShell, SharedShell, ShellConnector};

/// Exit status `ssh` itself uses when the connection could not be made.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Runs each command through a fresh `ssh` process.
///
/// Password authentication goes through `sshpass -e` so the secret only
/// appears in the child environment, never on the command line.
#[derive(Debug, Clone)]
pub struct SshShell {
    endpoint: EndpointConfig,
    target: String,
}

impl SshShell {
    /// Channel to the given endpoint.
    pub fn new(endpoint: EndpointConfig) -> Self {
        let target = format!("{}@{}", endpoint.username, endpoint.address);
        Self { endpoint, target }
    }

    /// Build the local process invocation for a remote command.
    pub fn command(&self, remote_command: &str) -> Command {
        let mut cmd = match &self.endpoint.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").env("SSHPASS", password).arg("ssh");
                cmd
            }
            None => {
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };
        cmd.args([
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
        ])
        .arg("-p")
        .arg(self.endpoint.port.to_string())
        .arg(&self.target)
        .arg(remote_command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    fn target(&self) -> &str {
        &self.target
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, CommandError> {
        debug!(target_host = %self.target, command, ?timeout, "running remote command");
        let child = self
            .command(command)
            .spawn()
            .map_err(|err| CommandError::Transport {
                target: self.target.clone(),
                reason: format!("failed to spawn ssh: {err}"),
            })?;

        // Dropping the wait future on expiry drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(CommandError::Transport {
                    target: self.target.clone(),
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                warn!(target_host = %self.target, command, ?timeout, "remote command timed out");
                return Err(CommandError::TimedOut {
                    target: self.target.clone(),
                    command: command.to_owned(),
                    timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(CommandOutput::new(stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == SSH_TRANSPORT_FAILURE {
            return Err(CommandError::Transport {
                target: self.target.clone(),
                reason: stderr.trim().to_owned(),
            });
        }
        debug!(target_host = %self.target, command, exit_code, "remote command failed");
        Err(CommandError::Failed {
            target: self.target.clone(),
            command: command.to_owned(),
            exit_code,
            output: format!("{stdout}{stderr}"),
        })
    }
}

/// Opens [`SshShell`] channels on demand.
#[derive(Debug, Default, Clone)]
pub struct SshConnector;

impl ShellConnector for SshConnector {
    fn connect(&self, endpoint: &EndpointConfig) -> Result<SharedShell, CommandError> {
        if endpoint.address.trim().is_empty() {
            return Err(CommandError::Transport {
                target: endpoint.username.clone(),
                reason: "endpoint address is empty".to_owned(),
            });
        }
        Ok(Arc::new(SshShell::new(endpoint.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn key_based_endpoint_uses_batch_mode_ssh() {
        let shell = SshShell::new(EndpointConfig::new("hmc01", "hscroot"));
        let cmd = shell.command("lssyscfg -r sys -F name");
        assert_eq!(cmd.as_std().get_program(), "ssh");
        let args = args_of(&cmd);
        assert!(args.contains(&"BatchMode=yes".to_owned()));
        assert_eq!(args[args.len() - 2], "hscroot@hmc01");
        assert_eq!(args[args.len() - 1], "lssyscfg -r sys -F name");
    }

    #[test]
    fn password_endpoint_goes_through_sshpass_env() {
        let endpoint = EndpointConfig::new("hmc01", "hscroot").with_password("abc123");
        let shell = SshShell::new(endpoint);
        let cmd = shell.command("true");
        assert_eq!(cmd.as_std().get_program(), "sshpass");
        let args = args_of(&cmd);
        assert_eq!(&args[..2], &["-e".to_owned(), "ssh".to_owned()]);
        assert!(!args.iter().any(|arg| arg.contains("abc123")));
        let env: Vec<_> = cmd.as_std().get_envs().collect();
        assert!(env
            .iter()
            .any(|(key, value)| *key == "SSHPASS" && value.map(|v| v == "abc123").unwrap_or(false)));
    }

    #[test]
    fn connector_rejects_empty_address() {
        let err = SshConnector
            .connect(&EndpointConfig::new("  ", "hscroot"))
            .unwrap_err();
        assert!(matches!(err, CommandError::Transport { .. }));
    }
}
