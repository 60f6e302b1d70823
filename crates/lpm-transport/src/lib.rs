//! ---
//! lpm_section: "05-external-interfaces"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Command channels to hosts and management controllers."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Host and controller command channels.
//!
//! The orchestrator never talks to a process or a socket directly: every
//! remote interaction goes through [`RemoteShell::run`], which either yields
//! the command's output or a [`CommandError`] carrying the exit status.
//! Interpreting specific exit codes is left to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lpm_common::config::EndpointConfig;
use thiserror::Error;

pub mod scripted;
pub mod ssh;

pub use scripted::{ScriptedConnector, ScriptedReply, ScriptedShell};
pub use ssh::{SshConnector, SshShell};

/// Captured standard output of a successful remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    text: String,
}

impl CommandOutput {
    /// Wrap raw command output.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Raw output as returned by the remote side.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Output split into lines with trailing carriage returns removed.
    pub fn lines(&self) -> Vec<&str> {
        self.text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .collect()
    }

    /// First non-empty line, trimmed.
    pub fn first_line(&self) -> Option<&str> {
        self.text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }

    /// Whether the raw output contains the given fragment.
    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Failure of a single remote command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The command ran and exited with a non-zero status.
    #[error("command `{command}` on {target} exited with status {exit_code}")]
    Failed {
        /// Host or controller the command ran on.
        target: String,
        /// Command line as sent.
        command: String,
        /// Exit status reported by the remote side.
        exit_code: i32,
        /// Combined output captured before exit.
        output: String,
    },
    /// The command did not complete before its deadline.
    #[error("command `{command}` on {target} did not finish within {timeout:?}")]
    TimedOut {
        /// Host or controller the command ran on.
        target: String,
        /// Command line as sent.
        command: String,
        /// Deadline that expired.
        timeout: Duration,
    },
    /// The channel itself could not be established or broke.
    #[error("transport to {target} failed: {reason}")]
    Transport {
        /// Host or controller that could not be reached.
        target: String,
        /// Description of the transport failure.
        reason: String,
    },
}

impl CommandError {
    /// Exit status for [`CommandError::Failed`], `None` otherwise.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Whether the failure was a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::TimedOut { .. })
    }
}

/// Unified interface for running commands on a host or a management controller.
#[async_trait]
pub trait RemoteShell: Send + Sync + fmt::Debug {
    /// Human readable identity of the remote side (usually `user@address`).
    fn target(&self) -> &str;

    /// Run a command, blocking the caller until it exits or `timeout` expires.
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, CommandError>;
}

/// Shared handle to a command channel.
pub type SharedShell = Arc<dyn RemoteShell>;

/// Builds command channels for endpoints that are only known at run time,
/// such as the second controller of a cross-controller migration.
pub trait ShellConnector: Send + Sync + fmt::Debug {
    /// Open a channel to the given endpoint.
    fn connect(&self, endpoint: &EndpointConfig) -> Result<SharedShell, CommandError>;
}
