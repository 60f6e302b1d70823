//! ---
//! lpm_section: "05-external-interfaces"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Command channels to hosts and management controllers."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! In-memory command channel answering from a script.
//!
//! Each rule pairs a command fragment with a queue of replies. A command is
//! answered by the most specific (longest) fragment it contains; the rule's
//! replies are consumed in order and the last one keeps repeating. Commands
//! that match no rule succeed with empty output.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lpm_common::config::EndpointConfig;
use parking_lot::Mutex;
use tracing::debug;

use crate::{CommandError, CommandOutput, RemoteShell, SharedShell, ShellConnector};

/// Canned answer to a scripted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Exit 0 with the given output.
    Output(String),
    /// Non-zero exit with the given status and output.
    Exit {
        /// Exit status.
        code: i32,
        /// Output captured before exit.
        output: String,
    },
    /// Never completes; the caller's deadline expires.
    Hang,
}

impl ScriptedReply {
    /// Successful reply.
    pub fn ok(output: impl Into<String>) -> Self {
        ScriptedReply::Output(output.into())
    }

    /// Failing reply with empty output.
    pub fn exit(code: i32) -> Self {
        ScriptedReply::Exit {
            code,
            output: String::new(),
        }
    }
}

#[derive(Debug)]
struct Rule {
    fragment: String,
    replies: VecDeque<ScriptedReply>,
    last: ScriptedReply,
}

impl Rule {
    fn next_reply(&mut self) -> ScriptedReply {
        match self.replies.pop_front() {
            Some(reply) => {
                self.last = reply.clone();
                reply
            }
            None => self.last.clone(),
        }
    }
}

/// Command channel that replays scripted answers and records every command.
#[derive(Debug)]
pub struct ScriptedShell {
    target: String,
    rules: Mutex<Vec<Rule>>,
    history: Mutex<Vec<String>>,
}

impl ScriptedShell {
    /// Empty script for the given target.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            rules: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Builder form of [`ScriptedShell::script`].
    pub fn with(self, fragment: impl Into<String>, reply: ScriptedReply) -> Self {
        self.script(fragment, reply);
        self
    }

    /// Queue a reply for commands containing `fragment`.
    pub fn script(&self, fragment: impl Into<String>, reply: ScriptedReply) {
        let fragment = fragment.into();
        let mut rules = self.rules.lock();
        if let Some(rule) = rules.iter_mut().find(|rule| rule.fragment == fragment) {
            rule.replies.push_back(reply);
            return;
        }
        rules.push(Rule {
            fragment,
            last: reply.clone(),
            replies: VecDeque::from([reply]),
        });
    }

    /// Every command received so far, in order.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    /// Number of received commands containing `fragment`.
    pub fn count(&self, fragment: &str) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|command| command.contains(fragment))
            .count()
    }

    fn reply_for(&self, command: &str) -> Option<ScriptedReply> {
        let mut rules = self.rules.lock();
        rules
            .iter_mut()
            .filter(|rule| command.contains(&rule.fragment))
            .max_by_key(|rule| rule.fragment.len())
            .map(Rule::next_reply)
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    fn target(&self) -> &str {
        &self.target
    }

    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, CommandError> {
        self.history.lock().push(command.to_owned());
        let reply = self
            .reply_for(command)
            .unwrap_or_else(|| ScriptedReply::Output(String::new()));
        debug!(target_host = %self.target, command, ?reply, "scripted reply");
        match reply {
            ScriptedReply::Output(text) => Ok(CommandOutput::new(text)),
            ScriptedReply::Exit { code, output } => Err(CommandError::Failed {
                target: self.target.clone(),
                command: command.to_owned(),
                exit_code: code,
                output,
            }),
            ScriptedReply::Hang => {
                tokio::time::sleep(timeout).await;
                Err(CommandError::TimedOut {
                    target: self.target.clone(),
                    command: command.to_owned(),
                    timeout,
                })
            }
        }
    }
}

/// Hands out pre-registered [`ScriptedShell`]s by endpoint address.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    shells: Mutex<HashMap<String, Arc<ScriptedShell>>>,
    connections: Mutex<Vec<EndpointConfig>>,
}

impl ScriptedConnector {
    /// Connector with no registered endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the shell returned for `address`.
    pub fn register(&self, address: impl Into<String>, shell: Arc<ScriptedShell>) {
        self.shells.lock().insert(address.into(), shell);
    }

    /// Endpoints passed to [`ShellConnector::connect`], in order.
    pub fn connections(&self) -> Vec<EndpointConfig> {
        self.connections.lock().clone()
    }
}

impl ShellConnector for ScriptedConnector {
    fn connect(&self, endpoint: &EndpointConfig) -> Result<SharedShell, CommandError> {
        self.connections.lock().push(endpoint.clone());
        let shell = self.shells.lock().get(&endpoint.address).cloned();
        match shell {
            Some(shell) => Ok(shell),
            None => Err(CommandError::Transport {
                target: endpoint.address.clone(),
                reason: "no scripted shell registered".to_owned(),
            }),
        }
    }
}
