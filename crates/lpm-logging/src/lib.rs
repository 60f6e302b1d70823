//! ---
//! lpm_section: "03-logging"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Structured logging context for migration scenarios."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Every event emitted while driving a migration carries the managed system,
//! partition, controller and leg it concerns, so a failed run can be traced
//! back to the exact remote step from the log alone.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Managed system the event concerns.
    pub managed_system: Option<&'a str>,
    /// Logical partition being migrated.
    pub partition: Option<&'a str>,
    /// Management controller address issuing the commands.
    pub controller: Option<&'a str>,
    /// Migration leg (`forward` or `return`).
    pub leg: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a managed system identifier.
    pub fn with_managed_system(mut self, managed_system: &'a str) -> Self {
        self.managed_system = Some(managed_system);
        self
    }

    /// Attach the partition name.
    pub fn with_partition(mut self, partition: &'a str) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Attach a controller address.
    pub fn with_controller(mut self, controller: &'a str) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Attach the migration leg.
    pub fn with_leg(mut self, leg: &'a str) -> Self {
        self.leg = Some(leg);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The step completed successfully.
    Success,
    /// The step failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event (`preflight`, `rmc.recovery`, `migration.forward`...).
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    match outcome {
        SystemEventOutcome::Success => tracing::info!(
            event,
            outcome = outcome.as_str(),
            managed_system = ctx.managed_system.unwrap_or(""),
            partition = ctx.partition.unwrap_or(""),
            controller = ctx.controller.unwrap_or(""),
            leg = ctx.leg.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::error!(
            event,
            outcome = outcome.as_str(),
            managed_system = ctx.managed_system.unwrap_or(""),
            partition = ctx.partition.unwrap_or(""),
            controller = ctx.controller.unwrap_or(""),
            leg = ctx.leg.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic() {
        init();
        init();
    }

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_managed_system("srcSys")
            .with_partition("lpar01");
        lpm_info!(context = ctx.clone(), "partition resident");
        lpm_debug!("debug message");
        lpm_warn!(context = ctx.clone().with_leg("forward"), "rmc inactive");
        lpm_error!(context = ctx, "exit code: {}", 3);
    }

    #[test]
    fn system_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_controller("hmc01");
        log_system_event(
            Some(&ctx),
            "migration.forward",
            "partition moved",
            SystemEventOutcome::Success,
        );
        log_system_event(
            None,
            "migration.return",
            "partition stuck",
            SystemEventOutcome::Fault,
        );
    }
}
