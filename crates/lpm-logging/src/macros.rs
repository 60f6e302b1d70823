//! ---
//! lpm_section: "03-logging"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Structured logging context for migration scenarios."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---

#[doc(hidden)]
#[macro_export]
macro_rules! __lpm_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            managed_system = ctx.managed_system.unwrap_or(""),
            partition = ctx.partition.unwrap_or(""),
            controller = ctx.controller.unwrap_or(""),
            leg = ctx.leg.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with migration context.
#[macro_export]
macro_rules! lpm_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__lpm_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__lpm_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with migration context.
#[macro_export]
macro_rules! lpm_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__lpm_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__lpm_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with migration context.
#[macro_export]
macro_rules! lpm_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__lpm_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__lpm_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with migration context.
#[macro_export]
macro_rules! lpm_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__lpm_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__lpm_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
