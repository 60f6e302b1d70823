//! ---
//! lpm_section: "01-core-functionality"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Shared primitives and utilities for the migration harness."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! Core shared primitives for the LPM harness workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the orchestrator and the control CLI.

pub mod config;
pub mod logging;

pub use config::{
    CompletionMode, ControllerConfig, CrossConfig, EndpointConfig, LoadedLpmConfig, LpmConfig,
    LoggingConfig, MetricsConfig, PartitionConfig, PreflightConfig, RmcConfig, ScenarioConfig,
    Topology, ViosConfig, VnicConfig, VNIC_SLOTS,
};
pub use logging::{init_tracing, LogFormat};
