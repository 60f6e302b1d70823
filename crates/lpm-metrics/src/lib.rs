//! ---
//! lpm_section: "03-logging"
//! lpm_subsection: "module"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Metrics collection and export utilities."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::debug;

/// Shared registry type used across the harness.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in the registry using the Prometheus text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")
}

/// Metrics published while driving migrations.
#[derive(Clone)]
pub struct MigrationMetrics {
    migrations_total: IntCounterVec,
    migration_duration_seconds: HistogramVec,
    rmc_recoveries_total: IntCounterVec,
}

impl MigrationMetrics {
    /// Register the migration metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let migrations_total = IntCounterVec::new(
            Opts::new(
                "lpm_migrations_total",
                "Migration attempts grouped by leg and classified outcome",
            ),
            &["leg", "outcome"],
        )?;
        registry.register(Box::new(migrations_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "lpm_migration_duration_seconds",
            "Wall-clock duration of a migrate operation including outcome classification",
        )
        .buckets(prometheus::exponential_buckets(1.0, 2.0, 12)?);
        let migration_duration_seconds = HistogramVec::new(histogram_opts, &["leg"])?;
        registry.register(Box::new(migration_duration_seconds.clone()))?;

        let rmc_recoveries_total = IntCounterVec::new(
            Opts::new(
                "lpm_rmc_recoveries_total",
                "RMC recovery phases entered, by managed system and phase",
            ),
            &["managed_system", "phase"],
        )?;
        registry.register(Box::new(rmc_recoveries_total.clone()))?;

        Ok(Self {
            migrations_total,
            migration_duration_seconds,
            rmc_recoveries_total,
        })
    }

    /// Count a classified migration attempt and record how long it took.
    pub fn observe_migration(&self, leg: &str, outcome: &str, duration: Duration) {
        debug!(leg, outcome, seconds = duration.as_secs_f64(), "recording migration");
        self.migrations_total
            .with_label_values(&[leg, outcome])
            .inc();
        self.migration_duration_seconds
            .with_label_values(&[leg])
            .observe(duration.as_secs_f64());
    }

    /// Count entry into an RMC recovery phase (`reset`, `reconfigure`, `exhausted`).
    pub fn record_rmc_recovery(&self, managed_system: &str, phase: &str) {
        self.rmc_recoveries_total
            .with_label_values(&[managed_system, phase])
            .inc();
    }
}

impl std::fmt::Debug for MigrationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationMetrics").finish_non_exhaustive()
    }
}
