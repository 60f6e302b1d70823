//! ---
//! lpm_section: "05-external-interfaces"
//! lpm_subsection: "binary"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Operator CLI for live partition migration round trips."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lpm_common::config::{CompletionMode, LpmConfig, Topology};
use lpm_common::logging::init_tracing;
use lpm_metrics::{encode_text, new_registry, MigrationMetrics, SharedRegistry};
use lpm_orchestrator::{
    driver_for, resolve_plan, run_round_trip, AdapterMappingBuilder, ControllerSession, ManagedSystem,
    MappingDirection, RoundTripReport, ScenarioContext,
};
use lpm_transport::{ShellConnector, SshConnector};
use tokio::signal;
use tracing::{info, warn};

mod dry_run;

use dry_run::DryRun;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Live partition migration validation harness",
    long_about = None
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Answer every remote command from a scripted healthy environment"
    )]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TopologyArg {
    Single,
    Cross,
}

impl From<TopologyArg> for Topology {
    fn from(value: TopologyArg) -> Self {
        match value {
            TopologyArg::Single => Topology::Single,
            TopologyArg::Cross => Topology::Cross,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Side {
    Source,
    Destination,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LegArg {
    There,
    Back,
}

impl From<LegArg> for MappingDirection {
    fn from(value: LegArg) -> Self {
        match value {
            LegArg::There => MappingDirection::There,
            LegArg::Back => MappingDirection::Back,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Migrate the partition to the target system and back")]
    Run {
        #[arg(long, value_enum, help = "Override the configured topology")]
        topology: Option<TopologyArg>,
        #[arg(long, value_name = "FILE", help = "Write the round trip report as JSON")]
        report: Option<PathBuf>,
    },
    #[command(about = "Check packages, firewall and RSCT on the partition's host")]
    Preflight,
    #[command(about = "Check and if needed recover the RMC connection on one side")]
    Rmc {
        #[arg(long, value_enum, default_value = "source")]
        side: Side,
    },
    #[command(about = "Print the vNIC mapping argument for one leg")]
    Vnic {
        #[arg(long, value_enum, default_value = "there")]
        leg: LegArg,
    },
    #[command(about = "Load and validate the configuration")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/lpm.toml"));
    candidates.push(PathBuf::from("/etc/lpm/lpm.toml"));

    let loaded = LpmConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Commands::Run {
        topology: Some(topology),
        ..
    } = &cli.command
    {
        config.scenario.topology = (*topology).into();
        config.validate()?;
    }
    if cli.dry_run {
        // nothing moves in a dry run, so there is nothing to wait for
        config.cross.completion = CompletionMode::Poll;
    }

    init_tracing("lpmctl", &config.logging)?;
    info!(config_path = %loaded.source.display(), topology = config.scenario.topology.as_str(), dry_run = cli.dry_run, "configuration loaded");

    if let Commands::CheckConfig = cli.command {
        print_summary(&config, &loaded.source);
        return Ok(());
    }

    let dry_run = cli.dry_run.then(|| DryRun::new(&config));
    let connector: Arc<dyn ShellConnector> = match &dry_run {
        Some(dry_run) => dry_run.connector.clone(),
        None => Arc::new(SshConnector),
    };
    let registry = new_registry();
    let metrics = if config.metrics.enabled {
        Some(MigrationMetrics::new(registry.clone())?)
    } else {
        None
    };
    let metrics_enabled = metrics.is_some();
    let ctx = ScenarioContext::connect(Arc::new(config), connector, metrics)?;

    let outcome = match cli.command {
        Commands::Run { report, .. } => run(&ctx, report.as_deref()).await,
        Commands::Preflight => preflight(&ctx).await,
        Commands::Rmc { side } => rmc(&ctx, side).await,
        Commands::Vnic { leg } => vnic(&ctx, leg.into()).await,
        Commands::CheckConfig => Ok(()),
    };

    if let Some(dry_run) = &dry_run {
        print!("{}", dry_run.transcript());
    }
    if metrics_enabled {
        print_metrics(&registry);
    }
    outcome
}

async fn run(ctx: &ScenarioContext, report_path: Option<&Path>) -> Result<()> {
    let driver = driver_for(ctx).await?;
    let report = tokio::select! {
        report = run_round_trip(driver.as_ref()) => report?,
        _ = signal::ctrl_c() => bail!("round trip interrupted"),
    };
    for leg in &report.legs {
        println!(
            "{:<8} {} -> {}: {} ({:.1}s)",
            leg.leg,
            leg.source,
            leg.destination,
            leg.outcome.label(),
            leg.elapsed_secs
        );
    }
    if let Some(path) = report_path {
        write_report(&report, path)?;
    }
    Ok(())
}

fn write_report(report: &RoundTripReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialise round trip report")?;
    fs::write(path, json).with_context(|| format!("unable to write report {}", path.display()))?;
    info!(report = %path.display(), "round trip report written");
    Ok(())
}

async fn preflight(ctx: &ScenarioContext) -> Result<()> {
    let report = ctx
        .preflight()
        .validate(ctx.host(), &ctx.source_system(), ctx.controller().partition())
        .await?;
    println!(
        "host {} ({}{}) ready: firewall stopped={}, rsct restarted={}",
        ctx.host().address(),
        report.os_level.id,
        report
            .os_level
            .version
            .as_deref()
            .map(|v| format!(" {}", v))
            .unwrap_or_default(),
        report.firewall_was_running,
        report.rsct_restarted
    );
    Ok(())
}

async fn rmc(ctx: &ScenarioContext, side: Side) -> Result<()> {
    let config = ctx.config();
    let (system, session) = match side {
        Side::Source => (ctx.source_system(), ctx.controller().clone()),
        Side::Destination => {
            let system = ctx.target_system();
            let session = match (&config.scenario.topology, &config.remote_controller) {
                (Topology::Cross, Some(remote)) => ControllerSession::connect(
                    ctx.connector().as_ref(),
                    remote.clone(),
                    system.clone(),
                    ctx.controller().partition().clone(),
                )?,
                (Topology::Cross, None) => bail!("cross topology without a remote controller"),
                (Topology::Single, _) => ctx.controller().clone(),
            };
            (system, session)
        }
    };
    let phase = ctx.monitor().ensure_active(&system, &session).await?;
    println!("rmc active on {} ({})", system, phase.as_str());
    Ok(())
}

async fn vnic(ctx: &ScenarioContext, direction: MappingDirection) -> Result<()> {
    let Some(plan) = resolve_plan(ctx.config(), ctx.controller()).await? else {
        match ctx.config().vnic.as_ref().and_then(|vnic| vnic.slot_num) {
            Some(slot) => println!("(slot {} is outside the valid range, remapping disabled)", slot),
            None => {
                warn!("no vnic slot configured");
                println!("(no vnic remapping configured)");
            }
        }
        return Ok(());
    };
    let mapping = AdapterMappingBuilder::new(&plan).build(direction)?;
    println!("{}", mapping.as_argument());
    Ok(())
}

fn print_summary(config: &LpmConfig, source: &Path) {
    let source_system = ManagedSystem::new(config.controller.managed_system.as_str());
    let target_system = ManagedSystem::new(config.controller.target_managed_system.as_str());
    println!("configuration: {}", source.display());
    println!("topology:      {}", config.scenario.topology.as_str());
    println!(
        "partition:     {} ({})",
        config.partition.name, config.partition.host_ip
    );
    println!(
        "route:         {} -> {} via {}",
        source_system, target_system, config.controller.endpoint.address
    );
    if let Some(remote) = &config.remote_controller {
        println!("remote:        {}@{}", remote.username, remote.address);
    }
    println!("deadline:      {}s", config.scenario.lpm_timeout.as_secs());
    match (config.vnic.as_ref().and_then(|vnic| vnic.slot_num), config.vnic_plan()) {
        (Some(slot), Some(_)) => println!("vnic slot:     {}", slot),
        (Some(slot), None) => println!("vnic slot:     {} (out of range, remapping disabled)", slot),
        (None, _) => println!("vnic slot:     none"),
    }
}

fn print_metrics(registry: &SharedRegistry) {
    match encode_text(registry) {
        Ok(text) => print!("{}", text),
        Err(err) => warn!(error = %err, "failed to render metrics"),
    }
}
