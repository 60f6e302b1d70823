//! ---
//! lpm_section: "04-migration-orchestration"
//! lpm_subsection: "tests"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Cross-controller round trips against scripted controllers."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use lpm_common::config::{EndpointConfig, LpmConfig, Topology};
use lpm_orchestrator::{
    driver_for, run_round_trip, CrossControllerCoordinator, LpmError, ManagedSystem, MigrationLeg,
    ScenarioContext,
};
use lpm_transport::{ScriptedConnector, ScriptedReply, ScriptedShell};
use tokio::time::Instant;

const CONFIG: &str = r#"
[scenario]
topology = "cross"
lpm_timeout = 300

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

[remote_controller]
address = "hmc02"
username = "hscpe"
password = "xyz789"
"#;

const RMC_UP: &str = "10.0.0.5 has RMC connection.";

fn healthy_host() -> ScriptedShell {
    ScriptedShell::new("root@10.0.0.5")
        .with("os-release", ScriptedReply::ok("ID=ubuntu\nVERSION_ID=\"24.04\"\n"))
        .with("systemctl status", ScriptedReply::exit(3))
        .with("lssrc -a", ScriptedReply::ok(" rsct  rsct  4242  active"))
}

struct Harness {
    local: Arc<ScriptedShell>,
    remote: Arc<ScriptedShell>,
    connector: Arc<ScriptedConnector>,
    ctx: ScenarioContext,
}

fn harness(config: &str, local: ScriptedShell, remote: ScriptedShell) -> Harness {
    let config: LpmConfig = config.parse().expect("valid config");
    let local = Arc::new(local);
    let remote = Arc::new(remote);
    let connector = Arc::new(ScriptedConnector::new());
    connector.register("10.0.0.5", Arc::new(healthy_host()));
    connector.register("hmc01", local.clone());
    connector.register("hmc02", remote.clone());
    let ctx = ScenarioContext::connect(Arc::new(config), connector.clone(), None).expect("sessions open");
    Harness {
        local,
        remote,
        connector,
        ctx,
    }
}

fn local_controller() -> ScriptedShell {
    ScriptedShell::new("hscroot@hmc01")
        .with("diagrmc", ScriptedReply::ok(RMC_UP))
        .with("-m srcSys -r lpar -F name", ScriptedReply::ok("vios1\nlpar01\n"))
}

fn remote_controller() -> ScriptedShell {
    ScriptedShell::new("hscpe@hmc02")
        .with("diagrmc", ScriptedReply::ok(RMC_UP))
        .with("-m dstSys -r lpar -F name", ScriptedReply::ok("vios2\nlpar01\n"))
}

#[tokio::test(start_paused = true)]
async fn each_leg_names_the_counterpart_controller() {
    let h = harness(CONFIG, local_controller(), remote_controller());

    let driver = driver_for(&h.ctx).await.unwrap();
    assert_eq!(driver.topology(), Topology::Cross);
    let report = run_round_trip(driver.as_ref()).await.unwrap();
    assert!(report.is_success());

    assert_eq!(
        h.local.history().iter().filter(|c| c.starts_with("migrlpar")).collect::<Vec<_>>(),
        vec!["migrlpar -o m -m srcSys -t dstSys -p lpar01 -u hscpe --ip hmc02"]
    );
    assert_eq!(
        h.remote.history().iter().filter(|c| c.starts_with("migrlpar")).collect::<Vec<_>>(),
        vec!["migrlpar -o m -m dstSys -t srcSys -p lpar01 -u hscroot --ip hmc01"]
    );
    // arrival on the destination is confirmed through the remote controller
    assert!(h.remote.count("diagrmc -m dstSys") >= 1);
    assert!(h.local.count("lssyscfg -m srcSys -r lpar -F name") >= 1);

    let last = h.connector.connections().pop().unwrap();
    assert_eq!(last.address, "hmc01");
    assert_eq!(last.password.as_deref(), Some("abc123"));
}

#[tokio::test(start_paused = true)]
async fn fixed_sleep_waits_out_the_deadline_per_leg() {
    let h = harness(CONFIG, local_controller(), remote_controller());

    let started = Instant::now();
    let driver = driver_for(&h.ctx).await.unwrap();
    run_round_trip(driver.as_ref()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(600));
}

#[tokio::test(start_paused = true)]
async fn polling_completion_returns_as_soon_as_the_partition_arrives() {
    let remote = ScriptedShell::new("hscpe@hmc02")
        .with("diagrmc", ScriptedReply::ok(RMC_UP))
        .with("-m dstSys -r lpar -F name", ScriptedReply::ok("vios2\n"))
        .with("-m dstSys -r lpar -F name", ScriptedReply::ok("vios2\nlpar01\n"));
    let config = format!("{CONFIG}\n[cross]\ncompletion = \"poll\"\npoll_interval = 30\n");
    let h = harness(&config, local_controller(), remote);

    let started = Instant::now();
    let driver = driver_for(&h.ctx).await.unwrap();
    run_round_trip(driver.as_ref()).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn partition_missing_after_the_wait_is_a_forward_failure() {
    let remote = ScriptedShell::new("hscpe@hmc02")
        .with("diagrmc", ScriptedReply::ok(RMC_UP))
        .with("-m dstSys -r lpar -F name", ScriptedReply::ok("vios2\n"));
    let local = local_controller().with("-F state", ScriptedReply::ok("Not Activated"));
    let h = harness(CONFIG, local, remote);

    let driver = driver_for(&h.ctx).await.unwrap();
    let err = run_round_trip(driver.as_ref()).await.unwrap_err();

    assert_eq!(err.leg(), Some(MigrationLeg::Forward));
    let message = err.to_string();
    assert!(message.contains("srcSys") && message.contains("Not Activated"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn remote_rejection_fails_the_return_leg() {
    let remote = remote_controller()
        .with("migrlpar", ScriptedReply::exit(1))
        .with("-F state", ScriptedReply::ok("Running"));
    let h = harness(CONFIG, local_controller(), remote);

    let driver = driver_for(&h.ctx).await.unwrap();
    let err = run_round_trip(driver.as_ref()).await.unwrap_err();

    assert!(matches!(
        err,
        LpmError::MigrationFailed {
            leg: MigrationLeg::Return,
            ..
        }
    ));
}

#[tokio::test]
async fn unreachable_remote_controller_is_a_command_error() {
    let config: LpmConfig = CONFIG.parse().unwrap();
    let connector = Arc::new(ScriptedConnector::new());
    connector.register("10.0.0.5", Arc::new(healthy_host()));
    connector.register("hmc01", Arc::new(local_controller()));
    let ctx = ScenarioContext::connect(Arc::new(config), connector, None).unwrap();

    let driver = driver_for(&ctx).await.unwrap();
    let err = run_round_trip(driver.as_ref()).await.unwrap_err();
    assert!(matches!(err, LpmError::Command { .. }));
}

#[tokio::test(start_paused = true)]
async fn unreachable_counterpart_after_the_move_fails_the_leg() {
    let h = harness(CONFIG, local_controller(), remote_controller());
    let coordinator = CrossControllerCoordinator::new(&h.ctx).unwrap();
    let originating = coordinator
        .open_session(coordinator.remote(), &ManagedSystem::new("dstSys"))
        .unwrap();

    let err = coordinator
        .migrate_across_controllers(
            MigrationLeg::Return,
            &originating,
            &EndpointConfig::new("hmc03", "hscroot"),
            &ManagedSystem::new("dstSys"),
            &ManagedSystem::new("srcSys"),
            Duration::from_secs(300),
        )
        .await
        .unwrap_err();

    assert_eq!(err.leg(), Some(MigrationLeg::Return));
    assert!(matches!(err, LpmError::MigrationFailed { .. }));
    assert!(err.to_string().contains("hmc03"), "{err}");
    assert_eq!(h.remote.count("migrlpar -o m -m dstSys -t srcSys"), 1);
}
