//! ---
//! lpm_section: "05-external-interfaces"
//! lpm_subsection: "tests"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Scripted command channel behaviour."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use lpm_common::config::EndpointConfig;
use lpm_transport::{
    CommandError, RemoteShell, ScriptedConnector, ScriptedReply, ScriptedShell, ShellConnector,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn replies_are_consumed_in_order_and_last_repeats() {
    let shell = ScriptedShell::new("hscroot@hmc01")
        .with("diagrmc", ScriptedReply::ok("no connection"))
        .with("diagrmc", ScriptedReply::ok("10.0.0.5 has RMC connection."));

    let first = shell.run("diagrmc -m srcSys", TIMEOUT).await.unwrap();
    let second = shell.run("diagrmc -m srcSys", TIMEOUT).await.unwrap();
    let third = shell.run("diagrmc -m srcSys", TIMEOUT).await.unwrap();
    assert_eq!(first.text(), "no connection");
    assert_eq!(second.text(), "10.0.0.5 has RMC connection.");
    assert_eq!(third.text(), second.text());
    assert_eq!(shell.count("diagrmc"), 3);
}

#[tokio::test]
async fn most_specific_fragment_wins() {
    let shell = ScriptedShell::new("hscroot@hmc01")
        .with("lssyscfg", ScriptedReply::ok("generic"))
        .with("-F state", ScriptedReply::ok("Running"));

    let state = shell
        .run("lssyscfg -m srcSys -r lpar --filter lpar_names=lpar01 -F state", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(state.text(), "Running");
    let names = shell.run("lssyscfg -m srcSys -r lpar -F name", TIMEOUT).await.unwrap();
    assert_eq!(names.text(), "generic");
}

#[tokio::test]
async fn exit_replies_surface_status() {
    let shell = ScriptedShell::new("root@host")
        .with("systemctl status", ScriptedReply::exit(3));
    let err = shell
        .run("systemctl status firewalld.service", TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(3));
    assert!(shell.run("unscripted", TIMEOUT).await.unwrap().text().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hanging_command_times_out_at_deadline() {
    let shell = ScriptedShell::new("hscroot@hmc01").with("migrlpar", ScriptedReply::Hang);
    let started = tokio::time::Instant::now();
    let err = shell
        .run("migrlpar -o m -m srcSys -t dstSys -p lpar01", Duration::from_secs(300))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(300) && elapsed < Duration::from_secs(301));
}

#[test]
fn connector_hands_out_registered_shells_and_records_endpoints() {
    let connector = ScriptedConnector::new();
    connector.register("hmc-b", Arc::new(ScriptedShell::new("hscroot@hmc-b")));

    let endpoint = EndpointConfig::new("hmc-b", "hscroot").with_password("secret");
    let shell = connector.connect(&endpoint).unwrap();
    assert_eq!(shell.target(), "hscroot@hmc-b");

    let err = connector
        .connect(&EndpointConfig::new("hmc-c", "hscroot"))
        .unwrap_err();
    assert!(matches!(err, CommandError::Transport { .. }));
    assert_eq!(connector.connections().len(), 2);
    assert_eq!(connector.connections()[0].password.as_deref(), Some("secret"));
}
