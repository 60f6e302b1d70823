//! ---
//! lpm_section: "05-external-interfaces"
//! lpm_subsection: "binary"
//! lpm_type: "source"
//! lpm_scope: "code"
//! lpm_description: "Operator CLI for live partition migration round trips."
//! lpm_version: "v0.0.0-prealpha"
//! lpm_owner: "tbd"
//! ---
//! Scripted stand-ins for the host and controllers of a configuration, so a
//! scenario can be walked through without touching real systems.

use std::sync::Arc;

use lpm_common::config::LpmConfig;
use lpm_transport::{ScriptedConnector, ScriptedReply, ScriptedShell};

/// Shells answering as a healthy environment would, keyed by address.
pub struct DryRun {
    pub connector: Arc<ScriptedConnector>,
    pub shells: Vec<(String, Arc<ScriptedShell>)>,
}

impl DryRun {
    pub fn new(config: &LpmConfig) -> Self {
        let connector = Arc::new(ScriptedConnector::new());
        let mut shells = Vec::new();

        let host = Arc::new(healthy_host(config));
        connector.register(config.host.address.clone(), host.clone());
        shells.push((config.host.address.clone(), host));

        let mut controllers = vec![&config.controller.endpoint];
        if let Some(remote) = &config.remote_controller {
            controllers.push(remote);
        }
        for endpoint in controllers {
            let target = format!("{}@{}", endpoint.username, endpoint.address);
            let shell = Arc::new(healthy_controller(config, target));
            connector.register(endpoint.address.clone(), shell.clone());
            shells.push((endpoint.address.clone(), shell));
        }
        Self { connector, shells }
    }

    /// Every command the scenario sent, grouped by address.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for (address, shell) in &self.shells {
            out.push_str(&format!("# {}\n", address));
            for command in shell.history() {
                out.push_str(&format!("{}\n", command));
            }
        }
        out
    }
}

fn healthy_host(config: &LpmConfig) -> ScriptedShell {
    ScriptedShell::new(format!("{}@{}", config.host.username, config.host.address))
        .with("os-release", ScriptedReply::ok("ID=\"rhel\"\nVERSION_ID=\"9.4\"\n"))
        .with("systemctl status", ScriptedReply::exit(3))
        .with("lssrc -a", ScriptedReply::ok(" rsct  rsct  4242  active"))
}

fn healthy_controller(config: &LpmConfig, target: String) -> ScriptedShell {
    let partition = &config.partition;
    let shell = ScriptedShell::new(target)
        .with(
            "diagrmc",
            ScriptedReply::ok(format!("{} has RMC connection.", partition.host_ip)),
        )
        .with("-F msp", ScriptedReply::ok("1"))
        .with("-F lpar_id", ScriptedReply::ok("1"))
        .with("-F state", ScriptedReply::ok("Running"));
    for system in [
        &config.controller.managed_system,
        &config.controller.target_managed_system,
    ] {
        shell.script(
            format!("-m {} -r lpar -F name", system),
            ScriptedReply::ok(format!("{}\n", partition.name)),
        );
    }
    if let Some(vnic) = &config.vnic {
        let adapters = vnic
            .adapters
            .iter()
            .chain(&vnic.target_adapters)
            .enumerate()
            .map(|(index, location)| format!("{},{}\n", location, index + 1))
            .collect::<String>();
        shell.script("lshwres", ScriptedReply::ok(adapters));
    }
    shell
}
