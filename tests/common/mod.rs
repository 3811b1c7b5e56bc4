//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use mesh_cert::{HarnessConfig, ScenarioReport, run_scenario, scenario::catalog};
use mesh_sim::{CliDialect, MeshSim, SimConfig};

/// Protocol time unit used against the simulator.
pub const SIM_UNIT: Duration = Duration::from_millis(20);

/// Enough nodes for the largest catalog topology.
pub const SIM_NODES: u16 = 33;

/// Path of a real simulated DUT program from `MESH_CERT_DUT`. Returns
/// `None` if tests should be skipped (prints the reason to stderr).
pub fn dut_program() -> Option<PathBuf> {
    match std::env::var("MESH_CERT_DUT") {
        Ok(path) if !path.trim().is_empty() => {
            let path = PathBuf::from(path.trim());
            if path.is_file() {
                Some(path)
            } else {
                eprintln!("Skipping: MESH_CERT_DUT={} does not exist", path.display());
                None
            }
        }
        _ => {
            eprintln!("Skipping: MESH_CERT_DUT is not set");
            None
        }
    }
}

/// Harness settings for driving `sim`.
pub fn sim_config(sim: &MeshSim) -> HarnessConfig {
    HarnessConfig::attached(sim.base_port())
        .with_unit(SIM_UNIT)
        .with_response_timeout(Duration::from_secs(1))
}

/// Simulator settings matching [`sim_config`]'s unit.
pub fn sim_defaults(dialect: CliDialect) -> SimConfig {
    SimConfig {
        nodes: SIM_NODES,
        unit: SIM_UNIT,
        base_port: None,
        dialect,
    }
}

pub async fn spawn_sim(config: SimConfig) -> MeshSim {
    MeshSim::spawn(config)
        .await
        .expect("failed to start mesh simulator")
}

/// Run the catalog scenario `name` against `config`.
pub async fn run_named(name: &str, config: &HarnessConfig) -> ScenarioReport {
    let scenario = catalog::find(name).unwrap_or_else(|| panic!("no scenario named {name}"));
    run_scenario(scenario.as_ref(), config).await
}
