//! Catalog scenarios against a real simulated DUT program.
//!
//! Requires `MESH_CERT_DUT` to point at the program; every other setting
//! comes from the environment the same way the binary reads it.

mod common;

use common::{dut_program, run_named};
use mesh_cert::HarnessConfig;

fn config() -> Option<HarnessConfig> {
    dut_program()?;
    Some(HarnessConfig::from_env().expect("invalid harness environment"))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dut_cli_commands() {
    let Some(config) = config() else {
        return;
    };
    let report = run_named("cli-commands", &config).await;
    assert!(report.passed(), "{report}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dut_reed_attach() {
    let Some(config) = config() else {
        return;
    };
    let report = run_named("reed-attach", &config).await;
    assert!(report.passed(), "{report}");
}
