//! Catalog scenarios against the in-process mesh simulator.
//!
//! Each test gets its own simulator on a private port block, so they run
//! in parallel like the rest of the suite.

mod common;

use std::time::Duration;

use common::{run_named, sim_config, sim_defaults, spawn_sim};
use mesh_cert::Dialect;
use mesh_cert::scenario::catalog::ShortAddressExpectation;
use mesh_sim::{CliDialect, Role, SimConfig};

async fn run(name: &str) {
    let sim = spawn_sim(sim_defaults(CliDialect::Namespaced)).await;
    let report = run_named(name, &sim_config(&sim)).await;
    sim.shutdown();
    assert!(report.passed(), "{report}");
    assert!(
        report.teardown_warnings.is_empty(),
        "teardown warnings: {:?}",
        report.teardown_warnings
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_commands() {
    run("cli-commands").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_child_address_timeout() {
    run("child-address-timeout").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_router_address_timeout() {
    run("router-address-timeout").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_configured_rloc16_expectation_is_enforced() {
    // The simulator hands out a new id after the short absence, so
    // requiring the old one must fail that phase.
    let sim = spawn_sim(sim_defaults(CliDialect::Namespaced)).await;
    let config = sim_config(&sim).with_rloc16_after_timeout(ShortAddressExpectation::Unchanged);
    let report = run_named("router-address-timeout", &config).await;
    sim.shutdown();
    assert!(!report.passed());
    let error = report.error.unwrap_or_default();
    assert!(error.contains("after 200 units, expected unchanged"), "{error}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_router_id() {
    run("remove-router-id").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_leader_rejects_extra_router() {
    run("leader-reject-one-hop").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reed_upgrade() {
    run("reed-upgrade").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reed_attach() {
    run("reed-attach").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_network_data_expiration() {
    run("network-data-expiration").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_context_management() {
    run("context-management").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_address_map_cache() {
    run("address-map-cache").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_split_merge_routers() {
    run("split-merge-routers").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_split_weight() {
    run("split-weight").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_key_increment() {
    run("key-increment").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_compact_dialect_split_weight() {
    let sim = spawn_sim(sim_defaults(CliDialect::Compact)).await;
    let config = sim_config(&sim).with_dialect(Dialect::Compact);
    let report = run_named("split-weight", &config).await;
    assert!(report.passed(), "{report}");

    // Teardown stopped and reset every node.
    let running = sim.inspect(|world| {
        (1..=3)
            .filter(|&id| world.node(id).is_some_and(|n| n.role != Role::Disabled))
            .count()
    });
    assert_eq!(running, 0);
    sim.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_compact_dialect_passes_without_cache() {
    let sim = spawn_sim(sim_defaults(CliDialect::Compact)).await;
    let config = sim_config(&sim).with_dialect(Dialect::Compact);
    let report = run_named("address-map-cache", &config).await;
    sim.shutdown();
    assert!(report.passed(), "{report}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unserved_port_fails_scenario() {
    let sim = spawn_sim(SimConfig {
        nodes: 1,
        ..sim_defaults(CliDialect::Namespaced)
    })
    .await;
    // Shifting the base puts node 1 on a port inside the block that nothing
    // serves.
    let mut config = sim_config(&sim);
    config.base_port = sim.base_port() + 1;
    config.response_timeout = Duration::from_millis(200);
    let report = run_named("cli-commands", &config).await;
    sim.shutdown();
    assert!(!report.passed());
    assert!(report.error.is_some());
}
