//! Simulated DUT child process lifecycle.

use std::path::Path;
use std::time::{Duration, Instant};

use mesh_cert::HarnessError;
use mesh_cert::NodeId;
use mesh_cert::transport::DutProcess;

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

#[tokio::test]
async fn test_process_exiting_during_startup_fails_open() {
    let err = DutProcess::spawn(
        NodeId::new(1),
        Path::new("/bin/sh"),
        &sh("exit 3"),
        Duration::from_millis(200),
    )
    .await
    .err()
    .unwrap();
    match err {
        HarnessError::TransportOpen { node, reason } => {
            assert_eq!(node, NodeId::new(1));
            assert!(reason.contains("exited during startup"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_program_fails_open() {
    let err = DutProcess::spawn(
        NodeId::new(2),
        Path::new("/nonexistent/dut"),
        &[],
        Duration::from_millis(10),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, HarnessError::TransportOpen { .. }));
}

#[tokio::test]
async fn test_lingering_process_is_killed_after_grace() {
    let process = DutProcess::spawn(
        NodeId::new(1),
        Path::new("/bin/sh"),
        &sh("sleep 30"),
        Duration::from_millis(50),
    )
    .await
    .unwrap();
    assert!(process.id().is_some());

    let started = Instant::now();
    let status = process.finish(Duration::from_millis(200)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(status.is_none_or(|s| !s.success()));
}

#[tokio::test]
async fn test_voluntary_exit_within_grace() {
    let process = DutProcess::spawn(
        NodeId::new(1),
        Path::new("/bin/sh"),
        &sh("sleep 0.3"),
        Duration::from_millis(50),
    )
    .await
    .unwrap();
    let status = process.finish(Duration::from_secs(5)).await.unwrap();
    assert!(status.success());
}
