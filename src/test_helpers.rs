#![cfg(any(test, feature = "test-internals"))]
#![allow(dead_code)] // Not every helper is used by every test target

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use crate::config::HarnessConfig;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::node::{INITIAL_CHILD_TIMEOUT, Node, NodeId};
use crate::transport::{SHUTDOWN_COMMAND, Transport};

/// Configuration with deadlines short enough for scripted exchanges.
pub fn test_config() -> HarnessConfig {
    let mut config = HarnessConfig::default()
        .with_response_timeout(Duration::from_millis(200))
        .with_unit(Duration::from_millis(1));
    config.scan_timeout = Duration::from_millis(200);
    config.shutdown_grace = Duration::from_millis(200);
    config
}

/// Ordered command/response pairs a scripted DUT plays back.
#[derive(Clone, Debug, Default)]
pub struct Script {
    steps: VecDeque<(String, String)>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// The exchanges every [`Node`] performs on construction.
    pub fn node_setup(dialect: Dialect) -> Self {
        Self::new()
            .ack(dialect.whitelist("clear"))
            .ack(dialect.whitelist("disable"))
            .ack(dialect.child_timeout(Some(INITIAL_CHILD_TIMEOUT)))
    }

    /// Answer `command` with `response` verbatim.
    pub fn expect(mut self, command: impl Into<String>, response: impl Into<String>) -> Self {
        self.steps.push_back((command.into(), response.into()));
        self
    }

    pub fn ack(self, command: impl Into<String>) -> Self {
        self.expect(command, "Done\r\n")
    }

    /// Answer `command` with `lines` followed by `Done`.
    pub fn reply(self, command: impl Into<String>, lines: &[&str]) -> Self {
        let mut response: String = lines.iter().map(|line| format!("{line}\r\n")).collect();
        response.push_str("Done\r\n");
        self.expect(command, response)
    }

    /// Let `command` go unanswered.
    pub fn silent(self, command: impl Into<String>) -> Self {
        self.expect(command, "")
    }
}

/// In-memory DUT playing a [`Script`] over a duplex stream.
///
/// A command that does not match the next step is recorded and left
/// unanswered, like a DUT that did not understand it. `shutdown` is always
/// acknowledged.
pub struct ScriptedDut {
    handle: JoinHandle<Vec<String>>,
}

impl ScriptedDut {
    pub fn spawn(node: NodeId, script: Script, config: &HarnessConfig) -> (Transport, ScriptedDut) {
        let (local, remote) = tokio::io::duplex(4096);
        let handle = tokio::spawn(play(script, remote));
        (Transport::from_stream(node, local, config), ScriptedDut { handle })
    }

    /// Every command the DUT received, in order. Resolves once the harness
    /// side of the stream is dropped.
    pub async fn received(self) -> Vec<String> {
        self.handle.await.unwrap_or_default()
    }
}

async fn play(mut script: Script, stream: tokio::io::DuplexStream) -> Vec<String> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut received = Vec::new();

    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim().to_string();
        received.push(command.clone());

        let response = match script.steps.front() {
            Some((expected, _)) if *expected == command => {
                script.steps.pop_front().map(|(_, response)| response)
            }
            _ if command == SHUTDOWN_COMMAND => Some("Done\r\n".to_string()),
            _ => None,
        };
        if let Some(response) = response
            && !response.is_empty()
            && writer.write_all(response.as_bytes()).await.is_err()
        {
            break;
        }
    }
    received
}

/// A [`Node`] over a scripted DUT. `script` follows the setup exchanges.
pub async fn scripted_node(
    id: u16,
    script: Script,
    config: &HarnessConfig,
) -> Result<(Node, ScriptedDut)> {
    let mut full = Script::node_setup(config.dialect);
    full.steps.extend(script.steps);
    let (transport, dut) = ScriptedDut::spawn(NodeId::new(id), full, config);
    let node = Node::with_transport(transport, config).await?;
    Ok((node, dut))
}
