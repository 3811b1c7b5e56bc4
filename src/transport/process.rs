//! Simulated DUT child processes.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::node::NodeId;

/// A spawned simulated DUT.
///
/// The process is killed on drop if [`DutProcess::finish`] was never
/// reached.
pub struct DutProcess {
    child: Child,
    node: NodeId,
    label: String,
}

impl DutProcess {
    /// Spawn `program args...`, let it settle, and fail if it already exited.
    pub async fn spawn(
        node: NodeId,
        program: &Path,
        args: &[String],
        settle: Duration,
    ) -> Result<Self> {
        let label = format!("{} {}", program.display(), args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::TransportOpen {
                node,
                reason: format!("spawn {label}: {e}"),
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(node, stderr));
        }

        tokio::time::sleep(settle).await;
        if let Some(status) = child.try_wait()? {
            return Err(HarnessError::TransportOpen {
                node,
                reason: format!("{label} exited during startup ({status})"),
            });
        }

        debug!(%node, %label, pid = child.id(), "spawned DUT process");
        Ok(Self { child, node, label })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait up to `grace` for a voluntary exit, then kill.
    pub async fn finish(mut self, grace: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(node = %self.node, %status, "DUT process exited");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(node = %self.node, "waiting for {} failed: {e}", self.label);
                self.force_kill().await
            }
            Err(_) => {
                warn!(
                    node = %self.node,
                    "{} did not exit within {:?}, killing",
                    self.label, grace
                );
                self.force_kill().await
            }
        }
    }

    async fn force_kill(&mut self) -> Option<ExitStatus> {
        if let Err(e) = self.child.kill().await {
            warn!(node = %self.node, "kill {} failed: {e}", self.label);
        }
        self.child.try_wait().ok().flatten()
    }
}

impl Drop for DutProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(node = %self.node, "DUT process still running at drop, killing");
            let _ = self.child.start_kill();
        }
    }
}

async fn forward_stderr(node: NodeId, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%node, "dut stderr: {line}");
    }
}
