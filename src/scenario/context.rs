//! Per-scenario state: the nodes, their admission topology and the timing
//! profile used to size every wait.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::node::{AddressRecord, Node, NodeId, Role};
use crate::scenario::timing::{TimingProfile, Wait};
use crate::topology::Topology;

pub struct ScenarioContext {
    config: HarnessConfig,
    timing: TimingProfile,
    nodes: BTreeMap<NodeId, Node>,
    topology: Topology,
}

impl ScenarioContext {
    pub fn new(config: HarnessConfig) -> Self {
        let timing = TimingProfile::from_config(&config);
        Self {
            config,
            timing,
            nodes: BTreeMap::new(),
            topology: Topology::new(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn timing(&self) -> &TimingProfile {
        &self.timing
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Edges declared here take effect on the next [`apply_topology`].
    ///
    /// [`apply_topology`]: ScenarioContext::apply_topology
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    // -----------------------------------------------------------------------
    // Arrange
    // -----------------------------------------------------------------------

    /// Open the DUT for `id` and register it.
    pub async fn add_node(&mut self, id: impl Into<NodeId>) -> Result<&mut Node> {
        let id = id.into();
        if !id.is_valid() || self.nodes.contains_key(&id) {
            return Err(HarnessError::invalid("node id", id.to_string()));
        }
        let node = Node::open(id, &self.config).await?;
        Ok(self.nodes.entry(id).or_insert(node))
    }

    pub async fn add_nodes(&mut self, ids: impl IntoIterator<Item = u16>) -> Result<()> {
        for id in ids {
            self.add_node(id).await?;
        }
        Ok(())
    }

    /// Register a node built elsewhere, e.g. over a scripted transport.
    pub fn insert_node(&mut self, node: Node) -> Result<&mut Node> {
        let id = node.id();
        if !id.is_valid() || self.nodes.contains_key(&id) {
            return Err(HarnessError::invalid("node id", id.to_string()));
        }
        Ok(self.nodes.entry(id).or_insert(node))
    }

    pub fn node(&mut self, id: impl Into<NodeId>) -> Result<&mut Node> {
        let id = id.into();
        self.nodes.get_mut(&id).ok_or(HarnessError::UnknownNode(id))
    }

    pub async fn apply_topology(&mut self) -> Result<()> {
        self.topology.apply(&mut self.nodes).await
    }

    // -----------------------------------------------------------------------
    // Act
    // -----------------------------------------------------------------------

    pub async fn wait(&self, wait: Wait) {
        let duration = self.timing.duration(wait);
        info!(%wait, ?duration, "waiting");
        tokio::time::sleep(duration).await;
    }

    /// `from` starts admitting `to` on the running mesh.
    pub async fn admit(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Result<()> {
        let (from, to) = (from.into(), to.into());
        let addr = self.node(to)?.get_addr64().await?;
        self.node(from)?.add_whitelist(addr, None).await?;
        self.topology.admit(from, to, None);
        Ok(())
    }

    /// Admit both directions on the running mesh.
    pub async fn link(&mut self, a: impl Into<NodeId>, b: impl Into<NodeId>) -> Result<()> {
        let (a, b) = (a.into(), b.into());
        self.admit(a, b).await?;
        self.admit(b, a).await
    }

    pub async fn unlink(&mut self, a: impl Into<NodeId>, b: impl Into<NodeId>) -> Result<()> {
        let (a, b) = (a.into(), b.into());
        for (from, to) in [(a, b), (b, a)] {
            let addr = self.node(to)?.get_addr64().await?;
            self.node(from)?.remove_whitelist(addr).await?;
            self.topology.deny(from, to);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Assert
    // -----------------------------------------------------------------------

    /// Build an assertion failure carrying `id`'s last exchange.
    pub fn failure(&self, id: NodeId, message: impl Into<String>) -> HarnessError {
        HarnessError::Assertion {
            message: message.into(),
            last_exchange: self.nodes.get(&id).and_then(Node::last_exchange),
        }
    }

    /// Most recent exchange across all nodes.
    pub fn last_exchange(&self) -> Option<String> {
        self.nodes
            .values()
            .filter_map(|node| node.transcript().last().map(|e| (e.at, node)))
            .max_by_key(|(at, _)| *at)
            .and_then(|(_, node)| node.last_exchange())
    }

    pub async fn expect_role(&mut self, id: impl Into<NodeId>, expected: Role) -> Result<()> {
        let id = id.into();
        let observed = self.node(id)?.get_state().await?;
        if observed != expected {
            return Err(self.failure(id, format!("node {id}: expected {expected}, observed {observed}")));
        }
        info!(node = %id, role = %observed, "role ok");
        Ok(())
    }

    /// Addresses of `id` other than link-local ones.
    pub async fn routable_addrs(&mut self, id: impl Into<NodeId>) -> Result<Vec<Ipv6Addr>> {
        let addrs = self.node(id)?.get_addrs().await?;
        Ok(addrs
            .iter()
            .filter(|record| !record.is_link_local())
            .map(|record| record.addr)
            .collect())
    }

    /// Addresses of `id` whose records pass `keep`.
    pub async fn addrs_matching(
        &mut self,
        id: impl Into<NodeId>,
        keep: impl Fn(&AddressRecord) -> bool,
    ) -> Result<Vec<Ipv6Addr>> {
        let addrs = self.node(id)?.get_addrs().await?;
        Ok(addrs.iter().filter(|r| keep(r)).map(|r| r.addr).collect())
    }

    pub async fn expect_reachable(&mut self, from: impl Into<NodeId>, addr: Ipv6Addr) -> Result<()> {
        let from = from.into();
        match self.node(from)?.ping(addr, 1, None).await {
            Ok(responders) => {
                debug!(node = %from, %addr, ?responders, "reachable");
                Ok(())
            }
            Err(e) if e.is_timeout() => {
                Err(self.failure(from, format!("node {from}: no reply from {addr}")))
            }
            Err(e) => Err(e),
        }
    }

    /// A ping timeout is the expected outcome here; any reply fails.
    pub async fn expect_unreachable(&mut self, from: impl Into<NodeId>, addr: Ipv6Addr) -> Result<()> {
        let from = from.into();
        match self.node(from)?.ping(addr, 1, None).await {
            Ok(responders) => Err(self.failure(
                from,
                format!("node {from}: {addr} answered ({responders:?}) but should be unreachable"),
            )),
            Err(e) if e.is_timeout() => {
                debug!(node = %from, %addr, "unreachable as expected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn expect_all_reachable(
        &mut self,
        from: impl Into<NodeId>,
        addrs: impl IntoIterator<Item = Ipv6Addr>,
    ) -> Result<()> {
        let from = from.into();
        for addr in addrs {
            self.expect_reachable(from, addr).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Stop every node, then close every transport. Never fails; problems
    /// are logged and returned as warnings.
    pub async fn teardown(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (id, node) in self.nodes.iter_mut() {
            if !node.is_connected() {
                continue;
            }
            if let Err(e) = node.stop().await {
                warn!(node = %id, error = %e, "stop failed during teardown");
                warnings.push(format!("node {id}: stop: {e}"));
            }
        }

        for (id, mut node) in std::mem::take(&mut self.nodes) {
            if let Err(e) = node.close().await {
                warn!(node = %id, error = %e, "close failed during teardown");
                warnings.push(format!("node {id}: close: {e}"));
            }
        }

        self.topology = Topology::new();
        warnings
    }
}
