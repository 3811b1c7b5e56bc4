//! Directed link-admission graph.
//!
//! An edge `a -> b` means node `a` accepts frames from node `b`. Links in
//! the mesh need both directions; the model never adds the reverse edge on
//! its own, so one-way admission can be expressed and tested.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::node::{ExtAddr, Node, NodeId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topology {
    edges: BTreeMap<NodeId, BTreeMap<NodeId, Option<i8>>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// `from` admits `to`, optionally with a fixed RSSI.
    pub fn admit(&mut self, from: NodeId, to: NodeId, rssi: Option<i8>) -> &mut Self {
        self.edges.entry(from).or_default().insert(to, rssi);
        self
    }

    /// Stop `from` admitting `to`.
    pub fn deny(&mut self, from: NodeId, to: NodeId) -> &mut Self {
        if let Some(targets) = self.edges.get_mut(&from) {
            targets.remove(&to);
            if targets.is_empty() {
                self.edges.remove(&from);
            }
        }
        self
    }

    /// Both directions between `a` and `b`.
    pub fn link(&mut self, a: NodeId, b: NodeId) -> &mut Self {
        self.link_with_rssi(a, b, None)
    }

    pub fn link_with_rssi(&mut self, a: NodeId, b: NodeId, rssi: Option<i8>) -> &mut Self {
        self.admit(a, b, rssi);
        self.admit(b, a, rssi)
    }

    pub fn unlink(&mut self, a: NodeId, b: NodeId) -> &mut Self {
        self.deny(a, b);
        self.deny(b, a)
    }

    /// Links each consecutive pair.
    pub fn chain(&mut self, nodes: &[NodeId]) -> &mut Self {
        for pair in nodes.windows(2) {
            self.link(pair[0], pair[1]);
        }
        self
    }

    /// Links `center` with every leaf; leaves stay unlinked among themselves.
    pub fn star(&mut self, center: NodeId, leaves: &[NodeId]) -> &mut Self {
        for &leaf in leaves {
            self.link(center, leaf);
        }
        self
    }

    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.edges
            .get(&from)
            .is_some_and(|targets| targets.contains_key(&to))
    }

    /// All edges as `(from, to, rssi)`, ordered by source then target.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, Option<i8>)> + '_ {
        self.edges.iter().flat_map(|(&from, targets)| {
            targets.iter().map(move |(&to, &rssi)| (from, to, rssi))
        })
    }

    /// Nodes that appear on either end of an edge.
    pub fn participants(&self) -> BTreeSet<NodeId> {
        self.edges()
            .flat_map(|(from, to, _)| [from, to])
            .collect()
    }

    /// Reconcile every node's whitelist with the model and enable it.
    ///
    /// Entries the model no longer holds are removed first, then missing or
    /// changed ones are added. Admission is directed: a node that is only
    /// ever admitted, or that is no longer a source, ends up with its
    /// whitelist enabled and empty, so it admits nobody. Nodes outside the
    /// model that were never programmed are left alone.
    ///
    /// Extended addresses are resolved for all participants before any
    /// whitelist is written, so a missing node fails without side effects.
    pub async fn apply(&self, nodes: &mut BTreeMap<NodeId, Node>) -> Result<()> {
        let participants = self.participants();
        let mut addrs: BTreeMap<NodeId, ExtAddr> = BTreeMap::new();
        for id in &participants {
            let node = nodes.get_mut(id).ok_or(HarnessError::UnknownNode(*id))?;
            addrs.insert(*id, node.get_addr64().await?);
        }

        let none = BTreeMap::new();
        for (id, node) in nodes.iter_mut() {
            let targets = self.edges.get(id).unwrap_or(&none);
            if !participants.contains(id) && node.whitelist().is_empty() {
                continue;
            }
            let wanted: BTreeMap<ExtAddr, Option<i8>> = targets
                .iter()
                .map(|(to, rssi)| (addrs[to], *rssi))
                .collect();

            let stale: Vec<ExtAddr> = node
                .whitelist()
                .iter()
                .filter(|(addr, rssi)| wanted.get(*addr) != Some(*rssi))
                .map(|(addr, _)| *addr)
                .collect();
            for addr in stale {
                debug!(node = %id, %addr, "revoke");
                node.remove_whitelist(addr).await?;
            }

            for (addr, rssi) in wanted {
                if node.whitelist().get(&addr) == Some(&rssi) {
                    continue;
                }
                debug!(node = %id, %addr, "admit");
                node.add_whitelist(addr, rssi).await?;
            }
            node.enable_whitelist().await?;
        }
        Ok(())
    }
}
