//! Partition split, leader election and merge.

use std::net::Ipv6Addr;

use async_trait::async_trait;

use super::{prepare, start_as, start_leader};
use crate::error::Result;
use crate::node::{Mode, NodeId, Role};
use crate::scenario::{Scenario, ScenarioContext, Wait};

/// Default network-id timeout of a router, in units.
const NETWORK_ID_TIMEOUT: u8 = 120;

/// Units between the old leader rejoining and the partitions having merged.
const MERGE_UNITS: u32 = 60;

/// Losing the leader splits the routers in two partitions; the returning
/// leader joins as router and the partitions merge again.
pub struct SplitMergeRouters;

#[async_trait]
impl Scenario for SplitMergeRouters {
    fn name(&self) -> &'static str {
        "split-merge-routers"
    }

    fn description(&self) -> &'static str {
        "5.5.4 split and merge with routers"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
        const LEADER1: u16 = 1;
        const ROUTER1: u16 = 2;
        const ROUTER2: u16 = 3;
        const ROUTER3: u16 = 4;
        const ROUTER4: u16 = 5;
        const ED1: u16 = 6;
        const ROUTER3_TIMEOUT: u8 = 110;

        for id in LEADER1..ED1 {
            prepare(ctx, id, Mode::ROUTER).await?;
        }
        prepare(ctx, ED1, Mode::END_DEVICE).await?;
        ctx.node(ROUTER3)?
            .set_network_id_timeout(ROUTER3_TIMEOUT)
            .await?;

        let id = NodeId::new;
        ctx.topology_mut()
            .star(id(LEADER1), &[id(ROUTER1), id(ROUTER2), id(ED1)])
            .link(id(ROUTER1), id(ROUTER3))
            .link(id(ROUTER2), id(ROUTER4));
        ctx.apply_topology().await?;

        start_leader(ctx, LEADER1).await?;
        for router in [ROUTER1, ROUTER2, ROUTER3, ROUTER4] {
            start_as(ctx, router, Wait::Attach, Role::Router).await?;
        }
        start_as(ctx, ED1, Wait::Attach, Role::Child).await?;

        ctx.node(LEADER1)?.stop().await?;
        ctx.link(ED1, ROUTER1).await?;
        ctx.wait(Wait::NetworkIdTimeout(u32::from(ROUTER3_TIMEOUT)))
            .await;

        start_as(ctx, LEADER1, Wait::RouterUpgrade, Role::Router).await?;
        ctx.wait(Wait::Units(MERGE_UNITS)).await;

        let addrs = ctx.routable_addrs(ED1).await?;
        ctx.expect_all_reachable(ROUTER2, addrs).await
    }
}

/// After the leader leaves, the remaining router with the higher leader
/// weight wins the election.
pub struct SplitWeight;

#[async_trait]
impl Scenario for SplitWeight {
    fn name(&self) -> &'static str {
        "split-weight"
    }

    fn description(&self) -> &'static str {
        "5.5.6 split with leader weight"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
        const LEADER1: u16 = 1;
        const ROUTER1: u16 = 2;
        const ROUTER2: u16 = 3;

        for (id, weight) in [(LEADER1, 2), (ROUTER1, 1), (ROUTER2, 0)] {
            prepare(ctx, id, Mode::ROUTER).await?;
            ctx.node(id)?.set_weight(weight).await?;
        }
        ctx.topology_mut()
            .star(LEADER1.into(), &[ROUTER1.into(), ROUTER2.into()]);
        ctx.apply_topology().await?;

        start_leader(ctx, LEADER1).await?;
        start_as(ctx, ROUTER1, Wait::Attach, Role::Router).await?;
        start_as(ctx, ROUTER2, Wait::Attach, Role::Router).await?;

        ctx.node(LEADER1)?.stop().await?;
        ctx.link(ROUTER1, ROUTER2).await?;
        ctx.wait(Wait::NetworkIdTimeout(u32::from(NETWORK_ID_TIMEOUT)))
            .await;

        ctx.expect_role(ROUTER1, Role::Leader).await?;
        ctx.expect_role(ROUTER2, Role::Router).await?;

        let addrs: Vec<Ipv6Addr> = ctx
            .node(ROUTER2)?
            .get_addrs()
            .await?
            .into_iter()
            .map(|record| record.addr)
            .collect();
        ctx.expect_all_reachable(ROUTER1, addrs).await
    }
}
