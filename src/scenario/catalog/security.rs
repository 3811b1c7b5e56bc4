use async_trait::async_trait;
use tracing::info;

use super::{prepare, start_as, start_leader};
use crate::error::Result;
use crate::node::{Mode, NodeId, Role};
use crate::scenario::{Scenario, ScenarioContext, Wait};

/// Bumping the key sequence on the leader must not cut off its child.
pub struct KeyIncrement;

#[async_trait]
impl Scenario for KeyIncrement {
    fn name(&self) -> &'static str {
        "key-increment"
    }

    fn description(&self) -> &'static str {
        "6.6.1 key increment"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
        const LEADER: u16 = 1;
        const ED: u16 = 2;

        prepare(ctx, LEADER, Mode::ROUTER).await?;
        prepare(ctx, ED, Mode::END_DEVICE).await?;
        ctx.topology_mut().link(LEADER.into(), ED.into());
        ctx.apply_topology().await?;

        start_leader(ctx, LEADER).await?;
        start_as(ctx, ED, Wait::Attach, Role::Child).await?;

        let addrs = ctx.routable_addrs(ED).await?;
        ctx.expect_all_reachable(LEADER, addrs).await?;

        let sequence = ctx.node(LEADER)?.get_key_sequence().await?;
        let next = sequence.wrapping_add(1);
        ctx.node(LEADER)?.set_key_sequence(next).await?;
        info!(from = sequence, to = next, "key sequence advanced");

        let observed = ctx.node(LEADER)?.get_key_sequence().await?;
        if observed != next {
            return Err(ctx.failure(
                NodeId::new(LEADER),
                format!("key sequence reads {observed}, expected {next}"),
            ));
        }

        let addrs = ctx.routable_addrs(ED).await?;
        ctx.expect_all_reachable(LEADER, addrs).await
    }
}
