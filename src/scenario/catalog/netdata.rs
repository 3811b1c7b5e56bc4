//! Network data propagation and address resolution.

use async_trait::async_trait;
use tracing::info;

use super::{STABLE_ONLY_SLEEPY, in_test_prefix, prepare, start_as, start_leader};
use crate::error::{HarnessError, Result};
use crate::node::{Ipv6Prefix, Mode, NetworkDataPrefix, NodeId, Role};
use crate::scenario::{Scenario, ScenarioContext, Wait};

fn prefix(prefix: &str, flags: &str) -> Result<NetworkDataPrefix> {
    Ok(NetworkDataPrefix::new(prefix.parse()?, flags.parse()?))
}

/// Ping every test-prefix address of each of `targets` from `from`.
async fn ping_test_addrs(ctx: &mut ScenarioContext, from: u16, targets: &[u16]) -> Result<()> {
    for &target in targets {
        let addrs = ctx.addrs_matching(target, in_test_prefix).await?;
        info!(node = target, count = addrs.len(), "test prefix addresses");
        ctx.expect_all_reachable(from, addrs).await?;
    }
    Ok(())
}

/// Prefixes added and withdrawn by a router reach children according to
/// their stable-data subscription.
pub struct NetworkDataExpiration;

#[async_trait]
impl Scenario for NetworkDataExpiration {
    fn name(&self) -> &'static str {
        "network-data-expiration"
    }

    fn description(&self) -> &'static str {
        "5.6.6 network data expiration"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
        const LEADER: u16 = 1;
        const ROUTER: u16 = 2;
        const ED1: u16 = 3;
        const SED1: u16 = 4;
        const SED_TIMEOUT: u32 = 3;

        prepare(ctx, LEADER, Mode::ROUTER).await?;
        prepare(ctx, ROUTER, Mode::ROUTER).await?;
        prepare(ctx, ED1, Mode::END_DEVICE).await?;
        prepare(ctx, SED1, STABLE_ONLY_SLEEPY).await?;
        ctx.node(SED1)?.set_timeout(SED_TIMEOUT).await?;

        ctx.topology_mut()
            .star(ROUTER.into(), &[LEADER.into(), ED1.into(), SED1.into()]);
        ctx.apply_topology().await?;

        start_leader(ctx, LEADER).await?;
        start_as(ctx, ROUTER, Wait::Attach, Role::Router).await?;
        start_as(ctx, ED1, Wait::Attach, Role::Child).await?;
        start_as(ctx, SED1, Wait::Attach, Role::Child).await?;

        let router = ctx.node(ROUTER)?;
        router.add_prefix(&prefix("2001::/64", "pvcrs")?).await?;
        router.add_prefix(&prefix("2002::/64", "pvcr")?).await?;
        router.register_netdata().await?;
        ctx.wait(Wait::NetworkData).await;
        ping_test_addrs(ctx, LEADER, &[ED1, SED1]).await?;

        let router = ctx.node(ROUTER)?;
        router.add_prefix(&prefix("2003::/64", "pvcs")?).await?;
        router.register_netdata().await?;
        ctx.wait(Wait::NetworkData).await;
        ping_test_addrs(ctx, LEADER, &[ED1, SED1]).await?;

        let router = ctx.node(ROUTER)?;
        router.remove_prefix("2003::/64".parse()?).await?;
        router.register_netdata().await?;
        ctx.wait(Wait::NetworkData).await;
        ping_test_addrs(ctx, LEADER, &[ED1, SED1]).await?;

        ctx.node(ROUTER)?.stop().await
    }
}

/// Prefixes cycle through the leader's context ids while the reuse delay
/// keeps a withdrawn id from being handed out again too early.
pub struct ContextManagement;

#[async_trait]
impl Scenario for ContextManagement {
    fn name(&self) -> &'static str {
        "context-management"
    }

    fn description(&self) -> &'static str {
        "5.6.8 context management"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
        const LEADER: u16 = 1;
        const ROUTER: u16 = 2;
        const ED: u16 = 3;
        const REUSE_DELAY: u32 = 10;
        const FIRST_SETTLE: u32 = 2;
        const SETTLE: u32 = 5;

        prepare(ctx, LEADER, Mode::ROUTER).await?;
        prepare(ctx, ROUTER, Mode::ROUTER).await?;
        prepare(ctx, ED, Mode::END_DEVICE).await?;
        ctx.node(LEADER)?
            .set_context_reuse_delay(REUSE_DELAY)
            .await?;

        ctx.topology_mut()
            .star(LEADER.into(), &[ROUTER.into(), ED.into()]);
        ctx.apply_topology().await?;

        start_leader(ctx, LEADER).await?;
        start_as(ctx, ROUTER, Wait::Attach, Role::Router).await?;
        start_as(ctx, ED, Wait::Attach, Role::Child).await?;

        let first: Ipv6Prefix = "2001::/64".parse()?;
        let router = ctx.node(ROUTER)?;
        router.add_prefix(&prefix("2001::/64", "pvcrs")?).await?;
        router.register_netdata().await?;
        ctx.wait(Wait::Units(FIRST_SETTLE)).await;
        ping_test_addrs(ctx, ED, &[LEADER]).await?;

        let router = ctx.node(ROUTER)?;
        router.remove_prefix(first).await?;
        router.register_netdata().await?;
        ctx.wait(Wait::Units(SETTLE)).await;
        ping_test_addrs(ctx, ED, &[LEADER]).await?;

        let router = ctx.node(ROUTER)?;
        router.add_prefix(&prefix("2002::/64", "pvcrs")?).await?;
        router.register_netdata().await?;
        ctx.wait(Wait::Units(SETTLE)).await;
        ping_test_addrs(ctx, ED, &[LEADER]).await?;

        let delay = ctx
            .node(LEADER)?
            .timers()
            .context_reuse_delay
            .unwrap_or(REUSE_DELAY);
        ctx.wait(Wait::ContextReuseDelay(delay)).await;

        let router = ctx.node(ROUTER)?;
        router.add_prefix(&prefix("2003::/64", "pvcrs")?).await?;
        router.register_netdata().await?;
        ctx.wait(Wait::Units(SETTLE)).await;
        ping_test_addrs(ctx, ED, &[LEADER]).await
    }
}

/// Children behind a router resolve end devices of the leader; the router's
/// address cache ends up holding their RLOC16s.
pub struct AddressMapCache;

#[async_trait]
impl Scenario for AddressMapCache {
    fn name(&self) -> &'static str {
        "address-map-cache"
    }

    fn description(&self) -> &'static str {
        "5.3.4 address map cache"
    }

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
        const LEADER: u16 = 1;
        const ROUTER1: u16 = 2;
        const SED1: u16 = 3;
        const EDS: [u16; 4] = [4, 5, 6, 7];

        prepare(ctx, LEADER, Mode::ROUTER).await?;
        prepare(ctx, ROUTER1, Mode::ROUTER).await?;
        for child in [SED1, EDS[0], EDS[1], EDS[2], EDS[3]] {
            prepare(ctx, child, Mode::END_DEVICE).await?;
        }

        let leaves: Vec<NodeId> = std::iter::once(ROUTER1)
            .chain(EDS)
            .map(NodeId::new)
            .collect();
        ctx.topology_mut()
            .star(LEADER.into(), &leaves)
            .link(ROUTER1.into(), SED1.into());
        ctx.apply_topology().await?;

        start_leader(ctx, LEADER).await?;
        start_as(ctx, ROUTER1, Wait::Attach, Role::Router).await?;
        start_as(ctx, SED1, Wait::Attach, Role::Child).await?;
        for ed in EDS {
            start_as(ctx, ed, Wait::Attach, Role::Child).await?;
        }

        // Twice: the second round is answered from the cache.
        for _ in 0..2 {
            for ed in EDS {
                let addrs = ctx.routable_addrs(ed).await?;
                ctx.expect_all_reachable(SED1, addrs).await?;
            }
        }

        let cache = match ctx.node(ROUTER1)?.get_cache().await {
            Ok(cache) => cache,
            Err(HarnessError::Unsupported { .. }) => {
                info!("address cache not available in this dialect");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for ed in EDS {
            let rloc16 = ctx.node(ed)?.get_addr16().await?;
            if !cache.iter().any(|entry| entry.rloc16 == rloc16) {
                return Err(ctx.failure(
                    NodeId::new(ROUTER1),
                    format!("no cache entry resolves to node {ed} ({rloc16})"),
                ));
            }
        }
        Ok(())
    }
}
