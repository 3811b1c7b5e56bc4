//! Certification scenarios expressed against [`ScenarioContext`].
//!
//! Every scenario puts its nodes on [`PANID`], wires a whitelist topology,
//! then starts nodes one by one and checks roles and reachability after
//! named waits.

mod attach;
mod cli;
mod netdata;
mod partition;
mod security;

pub use attach::{
    ChildAddressTimeout, LeaderRejectsExtraRouter, ReedAttach, ReedUpgrade, RemoveRouterId,
    RouterAddressTimeout, ShortAddressExpectation,
};
pub use cli::CliCommands;
pub use netdata::{AddressMapCache, ContextManagement, NetworkDataExpiration};
pub use partition::{SplitMergeRouters, SplitWeight};
pub use security::KeyIncrement;

use crate::error::Result;
use crate::node::{AddressRecord, Mode, Role};
use crate::scenario::{Scenario, ScenarioContext, Wait};

/// PAN id shared by every node of a scenario.
pub const PANID: u16 = 0xface;

/// Every catalog scenario in run order.
pub fn catalog() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(CliCommands),
        Box::new(ChildAddressTimeout),
        Box::new(RouterAddressTimeout::default()),
        Box::new(RemoveRouterId),
        Box::new(LeaderRejectsExtraRouter),
        Box::new(ReedUpgrade),
        Box::new(AddressMapCache),
        Box::new(SplitMergeRouters),
        Box::new(SplitWeight),
        Box::new(NetworkDataExpiration),
        Box::new(ContextManagement),
        Box::new(ReedAttach),
        Box::new(KeyIncrement),
    ]
}

pub fn find(name: &str) -> Option<Box<dyn Scenario>> {
    catalog().into_iter().find(|s| s.name() == name)
}

/// Open `id`, join the shared PAN and set its mode.
async fn prepare(ctx: &mut ScenarioContext, id: u16, mode: Mode) -> Result<()> {
    let node = ctx.add_node(id).await?;
    node.set_panid(PANID).await?;
    node.set_mode(mode).await
}

/// Start `id` and force it to lead a new partition.
async fn start_leader(ctx: &mut ScenarioContext, id: u16) -> Result<()> {
    let node = ctx.node(id)?;
    node.start().await?;
    node.set_state(Role::Leader).await?;
    ctx.expect_role(id, Role::Leader).await
}

async fn start_as(ctx: &mut ScenarioContext, id: u16, wait: Wait, role: Role) -> Result<()> {
    ctx.node(id)?.start().await?;
    ctx.wait(wait).await;
    ctx.expect_role(id, role).await
}

/// Addresses carved from the `2000::/12` test prefixes border routers add.
fn in_test_prefix(record: &AddressRecord) -> bool {
    record.addr.segments()[0] >> 4 == 0x200
}

/// Sleepy device that requests only stable network data (`s`).
const STABLE_ONLY_SLEEPY: Mode = Mode {
    rx_on_when_idle: false,
    secure_data_requests: true,
    full_thread_device: false,
    full_network_data: false,
};

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn test_catalog_names_are_unique() {
        let all = catalog();
        let names: BTreeSet<_> = all.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), all.len());
        assert!(find("split-weight").is_some());
        assert!(find("no-such-scenario").is_none());
    }

    #[test]
    fn test_in_test_prefix() {
        let parse = |s: &str| s.parse::<AddressRecord>().unwrap();
        assert!(in_test_prefix(&parse("2001::1234/64")));
        assert!(in_test_prefix(&parse("2003::1")));
        assert!(!in_test_prefix(&parse("fdde:ad00:beef::ff:fe00:400")));
        assert!(!in_test_prefix(&parse("fe80::1")));
    }

    #[test]
    fn test_stable_only_sleepy_mode() {
        assert_eq!(STABLE_ONLY_SLEEPY.to_string(), "s");
    }
}
