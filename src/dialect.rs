//! Command dialects spoken by DUT CLIs.
//!
//! Two spellings of the same command set exist in the field: the older
//! namespaced one (`thread start`, `mac whitelist add ...`) and the compact
//! one (`start`, `whitelist add ...`). Everything that differs between them
//! is isolated here; response parsing lives in the node module.

use std::fmt;
use std::net::Ipv6Addr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{HarnessError, Result};
use crate::node::{ExtAddr, Ipv6Prefix, Mode, NetworkDataPrefix, Role, RoutePreference};

/// Name of the mesh interface header in namespaced `ifconfig` output.
pub const MESH_INTERFACE: &str = "thread";

static PING_REPLY_NAMESPACED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"from ([0-9a-fA-F:.]+)%thread:").expect("ping reply pattern is valid")
});

static PING_REPLY_COMPACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"from ([0-9a-fA-F:.]+?):\s").expect("ping reply pattern is valid")
});

/// CLI dialect selected for a harness run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// `thread ...`, `mac ...`, `netdata ...` command groups.
    #[default]
    Namespaced,
    /// Flat verbs such as `childtimeout` and `extaddr`.
    Compact,
}

impl Dialect {
    /// Prefix `verb` with its command group in the namespaced dialect.
    fn grouped(self, group: &str, namespaced: &str, compact: &str) -> String {
        match self {
            Dialect::Namespaced => format!("{group} {namespaced}"),
            Dialect::Compact => compact.to_string(),
        }
    }

    fn unsupported(self, operation: &'static str) -> HarnessError {
        HarnessError::Unsupported {
            operation,
            dialect: self,
        }
    }

    pub fn help(self) -> String {
        "?".to_string()
    }

    pub fn start(self) -> String {
        self.grouped("thread", "start", "start")
    }

    pub fn stop(self) -> String {
        self.grouped("thread", "stop", "stop")
    }

    pub fn set_mode(self, mode: Mode) -> String {
        self.grouped("thread", &format!("mode {mode}"), &format!("mode {mode}"))
    }

    pub fn whitelist(self, action: &str) -> String {
        self.grouped(
            "mac",
            &format!("whitelist {action}"),
            &format!("whitelist {action}"),
        )
    }

    pub fn whitelist_add(self, addr: ExtAddr, rssi: Option<i8>) -> String {
        match rssi {
            Some(rssi) => self.whitelist(&format!("add {addr} {rssi}")),
            None => self.whitelist(&format!("add {addr}")),
        }
    }

    pub fn whitelist_remove(self, addr: ExtAddr) -> String {
        self.whitelist(&format!("remove {addr}"))
    }

    pub fn addr16(self) -> String {
        self.grouped("mac", "addr16", "rloc16")
    }

    pub fn addr64(self) -> String {
        self.grouped("mac", "addr64", "extaddr")
    }

    pub fn get_state(self) -> String {
        self.grouped("thread", "state", "state")
    }

    pub fn set_state(self, role: Role) -> String {
        self.grouped("thread", &format!("state {role}"), &format!("state {role}"))
    }

    pub fn child_timeout(self, value: Option<u32>) -> String {
        self.with_optional_value("thread", "timeout", "childtimeout", value)
    }

    pub fn leader_weight(self, value: Option<u8>) -> String {
        self.with_optional_value("thread", "weight", "leaderweight", value)
    }

    pub fn network_id_timeout(self, value: u8) -> String {
        self.with_optional_value(
            "thread",
            "network_id_timeout",
            "networkidtimeout",
            Some(value),
        )
    }

    pub fn router_upgrade_threshold(self, value: u8) -> String {
        self.with_optional_value(
            "thread",
            "router_upgrade_threshold",
            "routerupgradethreshold",
            Some(value),
        )
    }

    pub fn release_router_id(self, router_id: u8) -> String {
        self.with_optional_value("thread", "release_router", "releaserouterid", Some(router_id))
    }

    pub fn key_sequence(self, value: Option<u32>) -> String {
        self.with_optional_value("thread", "key_sequence", "keysequence", value)
    }

    pub fn channel(self, channel: u8) -> String {
        self.with_optional_value("mac", "channel", "channel", Some(channel))
    }

    pub fn panid(self, panid: Option<u16>) -> String {
        match panid {
            Some(panid) => self.grouped(
                "mac",
                &format!("panid 0x{panid:04x}"),
                &format!("panid 0x{panid:04x}"),
            ),
            None => self.grouped("mac", "panid", "panid"),
        }
    }

    pub fn network_name(self, name: &str) -> String {
        self.grouped("mac", &format!("name {name}"), &format!("networkname {name}"))
    }

    pub fn context_reuse_delay(self, value: Option<u32>) -> String {
        self.with_optional_value("netdata", "context_reuse_delay", "contextreusedelay", value)
    }

    pub fn prefix_add(self, prefix: &NetworkDataPrefix) -> String {
        let args = format!(
            "prefix add {} {} {}",
            prefix.prefix, prefix.flags, prefix.preference
        );
        self.grouped("netdata", &args, &args)
    }

    pub fn prefix_remove(self, prefix: Ipv6Prefix) -> String {
        let args = format!("prefix remove {prefix}");
        self.grouped("netdata", &args, &args)
    }

    pub fn route_add(self, prefix: Ipv6Prefix, preference: RoutePreference) -> String {
        let args = format!("route add {prefix} {preference}");
        self.grouped("netdata", &args, &args)
    }

    pub fn route_remove(self, prefix: Ipv6Prefix) -> String {
        let args = format!("route remove {prefix}");
        self.grouped("netdata", &args, &args)
    }

    pub fn register_netdata(self) -> String {
        self.grouped("netdata", "register", "netdataregister")
    }

    /// Interface listing. Namespaced output groups rows under `name:`
    /// headers; compact output is a flat list of mesh addresses.
    pub fn addresses(self) -> String {
        match self {
            Dialect::Namespaced => "ifconfig".to_string(),
            Dialect::Compact => "ipaddr".to_string(),
        }
    }

    pub fn add_ipaddr(self, addr: Ipv6Addr) -> String {
        match self {
            Dialect::Namespaced => format!("ip addr add {addr} dev {MESH_INTERFACE}"),
            Dialect::Compact => format!("ipaddr add {addr}"),
        }
    }

    pub fn cache(self) -> Result<String> {
        match self {
            Dialect::Namespaced => Ok("thread cache".to_string()),
            Dialect::Compact => Err(self.unsupported("cache")),
        }
    }

    pub fn scan(self) -> String {
        self.grouped("mac", "scan", "scan")
    }

    pub fn ping(self, addr: Ipv6Addr, size: Option<u16>) -> String {
        match (self, size) {
            (Dialect::Namespaced, Some(size)) => {
                format!("ping -I {MESH_INTERFACE} -s {size} {addr}")
            }
            (Dialect::Namespaced, None) => format!("ping -I {MESH_INTERFACE} {addr}"),
            (Dialect::Compact, Some(size)) => format!("ping {addr} {size}"),
            (Dialect::Compact, None) => format!("ping {addr}"),
        }
    }

    /// Pattern capturing the responder address of one echo reply line.
    pub fn ping_reply_pattern(self) -> &'static Regex {
        match self {
            Dialect::Namespaced => &PING_REPLY_NAMESPACED,
            Dialect::Compact => &PING_REPLY_COMPACT,
        }
    }

    fn with_optional_value<T: fmt::Display>(
        self,
        group: &str,
        namespaced: &str,
        compact: &str,
        value: Option<T>,
    ) -> String {
        match value {
            Some(value) => self.grouped(
                group,
                &format!("{namespaced} {value}"),
                &format!("{compact} {value}"),
            ),
            None => self.grouped(group, namespaced, compact),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Namespaced => write!(f, "namespaced"),
            Dialect::Compact => write!(f, "compact"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "namespaced" | "legacy" => Ok(Dialect::Namespaced),
            "compact" => Ok(Dialect::Compact),
            _ => Err(format!(
                "invalid dialect '{}': use namespaced or compact",
                s
            )),
        }
    }
}

impl clap::ValueEnum for Dialect {
    fn value_variants<'a>() -> &'a [Self] {
        &[Dialect::Namespaced, Dialect::Compact]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Dialect::Namespaced => {
                Some(clap::builder::PossibleValue::new("namespaced").alias("legacy"))
            }
            Dialect::Compact => Some(clap::builder::PossibleValue::new("compact")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PrefixFlags;

    #[test]
    fn test_dialect_default() {
        assert_eq!(Dialect::default(), Dialect::Namespaced);
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("compact".parse::<Dialect>().unwrap(), Dialect::Compact);
        assert_eq!("legacy".parse::<Dialect>().unwrap(), Dialect::Namespaced);
        assert!("ncp".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_namespaced_spellings() {
        let d = Dialect::Namespaced;
        assert_eq!(d.start(), "thread start");
        assert_eq!(d.set_mode(Mode::ROUTER), "thread mode rsdn");
        assert_eq!(
            d.whitelist_add(ExtAddr(0x1122334455667788), Some(-40)),
            "mac whitelist add 1122334455667788 -40"
        );
        assert_eq!(d.child_timeout(Some(100)), "thread timeout 100");
        assert_eq!(d.child_timeout(None), "thread timeout");
        assert_eq!(d.network_id_timeout(110), "thread network_id_timeout 110");
        assert_eq!(d.register_netdata(), "netdata register");
        assert_eq!(d.cache().unwrap(), "thread cache");
        assert_eq!(
            d.ping("fdde::1".parse().unwrap(), Some(64)),
            "ping -I thread -s 64 fdde::1"
        );
    }

    #[test]
    fn test_compact_spellings() {
        let d = Dialect::Compact;
        assert_eq!(d.start(), "start");
        assert_eq!(d.whitelist("enable"), "whitelist enable");
        assert_eq!(d.addr16(), "rloc16");
        assert_eq!(d.addr64(), "extaddr");
        assert_eq!(d.leader_weight(Some(2)), "leaderweight 2");
        assert_eq!(d.release_router_id(5), "releaserouterid 5");
        assert_eq!(d.panid(Some(0xface)), "panid 0xface");
        assert_eq!(d.network_name("OpenThread"), "networkname OpenThread");
        assert_eq!(d.ping("2001::1".parse().unwrap(), None), "ping 2001::1");
        assert!(matches!(
            d.cache(),
            Err(HarnessError::Unsupported { operation: "cache", .. })
        ));
    }

    #[test]
    fn test_ping_reply_patterns() {
        let caps = Dialect::Namespaced
            .ping_reply_pattern()
            .captures("8 bytes from fdde:ad00:beef:0:0:ff:fe00:400%thread: icmp_seq=1 hlim=64")
            .unwrap();
        assert_eq!(&caps[1], "fdde:ad00:beef:0:0:ff:fe00:400");

        let caps = Dialect::Compact
            .ping_reply_pattern()
            .captures("16 bytes from 2001:0:0:0:1234:5678:9abc:1: icmp_seq=1 hlim=64 time=0ms")
            .unwrap();
        assert_eq!(&caps[1], "2001:0:0:0:1234:5678:9abc:1");
    }

    #[test]
    fn test_prefix_commands_share_arguments() {
        let prefix = NetworkDataPrefix::new(
            "2001::/64".parse().unwrap(),
            "pvcrs".parse::<PrefixFlags>().unwrap(),
        );
        assert_eq!(
            Dialect::Namespaced.prefix_add(&prefix),
            "netdata prefix add 2001::/64 pvcrs med"
        );
        assert_eq!(
            Dialect::Compact.prefix_add(&prefix),
            "prefix add 2001::/64 pvcrs med"
        );
        assert_eq!(
            Dialect::Compact.route_add("2002::/64".parse().unwrap(), RoutePreference::High),
            "route add 2002::/64 high"
        );
    }
}
