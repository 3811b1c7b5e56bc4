//! Typed façade over one DUT's command line.
//!
//! A [`Node`] turns mesh operations into dialect-specific commands, parses
//! the replies into the value types of [`types`], and keeps the only local
//! shadow state the harness needs: the whitelist edge set and the timers it
//! configured.

pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

pub use types::{
    AddressRecord, CacheEntry, ExtAddr, Ipv6Prefix, Mode, NetworkDataPrefix, NodeId, PrefixFlags,
    Rloc16, Role, RoutePreference, ScanResult, Scope,
};

use crate::config::HarnessConfig;
use crate::dialect::{Dialect, MESH_INTERFACE};
use crate::error::{HarnessError, Result};
use crate::session::{CommandSession, Reply, Request, Row};
use crate::transport::{Transport, TransportState};

/// Child timeout every node is configured with on construction.
pub const INITIAL_CHILD_TIMEOUT: u32 = 100;

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("response pattern is valid")
}

static HEX4: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^(?:0x)?([0-9a-fA-F]{4})\r?$"));
static HEX16: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^([0-9a-fA-F]{16})\r?$"));
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^(\d+)\r?$"));
static PANID: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^(?:0x)?([0-9a-fA-F]{1,4})\r?$"));
static ROLE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?m)^(detached|child|router|leader)\r?$"));
static HELP_HEADER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^Commands:\r?$"));
static HELP_VERB: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]*([^\s:]+)\r?$"));
static IF_HEADER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^(\S+):\r?$"));
static IF_INET6: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?m)^[ \t]+inet6[ \t]+([0-9a-fA-F:.]+)/(\d{1,3})[ \t]*\r?$"));
static IPADDR: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?m)^[ \t]*([0-9a-fA-F]*:[0-9a-fA-F:.]*)\r?$"));
static CACHE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?m)^[ \t]*([0-9a-fA-F:.]+)[ \t]+(\d+)[ \t]+(?:0x)?([0-9a-fA-F]{4})[ \t]+(\d+)[ \t]*\r?$")
});
static CACHE_TOTAL: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^Total:[ \t]*\d+\r?$"));
static SCAN_ROW: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?m)^\|[ \t]*(\S+)[ \t]*",
        r"\|[ \t]*([0-9a-fA-F]{16})[ \t]*",
        r"\|[ \t]*([0-9a-fA-F]{4})[ \t]*",
        r"\|[ \t]*([0-9a-fA-F]{16})[ \t]*",
        r"\|[ \t]*(\d+)[ \t]*",
        r"\|[ \t]*(-?\d+)[ \t]*\|"
    ))
});

fn parse<T: FromStr>(what: &'static str, token: &str) -> Result<T> {
    token
        .trim()
        .parse()
        .map_err(|_| HarnessError::invalid(what, token))
}

fn parse_hex_u16(what: &'static str, token: &str) -> Result<u16> {
    let digits = token.trim().trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|_| HarnessError::invalid(what, token))
}

/// Timer values this node was configured with through the harness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timers {
    pub child_timeout: Option<u32>,
    pub network_id_timeout: Option<u8>,
    pub context_reuse_delay: Option<u32>,
}

/// One DUT as seen by a scenario.
pub struct Node {
    id: NodeId,
    dialect: Dialect,
    session: CommandSession,
    scan_timeout: Duration,
    ext_addr: Option<ExtAddr>,
    whitelist: BTreeMap<ExtAddr, Option<i8>>,
    whitelist_enabled: bool,
    timers: Timers,
}

impl Node {
    /// Open the transport for `id` and bring the DUT to a known state:
    /// whitelist cleared and disabled, child timeout 100.
    pub async fn open(id: NodeId, config: &HarnessConfig) -> Result<Self> {
        let transport = Transport::open(id, config).await?;
        Self::with_transport(transport, config).await
    }

    /// Wrap an already open transport and run the construction sequence.
    pub async fn with_transport(transport: Transport, config: &HarnessConfig) -> Result<Self> {
        let id = transport.node();
        let session = CommandSession::new(transport, config.response_timeout, config.transcript_len);
        let mut node = Self {
            id,
            dialect: config.dialect,
            session,
            scan_timeout: config.scan_timeout,
            ext_addr: None,
            whitelist: BTreeMap::new(),
            whitelist_enabled: false,
            timers: Timers::default(),
        };
        node.clear_whitelist().await?;
        node.disable_whitelist().await?;
        node.set_timeout(INITIAL_CHILD_TIMEOUT).await?;
        info!(node = %id, dialect = %node.dialect, "node ready");
        Ok(node)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_connected(&self) -> bool {
        self.session.transport().state() == TransportState::Connected
    }

    /// Whitelist entries programmed through this node, with their RSSI.
    pub fn whitelist(&self) -> &BTreeMap<ExtAddr, Option<i8>> {
        &self.whitelist
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.whitelist_enabled
    }

    pub fn timers(&self) -> Timers {
        self.timers
    }

    /// Rendering of the most recent command exchange, for failure reports.
    pub fn last_exchange(&self) -> Option<String> {
        self.session
            .transcript()
            .last()
            .map(|e| format!("node {}: {e}", self.id))
    }

    pub fn transcript(&self) -> &crate::session::Transcript {
        self.session.transcript()
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    async fn call(&mut self, request: Request) -> Result<Reply> {
        let command = request.command.clone();
        let timeout = request.timeout.unwrap_or(self.session.timeout());
        self.session
            .request(request)
            .await?
            .require(&command, timeout)
    }

    async fn ack(&mut self, command: String) -> Result<()> {
        self.call(Request::ack(command)).await.map(|_| ())
    }

    async fn scalar(&mut self, command: String, value: &Regex) -> Result<String> {
        match self.call(Request::scalar(command.clone(), value)).await? {
            Reply::Scalar(token) => Ok(token),
            other => Err(unexpected(&command, &other)),
        }
    }

    async fn rows(&mut self, request: Request) -> Result<Vec<Row>> {
        let command = request.command.clone();
        match self.call(request).await? {
            Reply::Rows(rows) => Ok(rows),
            other => Err(unexpected(&command, &other)),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle and role
    // -----------------------------------------------------------------------

    pub async fn start(&mut self) -> Result<()> {
        self.ack(self.dialect.start()).await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.ack(self.dialect.stop()).await
    }

    pub async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.ack(self.dialect.set_mode(mode)).await
    }

    /// Force a role; only meaningful for the node seeding a mesh as leader.
    pub async fn set_state(&mut self, role: Role) -> Result<()> {
        self.ack(self.dialect.set_state(role)).await
    }

    /// Current role, queried from the DUT on every call.
    pub async fn get_state(&mut self) -> Result<Role> {
        let token = self.scalar(self.dialect.get_state(), &ROLE).await?;
        let role: Role = parse("role", &token)?;
        debug!(node = %self.id, %role, "state");
        Ok(role)
    }

    // -----------------------------------------------------------------------
    // Whitelist
    // -----------------------------------------------------------------------

    pub async fn enable_whitelist(&mut self) -> Result<()> {
        self.ack(self.dialect.whitelist("enable")).await?;
        self.whitelist_enabled = true;
        Ok(())
    }

    pub async fn disable_whitelist(&mut self) -> Result<()> {
        self.ack(self.dialect.whitelist("disable")).await?;
        self.whitelist_enabled = false;
        Ok(())
    }

    pub async fn clear_whitelist(&mut self) -> Result<()> {
        self.ack(self.dialect.whitelist("clear")).await?;
        self.whitelist.clear();
        Ok(())
    }

    pub async fn add_whitelist(&mut self, addr: ExtAddr, rssi: Option<i8>) -> Result<()> {
        self.ack(self.dialect.whitelist_add(addr, rssi)).await?;
        self.whitelist.insert(addr, rssi);
        Ok(())
    }

    pub async fn remove_whitelist(&mut self, addr: ExtAddr) -> Result<()> {
        self.ack(self.dialect.whitelist_remove(addr)).await?;
        self.whitelist.remove(&addr);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Identity and radio parameters
    // -----------------------------------------------------------------------

    pub async fn get_addr16(&mut self) -> Result<Rloc16> {
        let token = self.scalar(self.dialect.addr16(), &HEX4).await?;
        token.parse()
    }

    /// Extended address; queried once and then reused, since it cannot change
    /// while the DUT runs.
    pub async fn get_addr64(&mut self) -> Result<ExtAddr> {
        if let Some(addr) = self.ext_addr {
            return Ok(addr);
        }
        let token = self.scalar(self.dialect.addr64(), &HEX16).await?;
        let addr: ExtAddr = token.parse()?;
        self.ext_addr = Some(addr);
        Ok(addr)
    }

    pub async fn set_channel(&mut self, channel: u8) -> Result<()> {
        self.ack(self.dialect.channel(channel)).await
    }

    pub async fn get_panid(&mut self) -> Result<u16> {
        let token = self.scalar(self.dialect.panid(None), &PANID).await?;
        parse_hex_u16("panid", &token)
    }

    pub async fn set_panid(&mut self, panid: u16) -> Result<()> {
        self.ack(self.dialect.panid(Some(panid))).await
    }

    pub async fn set_network_name(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(HarnessError::invalid("network name", name));
        }
        self.ack(self.dialect.network_name(name)).await
    }

    pub async fn get_key_sequence(&mut self) -> Result<u32> {
        let token = self.scalar(self.dialect.key_sequence(None), &DECIMAL).await?;
        parse("key sequence", &token)
    }

    pub async fn set_key_sequence(&mut self, sequence: u32) -> Result<()> {
        self.ack(self.dialect.key_sequence(Some(sequence))).await
    }

    // -----------------------------------------------------------------------
    // Timers and router selection
    // -----------------------------------------------------------------------

    pub async fn get_timeout(&mut self) -> Result<u32> {
        let token = self.scalar(self.dialect.child_timeout(None), &DECIMAL).await?;
        parse("child timeout", &token)
    }

    pub async fn set_timeout(&mut self, timeout: u32) -> Result<()> {
        self.ack(self.dialect.child_timeout(Some(timeout))).await?;
        self.timers.child_timeout = Some(timeout);
        Ok(())
    }

    pub async fn get_weight(&mut self) -> Result<u8> {
        let token = self.scalar(self.dialect.leader_weight(None), &DECIMAL).await?;
        parse("leader weight", &token)
    }

    pub async fn set_weight(&mut self, weight: u8) -> Result<()> {
        self.ack(self.dialect.leader_weight(Some(weight))).await
    }

    pub async fn set_network_id_timeout(&mut self, timeout: u8) -> Result<()> {
        self.ack(self.dialect.network_id_timeout(timeout)).await?;
        self.timers.network_id_timeout = Some(timeout);
        Ok(())
    }

    pub async fn set_router_upgrade_threshold(&mut self, threshold: u8) -> Result<()> {
        self.ack(self.dialect.router_upgrade_threshold(threshold))
            .await
    }

    pub async fn release_router_id(&mut self, router_id: u8) -> Result<()> {
        self.ack(self.dialect.release_router_id(router_id)).await
    }

    pub async fn get_context_reuse_delay(&mut self) -> Result<u32> {
        let token = self
            .scalar(self.dialect.context_reuse_delay(None), &DECIMAL)
            .await?;
        parse("context reuse delay", &token)
    }

    pub async fn set_context_reuse_delay(&mut self, delay: u32) -> Result<()> {
        self.ack(self.dialect.context_reuse_delay(Some(delay))).await?;
        self.timers.context_reuse_delay = Some(delay);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Network data
    // -----------------------------------------------------------------------

    pub async fn add_prefix(&mut self, prefix: &NetworkDataPrefix) -> Result<()> {
        self.ack(self.dialect.prefix_add(prefix)).await
    }

    pub async fn remove_prefix(&mut self, prefix: Ipv6Prefix) -> Result<()> {
        self.ack(self.dialect.prefix_remove(prefix)).await
    }

    pub async fn add_route(&mut self, prefix: Ipv6Prefix, preference: RoutePreference) -> Result<()> {
        self.ack(self.dialect.route_add(prefix, preference)).await
    }

    pub async fn remove_route(&mut self, prefix: Ipv6Prefix) -> Result<()> {
        self.ack(self.dialect.route_remove(prefix)).await
    }

    pub async fn register_netdata(&mut self) -> Result<()> {
        self.ack(self.dialect.register_netdata()).await
    }

    // -----------------------------------------------------------------------
    // Addresses and queries
    // -----------------------------------------------------------------------

    /// Addresses of the mesh interface only.
    pub async fn get_addrs(&mut self) -> Result<Vec<AddressRecord>> {
        let rows = match self.dialect {
            Dialect::Namespaced => {
                let request =
                    Request::sectioned(self.dialect.addresses(), &IF_HEADER, &IF_INET6, MESH_INTERFACE);
                self.rows(request).await?
            }
            Dialect::Compact => {
                self.rows(Request::rows(self.dialect.addresses(), &IPADDR, &[]))
                    .await?
            }
        };
        rows.iter()
            .map(|row| match row.as_slice() {
                [addr, len] => format!("{addr}/{len}").parse(),
                [addr] => addr.parse(),
                _ => Err(HarnessError::invalid("address row", row.join(" "))),
            })
            .collect()
    }

    pub async fn add_ipaddr(&mut self, addr: Ipv6Addr) -> Result<()> {
        self.ack(self.dialect.add_ipaddr(addr)).await
    }

    /// Address-resolution cache. Not available in the compact dialect.
    pub async fn get_cache(&mut self) -> Result<Vec<CacheEntry>> {
        let command = self.dialect.cache()?;
        let rows = self
            .rows(Request::rows(command, &CACHE_ROW, &[&*CACHE_TOTAL]))
            .await?;
        rows.iter()
            .map(|row| match row.as_slice() {
                [target, state, rloc16, timeout] => Ok(CacheEntry {
                    target: parse("cache target", target)?,
                    state: parse("cache state", state)?,
                    rloc16: rloc16.parse()?,
                    timeout: parse("cache timeout", timeout)?,
                }),
                _ => Err(HarnessError::invalid("cache row", row.join(" "))),
            })
            .collect()
    }

    pub async fn scan(&mut self) -> Result<Vec<ScanResult>> {
        let request = Request::rows(self.dialect.scan(), &SCAN_ROW, &[]).with_timeout(self.scan_timeout);
        let rows = self.rows(request).await?;
        rows.iter()
            .map(|row| match row.as_slice() {
                [name, ext_panid, panid, ext_addr, channel, rssi] => Ok(ScanResult {
                    network_name: name.clone(),
                    ext_panid: ext_panid.clone(),
                    panid: parse_hex_u16("panid", panid)?,
                    ext_addr: ext_addr.parse()?,
                    channel: parse("channel", channel)?,
                    rssi: parse("rssi", rssi)?,
                }),
                _ => Err(HarnessError::invalid("scan row", row.join(" "))),
            })
            .collect()
    }

    /// Ping `addr` and collect responders until `response_count` distinct
    /// ones answered.
    ///
    /// Fewer than `response_count` responders within the response timeout
    /// yields [`HarnessError::ResponseTimeout`], the expected outcome for
    /// unreachable addresses.
    pub async fn ping(
        &mut self,
        addr: Ipv6Addr,
        response_count: usize,
        size: Option<u16>,
    ) -> Result<BTreeSet<Ipv6Addr>> {
        let request = Request::collect(
            self.dialect.ping(addr, size),
            self.dialect.ping_reply_pattern(),
            response_count,
        );
        let rows = self.rows(request).await?;
        rows.iter()
            .map(|row| parse("responder", row.first().map(String::as_str).unwrap_or("")))
            .collect()
    }

    /// Verbs listed by the CLI help.
    pub async fn get_commands(&mut self) -> Result<Vec<String>> {
        let rows = self
            .rows(Request::rows(self.dialect.help(), &HELP_VERB, &[&*HELP_HEADER]))
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.into_iter().next()).collect())
    }

    /// Send a raw command and expect `Done`.
    pub async fn run_command(&mut self, command: &str) -> Result<()> {
        self.ack(command.to_string()).await
    }

    /// Shut the DUT down and release the transport. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        self.session.close().await
    }
}

fn unexpected(command: &str, reply: &Reply) -> HarnessError {
    HarnessError::ProtocolMismatch {
        command: command.to_string(),
        received: format!("{reply:?}"),
    }
}
