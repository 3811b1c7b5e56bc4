//! Toy mesh model behind the simulated CLI.
//!
//! Time advances in ticks, [`TICKS_PER_UNIT`] per protocol time unit. Radio
//! reachability is only the whitelist: two started nodes share a link when
//! each admits the other. On top of that the model keeps partitions with a
//! leader, router id allocation with expiry and reuse delay, parent/child
//! relations, registered network data and address-resolution caches.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::net::Ipv6Addr;

use tracing::debug;

pub const TICKS_PER_UNIT: u64 = 4;
/// Router ids a leader hands out at most.
pub const MAX_ROUTERS: usize = 32;
const MAX_ROUTER_ID: u8 = 62;

const ATTACH_DELAY: u64 = TICKS_PER_UNIT;
const FORM_PARTITION_DELAY: u64 = 4 * TICKS_PER_UNIT;
const ROUTER_ID_EXPIRY: u64 = 120 * TICKS_PER_UNIT;
const ROUTER_ID_REUSE_DELAY: u64 = 100 * TICKS_PER_UNIT;

pub const DEFAULT_LEADER_WEIGHT: u8 = 64;
pub const DEFAULT_NETWORK_ID_TIMEOUT: u8 = 120;
pub const DEFAULT_UPGRADE_THRESHOLD: u8 = 16;
pub const DEFAULT_CHILD_TIMEOUT: u32 = 240;
pub const DEFAULT_CONTEXT_REUSE_DELAY: u32 = 300;
pub const DEFAULT_CHANNEL: u8 = 11;
pub const DEFAULT_PANID: u16 = 0xabcd;
pub const DEFAULT_NETWORK_NAME: &str = "OpenThread";
pub const EXT_PANID: &str = "dead00beef00cafe";
/// RSSI reported by scans for peers without a configured whitelist RSSI.
pub const DEFAULT_RSSI: i8 = -20;

const LINK_LOCAL_PREFIX: u64 = 0xfe80_0000_0000_0000;
const MESH_LOCAL_PREFIX: u64 = 0xfdde_ad00_beef_0000;
const RLOC_IID: u64 = 0x0000_00ff_fe00_0000;
const EXT_ADDR_BASE: u64 = 0x1ace_5eed_0000_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Disabled,
    Detached,
    Child,
    Router,
    Leader,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Disabled => "disabled",
            Role::Detached => "detached",
            Role::Child => "child",
            Role::Router => "router",
            Role::Leader => "leader",
        }
    }

    pub fn is_attached(self) -> bool {
        matches!(self, Role::Child | Role::Router | Role::Leader)
    }

    pub fn is_router(self) -> bool {
        matches!(self, Role::Router | Role::Leader)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `rsdn` capability letters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode {
    pub rx_on_when_idle: bool,
    pub secure: bool,
    pub full_device: bool,
    pub full_network_data: bool,
}

impl Default for Mode {
    fn default() -> Self {
        Self {
            rx_on_when_idle: true,
            secure: true,
            full_device: true,
            full_network_data: true,
        }
    }
}

impl Mode {
    pub fn parse(letters: &str) -> Option<Self> {
        let mut mode = Mode {
            rx_on_when_idle: false,
            secure: false,
            full_device: false,
            full_network_data: false,
        };
        for letter in letters.chars() {
            match letter {
                'r' => mode.rx_on_when_idle = true,
                's' => mode.secure = true,
                'd' => mode.full_device = true,
                'n' => mode.full_network_data = true,
                _ => return None,
            }
        }
        Some(mode)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, letter) in [
            (self.rx_on_when_idle, "r"),
            (self.secure, "s"),
            (self.full_device, "d"),
            (self.full_network_data, "n"),
        ] {
            if set {
                f.write_str(letter)?;
            }
        }
        Ok(())
    }
}

/// A prefix or route staged locally or registered in network data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixEntry {
    pub addr: Ipv6Addr,
    pub len: u8,
    pub flags: String,
    pub preference: String,
}

impl PrefixEntry {
    pub fn key(&self) -> (Ipv6Addr, u8) {
        (self.addr, self.len)
    }

    fn configures_addresses(&self) -> bool {
        self.flags.contains('p') || self.flags.contains('v')
    }

    fn is_stable(&self) -> bool {
        self.flags.contains('s')
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub rloc16: u16,
    pub age: u64,
}

/// One neighbor heard during a scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Beacon {
    pub network_name: String,
    pub panid: u16,
    pub ext_addr: u64,
    pub channel: u8,
    pub rssi: i8,
}

#[derive(Clone, Debug)]
pub struct SimNode {
    pub id: u16,
    pub ext_addr: u64,
    pub started: bool,
    pub role: Role,
    pub mode: Mode,
    pub whitelist: BTreeMap<u64, Option<i8>>,
    pub whitelist_enabled: bool,
    pub child_timeout: u32,
    pub leader_weight: u8,
    pub network_id_timeout: u8,
    pub router_upgrade_threshold: u8,
    pub context_reuse_delay: u32,
    pub key_sequence: u32,
    pub channel: u8,
    pub panid: u16,
    pub network_name: String,
    pub rloc16: u16,
    pub local_prefixes: BTreeMap<(Ipv6Addr, u8), PrefixEntry>,
    pub local_routes: BTreeMap<(Ipv6Addr, u8), PrefixEntry>,
    pub extra_addrs: Vec<Ipv6Addr>,
    pub cache: BTreeMap<Ipv6Addr, CacheEntry>,
    partition: Option<u32>,
    router_id: Option<u8>,
    previous_router_id: Option<u8>,
    parent: Option<u16>,
    next_child: u16,
    detached_since: u64,
    leaderless_since: Option<u64>,
}

impl SimNode {
    fn new(id: u16) -> Self {
        Self {
            id,
            ext_addr: EXT_ADDR_BASE | u64::from(id),
            started: false,
            role: Role::Disabled,
            mode: Mode::default(),
            whitelist: BTreeMap::new(),
            whitelist_enabled: false,
            child_timeout: DEFAULT_CHILD_TIMEOUT,
            leader_weight: DEFAULT_LEADER_WEIGHT,
            network_id_timeout: DEFAULT_NETWORK_ID_TIMEOUT,
            router_upgrade_threshold: DEFAULT_UPGRADE_THRESHOLD,
            context_reuse_delay: DEFAULT_CONTEXT_REUSE_DELAY,
            key_sequence: 0,
            channel: DEFAULT_CHANNEL,
            panid: DEFAULT_PANID,
            network_name: DEFAULT_NETWORK_NAME.to_string(),
            rloc16: 0xfffe,
            local_prefixes: BTreeMap::new(),
            local_routes: BTreeMap::new(),
            extra_addrs: Vec::new(),
            cache: BTreeMap::new(),
            partition: None,
            router_id: None,
            previous_router_id: None,
            parent: None,
            next_child: 1,
            detached_since: 0,
            leaderless_since: None,
        }
    }

    fn iid(&self) -> u64 {
        self.ext_addr ^ 0x0200_0000_0000_0000
    }

    pub fn link_local(&self) -> Ipv6Addr {
        with_iid(LINK_LOCAL_PREFIX, self.iid())
    }

    pub fn mesh_local_eid(&self) -> Ipv6Addr {
        with_iid(MESH_LOCAL_PREFIX, self.iid())
    }

    pub fn rloc(&self) -> Ipv6Addr {
        with_iid(MESH_LOCAL_PREFIX, RLOC_IID | u64::from(self.rloc16))
    }

    pub fn partition(&self) -> Option<u32> {
        self.partition
    }

    pub fn parent(&self) -> Option<u16> {
        self.parent
    }

    fn admits(&self, other: &SimNode) -> bool {
        !self.whitelist_enabled || self.whitelist.contains_key(&other.ext_addr)
    }
}

fn with_iid(prefix: u64, iid: u64) -> Ipv6Addr {
    Ipv6Addr::from((u128::from(prefix) << 64) | u128::from(iid))
}

fn is_rloc(addr: &Ipv6Addr) -> bool {
    let bits = u128::from(*addr);
    (bits >> 64) as u64 == MESH_LOCAL_PREFIX && (bits as u64) & !0xffff == RLOC_IID
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

#[derive(Clone, Debug)]
struct Partition {
    leader: u16,
    weight: u8,
    router_ids: BTreeMap<u8, u16>,
    orphaned_since: BTreeMap<u8, u64>,
    reserved_until: BTreeMap<u8, u64>,
    prefixes: BTreeMap<(Ipv6Addr, u8), (PrefixEntry, u16)>,
    routes: BTreeMap<(Ipv6Addr, u8), (PrefixEntry, u16)>,
}

impl Partition {
    fn new(leader: u16, weight: u8) -> Self {
        Self {
            leader,
            weight,
            router_ids: BTreeMap::new(),
            orphaned_since: BTreeMap::new(),
            reserved_until: BTreeMap::new(),
            prefixes: BTreeMap::new(),
            routes: BTreeMap::new(),
        }
    }
}

/// All simulated nodes and the partitions they form.
#[derive(Debug)]
pub struct World {
    now: u64,
    nodes: BTreeMap<u16, SimNode>,
    partitions: BTreeMap<u32, Partition>,
    next_partition: u32,
}

impl World {
    /// Nodes `1..=count`, all stopped.
    pub fn new(count: u16) -> Self {
        Self {
            now: 0,
            nodes: (1..=count).map(|id| (id, SimNode::new(id))).collect(),
            partitions: BTreeMap::new(),
            next_partition: 1,
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn node(&self, id: u16) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: u16) -> Option<&mut SimNode> {
        self.nodes.get_mut(&id)
    }

    /// Run every tick up to `tick`.
    pub fn advance_to(&mut self, tick: u64) {
        while self.now < tick {
            self.now += 1;
            self.step();
        }
    }

    pub fn advance_units(&mut self, units: u64) {
        self.advance_to(self.now + units * TICKS_PER_UNIT);
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub fn start(&mut self, id: u16) {
        let now = self.now;
        if let Some(node) = self.nodes.get_mut(&id)
            && !node.started
        {
            node.started = true;
            node.role = Role::Detached;
            node.detached_since = now;
            debug!(node = id, "started");
        }
    }

    pub fn stop(&mut self, id: u16) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.started = false;
            node.role = Role::Disabled;
            node.partition = None;
            node.parent = None;
            node.router_id = None;
            node.leaderless_since = None;
            node.cache.clear();
            debug!(node = id, "stopped");
        }
    }

    /// Back to the state of a freshly launched process.
    pub fn reset(&mut self, id: u16) {
        self.stop(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            *node = SimNode::new(id);
        }
    }

    pub fn set_state(&mut self, id: u16, role: Role) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if !node.started {
            return;
        }
        match role {
            Role::Leader if node.role != Role::Leader => self.form_partition(id),
            Role::Router if node.role == Role::Child && node.mode.full_device => {
                if let Some(pid) = node.partition {
                    self.make_router(id, pid);
                }
            }
            Role::Detached | Role::Child if node.role.is_router() => {
                self.release_own_router_id(id);
                self.detach(id);
            }
            Role::Detached => self.detach(id),
            _ => {}
        }
    }

    /// Leader-side release of `router_id`; its holder has to attach again.
    pub fn release_router_id(&mut self, leader: u16, router_id: u8) {
        let Some(pid) = self
            .nodes
            .get(&leader)
            .filter(|n| n.role == Role::Leader)
            .and_then(|n| n.partition)
        else {
            return;
        };
        let now = self.now;
        let Some(partition) = self.partitions.get_mut(&pid) else {
            return;
        };
        let Some(holder) = partition.router_ids.remove(&router_id) else {
            return;
        };
        partition.orphaned_since.remove(&router_id);
        partition
            .reserved_until
            .insert(router_id, now + ROUTER_ID_REUSE_DELAY);
        debug!(leader, router_id, holder, "router id released");
        if holder != leader {
            self.detach(holder);
        }
    }

    /// Publish `id`'s staged prefixes and routes to its partition.
    pub fn register_netdata(&mut self, id: u16) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let Some(partition) = node.partition.and_then(|pid| self.partitions.get_mut(&pid)) else {
            return;
        };
        partition.prefixes.retain(|_, (_, origin)| *origin != id);
        partition.routes.retain(|_, (_, origin)| *origin != id);
        for entry in node.local_prefixes.values() {
            partition.prefixes.insert(entry.key(), (entry.clone(), id));
        }
        for entry in node.local_routes.values() {
            partition.routes.insert(entry.key(), (entry.clone(), id));
        }
        debug!(node = id, prefixes = partition.prefixes.len(), "network data registered");
    }

    /// Set the key sequence of `id` and everyone in its partition.
    pub fn set_key_sequence(&mut self, id: u16, sequence: u32) {
        let partition = self.nodes.get(&id).and_then(|n| n.partition);
        for node in self.nodes.values_mut() {
            if node.id == id || (partition.is_some() && node.partition == partition) {
                node.key_sequence = sequence;
            }
        }
    }

    /// Interface addresses of `id` with prefix lengths.
    pub fn addresses(&self, id: u16) -> Vec<(Ipv6Addr, u8)> {
        let Some(node) = self.nodes.get(&id).filter(|n| n.started) else {
            return Vec::new();
        };
        let mut addrs = vec![(node.link_local(), 64), (node.mesh_local_eid(), 64)];
        if node.role.is_attached() {
            addrs.push((node.rloc(), 64));
            if let Some(partition) = node.partition.and_then(|pid| self.partitions.get(&pid)) {
                for (entry, _) in partition.prefixes.values() {
                    if entry.configures_addresses()
                        && (node.mode.full_network_data || entry.is_stable())
                    {
                        let mask = u128::MAX.checked_shl(128 - u32::from(entry.len)).unwrap_or(0);
                        let addr = (u128::from(entry.addr) & mask) | u128::from(node.iid());
                        addrs.push((Ipv6Addr::from(addr), entry.len));
                    }
                }
            }
        }
        addrs.extend(node.extra_addrs.iter().map(|addr| (*addr, 64)));
        addrs
    }

    /// Addresses answering an echo request from `src` to `addr`.
    pub fn ping(&mut self, src: u16, addr: Ipv6Addr) -> Vec<Ipv6Addr> {
        let Some(source) = self.nodes.get(&src).filter(|n| n.started) else {
            return Vec::new();
        };

        if addr.is_multicast() {
            return match addr.segments()[0] {
                0xff02 => self
                    .nodes
                    .values()
                    .filter(|n| n.id != src && self.usable(src, n.id))
                    .map(SimNode::link_local)
                    .collect(),
                0xff03 => match source.partition {
                    Some(pid) if source.role.is_attached() => self
                        .mesh_component(src, pid)
                        .into_iter()
                        .filter(|id| *id != src)
                        .filter_map(|id| self.nodes.get(&id).map(SimNode::mesh_local_eid))
                        .collect(),
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
        }

        let Some(owner) = self.owner_of(&addr) else {
            return Vec::new();
        };
        if owner == src {
            return vec![addr];
        }
        if is_link_local(&addr) {
            return if self.usable(src, owner) { vec![addr] } else { Vec::new() };
        }
        if !self.mesh_reachable(src, owner) {
            return Vec::new();
        }

        let resolver = if source.role.is_router() {
            Some(src)
        } else {
            source.parent
        };
        let owner_rloc16 = self.nodes[&owner].rloc16;
        let now = self.now;
        if let Some(resolver) = resolver.filter(|r| *r != owner)
            && !is_rloc(&addr)
            && let Some(node) = self.nodes.get_mut(&resolver)
        {
            node.cache.insert(
                addr,
                CacheEntry {
                    rloc16: owner_rloc16,
                    age: now,
                },
            );
        }
        vec![addr]
    }

    /// Beacons `src` hears: started routers its whitelist admits.
    pub fn scan(&self, src: u16) -> Vec<Beacon> {
        let Some(source) = self.nodes.get(&src).filter(|n| n.started) else {
            return Vec::new();
        };
        self.nodes
            .values()
            .filter(|n| n.id != src && n.started && n.role.is_router() && source.admits(n))
            .map(|n| Beacon {
                network_name: n.network_name.clone(),
                panid: n.panid,
                ext_addr: n.ext_addr,
                channel: n.channel,
                rssi: source
                    .whitelist
                    .get(&n.ext_addr)
                    .copied()
                    .flatten()
                    .unwrap_or(DEFAULT_RSSI),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Topology queries
    // -----------------------------------------------------------------------

    /// Both nodes run and admit each other.
    pub fn usable(&self, a: u16, b: u16) -> bool {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(a), Some(b)) => a.started && b.started && a.admits(b) && b.admits(a),
            _ => false,
        }
    }

    fn owner_of(&self, addr: &Ipv6Addr) -> Option<u16> {
        self.nodes
            .keys()
            .copied()
            .find(|id| self.addresses(*id).iter().any(|(a, _)| a == addr))
    }

    fn mesh_reachable(&self, src: u16, dst: u16) -> bool {
        match (self.nodes.get(&src), self.nodes.get(&dst)) {
            (Some(s), Some(d)) if s.role.is_attached() && d.role.is_attached() => {
                match (s.partition, d.partition) {
                    (Some(ps), Some(pd)) if ps == pd => self.mesh_component(src, ps).contains(&dst),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Members of `pid` connected to `start` through router links and
    /// parent/child links.
    fn mesh_component(&self, start: u16, pid: u32) -> BTreeSet<u16> {
        let mut seen = BTreeSet::new();
        if self
            .nodes
            .get(&start)
            .is_none_or(|n| !n.started || n.partition != Some(pid))
        {
            return seen;
        }
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let node = &self.nodes[&id];
            for other in self.nodes.values() {
                if seen.contains(&other.id) || !other.started || other.partition != Some(pid) {
                    continue;
                }
                let linked = match (node.role.is_router(), other.role.is_router()) {
                    (true, true) => true,
                    (true, false) => other.parent == Some(id),
                    (false, true) => node.parent == Some(other.id),
                    (false, false) => false,
                };
                if linked && self.usable(id, other.id) {
                    queue.push_back(other.id);
                }
            }
        }
        seen
    }

    fn has_live_leader(&self, pid: u32) -> bool {
        self.partitions.get(&pid).is_some_and(|p| {
            self.nodes
                .get(&p.leader)
                .is_some_and(|n| n.started && n.role == Role::Leader && n.partition == Some(pid))
        })
    }

    fn rank(&self, pid: u32) -> (u8, u32) {
        (self.partitions.get(&pid).map_or(0, |p| p.weight), pid)
    }

    pub fn router_count(&self, pid: u32) -> usize {
        self.partitions.get(&pid).map_or(0, |p| p.router_ids.len())
    }

    // -----------------------------------------------------------------------
    // Role transitions
    // -----------------------------------------------------------------------

    fn detach(&mut self, id: u16) {
        let now = self.now;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.role = Role::Detached;
            node.partition = None;
            node.parent = None;
            node.router_id = None;
            node.leaderless_since = None;
            node.detached_since = now;
            debug!(node = id, "detached");
        }
    }

    fn release_own_router_id(&mut self, id: u16) {
        let now = self.now;
        let Some((pid, rid)) = self
            .nodes
            .get(&id)
            .and_then(|n| Some((n.partition?, n.router_id?)))
        else {
            return;
        };
        if let Some(partition) = self.partitions.get_mut(&pid)
            && partition.router_ids.get(&rid) == Some(&id)
        {
            partition.router_ids.remove(&rid);
            partition.orphaned_since.remove(&rid);
            partition
                .reserved_until
                .insert(rid, now + ROUTER_ID_REUSE_DELAY);
        }
    }

    fn allocate_router_id(&self, pid: u32, id: u16, preferred: Option<u8>) -> Option<u8> {
        let partition = self.partitions.get(&pid)?;
        let free = |rid: &u8| {
            partition.router_ids.get(rid).is_none_or(|holder| *holder == id)
                && !partition.reserved_until.contains_key(rid)
        };
        if let Some(rid) = preferred.filter(free)
            && (partition.router_ids.contains_key(&rid) || partition.router_ids.len() < MAX_ROUTERS)
        {
            return Some(rid);
        }
        if partition.router_ids.len() >= MAX_ROUTERS {
            return None;
        }
        (0..=MAX_ROUTER_ID).find(|rid| free(rid) && !partition.router_ids.contains_key(rid))
    }

    /// Give `id` a router id in `pid`. Fails when the partition is full.
    fn make_router(&mut self, id: u16, pid: u32) -> bool {
        let preferred = self
            .nodes
            .get(&id)
            .and_then(|n| n.router_id.or(n.previous_router_id));
        let Some(rid) = self.allocate_router_id(pid, id, preferred) else {
            return false;
        };
        if let Some(partition) = self.partitions.get_mut(&pid) {
            partition.router_ids.insert(rid, id);
            partition.orphaned_since.remove(&rid);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.partition = Some(pid);
            if node.role != Role::Leader {
                node.role = Role::Router;
            }
            node.router_id = Some(rid);
            node.previous_router_id = Some(rid);
            node.rloc16 = u16::from(rid) << 10;
            node.parent = None;
            node.leaderless_since = None;
            debug!(node = id, partition = pid, router_id = rid, "router");
        }
        true
    }

    fn form_partition(&mut self, id: u16) {
        let Some(weight) = self.nodes.get(&id).map(|n| n.leader_weight) else {
            return;
        };
        let pid = self.next_partition;
        self.next_partition += 1;
        self.partitions.insert(pid, Partition::new(id, weight));
        if let Some(node) = self.nodes.get_mut(&id) {
            node.role = Role::Leader;
        }
        self.make_router(id, pid);
        debug!(node = id, partition = pid, weight, "leader of new partition");
    }

    fn attach_child(&mut self, id: u16, parent: u16) {
        let Some(p) = self.nodes.get_mut(&parent) else {
            return;
        };
        let index = p.next_child;
        p.next_child = if p.next_child >= 0x1ff { 1 } else { p.next_child + 1 };
        let (pid, prloc, pkey) = (p.partition, p.rloc16, p.key_sequence);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.role = Role::Child;
            node.partition = pid;
            node.parent = Some(parent);
            node.router_id = None;
            node.rloc16 = prloc | index;
            node.key_sequence = node.key_sequence.max(pkey);
            node.leaderless_since = None;
            debug!(node = id, parent, rloc16 = node.rloc16, "child");
        }
    }

    /// Upgrade a freshly attached child when the partition is below its
    /// threshold.
    fn maybe_upgrade(&mut self, id: u16) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let Some(pid) = node.partition else {
            return;
        };
        if node.role == Role::Child
            && node.mode.full_device
            && self.router_count(pid) < usize::from(node.router_upgrade_threshold)
        {
            self.make_router(id, pid);
        }
    }

    fn try_attach(&mut self, id: u16) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let neighbours: Vec<&SimNode> = self
            .nodes
            .values()
            .filter(|n| n.id != id && n.partition.is_some() && self.usable(id, n.id))
            .collect();

        let parent = neighbours
            .iter()
            .filter(|n| n.role.is_router())
            .max_by_key(|n| (n.partition.map(|pid| self.rank(pid)), std::cmp::Reverse(n.id)))
            .map(|n| n.id);
        let reeds: Vec<(u16, u32)> = neighbours
            .iter()
            .filter(|n| n.role == Role::Child && n.mode.full_device)
            .filter_map(|n| n.partition.map(|pid| (n.id, pid)))
            .collect();
        let can_form = node.mode.full_device && self.now - node.detached_since >= FORM_PARTITION_DELAY;

        if let Some(parent) = parent {
            self.attach_child(id, parent);
            self.maybe_upgrade(id);
            return;
        }
        for (reed, pid) in reeds {
            if self.make_router(reed, pid) {
                debug!(node = id, reed, "reed upgraded for child");
                self.attach_child(id, reed);
                self.maybe_upgrade(id);
                return;
            }
        }
        if can_form {
            self.form_partition(id);
        }
    }

    /// Move `members` into `pid`: routers keep their id when it is free,
    /// children follow their parent.
    fn move_members(&mut self, members: &BTreeSet<u16>, pid: u32) {
        let (routers, children): (Vec<u16>, Vec<u16>) = members
            .iter()
            .copied()
            .partition(|id| self.nodes.get(id).is_some_and(|n| n.role.is_router()));

        for id in routers {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.role = Role::Router;
            }
            if !self.make_router(id, pid) {
                self.detach(id);
            }
        }
        for id in children {
            let parent_rloc = self
                .nodes
                .get(&id)
                .and_then(|n| n.parent)
                .and_then(|p| self.nodes.get(&p))
                .filter(|p| p.partition == Some(pid))
                .map(|p| p.rloc16);
            match parent_rloc {
                Some(prloc) => {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.partition = Some(pid);
                        node.rloc16 = prloc | (node.rloc16 & 0x01ff);
                    }
                }
                None => self.detach(id),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    fn step(&mut self) {
        self.expire_router_ids();
        self.check_children();
        self.check_leaders();
        self.elect();
        self.expire_network_data();
        self.merge();
        self.attach_detached();
        self.upgrade_reeds();
        self.expire_caches();
        self.drop_empty_partitions();
    }

    fn expire_router_ids(&mut self) {
        let now = self.now;
        let nodes = &self.nodes;
        for (pid, partition) in self.partitions.iter_mut() {
            partition.reserved_until.retain(|_, until| *until > now);

            let mut expired = Vec::new();
            for (&rid, holder) in &partition.router_ids {
                let held = nodes.get(holder).is_some_and(|n| {
                    n.started && n.partition == Some(*pid) && n.router_id == Some(rid)
                });
                if held {
                    partition.orphaned_since.remove(&rid);
                    continue;
                }
                let since = *partition.orphaned_since.entry(rid).or_insert(now);
                if now - since >= ROUTER_ID_EXPIRY {
                    expired.push(rid);
                }
            }
            for rid in expired {
                partition.router_ids.remove(&rid);
                partition.orphaned_since.remove(&rid);
                partition
                    .reserved_until
                    .insert(rid, now + ROUTER_ID_REUSE_DELAY);
                debug!(partition = pid, router_id = rid, "router id expired");
            }
        }
    }

    fn check_children(&mut self) {
        let orphans: Vec<u16> = self
            .nodes
            .values()
            .filter(|n| n.role == Role::Child)
            .filter(|n| {
                n.parent.and_then(|p| self.nodes.get(&p)).is_none_or(|p| {
                    !p.role.is_router() || p.partition != n.partition || !self.usable(n.id, p.id)
                })
            })
            .map(|n| n.id)
            .collect();
        for id in orphans {
            self.detach(id);
        }
    }

    fn check_leaders(&mut self) {
        let now = self.now;
        let mut reached = BTreeSet::new();
        for (&pid, partition) in &self.partitions {
            if self.has_live_leader(pid) {
                reached.extend(self.mesh_component(partition.leader, pid));
            }
        }
        for node in self.nodes.values_mut() {
            if node.role != Role::Router {
                continue;
            }
            if reached.contains(&node.id) {
                node.leaderless_since = None;
            } else if node.leaderless_since.is_none() {
                node.leaderless_since = Some(now);
            }
        }
    }

    fn elect(&mut self) {
        let now = self.now;
        let mut candidates: Vec<(u8, u16)> = self
            .nodes
            .values()
            .filter(|n| n.role == Role::Router)
            .filter(|n| {
                n.leaderless_since.is_some_and(|since| {
                    now - since >= u64::from(n.network_id_timeout) * TICKS_PER_UNIT
                })
            })
            .map(|n| (n.leader_weight, n.id))
            .collect();
        candidates.sort_by_key(|(weight, id)| (std::cmp::Reverse(*weight), *id));

        for (_, id) in candidates {
            let Some(old) = self
                .nodes
                .get(&id)
                .filter(|n| n.role == Role::Router && n.leaderless_since.is_some())
                .and_then(|n| n.partition)
            else {
                continue;
            };
            let mut members = self.mesh_component(id, old);
            members.remove(&id);
            self.form_partition(id);
            if let Some(pid) = self.nodes.get(&id).and_then(|n| n.partition) {
                self.move_members(&members, pid);
            }
        }
    }

    fn expire_network_data(&mut self) {
        let nodes = &self.nodes;
        for (pid, partition) in self.partitions.iter_mut() {
            let present = |origin: &u16| {
                nodes
                    .get(origin)
                    .is_some_and(|n| n.started && n.partition == Some(*pid))
            };
            partition.prefixes.retain(|_, (_, origin)| present(origin));
            partition.routes.retain(|_, (_, origin)| present(origin));
        }
    }

    fn merge(&mut self) {
        let mut pair = None;
        'search: for a in self.nodes.values().filter(|n| n.role.is_router()) {
            for b in self.nodes.values().filter(|n| n.role.is_router()) {
                let (Some(pa), Some(pb)) = (a.partition, b.partition) else {
                    continue;
                };
                if pa != pb
                    && self.usable(a.id, b.id)
                    && self.has_live_leader(pa)
                    && self.has_live_leader(pb)
                {
                    pair = Some((pa, pb));
                    break 'search;
                }
            }
        }
        let Some((pa, pb)) = pair else {
            return;
        };
        let (winner, loser) = if self.rank(pa) > self.rank(pb) {
            (pa, pb)
        } else {
            (pb, pa)
        };
        debug!(winner, loser, "partitions merge");

        let members: BTreeSet<u16> = self
            .nodes
            .values()
            .filter(|n| n.partition == Some(loser))
            .map(|n| n.id)
            .collect();
        let netdata = self
            .partitions
            .remove(&loser)
            .map(|p| (p.prefixes, p.routes));
        self.move_members(&members, winner);
        if let (Some((prefixes, routes)), Some(partition)) =
            (netdata, self.partitions.get_mut(&winner))
        {
            partition.prefixes.extend(prefixes);
            partition.routes.extend(routes);
        }
    }

    fn attach_detached(&mut self) {
        let now = self.now;
        let ready: Vec<u16> = self
            .nodes
            .values()
            .filter(|n| n.started && n.role == Role::Detached)
            .filter(|n| now - n.detached_since >= ATTACH_DELAY)
            .map(|n| n.id)
            .collect();
        for id in ready {
            self.try_attach(id);
        }
    }

    fn upgrade_reeds(&mut self) {
        let reeds: Vec<u16> = self
            .nodes
            .values()
            .filter(|n| n.role == Role::Child && n.mode.full_device)
            .map(|n| n.id)
            .collect();
        for id in reeds {
            self.maybe_upgrade(id);
        }
    }

    fn expire_caches(&mut self) {
        let owners: BTreeMap<Ipv6Addr, Option<u32>> = self
            .nodes
            .values()
            .filter(|n| !n.cache.is_empty())
            .flat_map(|n| n.cache.keys().copied())
            .map(|addr| {
                let partition = self
                    .owner_of(&addr)
                    .and_then(|owner| self.nodes.get(&owner))
                    .filter(|owner| owner.role.is_attached())
                    .and_then(|owner| owner.partition);
                (addr, partition)
            })
            .collect();
        for node in self.nodes.values_mut() {
            let partition = node.partition;
            node.cache
                .retain(|addr, _| partition.is_some() && owners.get(addr).copied().flatten() == partition);
        }
    }

    fn drop_empty_partitions(&mut self) {
        let used: BTreeSet<u32> = self.nodes.values().filter_map(|n| n.partition).collect();
        self.partitions.retain(|pid, _| used.contains(pid));
    }
}
