//! Typed values exchanged with a DUT.
//!
//! Every type here parses from the exact token the CLI prints and formats
//! back to the exact token the CLI accepts, so command construction never
//! deals with raw strings.

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::Serialize;

use crate::error::HarnessError;

/// Identifier of one DUT inside a scenario.
///
/// Positive; derives the simulated UDP port and the serial device index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(u16);

impl NodeId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    /// Zero is reserved; every transport rejects it.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for NodeId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

/// IEEE 802.15.4 extended (64-bit) address, printed as 16 hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct ExtAddr(pub u64);

impl fmt::Display for ExtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<ExtAddr> for String {
    fn from(addr: ExtAddr) -> Self {
        addr.to_string()
    }
}

impl FromStr for ExtAddr {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(HarnessError::invalid("extended address", s));
        }
        u64::from_str_radix(s, 16)
            .map(ExtAddr)
            .map_err(|_| HarnessError::invalid("extended address", s))
    }
}

/// 16-bit routing locator (short address), printed as 4 hex digits.
///
/// The upper 6 bits carry the router id; the low 9 bits the child id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Rloc16(pub u16);

impl Rloc16 {
    pub const fn router_id(self) -> u8 {
        (self.0 >> 10) as u8
    }

    pub const fn child_id(self) -> u16 {
        self.0 & 0x01ff
    }

    pub const fn is_router(self) -> bool {
        self.child_id() == 0
    }
}

impl fmt::Display for Rloc16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl FromStr for Rloc16 {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("0x");
        u16::from_str_radix(digits, 16)
            .map(Rloc16)
            .map_err(|_| HarnessError::invalid("rloc16", s))
    }
}

/// Role a node holds in the mesh hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Detached,
    Child,
    Router,
    Leader,
}

impl Role {
    /// Every role the CLI can report, in the order the response patterns
    /// are tried.
    pub const ALL: [Role; 4] = [Role::Detached, Role::Child, Role::Router, Role::Leader];

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Detached => "detached",
            Role::Child => "child",
            Role::Router => "router",
            Role::Leader => "leader",
        }
    }

    pub const fn is_attached(self) -> bool {
        !matches!(self, Role::Detached)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s.trim())
            .ok_or_else(|| HarnessError::invalid("role", s))
    }
}

/// Device capability flags, written as the `rsdn` letter string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Mode {
    /// `r`: receiver on when idle (not a sleepy device).
    pub rx_on_when_idle: bool,
    /// `s`: secure data requests.
    pub secure_data_requests: bool,
    /// `d`: full thread device, router eligible.
    pub full_thread_device: bool,
    /// `n`: requests the full network data.
    pub full_network_data: bool,
}

impl Mode {
    /// Router-eligible full device (`rsdn`).
    pub const ROUTER: Mode = Mode {
        rx_on_when_idle: true,
        secure_data_requests: true,
        full_thread_device: true,
        full_network_data: true,
    };

    /// Minimal end device, never routes (`rsn`).
    pub const END_DEVICE: Mode = Mode {
        rx_on_when_idle: true,
        secure_data_requests: true,
        full_thread_device: false,
        full_network_data: true,
    };

    /// Sleepy end device polling its parent (`sn`).
    pub const SLEEPY_END_DEVICE: Mode = Mode {
        rx_on_when_idle: false,
        secure_data_requests: true,
        full_thread_device: false,
        full_network_data: true,
    };

    pub const fn is_router_eligible(self) -> bool {
        self.full_thread_device
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, letter) in [
            (self.rx_on_when_idle, 'r'),
            (self.secure_data_requests, 's'),
            (self.full_thread_device, 'd'),
            (self.full_network_data, 'n'),
        ] {
            if set {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Mode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mode = Mode::default();
        for letter in s.trim().chars() {
            match letter {
                'r' => mode.rx_on_when_idle = true,
                's' => mode.secure_data_requests = true,
                'd' => mode.full_thread_device = true,
                'n' => mode.full_network_data = true,
                _ => return Err(HarnessError::invalid("mode", s)),
            }
        }
        Ok(mode)
    }
}

/// Address scope used to filter interface listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// `fe80::/10`
    LinkLocal,
    /// Unique-local `fc00::/7`, used for the mesh-local prefix.
    MeshLocal,
    /// Anything else, typically SLAAC addresses from border-router prefixes.
    Global,
}

/// One address reported by a node's interface listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct AddressRecord {
    pub addr: Ipv6Addr,
    /// Present when the listing prints `addr/len`.
    pub prefix_len: Option<u8>,
}

impl AddressRecord {
    pub fn scope(&self) -> Scope {
        let first = self.addr.segments()[0];
        if first & 0xffc0 == 0xfe80 {
            Scope::LinkLocal
        } else if first & 0xfe00 == 0xfc00 {
            Scope::MeshLocal
        } else {
            Scope::Global
        }
    }

    pub fn is_link_local(&self) -> bool {
        self.scope() == Scope::LinkLocal
    }
}

impl fmt::Display for AddressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix_len {
            Some(len) => write!(f, "{}/{}", self.addr, len),
            None => write!(f, "{}", self.addr),
        }
    }
}

impl FromStr for AddressRecord {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix_len) = match s.split_once('/') {
            Some((addr, len)) => {
                let len = len
                    .parse::<u8>()
                    .ok()
                    .filter(|len| *len <= 128)
                    .ok_or_else(|| HarnessError::invalid("prefix length", s))?;
                (addr, Some(len))
            }
            None => (s, None),
        };
        let addr = addr
            .parse::<Ipv6Addr>()
            .map_err(|_| HarnessError::invalid("ipv6 address", s))?;
        Ok(Self { addr, prefix_len })
    }
}

/// An IPv6 prefix such as `2001::/64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Ipv6Prefix {
    pub addr: Ipv6Addr,
    pub len: u8,
}

impl Ipv6Prefix {
    pub fn contains(&self, addr: &Ipv6Addr) -> bool {
        if self.len == 0 {
            return true;
        }
        let mask = u128::MAX << (128 - u32::from(self.len));
        u128::from(*addr) & mask == u128::from(self.addr) & mask
    }
}

impl fmt::Display for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Ipv6Prefix {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| HarnessError::invalid("prefix", s))?;
        let addr = addr
            .parse::<Ipv6Addr>()
            .map_err(|_| HarnessError::invalid("prefix", s))?;
        let len = len
            .parse::<u8>()
            .ok()
            .filter(|len| *len <= 128)
            .ok_or_else(|| HarnessError::invalid("prefix", s))?;
        Ok(Self { addr, len })
    }
}

/// Border-router flags of an on-mesh prefix, written as `pvdcros`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PrefixFlags {
    /// `p`: SLAAC preferred.
    pub preferred: bool,
    /// `v`: SLAAC valid.
    pub valid: bool,
    /// `d`: DHCPv6 address assignment.
    pub dhcp: bool,
    /// `c`: DHCPv6 other configuration.
    pub configure: bool,
    /// `r`: default route.
    pub default_route: bool,
    /// `o`: on-mesh.
    pub on_mesh: bool,
    /// `s`: stable network data.
    pub stable: bool,
}

impl fmt::Display for PrefixFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, letter) in [
            (self.preferred, 'p'),
            (self.valid, 'v'),
            (self.dhcp, 'd'),
            (self.configure, 'c'),
            (self.default_route, 'r'),
            (self.on_mesh, 'o'),
            (self.stable, 's'),
        ] {
            if set {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for PrefixFlags {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = PrefixFlags::default();
        for letter in s.trim().chars() {
            match letter {
                'p' => flags.preferred = true,
                'v' => flags.valid = true,
                'd' => flags.dhcp = true,
                'c' => flags.configure = true,
                'r' => flags.default_route = true,
                'o' => flags.on_mesh = true,
                's' => flags.stable = true,
                _ => return Err(HarnessError::invalid("prefix flags", s)),
            }
        }
        Ok(flags)
    }
}

/// Preference of a prefix or external route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RoutePreference {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for RoutePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePreference::Low => write!(f, "low"),
            RoutePreference::Medium => write!(f, "med"),
            RoutePreference::High => write!(f, "high"),
        }
    }
}

impl FromStr for RoutePreference {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "low" => Ok(RoutePreference::Low),
            "med" => Ok(RoutePreference::Medium),
            "high" => Ok(RoutePreference::High),
            other => Err(HarnessError::invalid("route preference", other)),
        }
    }
}

/// A prefix registered into the network data by a border router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NetworkDataPrefix {
    pub prefix: Ipv6Prefix,
    pub flags: PrefixFlags,
    pub preference: RoutePreference,
}

impl NetworkDataPrefix {
    pub fn new(prefix: Ipv6Prefix, flags: PrefixFlags) -> Self {
        Self {
            prefix,
            flags,
            preference: RoutePreference::default(),
        }
    }

    pub fn with_preference(mut self, preference: RoutePreference) -> Self {
        self.preference = preference;
        self
    }
}

/// One row of the address-resolution cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CacheEntry {
    pub target: Ipv6Addr,
    /// Resolution state counter as printed by the DUT.
    pub state: u32,
    pub rloc16: Rloc16,
    /// Remaining timeout counter.
    pub timeout: u32,
}

/// One neighbor reported by an active scan.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ScanResult {
    pub network_name: String,
    pub ext_panid: String,
    pub panid: u16,
    pub ext_addr: ExtAddr,
    pub channel: u8,
    /// Received signal strength in dBm.
    pub rssi: i16,
}
