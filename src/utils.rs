//! Utility functions shared across the codebase

use std::net::{Ipv4Addr, SocketAddr};

use crate::node::NodeId;

/// Replace every `{key}` placeholder in `template` with its value.
///
/// Unknown placeholders are left untouched so a typo shows up verbatim in
/// the spawned command line or device path.
pub fn expand_template(template: &str, values: &[(&str, String)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Loopback endpoint of a simulated DUT: `127.0.0.1:(base + node)`.
///
/// Returns `None` when the sum does not fit a port number.
pub fn endpoint_for(base_port: u16, node: NodeId) -> Option<SocketAddr> {
    base_port
        .checked_add(node.get())
        .map(|port| SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port))
}

/// Truthiness of a legacy environment flag such as `VERBOSE=1`.
///
/// Empty, `0`, `false`, `no` and `off` are false; anything else is true.
pub fn env_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
