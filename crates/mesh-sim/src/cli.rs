//! Line-oriented command interpreter for one simulated node.
//!
//! Both CLI spellings are accepted on every node; the configured
//! [`CliDialect`] only decides which verbs `?` lists. Replies end in `Done`
//! except for echo replies, which arrive one line per responder.

use std::net::Ipv6Addr;

use crate::world::{EXT_PANID, Mode, PrefixEntry, Role, World};

/// Which verb set the help listing advertises.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CliDialect {
    #[default]
    Namespaced,
    Compact,
}

const NAMESPACED_VERBS: &[&str] = &[
    "?", "ifconfig", "ip", "mac", "netdata", "ping", "shutdown", "thread",
];

const COMPACT_VERBS: &[&str] = &[
    "?",
    "cache",
    "channel",
    "childtimeout",
    "contextreusedelay",
    "extaddr",
    "ipaddr",
    "keysequence",
    "leaderweight",
    "mode",
    "netdataregister",
    "networkidtimeout",
    "networkname",
    "panid",
    "ping",
    "prefix",
    "releaserouterid",
    "rloc16",
    "route",
    "routerupgradethreshold",
    "scan",
    "shutdown",
    "start",
    "state",
    "stop",
    "whitelist",
];

const DONE: &str = "Done\r\n";
const INVALID_ARGS: &str = "Error 7: InvalidArgs\r\n";
const INVALID_COMMAND: &str = "Error 35: InvalidCommand\r\n";

/// How address listings and echo replies are printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Style {
    Namespaced,
    Compact,
}

/// A command with the namespaced groups folded onto the compact verbs.
struct Command<'a> {
    verb: &'a str,
    args: Vec<&'a str>,
    style: Style,
}

fn canonical<'a>(tokens: &[&'a str]) -> Option<Command<'a>> {
    let (&first, rest) = tokens.split_first()?;
    let grouped = |verb: &'a str, args: &[&'a str]| Command {
        verb,
        args: args.to_vec(),
        style: Style::Namespaced,
    };

    let command = match first {
        "thread" | "mac" | "netdata" => {
            let (&sub, args) = rest.split_first()?;
            let verb = match (first, sub) {
                ("thread", "start" | "stop" | "mode" | "state" | "cache") => sub,
                ("thread", "timeout") => "childtimeout",
                ("thread", "weight") => "leaderweight",
                ("thread", "network_id_timeout") => "networkidtimeout",
                ("thread", "router_upgrade_threshold") => "routerupgradethreshold",
                ("thread", "release_router") => "releaserouterid",
                ("thread", "key_sequence") => "keysequence",
                ("mac", "whitelist" | "channel" | "panid" | "scan") => sub,
                ("mac", "addr16") => "rloc16",
                ("mac", "addr64") => "extaddr",
                ("mac", "name") => "networkname",
                ("netdata", "context_reuse_delay") => "contextreusedelay",
                ("netdata", "prefix" | "route") => sub,
                ("netdata", "register") => "netdataregister",
                _ => return None,
            };
            grouped(verb, args)
        }
        "ip" => match rest {
            ["addr", "add", addr, "dev", _] => grouped("ipaddr", &["add", *addr]),
            _ => return None,
        },
        "ifconfig" => grouped("ifconfig", rest),
        "ping" if rest.first() == Some(&"-I") => {
            let mut args = Vec::new();
            let mut iter = rest.iter().skip(2);
            while let Some(&token) = iter.next() {
                if token == "-s" {
                    // Size goes last, as in the compact form.
                    let size = iter.next()?;
                    args.push(*size);
                } else {
                    args.insert(0, token);
                }
            }
            grouped("ping", &args)
        }
        verb => Command {
            verb,
            args: rest.to_vec(),
            style: Style::Compact,
        },
    };
    Some(command)
}

fn is_known(verb: &str) -> bool {
    NAMESPACED_VERBS.contains(&verb) || COMPACT_VERBS.contains(&verb) || verb == "ifconfig"
}

/// Run one command line on `node` and return everything it prints.
pub fn execute(world: &mut World, node: u16, line: &str, dialect: CliDialect) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&first) = tokens.first() else {
        return String::new();
    };

    if tokens.last() == Some(&"-h") && tokens.len() > 1 {
        return if is_known(first) {
            format!("usage: {}\r\n{DONE}", tokens[..tokens.len() - 1].join(" "))
        } else {
            INVALID_COMMAND.to_string()
        };
    }

    if first == "?" || first == "help" {
        let verbs = match dialect {
            CliDialect::Namespaced => NAMESPACED_VERBS,
            CliDialect::Compact => COMPACT_VERBS,
        };
        let mut out = String::from("Commands:\r\n");
        for verb in verbs {
            out.push_str(&format!("  {verb}\r\n"));
        }
        out.push_str(DONE);
        return out;
    }

    if first == "shutdown" {
        world.reset(node);
        return DONE.to_string();
    }

    let Some(command) = canonical(&tokens).filter(|c| is_known(c.verb)) else {
        return INVALID_COMMAND.to_string();
    };
    match dispatch(world, node, &command) {
        Some(out) => out,
        None => INVALID_ARGS.to_string(),
    }
}

/// `None` means the arguments did not parse.
fn dispatch(world: &mut World, node: u16, command: &Command<'_>) -> Option<String> {
    let args = command.args.as_slice();
    match command.verb {
        "start" => world.start(node),
        "stop" => world.stop(node),
        "state" => match args {
            [] => {
                let role = world.node(node)?.role;
                return Some(value(role.as_str()));
            }
            [role] => {
                let role = match *role {
                    "leader" => Role::Leader,
                    "router" => Role::Router,
                    "child" => Role::Child,
                    "detached" => Role::Detached,
                    _ => return None,
                };
                world.set_state(node, role);
            }
            _ => return None,
        },
        "releaserouterid" => {
            let [id] = args else { return None };
            world.release_router_id(node, id.parse().ok()?);
        }
        "keysequence" => match args {
            [] => return Some(value(world.node(node)?.key_sequence)),
            [sequence] => world.set_key_sequence(node, sequence.parse().ok()?),
            _ => return None,
        },
        "netdataregister" => world.register_netdata(node),
        "ifconfig" => return Some(ifconfig(world, node)),
        "ipaddr" => match args {
            [] => {
                let mut out: String = world
                    .addresses(node)
                    .iter()
                    .map(|(addr, _)| format!("{addr}\r\n"))
                    .collect();
                out.push_str(DONE);
                return Some(out);
            }
            ["add", addr] => {
                let addr: Ipv6Addr = addr.parse().ok()?;
                let entry = world.node_mut(node)?;
                if !entry.extra_addrs.contains(&addr) {
                    entry.extra_addrs.push(addr);
                }
            }
            _ => return None,
        },
        "cache" => {
            let entries = &world.node(node)?.cache;
            let mut out: String = entries
                .iter()
                .map(|(target, entry)| format!("{target} 0 {:04x} {}\r\n", entry.rloc16, entry.age))
                .collect();
            out.push_str(&format!("Total: {}\r\n{DONE}", entries.len()));
            return Some(out);
        }
        "scan" => {
            let mut out =
                String::from("| Network Name     | Extended PAN     | PAN  | MAC Address      | Ch | dBm |\r\n");
            for beacon in world.scan(node) {
                out.push_str(&format!(
                    "| {:<16} | {EXT_PANID} | {:04x} | {:016x} | {:>2} | {:>3} |\r\n",
                    beacon.network_name, beacon.panid, beacon.ext_addr, beacon.channel, beacon.rssi
                ));
            }
            out.push_str(DONE);
            return Some(out);
        }
        "ping" => return ping(world, node, args, command.style),
        _ => return settings(world, node, command.verb, args),
    }
    Some(DONE.to_string())
}

/// Plain getters and setters on node fields.
fn settings(world: &mut World, node: u16, verb: &str, args: &[&str]) -> Option<String> {
    let entry = world.node_mut(node)?;
    match (verb, args) {
        ("mode", []) => return Some(value(entry.mode)),
        ("mode", [letters]) => entry.mode = Mode::parse(letters)?,
        ("rloc16", []) => return Some(value(format_args!("{:04x}", entry.rloc16))),
        ("extaddr", []) => return Some(value(format_args!("{:016x}", entry.ext_addr))),
        ("channel", []) => return Some(value(entry.channel)),
        ("channel", [channel]) => entry.channel = channel.parse().ok()?,
        ("panid", []) => return Some(value(format_args!("0x{:04x}", entry.panid))),
        ("panid", [panid]) => entry.panid = parse_u16(panid)?,
        ("networkname", []) => return Some(value(&entry.network_name)),
        ("networkname", [name]) => entry.network_name = name.to_string(),
        ("childtimeout", []) => return Some(value(entry.child_timeout)),
        ("childtimeout", [timeout]) => entry.child_timeout = timeout.parse().ok()?,
        ("leaderweight", []) => return Some(value(entry.leader_weight)),
        ("leaderweight", [weight]) => entry.leader_weight = weight.parse().ok()?,
        ("networkidtimeout", []) => return Some(value(entry.network_id_timeout)),
        ("networkidtimeout", [timeout]) => entry.network_id_timeout = timeout.parse().ok()?,
        ("routerupgradethreshold", []) => return Some(value(entry.router_upgrade_threshold)),
        ("routerupgradethreshold", [threshold]) => {
            entry.router_upgrade_threshold = threshold.parse().ok()?
        }
        ("contextreusedelay", []) => return Some(value(entry.context_reuse_delay)),
        ("contextreusedelay", [delay]) => entry.context_reuse_delay = delay.parse().ok()?,
        ("whitelist", ["enable"]) => entry.whitelist_enabled = true,
        ("whitelist", ["disable"]) => entry.whitelist_enabled = false,
        ("whitelist", ["clear"]) => entry.whitelist.clear(),
        ("whitelist", ["add", addr]) => {
            entry.whitelist.insert(u64::from_str_radix(addr, 16).ok()?, None);
        }
        ("whitelist", ["add", addr, rssi]) => {
            entry
                .whitelist
                .insert(u64::from_str_radix(addr, 16).ok()?, Some(rssi.parse().ok()?));
        }
        ("whitelist", ["remove", addr]) => {
            entry.whitelist.remove(&u64::from_str_radix(addr, 16).ok()?);
        }
        ("prefix", ["add", prefix, flags, rest @ ..]) => {
            let entry_value = prefix_entry(prefix, flags, rest.first().copied())?;
            entry.local_prefixes.insert(entry_value.key(), entry_value);
        }
        ("prefix", ["remove", prefix]) => {
            entry.local_prefixes.remove(&parse_prefix(prefix)?);
        }
        ("route", ["add", prefix, rest @ ..]) => {
            let entry_value = prefix_entry(prefix, "", rest.first().copied())?;
            entry.local_routes.insert(entry_value.key(), entry_value);
        }
        ("route", ["remove", prefix]) => {
            entry.local_routes.remove(&parse_prefix(prefix)?);
        }
        _ => return None,
    }
    Some(DONE.to_string())
}

fn value(value: impl std::fmt::Display) -> String {
    format!("{value}\r\n{DONE}")
}

fn parse_u16(token: &str) -> Option<u16> {
    match token.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

fn parse_prefix(token: &str) -> Option<(Ipv6Addr, u8)> {
    let (addr, len) = token.split_once('/')?;
    let len: u8 = len.parse().ok()?;
    (len <= 128).then_some(())?;
    Some((addr.parse().ok()?, len))
}

fn prefix_entry(prefix: &str, flags: &str, preference: Option<&str>) -> Option<PrefixEntry> {
    let (addr, len) = parse_prefix(prefix)?;
    Some(PrefixEntry {
        addr,
        len,
        flags: flags.to_string(),
        preference: preference.unwrap_or("med").to_string(),
    })
}

fn ifconfig(world: &World, node: u16) -> String {
    let mut out = String::from("lo:\r\n  inet6 ::1/128\r\n");
    let addrs = world.addresses(node);
    if !addrs.is_empty() {
        out.push_str("thread:\r\n");
        for (addr, len) in addrs {
            out.push_str(&format!("  inet6 {addr}/{len}\r\n"));
        }
    }
    out.push_str(DONE);
    out
}

fn ping(world: &mut World, node: u16, args: &[&str], style: Style) -> Option<String> {
    let (addr, size) = match args {
        [addr] => (*addr, 8),
        [addr, size] => (*addr, size.parse().ok()?),
        _ => return None,
    };
    let addr: Ipv6Addr = addr.parse().ok()?;
    let size: u16 = size;
    Some(
        world
            .ping(node, addr)
            .into_iter()
            .map(|from| match style {
                Style::Namespaced => format!("{size} bytes from {from}%thread: icmp_seq=1 hlim=64\r\n"),
                Style::Compact => format!("{size} bytes from {from}: icmp_seq=1 hlim=64 time=0ms\r\n"),
            })
            .collect(),
    )
}
