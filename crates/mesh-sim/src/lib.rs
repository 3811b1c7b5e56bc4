//! Simulated mesh DUTs for exercising the certification harness.
//!
//! Each node answers the harness's text CLI on its own UDP port on the
//! loopback interface. Behind the CLI sits a small deterministic model of
//! a Thread-like mesh driven by a wall-clock ticker.
//!
//! # Modules
//!
//! - [`world`]: Nodes, partitions, router ids and network data
//! - [`cli`]: Command parsing and reply formatting for both dialects
//! - [`server`]: Per-node UDP sockets and the model clock
//! - [`test_util`]: Port block selection safe for parallel tests

pub mod cli;
pub mod server;
pub mod test_util;
pub mod world;

pub use cli::CliDialect;
pub use server::{MeshSim, SimConfig};
pub use test_util::candidate_base_port;
pub use world::{Role, TICKS_PER_UNIT, World};
