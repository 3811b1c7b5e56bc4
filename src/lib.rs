//! Mesh Certification Harness Library
//!
//! Drives Thread-style mesh DUTs through their text CLI, wires them into
//! whitelist topologies and checks that the mesh converges to the expected
//! roles, addresses and network data. It includes the transport and
//! command-session layers, the typed node façade, and the scenario engine
//! with its certification catalog.

// Use mimalloc as the global allocator for tests (non-Windows only)
#[cfg(not(windows))]
#[cfg(test)]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod dialect;
pub mod error;
pub mod mode;
pub mod node;
pub mod report;
pub mod scenario;
pub mod session;
pub mod topology;
pub mod transport;
pub mod utils;

// Test helpers module - available when test-internals feature is enabled
#[cfg(any(test, feature = "test-internals"))]
pub mod test_helpers;

#[cfg(test)]
pub mod tests;

// Re-export commonly used items
pub use config::HarnessConfig;
pub use dialect::Dialect;
pub use error::{HarnessError, Result};
pub use mode::TransportMode;
pub use node::{Node, NodeId, Role};
pub use report::{RunReport, ScenarioReport};
pub use scenario::{Scenario, ScenarioContext, TimingProfile, Wait, run_scenario};
pub use topology::Topology;
