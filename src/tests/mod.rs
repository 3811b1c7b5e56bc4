#[cfg(test)]
pub mod session_tests;

#[cfg(test)]
pub mod node_tests;

#[cfg(test)]
pub mod topology_tests;

#[cfg(test)]
pub mod scenario_tests;
