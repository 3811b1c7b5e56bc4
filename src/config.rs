//! Harness configuration.
//!
//! Defaults match a simulated DUT build serving its CLI on UDP port
//! `8000 + node id`. The legacy environment variables of the certification
//! scripts (`NODE_TYPE`, `VERBOSE`, `abs_builddir`) are honoured next to the
//! harness's own `MESH_CERT_*` variables; command-line flags override both.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::HarnessError;
use crate::mode::TransportMode;
use crate::node::NodeId;
use crate::scenario::catalog::ShortAddressExpectation;
use crate::utils::{endpoint_for, env_flag, expand_template};

pub const DEFAULT_BASE_PORT: u16 = 8000;
pub const DEFAULT_SERIAL_TEMPLATE: &str = "/dev/ttyUSB{index}";
pub const DEFAULT_DUT_ARGS: &[&str] = &["--nodeid={nodeid}"];
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SPAWN_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_CONNECT_WINDOW: Duration = Duration::from_secs(2);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_UNIT: Duration = Duration::from_secs(1);
pub const DEFAULT_TRANSCRIPT_LEN: usize = 32;

/// Everything needed to reach and drive the DUTs of one harness run.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub mode: TransportMode,
    pub dialect: Dialect,
    /// Simulated DUT program. `None` attaches to already running endpoints.
    pub dut_program: Option<PathBuf>,
    /// Argument template for the DUT program; `{nodeid}` is substituted.
    pub dut_args: Vec<String>,
    pub base_port: u16,
    /// Serial device template; `{index}` is `(node - 1) * 2`, `{nodeid}`
    /// the node id itself.
    pub serial_template: String,
    pub response_timeout: Duration,
    pub scan_timeout: Duration,
    pub spawn_delay: Duration,
    pub connect_window: Duration,
    pub shutdown_grace: Duration,
    /// Wall-clock length of one protocol time unit.
    pub unit: Duration,
    /// Log every line received from a DUT at info level.
    pub echo: bool,
    pub transcript_len: usize,
    /// RLOC16 outcome a router must show after re-attaching past its id
    /// timeout. `None` keeps the catalog's per-phase expectations.
    pub rloc16_after_timeout: Option<ShortAddressExpectation>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            dialect: Dialect::default(),
            dut_program: None,
            dut_args: DEFAULT_DUT_ARGS.iter().map(|s| s.to_string()).collect(),
            base_port: DEFAULT_BASE_PORT,
            serial_template: DEFAULT_SERIAL_TEMPLATE.to_string(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            spawn_delay: DEFAULT_SPAWN_DELAY,
            connect_window: DEFAULT_CONNECT_WINDOW,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            unit: DEFAULT_UNIT,
            echo: false,
            transcript_len: DEFAULT_TRANSCRIPT_LEN,
            rloc16_after_timeout: None,
        }
    }
}

impl HarnessConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(node_type) = lookup("NODE_TYPE") {
            config.mode = TransportMode::from_node_type(&node_type);
        }
        if let Some(verbose) = lookup("VERBOSE") {
            config.echo = env_flag(&verbose);
        }

        config.dut_program = match (lookup("MESH_CERT_DUT"), lookup("abs_builddir")) {
            (Some(dut), _) if !dut.trim().is_empty() => Some(PathBuf::from(dut.trim())),
            (_, Some(builddir)) if !builddir.trim().is_empty() => {
                Some(PathBuf::from(builddir.trim()).join("src").join("soc"))
            }
            _ => None,
        };

        if let Some(dialect) = lookup("MESH_CERT_DIALECT") {
            config.dialect = dialect
                .trim()
                .parse()
                .map_err(anyhow::Error::msg)
                .context("MESH_CERT_DIALECT")?;
        }
        if let Some(port) = lookup("MESH_CERT_BASE_PORT") {
            config.base_port = port
                .trim()
                .parse()
                .with_context(|| format!("MESH_CERT_BASE_PORT={port}"))?;
        }
        if let Some(unit) = lookup("MESH_CERT_UNIT_MS") {
            let ms: u64 = unit
                .trim()
                .parse()
                .with_context(|| format!("MESH_CERT_UNIT_MS={unit}"))?;
            if ms == 0 {
                bail!("MESH_CERT_UNIT_MS must be positive");
            }
            config.unit = Duration::from_millis(ms);
        }
        if let Some(expectation) = lookup("MESH_CERT_RLOC16_AFTER_TIMEOUT") {
            config.rloc16_after_timeout = Some(
                expectation
                    .trim()
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("MESH_CERT_RLOC16_AFTER_TIMEOUT")?,
            );
        }

        debug!(
            mode = %config.mode,
            dialect = %config.dialect,
            dut = ?config.dut_program,
            base_port = config.base_port,
            "harness configuration loaded"
        );
        Ok(config)
    }

    /// Attach to endpoints on `base_port` without spawning anything.
    pub fn attached(base_port: u16) -> Self {
        Self {
            base_port,
            dut_program: None,
            ..Self::default()
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_rloc16_after_timeout(mut self, expectation: ShortAddressExpectation) -> Self {
        self.rloc16_after_timeout = Some(expectation);
        self
    }

    /// Command-line arguments for the DUT program of `node`.
    pub fn dut_args_for(&self, node: NodeId) -> Vec<String> {
        let values = [("nodeid", node.to_string())];
        self.dut_args
            .iter()
            .map(|arg| expand_template(arg, &values))
            .collect()
    }

    /// Serial device path of `node`.
    pub fn serial_path_for(&self, node: NodeId) -> Result<PathBuf, HarnessError> {
        if !node.is_valid() {
            return Err(HarnessError::TransportOpen {
                node,
                reason: "node id must be positive".into(),
            });
        }
        let index = (u32::from(node.get()) - 1) * 2;
        let values = [("index", index.to_string()), ("nodeid", node.to_string())];
        Ok(PathBuf::from(expand_template(&self.serial_template, &values)))
    }

    /// UDP endpoint of simulated `node`.
    pub fn endpoint_for(&self, node: NodeId) -> Result<std::net::SocketAddr, HarnessError> {
        if !node.is_valid() {
            return Err(HarnessError::TransportOpen {
                node,
                reason: "node id must be positive".into(),
            });
        }
        endpoint_for(self.base_port, node).ok_or_else(|| HarnessError::TransportOpen {
            node,
            reason: format!("base port {} + node id overflows", self.base_port),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = HarnessConfig::default();
        assert_eq!(config.mode, TransportMode::Simulated);
        assert_eq!(config.dialect, Dialect::Namespaced);
        assert_eq!(config.base_port, 8000);
        assert!(config.dut_program.is_none());
        assert!(!config.echo);
        assert_eq!(config.response_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_config_from_legacy_env() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("NODE_TYPE", "soc"),
            ("VERBOSE", "1"),
            ("abs_builddir", "/build"),
        ]))
        .unwrap();
        assert_eq!(config.mode, TransportMode::Serial);
        assert!(config.echo);
        assert_eq!(config.dut_program, Some(PathBuf::from("/build/src/soc")));
    }

    #[test]
    fn test_config_explicit_dut_wins() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("MESH_CERT_DUT", "/opt/dut"),
            ("abs_builddir", "/build"),
            ("MESH_CERT_DIALECT", "compact"),
            ("MESH_CERT_BASE_PORT", "9000"),
            ("MESH_CERT_UNIT_MS", "50"),
        ]))
        .unwrap();
        assert_eq!(config.dut_program, Some(PathBuf::from("/opt/dut")));
        assert_eq!(config.dialect, Dialect::Compact);
        assert_eq!(config.base_port, 9000);
        assert_eq!(config.unit, Duration::from_millis(50));
        assert_eq!(config.rloc16_after_timeout, None);
    }

    #[test]
    fn test_config_rloc16_after_timeout() {
        let config = HarnessConfig::from_lookup(lookup_from(&[(
            "MESH_CERT_RLOC16_AFTER_TIMEOUT",
            " unchanged ",
        )]))
        .unwrap();
        assert_eq!(
            config.rloc16_after_timeout,
            Some(ShortAddressExpectation::Unchanged)
        );
        assert!(
            HarnessConfig::from_lookup(lookup_from(&[("MESH_CERT_RLOC16_AFTER_TIMEOUT", "kept")]))
                .is_err()
        );
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(HarnessConfig::from_lookup(lookup_from(&[("MESH_CERT_BASE_PORT", "x")])).is_err());
        assert!(HarnessConfig::from_lookup(lookup_from(&[("MESH_CERT_UNIT_MS", "0")])).is_err());
        assert!(HarnessConfig::from_lookup(lookup_from(&[("MESH_CERT_DIALECT", "ncp")])).is_err());
    }

    #[test]
    fn test_node_derived_paths() {
        let config = HarnessConfig::default();
        assert_eq!(
            config.serial_path_for(NodeId::new(1)).unwrap(),
            PathBuf::from("/dev/ttyUSB0")
        );
        assert_eq!(
            config.serial_path_for(NodeId::new(3)).unwrap(),
            PathBuf::from("/dev/ttyUSB4")
        );
        assert_eq!(
            config.endpoint_for(NodeId::new(2)).unwrap().port(),
            8002
        );
        assert!(config.endpoint_for(NodeId::new(0)).is_err());
        assert_eq!(config.dut_args_for(NodeId::new(5)), vec!["--nodeid=5"]);
    }
}
