//! Transport mode selection for a DUT.

use std::fmt;

/// How the harness reaches a DUT.
///
/// Selected once per harness run and applied to every node constructed
/// by a scenario.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportMode {
    /// Simulated DUT: a child process (or an already running endpoint)
    /// serving the CLI on a UDP port derived from the node id.
    #[default]
    Simulated,

    /// Hardware DUT on a serial device derived from the node id.
    Serial,
}

impl TransportMode {
    /// Parse the legacy `NODE_TYPE` environment value.
    ///
    /// `soc` selects serial hardware; anything else falls back to simulation.
    pub fn from_node_type(value: &str) -> Self {
        match value.trim() {
            "soc" | "serial" => TransportMode::Serial,
            _ => TransportMode::Simulated,
        }
    }

    /// Check if this mode spawns or attaches to a simulated DUT.
    pub const fn is_simulated(self) -> bool {
        matches!(self, TransportMode::Simulated)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Simulated => write!(f, "sim"),
            TransportMode::Serial => write!(f, "serial"),
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sim" | "simulated" => Ok(TransportMode::Simulated),
            "serial" | "soc" => Ok(TransportMode::Serial),
            _ => Err(format!("invalid transport mode '{}': use sim or serial", s)),
        }
    }
}

impl clap::ValueEnum for TransportMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[TransportMode::Simulated, TransportMode::Serial]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            TransportMode::Simulated => {
                Some(clap::builder::PossibleValue::new("sim").alias("simulated"))
            }
            TransportMode::Serial => Some(clap::builder::PossibleValue::new("serial").alias("soc")),
        }
    }
}
