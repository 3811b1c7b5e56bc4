//! Named waits derived from the timers a scenario configured.
//!
//! A [`Wait`] is expressed in protocol time units (seconds on real DUTs).
//! The [`TimingProfile`] turns it into wall-clock time: the unit length
//! times the nominal count, plus a margin for timer-driven waits.

use std::fmt;
use std::time::Duration;

use crate::config::HarnessConfig;

/// Units allowed for a node to find a parent and settle its role.
pub const ATTACH_UNITS: u32 = 3;
/// Units allowed for a node to attach and complete router selection.
pub const UPGRADE_UNITS: u32 = 5;
/// Units allowed for a network data registration to reach every node.
pub const NETWORK_DATA_UNITS: u32 = 10;

/// Something a scenario waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// A freshly started node attaches.
    Attach,
    /// A node attaches and settles as router, or is refused an upgrade.
    RouterUpgrade,
    /// Registered network data propagates.
    NetworkData,
    /// A child timeout of `n` units expires.
    ChildTimeout(u32),
    /// A network-id timeout of `n` units expires and a new partition forms.
    NetworkIdTimeout(u32),
    /// A removed context id becomes reusable after `n` units.
    ContextReuseDelay(u32),
    /// A fixed number of units with no timer behind it.
    Units(u32),
}

impl Wait {
    /// Nominal length in units, before any margin.
    pub const fn units(self) -> u32 {
        match self {
            Wait::Attach => ATTACH_UNITS,
            Wait::RouterUpgrade => UPGRADE_UNITS,
            Wait::NetworkData => NETWORK_DATA_UNITS,
            Wait::ChildTimeout(n)
            | Wait::NetworkIdTimeout(n)
            | Wait::ContextReuseDelay(n)
            | Wait::Units(n) => n,
        }
    }

    /// Timer expiries get a margin; the fixed settle windows already include
    /// one.
    pub const fn is_timer(self) -> bool {
        matches!(
            self,
            Wait::ChildTimeout(_) | Wait::NetworkIdTimeout(_) | Wait::ContextReuseDelay(_)
        )
    }
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wait::Attach => write!(f, "attach"),
            Wait::RouterUpgrade => write!(f, "router upgrade"),
            Wait::NetworkData => write!(f, "network data"),
            Wait::ChildTimeout(n) => write!(f, "child timeout {n}"),
            Wait::NetworkIdTimeout(n) => write!(f, "network id timeout {n}"),
            Wait::ContextReuseDelay(n) => write!(f, "context reuse delay {n}"),
            Wait::Units(n) => write!(f, "{n} units"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingProfile {
    /// Length of one protocol time unit.
    pub unit: Duration,
    /// Minimum margin added to timer waits, in units.
    pub margin_units: u32,
    /// Proportional margin added to timer waits, in percent of the timer.
    pub margin_percent: u32,
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self {
            unit: crate::config::DEFAULT_UNIT,
            margin_units: 2,
            margin_percent: 15,
        }
    }
}

impl TimingProfile {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            unit: config.unit,
            ..Self::default()
        }
    }

    /// Units actually slept for `wait`.
    pub fn units_for(&self, wait: Wait) -> u32 {
        let nominal = wait.units();
        if !wait.is_timer() {
            return nominal;
        }
        let proportional = nominal.saturating_mul(self.margin_percent) / 100;
        nominal.saturating_add(self.margin_units.max(proportional))
    }

    pub fn duration(&self, wait: Wait) -> Duration {
        self.unit.saturating_mul(self.units_for(wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_windows_have_no_extra_margin() {
        let t = TimingProfile::default();
        assert_eq!(t.duration(Wait::Attach), Duration::from_secs(3));
        assert_eq!(t.duration(Wait::RouterUpgrade), Duration::from_secs(5));
        assert_eq!(t.duration(Wait::Units(200)), Duration::from_secs(200));
    }

    #[test]
    fn test_timer_margin_is_larger_of_floor_and_percent() {
        let t = TimingProfile::default();
        assert_eq!(t.units_for(Wait::ChildTimeout(3)), 5);
        assert_eq!(t.units_for(Wait::NetworkIdTimeout(120)), 138);
        assert_eq!(t.units_for(Wait::ContextReuseDelay(10)), 12);
    }

    #[test]
    fn test_unit_scales_duration() {
        let t = TimingProfile {
            unit: Duration::from_millis(20),
            ..TimingProfile::default()
        };
        assert_eq!(t.duration(Wait::NetworkIdTimeout(110)), Duration::from_millis(20 * 126));
    }
}
