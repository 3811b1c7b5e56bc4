//! Scenario results, printable as a summary or serialisable as JSON.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::HarnessError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Rendered error for failed scenarios.
    pub error: Option<String>,
    /// Whether the error aborted the scenario rather than failing a check.
    pub fatal: bool,
    /// Last protocol exchange before the failure.
    pub last_exchange: Option<String>,
    pub teardown_warnings: Vec<String>,
}

impl ScenarioReport {
    pub fn new(
        name: &str,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        result: Result<(), (HarnessError, Option<String>)>,
        teardown_warnings: Vec<String>,
    ) -> Self {
        let (outcome, error, fatal, last_exchange) = match result {
            Ok(()) => (Outcome::Passed, None, false, None),
            Err((e, last)) => (Outcome::Failed, Some(e.to_string()), e.is_fatal(), last),
        };
        Self {
            name: name.to_string(),
            outcome,
            started_at,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            error,
            fatal,
            last_exchange,
            teardown_warnings,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.outcome {
            Outcome::Passed => "PASS",
            Outcome::Failed => "FAIL",
        };
        write!(f, "{verdict} {} ({:.1}s)", self.name, self.duration_ms as f64 / 1000.0)?;
        if let Some(error) = &self.error {
            write!(f, "\n    {error}")?;
        }
        if let Some(exchange) = &self.last_exchange {
            write!(f, "\n    last exchange: {exchange}")?;
        }
        for warning in &self.teardown_warnings {
            write!(f, "\n    teardown: {warning}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            started_at: Utc::now(),
            scenarios: Vec::new(),
        }
    }

    pub fn push(&mut self, report: ScenarioReport) {
        self.scenarios.push(report);
    }

    pub fn failed(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.passed()).count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for scenario in &self.scenarios {
            writeln!(f, "{scenario}")?;
        }
        write!(
            f,
            "{} scenarios, {} passed, {} failed",
            self.scenarios.len(),
            self.scenarios.len() - self.failed(),
            self.failed()
        )
    }
}
