//! Bounded record of recent command exchanges, kept for failure reports.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How an exchange ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExchangeOutcome {
    /// The `Done` sentinel arrived.
    Completed,
    /// A sentinel-less command gathered everything it waited for.
    Collected,
    /// Nothing (or nothing further) arrived before the deadline.
    TimedOut,
    /// Text arrived that matched none of the expected patterns.
    Mismatch,
}

/// One command and what came back.
#[derive(Clone, Debug, Serialize)]
pub struct Exchange {
    pub at: DateTime<Utc>,
    pub command: String,
    pub received: String,
    pub outcome: ExchangeOutcome,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] > {} => {:?} {:?}",
            self.at.format("%H:%M:%S%.3f"),
            self.command,
            self.outcome,
            self.received.trim_end()
        )
    }
}

#[derive(Debug)]
pub struct Transcript {
    entries: VecDeque<Exchange>,
    capacity: usize,
}

impl Transcript {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, command: &str, received: String, outcome: ExchangeOutcome) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Exchange {
            at: Utc::now(),
            command: command.to_string(),
            received,
            outcome,
        });
    }

    pub fn last(&self) -> Option<&Exchange> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
