//! Request/response interpreter for the DUT command line.
//!
//! Every command is answered by zero or more data lines and the `Done`
//! sentinel, except for ping which never prints a sentinel. A
//! [`CommandSession`] sends one command at a time over its [`Transport`],
//! matches the response against the patterns of the command family and
//! returns a tagged [`Reply`].

mod transcript;

use std::collections::BTreeSet;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::debug;

pub use transcript::{Exchange, ExchangeOutcome, Transcript};

use crate::error::{HarnessError, Result};
use crate::node::NodeId;
use crate::transport::{DONE, Match, ReadOutcome, Transport};

/// Captured groups of one row, in pattern order. Missing groups are empty.
pub type Row = Vec<String>;

/// Expected response layout of a command family.
#[derive(Clone, Debug)]
pub enum Shape {
    /// Sentinel only.
    Ack,
    /// One value line captured by group 1, then the sentinel.
    Scalar(Regex),
    /// Any number of rows, then the sentinel. Lines matching a `skip`
    /// pattern (totals, table borders) are dropped.
    Rows { row: Regex, skip: Vec<Regex> },
    /// Rows grouped under `name:` header lines; only rows below the header
    /// named `section` are kept.
    Sectioned {
        header: Regex,
        row: Regex,
        section: String,
    },
    /// No sentinel: gather distinct group-1 captures until `count` are seen.
    /// Reaching the deadline first yields [`Reply::TimedOut`] even when some
    /// rows arrived.
    Collect { row: Regex, count: usize },
}

/// A command plus the shape of its response.
#[derive(Clone, Debug)]
pub struct Request {
    pub command: String,
    pub shape: Shape,
    /// Overrides the session's default response timeout.
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn ack(command: impl Into<String>) -> Self {
        Self::new(command, Shape::Ack)
    }

    pub fn scalar(command: impl Into<String>, value: &Regex) -> Self {
        Self::new(command, Shape::Scalar(value.clone()))
    }

    pub fn rows(command: impl Into<String>, row: &Regex, skip: &[&Regex]) -> Self {
        Self::new(
            command,
            Shape::Rows {
                row: row.clone(),
                skip: skip.iter().map(|r| (*r).clone()).collect(),
            },
        )
    }

    pub fn sectioned(command: impl Into<String>, header: &Regex, row: &Regex, section: &str) -> Self {
        Self::new(
            command,
            Shape::Sectioned {
                header: header.clone(),
                row: row.clone(),
                section: section.to_string(),
            },
        )
    }

    pub fn collect(command: impl Into<String>, row: &Regex, count: usize) -> Self {
        Self::new(
            command,
            Shape::Collect {
                row: row.clone(),
                count: count.max(1),
            },
        )
    }

    fn new(command: impl Into<String>, shape: Shape) -> Self {
        Self {
            command: command.into(),
            shape,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Parsed response of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Acknowledged,
    Scalar(String),
    Rows(Vec<Row>),
    /// The DUT stayed silent until the deadline.
    TimedOut,
}

impl Reply {
    /// Treat a silent DUT as [`HarnessError::ResponseTimeout`].
    pub fn require(self, command: &str, timeout: Duration) -> Result<Reply> {
        match self {
            Reply::TimedOut => Err(HarnessError::ResponseTimeout {
                command: command.to_string(),
                timeout,
            }),
            reply => Ok(reply),
        }
    }
}

#[derive(Clone, Copy)]
enum Until {
    Sentinel,
    Distinct(usize),
}

enum Gathered {
    Complete(Vec<Match>),
    TimedOut(Vec<Match>),
}

/// Sequential command channel to one DUT.
pub struct CommandSession {
    transport: Transport,
    timeout: Duration,
    transcript: Transcript,
}

impl CommandSession {
    pub fn new(transport: Transport, timeout: Duration, transcript_len: usize) -> Self {
        Self {
            transport,
            timeout,
            transcript: Transcript::new(transcript_len),
        }
    }

    pub fn node(&self) -> NodeId {
        self.transport.node()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Send `command` and collect matches of `patterns` until `Done`.
    ///
    /// Matches are returned in arrival order with indices into `patterns`.
    pub async fn execute(&mut self, command: &str, patterns: &[Regex]) -> Result<Vec<Match>> {
        match self
            .gather(command, patterns, self.timeout, Until::Sentinel)
            .await?
        {
            Gathered::Complete(matches) => Ok(matches),
            Gathered::TimedOut(_) => Err(HarnessError::ResponseTimeout {
                command: command.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// Send a request and interpret the response according to its shape.
    pub async fn request(&mut self, request: Request) -> Result<Reply> {
        let timeout = request.timeout.unwrap_or(self.timeout);
        let command = request.command.as_str();

        match &request.shape {
            Shape::Ack => Ok(match self.gather(command, &[], timeout, Until::Sentinel).await? {
                Gathered::Complete(_) => Reply::Acknowledged,
                Gathered::TimedOut(_) => Reply::TimedOut,
            }),

            Shape::Scalar(value) => {
                let patterns = [value.clone()];
                match self.gather(command, &patterns, timeout, Until::Sentinel).await? {
                    Gathered::Complete(matches) => match matches.first() {
                        Some(m) => Ok(Reply::Scalar(m.group(1).to_string())),
                        None => Err(self.mismatch(command)),
                    },
                    Gathered::TimedOut(_) => Ok(Reply::TimedOut),
                }
            }

            Shape::Rows { row, skip } => {
                let mut patterns = vec![row.clone()];
                patterns.extend(skip.iter().cloned());
                match self.gather(command, &patterns, timeout, Until::Sentinel).await? {
                    Gathered::Complete(matches) => Ok(Reply::Rows(
                        matches
                            .iter()
                            .filter(|m| m.index == 0)
                            .map(row_of)
                            .collect(),
                    )),
                    Gathered::TimedOut(_) => Ok(Reply::TimedOut),
                }
            }

            Shape::Sectioned {
                header,
                row,
                section,
            } => {
                let patterns = [header.clone(), row.clone()];
                match self.gather(command, &patterns, timeout, Until::Sentinel).await? {
                    Gathered::Complete(matches) => {
                        let mut current: Option<&str> = None;
                        let mut rows = Vec::new();
                        for m in &matches {
                            match m.index {
                                0 => current = Some(m.group(1)),
                                _ if current == Some(section.as_str()) => rows.push(row_of(m)),
                                _ => {}
                            }
                        }
                        Ok(Reply::Rows(rows))
                    }
                    Gathered::TimedOut(_) => Ok(Reply::TimedOut),
                }
            }

            Shape::Collect { row, count } => {
                let patterns = [row.clone()];
                match self
                    .gather(command, &patterns, timeout, Until::Distinct(*count))
                    .await?
                {
                    Gathered::Complete(matches) => {
                        let mut seen = BTreeSet::new();
                        Ok(Reply::Rows(
                            matches
                                .iter()
                                .filter(|m| seen.insert(m.group(1).to_string()))
                                .map(row_of)
                                .collect(),
                        ))
                    }
                    // Fewer than `count` distinct rows is a timeout, not a
                    // smaller answer.
                    Gathered::TimedOut(partial) => {
                        debug!(node = %self.node(), command, rows = partial.len(), wanted = count, "collect short");
                        Ok(Reply::TimedOut)
                    }
                }
            }
        }
    }

    fn mismatch(&self, command: &str) -> HarnessError {
        HarnessError::ProtocolMismatch {
            command: command.to_string(),
            received: self
                .transcript
                .last()
                .map(|e| e.received.clone())
                .unwrap_or_default(),
        }
    }

    async fn gather(
        &mut self,
        command: &str,
        patterns: &[Regex],
        timeout: Duration,
        until: Until,
    ) -> Result<Gathered> {
        self.transport.drain().await?;
        self.transport.send_line(command).await?;

        // The sentinel goes first so it wins ties against catch-all rows.
        let offset = match until {
            Until::Sentinel => 1,
            Until::Distinct(_) => 0,
        };
        let mut all = Vec::with_capacity(patterns.len() + offset);
        if offset == 1 {
            all.push(DONE.clone());
        }
        all.extend(patterns.iter().cloned());

        let deadline = Instant::now() + timeout;
        let mut matches: Vec<Match> = Vec::new();
        let mut distinct = BTreeSet::new();
        let mut received = String::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.read_until(&all, remaining).await? {
                ReadOutcome::Matched(mut m) => {
                    received.push_str(&m.consumed);
                    if offset == 1 && m.index == 0 {
                        debug!(node = %self.node(), command, rows = matches.len(), "done");
                        self.transcript
                            .record(command, received, ExchangeOutcome::Completed);
                        return Ok(Gathered::Complete(matches));
                    }
                    m.index -= offset;
                    if let Until::Distinct(count) = until {
                        distinct.insert(m.group(1).to_string());
                        matches.push(m);
                        if distinct.len() >= count {
                            self.transcript
                                .record(command, received, ExchangeOutcome::Collected);
                            return Ok(Gathered::Complete(matches));
                        }
                    } else {
                        matches.push(m);
                    }
                }
                ReadOutcome::TimedOut { unmatched } => {
                    let clean = unmatched.trim().is_empty();
                    received.push_str(&unmatched);
                    if clean {
                        debug!(node = %self.node(), command, "timed out");
                        self.transcript
                            .record(command, received, ExchangeOutcome::TimedOut);
                        return Ok(Gathered::TimedOut(matches));
                    }
                    self.transcript
                        .record(command, received, ExchangeOutcome::Mismatch);
                    return Err(HarnessError::ProtocolMismatch {
                        command: command.to_string(),
                        received: unmatched,
                    });
                }
            }
        }
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

fn row_of(m: &Match) -> Row {
    m.groups
        .iter()
        .map(|g| g.clone().unwrap_or_default())
        .collect()
}
