//! Line buffer and multi-pattern matching for [`Transport::read_until`].
//!
//! Patterns are only tried against complete (newline-terminated) lines so a
//! token split across two reads of a serial device is never half-matched.
//!
//! [`Transport::read_until`]: super::Transport::read_until

use regex::Regex;

/// One successful pattern match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    /// Position of the matching pattern in the caller's list.
    pub index: usize,
    /// Capture groups 1.., `None` for groups that did not participate.
    pub groups: Vec<Option<String>>,
    /// Text removed from the buffer: everything up to and including the
    /// line holding the match.
    pub consumed: String,
}

impl Match {
    /// Capture group `n` (1-based), or the empty string.
    pub fn group(&self, n: usize) -> &str {
        n.checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .and_then(|g| g.as_deref())
            .unwrap_or("")
    }
}

/// Result of one `read_until` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Matched(Match),
    /// The deadline passed. `unmatched` holds whatever text was buffered,
    /// empty when the DUT stayed silent.
    TimedOut { unmatched: String },
}

/// Received text not yet consumed by a match.
///
/// Bytes after the last newline stay raw until their line completes, so a
/// multi-byte character split across reads decodes intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Complete lines only.
    text: String,
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes. Returns the lines completed by this chunk.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);
        let Some(end) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(end + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        let decoded = String::from_utf8_lossy(&complete);
        let lines = decoded
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        self.text.push_str(&decoded);
        lines
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.partial.is_empty()
    }

    /// Remove and return everything buffered, complete or not.
    pub fn take(&mut self) -> String {
        let mut all = std::mem::take(&mut self.text);
        all.push_str(&String::from_utf8_lossy(&std::mem::take(&mut self.partial)));
        all
    }

    /// Find the earliest match of any pattern within the complete lines.
    ///
    /// When two patterns match at the same offset the one listed first
    /// wins. On success the buffer is consumed through the end of the
    /// matching line.
    pub fn find(&mut self, patterns: &[Regex]) -> Option<Match> {
        let complete = self.text.as_str();
        let mut best: Option<(usize, usize)> = None;
        for (index, pattern) in patterns.iter().enumerate() {
            if let Some(m) = pattern.find(complete)
                && best.is_none_or(|(start, _)| m.start() < start)
            {
                best = Some((m.start(), index));
            }
        }

        let (_, index) = best?;
        let caps = patterns[index].captures(complete)?;
        let whole = caps.get(0)?;
        let groups = caps
            .iter()
            .skip(1)
            .map(|g| g.map(|g| g.as_str().to_string()))
            .collect();

        let end = if complete[..whole.end()].ends_with('\n') {
            whole.end()
        } else {
            complete[whole.end()..]
                .find('\n')
                .map_or(complete.len(), |i| whole.end() + i + 1)
        };
        let consumed = self.text.drain(..end).collect();

        Some(Match {
            index,
            groups,
            consumed,
        })
    }
}
