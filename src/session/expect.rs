//! Trace-line hand-off and expectation matching
//!
//! The receiver pushes decoded text lines into a [`TextQueue`]; the test
//! thread pops them one at a time and compares each against a pattern.
//!
//! Pattern rules:
//! - a leading `%timestamp` skips the timestamp field of the line;
//! - a trailing `*` compares only the part before the first `*`;
//! - otherwise the remaining text must match exactly.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::TextLine;

/// Marker that makes a pattern ignore the line's timestamp field.
pub const TIMESTAMP_MARKER: &str = "%timestamp";

/// Width of the timestamp field when the line does not start with digits.
pub const TIMESTAMP_WIDTH: usize = 10;

/// Ordered multi-producer/single-consumer buffer of trace lines.
#[derive(Debug, Default)]
pub struct TextQueue {
    lines: Mutex<VecDeque<TextLine>>,
    ready: Condvar,
}

impl TextQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and wake the consumer.
    pub fn push(&self, line: TextLine) {
        self.lines.lock().push_back(line);
        self.ready.notify_one();
    }

    /// Pop the oldest line, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<TextLine> {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600));

        let mut lines = self.lines.lock();
        loop {
            if let Some(line) = lines.pop_front() {
                return Some(line);
            }
            if self.ready.wait_until(&mut lines, deadline).timed_out() {
                return lines.pop_front();
            }
        }
    }

    /// Discard everything buffered so far and return it.
    ///
    /// Lines pushed after the buffer is taken are kept.
    pub fn flush(&self) -> Vec<TextLine> {
        let drained = std::mem::take(&mut *self.lines.lock());
        drained.into()
    }

    /// Number of buffered lines.
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

/// The compared parts of a pattern and line that differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Compared part of the pattern.
    pub expected: String,
    /// Compared part of the line.
    pub actual: String,
}

/// Compare a received line against an expectation pattern.
pub fn match_line(pattern: &str, line: &str) -> Result<(), Mismatch> {
    let (pattern, line) = match pattern.strip_prefix(TIMESTAMP_MARKER) {
        Some(rest) => (rest, skip_timestamp(line)),
        None => (pattern, line),
    };

    let (expected, actual) = if pattern.ends_with('*') {
        let prefix = pattern.split('*').next().unwrap_or_default();
        let width = prefix.chars().count();
        (prefix, take_chars(line, width))
    } else {
        (pattern, line)
    };

    if expected == actual {
        Ok(())
    } else {
        Err(Mismatch {
            expected: expected.to_owned(),
            actual: actual.to_owned(),
        })
    }
}

/// Drop the leading timestamp field: a run of digits when present, otherwise
/// the fixed-width blank or placeholder column.
fn skip_timestamp(line: &str) -> &str {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        &line[digits..]
    } else {
        let offset = line
            .char_indices()
            .nth(TIMESTAMP_WIDTH)
            .map_or(line.len(), |(idx, _)| idx);
        &line[offset..]
    }
}

fn take_chars(line: &str, count: usize) -> &str {
    let end = line
        .char_indices()
        .nth(count)
        .map_or(line.len(), |(idx, _)| idx);
    &line[..end]
}
