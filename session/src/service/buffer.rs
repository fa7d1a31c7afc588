//! Per-process output log

use crate::domain::output::OutputLine;

/// Append-only ordered transcript of one process
///
/// Lines are never removed except by [`OutputBuffer::clear`]. A reconnect
/// appends a separator and records where the history replay begins.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    lines: Vec<OutputLine>,
    replay_from: Option<usize>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: OutputLine) {
        self.lines.push(line);
    }

    /// Mark the start of a history replay, optionally after a separator line
    pub fn begin_replay(&mut self, separator: Option<OutputLine>) {
        if let Some(separator) = separator {
            self.lines.push(separator);
        }
        self.replay_from = Some(self.lines.len());
    }

    /// Index of the first line of the latest history replay
    pub fn replay_from(&self) -> Option<usize> {
        self.replay_from
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drop every line; returns how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.lines.len();
        self.lines.clear();
        self.replay_from = None;
        removed
    }
}
