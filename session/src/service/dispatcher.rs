//! Console command dispatch and recall

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::types::ReplyStatus;
use crate::error::{Error, Result};
use crate::infra::backend::ProcessBackend;
use crate::service::advisory::SignatureMatcher;

/// User input for the process console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandInput {
    Text(String),
    /// Send an empty line, e.g. to answer a "press enter" prompt
    BlankLine,
}

impl CommandInput {
    pub fn text(value: impl Into<String>) -> Self {
        CommandInput::Text(value.into())
    }
}

/// Result of a dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// The backend says the process is not running
    NotRunning { message: String },
}

/// Forwards console input to the backend
pub struct CommandDispatcher {
    backend: Arc<dyn ProcessBackend>,
    not_running: SignatureMatcher,
}

impl CommandDispatcher {
    pub fn new(backend: Arc<dyn ProcessBackend>, not_running: SignatureMatcher) -> Self {
        Self {
            backend,
            not_running,
        }
    }

    /// Validate input and return the value to send
    pub fn prepare(input: &CommandInput) -> Result<String> {
        match input {
            CommandInput::Text(text) if text.trim().is_empty() => Err(Error::EmptyCommand),
            CommandInput::Text(text) => Ok(text.clone()),
            CommandInput::BlankLine => Ok(String::new()),
        }
    }

    /// Send one value; liveness is left to the backend
    pub async fn dispatch(&self, process_id: &str, value: &str) -> Result<DispatchOutcome> {
        debug!("Sending input to {}: {:?}", process_id, value);
        let reply = self.backend.send_input(process_id, value).await?;
        match reply.status {
            ReplyStatus::Success => Ok(DispatchOutcome::Sent),
            ReplyStatus::Error => {
                let message = reply.message.clone().unwrap_or_default();
                let stopped = reply.server_status.as_deref() == Some("stopped")
                    || reply.is_bad_request()
                    || self.not_running.matches(&message);
                if stopped {
                    warn!("Input to {} rejected, process not running", process_id);
                    Ok(DispatchOutcome::NotRunning { message })
                } else {
                    warn!("Input to {} rejected: {}", process_id, message);
                    Err(Error::CommandRejected(message))
                }
            }
        }
    }
}

/// Bounded list of sent commands with a recall cursor
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    limit: usize,
    cursor: Option<usize>,
}

impl CommandHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
            cursor: None,
        }
    }

    /// Record a sent command, evicting the oldest past the limit
    pub fn push(&mut self, command: impl Into<String>) {
        self.cursor = None;
        if self.limit == 0 {
            return;
        }
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(command.into());
    }

    /// Step toward older commands; stays on the oldest
    pub fn previous(&mut self) -> Option<&str> {
        let index = match self.cursor {
            _ if self.entries.is_empty() => return None,
            None => self.entries.len() - 1,
            Some(i) => i.saturating_sub(1),
        };
        self.cursor = Some(index);
        self.entries.get(index).map(String::as_str)
    }

    /// Step toward newer commands; `None` past the newest
    pub fn next(&mut self) -> Option<&str> {
        match self.cursor {
            Some(i) if i + 1 < self.entries.len() => {
                self.cursor = Some(i + 1);
                self.entries.get(i + 1).map(String::as_str)
            }
            _ => {
                self.cursor = None;
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.cursor = None;
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
