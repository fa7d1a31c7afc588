//! Lifecycle guard
//!
//! Serializes start, stop, command and reconcile operations per process id
//! and holds the decision tables for start and stop replies.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::domain::session::{StartOptions, StopMode};
use crate::domain::types::{StartResponse, StartStatus, StopResponse, StopStatus};
use crate::error::{Error, Result};
use crate::service::advisory::SignatureMatcher;

/// What `attach_or_start` should do after the authoritative status query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPlan {
    /// Reconnect requested but the process is not running
    RejectReconnect,
    /// Process is running; attach with history replay
    Attach { reconnect: bool },
    /// Invoke the remote start action
    RemoteStart,
}

/// Interpretation of a start reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Started,
    ChooseScript(Vec<String>),
    Failed(String),
}

/// Interpretation of a stop reply
#[derive(Debug)]
pub enum StopDecision {
    /// Mark stopped, then reconcile
    Stopped { message: Option<String> },
    /// Graceful stop not acknowledged; offer a forced stop
    Escalate { message: String },
    Failed(Error),
}

/// Removes the process from the starting set when dropped
pub struct StartTicket {
    starting: Arc<DashSet<String>>,
    process_id: String,
}

impl Drop for StartTicket {
    fn drop(&mut self) {
        self.starting.remove(&self.process_id);
    }
}

/// Per-process mutual exclusion for lifecycle operations
#[derive(Default)]
pub struct LifecycleGuard {
    locks: DashMap<String, Arc<Mutex<()>>>,
    starting: Arc<DashSet<String>>,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, process_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(process_id.to_string())
            .or_default()
            .clone()
    }

    /// Wait for exclusive access to `process_id`
    pub async fn acquire(&self, process_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(process_id).lock_owned().await
    }

    /// Exclusive access if nothing else holds it
    pub fn try_acquire(&self, process_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(process_id).try_lock_owned().ok()
    }

    pub fn is_starting(&self, process_id: &str) -> bool {
        self.starting.contains(process_id)
    }

    /// Reject a start while a remote start for the same id is in flight
    pub fn ensure_not_starting(&self, process_id: &str) -> Result<()> {
        if self.is_starting(process_id) {
            warn!("Start of {} rejected: already starting", process_id);
            return Err(Error::AlreadyStarting(process_id.to_string()));
        }
        Ok(())
    }

    pub fn begin_start(&self, process_id: &str) -> StartTicket {
        self.starting.insert(process_id.to_string());
        StartTicket {
            starting: Arc::clone(&self.starting),
            process_id: process_id.to_string(),
        }
    }

    /// Drop the lock entry of a removed session
    pub fn forget(&self, process_id: &str) {
        self.locks.remove(process_id);
    }

    pub fn plan_start(running: bool, opts: &StartOptions) -> StartPlan {
        match (running, opts.reconnect) {
            (false, true) => StartPlan::RejectReconnect,
            (true, reconnect) => StartPlan::Attach { reconnect },
            (false, false) => StartPlan::RemoteStart,
        }
    }

    pub fn classify_start(reply: StartResponse) -> StartDecision {
        match reply.status {
            StartStatus::Success => StartDecision::Started,
            StartStatus::MultipleScripts => match reply.scripts {
                Some(scripts) if !scripts.is_empty() => StartDecision::ChooseScript(scripts),
                _ => StartDecision::Failed(
                    reply
                        .message
                        .unwrap_or_else(|| "no start script found".to_string()),
                ),
            },
            StartStatus::Error => StartDecision::Failed(
                reply.message.unwrap_or_else(|| "start failed".to_string()),
            ),
        }
    }

    /// A forced stop always ends optimistically stopped
    pub fn classify_stop(
        mode: StopMode,
        reply: Result<StopResponse>,
        not_running: &SignatureMatcher,
    ) -> StopDecision {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) if mode.is_forced() => {
                warn!("Forced stop request failed: {}", e);
                return StopDecision::Stopped {
                    message: Some(e.to_string()),
                };
            }
            Err(e) => return StopDecision::Failed(e),
        };

        match (reply.status, mode) {
            (StopStatus::Success, _) => StopDecision::Stopped {
                message: reply.message,
            },
            (_, StopMode::Forced) => StopDecision::Stopped {
                message: reply.message,
            },
            (StopStatus::Warning, StopMode::Graceful) => StopDecision::Escalate {
                message: reply
                    .message
                    .unwrap_or_else(|| "process did not acknowledge the stop".to_string()),
            },
            (StopStatus::Error, StopMode::Graceful) => {
                let message = reply.message.unwrap_or_default();
                if not_running.matches(&message) {
                    StopDecision::Stopped {
                        message: Some(message),
                    }
                } else {
                    StopDecision::Failed(Error::StopFailed(message))
                }
            }
        }
    }
}
