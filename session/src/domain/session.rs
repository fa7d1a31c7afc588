//! Process session domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::output::OutputLine;

/// Run status of a console session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Process is not running
    Stopped,
    /// Remote start has been requested
    Starting,
    /// Process is running
    Running,
    /// Stop has been requested but not confirmed
    Stopping,
    /// Nothing authoritative is known yet
    #[default]
    Unknown,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(ProcessStatus::Stopped),
            "starting" => Some(ProcessStatus::Starting),
            "running" => Some(ProcessStatus::Running),
            "stopping" => Some(ProcessStatus::Stopping),
            "unknown" => Some(ProcessStatus::Unknown),
            _ => None,
        }
    }

    /// Whether a session in this status may own a live stream
    pub fn allows_stream(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Stopping
        )
    }
}

/// Client-side state of one remote process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSession {
    /// Stable process id (game/server id or a tool id such as "steamcmd")
    pub process_id: String,

    /// Current (possibly optimistic) status
    pub status: ProcessStatus,

    /// Last time any stream frame arrived
    pub last_activity_at: Option<DateTime<Utc>>,

    /// Start scripts offered by the backend, awaiting a pick
    pub pending_script_choice: Option<Vec<String>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ProcessSession {
    /// Create a new session with unknown status
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            status: ProcessStatus::Unknown,
            last_activity_at: None,
            pending_script_choice: None,
            created_at: Utc::now(),
        }
    }

    /// Record stream activity
    pub fn touch(&mut self) {
        self.last_activity_at = Some(Utc::now());
    }

    /// Set the status, returning whether it changed
    pub fn set_status(&mut self, status: ProcessStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }
}

/// Read-only snapshot handed to the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub process_id: String,
    pub status: ProcessStatus,
    pub lines: Vec<OutputLine>,
    /// Index into `lines` where the latest history replay begins
    pub replay_from: Option<usize>,
    pub pending_script_choice: Option<Vec<String>>,
    /// Whether a stream is currently open
    pub streaming: bool,
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// Options for `attach_or_start`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Re-attach only; never starts a stopped process
    pub reconnect: bool,
    /// Start script picked by the user
    pub script_name: Option<String>,
}

impl StartOptions {
    pub fn reconnect() -> Self {
        Self {
            reconnect: true,
            script_name: None,
        }
    }

    pub fn with_script(script_name: impl Into<String>) -> Self {
        Self {
            reconnect: false,
            script_name: Some(script_name.into()),
        }
    }
}

/// Result of `attach_or_start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The remote start action ran and a stream is open
    Started,
    /// The process was already running; attached with history replay
    Attached,
    /// The backend wants the user to pick one of these scripts
    ScriptChoiceRequired(Vec<String>),
}

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Interrupt and let the process shut down on its own
    Graceful,
    /// Hard kill
    Forced,
}

impl StopMode {
    pub fn is_forced(&self) -> bool {
        matches!(self, StopMode::Forced)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopMode::Graceful => "standard",
            StopMode::Forced => "forced",
        }
    }
}

/// Result of `stop`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Stop acknowledged; status is optimistically Stopped
    Stopped,
    /// The process did not acknowledge a graceful stop; a forced stop is offered
    EscalationRequired { message: String },
}

/// Confirmation text for a stop, both options side by side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopPrompt {
    pub process_id: String,
    pub standard: &'static str,
    pub forced: &'static str,
}

impl StopPrompt {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            standard: "Standard stop sends an interrupt and lets the process save and exit on its own.",
            forced: "Forced stop kills the process immediately; unsaved data may be lost.",
        }
    }
}
