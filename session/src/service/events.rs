//! Session state-change notifications

use crate::domain::output::OutputLine;
use crate::domain::session::ProcessStatus;

/// Default capacity of the broadcast bus
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Event published on the registry's broadcast bus
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged {
        process_id: String,
        status: ProcessStatus,
    },
    /// A live output line; history replay never produces this
    Output {
        process_id: String,
        line: OutputLine,
    },
    /// The process is waiting for interactive input
    InputRequested {
        process_id: String,
        prompt: String,
    },
    /// Non-fatal condition such as a timed out or lost stream
    Warning {
        process_id: String,
        message: String,
    },
    Error {
        process_id: String,
        message: String,
    },
    /// The backend offered several start scripts; resolve with `resolve_script`
    ScriptChoiceRequired {
        process_id: String,
        scripts: Vec<String>,
    },
    /// A graceful stop was not acknowledged; a forced stop is offered
    EscalationSuggested {
        process_id: String,
        message: String,
    },
    /// The process survived a forced stop; repeat the forced stop
    ForceStopIneffective { process_id: String },
    StreamClosed { process_id: String },
    OutputCleared { process_id: String },
    /// The authoritative set of running processes changed
    RunningSetChanged { running: Vec<String> },
    FocusChanged { process_id: Option<String> },
}

impl SessionEvent {
    /// Process the event concerns, if it concerns a single one
    pub fn process_id(&self) -> Option<&str> {
        match self {
            SessionEvent::StatusChanged { process_id, .. }
            | SessionEvent::Output { process_id, .. }
            | SessionEvent::InputRequested { process_id, .. }
            | SessionEvent::Warning { process_id, .. }
            | SessionEvent::Error { process_id, .. }
            | SessionEvent::ScriptChoiceRequired { process_id, .. }
            | SessionEvent::EscalationSuggested { process_id, .. }
            | SessionEvent::ForceStopIneffective { process_id }
            | SessionEvent::StreamClosed { process_id }
            | SessionEvent::OutputCleared { process_id } => Some(process_id),
            SessionEvent::FocusChanged { process_id } => process_id.as_deref(),
            SessionEvent::RunningSetChanged { .. } => None,
        }
    }
}
