//! Domain models

pub mod output;
pub mod session;
pub mod types;

pub use output::{LineKind, OutputLine};
pub use session::{
    ProcessSession, ProcessStatus, SessionView, StartOptions, StartOutcome, StopMode, StopOutcome,
    StopPrompt,
};
pub use types::{CompletionStatus, RunState, StreamEvent, StreamParams};
