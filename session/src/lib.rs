//! Elevo process console sessions
//!
//! Live console sessions for remotely managed processes (game servers,
//! installers): a server-push output stream per process, history replay on
//! reconnect, console input, start/stop arbitration and reconciliation of
//! optimistic status against a rate-limited authoritative poll.
//!
//! [`SessionRegistry`] is the entry point. Each process id maps to one
//! [`SessionController`]; state changes are published as [`SessionEvent`]s.

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use domain::{
    LineKind, OutputLine, ProcessStatus, SessionView, StartOptions, StartOutcome, StopMode,
    StopOutcome, StopPrompt,
};
pub use error::{Error, ErrorCategory, Result};
pub use service::{CommandInput, PollOutcome, SessionController, SessionEvent, SessionRegistry};
