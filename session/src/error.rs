//! Error types for the console session manager

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure classes a caller reacts to differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Timeouts and lost connections; never changes authoritative status
    TransientTransport,
    /// The backend answered with an error frame or an unparseable payload
    Protocol,
    /// The request conflicts with the current lifecycle state
    LifecycleConflict,
    /// The backend refused a console command
    CommandRejected,
    /// The caller passed something unusable
    Invalid,
}

/// Main error type for the session manager
#[derive(Debug, Error)]
pub enum Error {
    // Lifecycle errors (2000-2999)
    #[error("Process {0} already stopped; use start, not reconnect")]
    ReconnectNotRunning(String),

    #[error("Process {0} is already starting")]
    AlreadyStarting(String),

    #[error("Start failed: {0}")]
    StartFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    // Command errors (3000-3999)
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Process {0} is not running")]
    ProcessNotRunning(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    // Transport errors (4000-4999)
    #[error("Request timed out")]
    RequestTimeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Stream error: {0}")]
    Stream(String),

    // Protocol errors (5000-5999)
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Backend error: {0}")]
    Backend(String),

    // General errors (1000-1999)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            // Lifecycle errors (2000-2999)
            Error::ReconnectNotRunning(_) => 2001,
            Error::AlreadyStarting(_) => 2002,
            Error::StartFailed(_) => 2003,
            Error::StopFailed(_) => 2004,

            // Command errors (3000-3999)
            Error::EmptyCommand => 3001,
            Error::ProcessNotRunning(_) => 3002,
            Error::CommandRejected(_) => 3003,

            // Transport errors (4000-4999)
            Error::RequestTimeout => 4001,
            Error::Http(_) => 4002,
            Error::Stream(_) => 4003,

            // Protocol errors (5000-5999)
            Error::Protocol(_) => 5001,
            Error::Backend(_) => 5002,

            // General errors (1000-1999)
            Error::InvalidParameter(_) => 1001,
        }
    }

    /// Get the failure class
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::RequestTimeout | Error::Http(_) | Error::Stream(_) => {
                ErrorCategory::TransientTransport
            }

            Error::Protocol(_) | Error::Backend(_) | Error::StartFailed(_) | Error::StopFailed(_) => {
                ErrorCategory::Protocol
            }

            Error::ReconnectNotRunning(_) | Error::AlreadyStarting(_) => {
                ErrorCategory::LifecycleConflict
            }

            Error::ProcessNotRunning(_) | Error::CommandRejected(_) => {
                ErrorCategory::CommandRejected
            }

            Error::EmptyCommand | Error::InvalidParameter(_) => ErrorCategory::Invalid,
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::TransientTransport
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::RequestTimeout
        } else {
            Error::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl From<eventsource_client::Error> for Error {
    fn from(err: eventsource_client::Error) -> Self {
        Error::Stream(err.to_string())
    }
}
