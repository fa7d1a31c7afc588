//! Wire types of the process backend

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::session::ProcessStatus;
use crate::error::{Error, Result};

/// Start request body
#[derive(Debug, Clone, Serialize)]
pub struct StartRequest {
    pub game_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
    pub reconnect: bool,
}

/// Start reply status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Success,
    MultipleScripts,
    Error,
}

/// Start response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub status: StartStatus,
    #[serde(default)]
    pub scripts: Option<Vec<String>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reconnect: Option<bool>,
}

impl StartResponse {
    pub fn success() -> Self {
        Self {
            status: StartStatus::Success,
            scripts: None,
            message: None,
            reconnect: None,
        }
    }
}

/// Stop request body
#[derive(Debug, Clone, Serialize)]
pub struct StopRequest {
    pub game_id: String,
    pub force: bool,
}

/// Stop reply status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Success,
    /// The process did not acknowledge a graceful stop
    Warning,
    Error,
}

/// Stop response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopResponse {
    pub status: StopStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// Send input request body
#[derive(Debug, Clone, Serialize)]
pub struct SendInputRequest {
    pub game_id: String,
    pub value: String,
}

/// Generic success/error reply status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// Send input response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendInputResponse {
    pub status: ReplyStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub server_status: Option<String>,
    /// HTTP status the reply came with; not part of the body
    #[serde(skip)]
    pub http_status: Option<u16>,
}

impl SendInputResponse {
    /// The backend answers input to a dead or detached process with 400
    pub fn is_bad_request(&self) -> bool {
        self.http_status == Some(400)
    }
}

/// Single-process status response
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub server_status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub started_at: Option<f64>,
    #[serde(default)]
    pub uptime: Option<f64>,
}

/// Batch status entry
#[derive(Debug, Clone, Deserialize)]
pub struct ServerEntry {
    pub status: String,
    #[serde(default)]
    pub started_at: Option<f64>,
    #[serde(default)]
    pub uptime: Option<f64>,
}

/// Batch status response
#[derive(Debug, Clone, Deserialize)]
pub struct BatchStatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub servers: HashMap<String, ServerEntry>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Authoritative run state of one process
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub status: ProcessStatus,
    /// Unix seconds
    pub started_at: Option<f64>,
    /// Seconds
    pub uptime: Option<f64>,
}

impl RunState {
    pub fn running() -> Self {
        Self {
            status: ProcessStatus::Running,
            started_at: None,
            uptime: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: ProcessStatus::Stopped,
            started_at: None,
            uptime: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }
}

impl StatusResponse {
    /// Convert into a run state, failing on an error reply
    pub fn into_run_state(self) -> Result<RunState> {
        if self.status.as_deref() == Some("error") {
            return Err(Error::Backend(
                self.message
                    .unwrap_or_else(|| "Status query failed".to_string()),
            ));
        }
        let status = match self.server_status.as_deref() {
            Some("running") => ProcessStatus::Running,
            Some(_) => ProcessStatus::Stopped,
            None => {
                return Err(Error::Protocol(
                    "Status reply has no server_status".to_string(),
                ))
            }
        };
        Ok(RunState {
            status,
            started_at: self.started_at,
            uptime: self.uptime,
        })
    }
}

impl BatchStatusResponse {
    /// Convert into run states; the batch lists running processes only
    pub fn into_run_states(self) -> Result<HashMap<String, RunState>> {
        if self.status.as_deref() == Some("error") {
            return Err(Error::Backend(
                self.message
                    .unwrap_or_else(|| "Status query failed".to_string()),
            ));
        }
        Ok(self
            .servers
            .into_iter()
            .map(|(id, entry)| {
                let status = if entry.status == "running" {
                    ProcessStatus::Running
                } else {
                    ProcessStatus::Stopped
                };
                (
                    id,
                    RunState {
                        status,
                        started_at: entry.started_at,
                        uptime: entry.uptime,
                    },
                )
            })
            .collect())
    }
}

/// Query parameters of a stream connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamParams {
    /// Replay buffered output before live lines
    pub include_history: bool,
    /// The stream follows a reconnect/restart
    pub restart: bool,
}

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Error,
    /// Server gave up on an idle stream (`timeout` or `warning` on the wire)
    Timeout,
    /// The process was killed from the server side
    Terminated,
}

impl CompletionStatus {
    fn from_wire(status: Option<&str>) -> Self {
        match status {
            Some("error") => CompletionStatus::Error,
            Some("timeout") | Some("warning") => CompletionStatus::Timeout,
            Some("terminated") => CompletionStatus::Terminated,
            _ => CompletionStatus::Success,
        }
    }
}

/// Decoded server-push frame
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Line { payload: Value, history: bool },
    Prompt { text: String },
    Heartbeat { timestamp: Option<f64> },
    Timeout { message: Option<String> },
    Error { message: String },
    Complete {
        status: CompletionStatus,
        message: Option<String>,
        error_details: Option<String>,
    },
    /// Frame without a recognised tag
    Ignored,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStreamEvent {
    line: Option<Value>,
    prompt: Option<Value>,
    history: bool,
    heartbeat: bool,
    timestamp: Option<f64>,
    timeout: bool,
    message: Option<Value>,
    error: Option<Value>,
    complete: bool,
    status: Option<String>,
    error_details: Option<Value>,
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl StreamEvent {
    /// Decode one `data:` payload
    ///
    /// Tags are checked in the order complete, heartbeat, timeout, error,
    /// line, prompt; the first one present wins.
    pub fn decode(data: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(data)?;
        if let Value::String(_) = value {
            return Ok(StreamEvent::Line {
                payload: value,
                history: false,
            });
        }
        if !value.is_object() {
            return Ok(StreamEvent::Ignored);
        }

        let raw: RawStreamEvent = serde_json::from_value(value)?;
        let message = raw.message.and_then(value_text);

        if raw.complete {
            return Ok(StreamEvent::Complete {
                status: CompletionStatus::from_wire(raw.status.as_deref()),
                message,
                error_details: raw.error_details.and_then(value_text),
            });
        }
        if raw.heartbeat {
            return Ok(StreamEvent::Heartbeat {
                timestamp: raw.timestamp,
            });
        }
        if raw.timeout {
            return Ok(StreamEvent::Timeout { message });
        }
        if let Some(error) = raw.error.and_then(value_text) {
            return Ok(StreamEvent::Error { message: error });
        }
        if let Some(line) = raw.line {
            if !line.is_null() {
                return Ok(StreamEvent::Line {
                    payload: line,
                    history: raw.history,
                });
            }
        }
        if let Some(prompt) = raw.prompt.and_then(value_text) {
            return Ok(StreamEvent::Prompt { text: prompt });
        }
        Ok(StreamEvent::Ignored)
    }
}
