//! Console output lines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Process output
    Output,
    /// Interactive prompt waiting for input
    Prompt,
    /// Command echoed locally as `> <text>`
    Command,
    /// Informational line added by the session manager
    Notice,
    /// Error explanation added by the session manager
    Error,
    /// Marks where a reconnect replay begins
    Separator,
}

/// One transcript line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputLine {
    pub kind: LineKind,
    /// Rendered text
    pub text: String,
    /// Original structured payload, when the backend sent an object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Replayed from history; must not trigger live-line side effects
    pub is_history: bool,
    pub received_at: DateTime<Utc>,
}

impl OutputLine {
    fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            payload: None,
            is_history: false,
            received_at: Utc::now(),
        }
    }

    /// Plain process output
    pub fn output(text: impl Into<String>) -> Self {
        Self::new(LineKind::Output, text)
    }

    /// Process output from a `line` frame; objects are rendered as JSON text
    pub fn from_payload(payload: Value, is_history: bool) -> Self {
        let (text, payload) = match payload {
            Value::String(s) => (s, None),
            other => (render_payload(&other), Some(other)),
        };
        Self {
            kind: LineKind::Output,
            text,
            payload,
            is_history,
            received_at: Utc::now(),
        }
    }

    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(LineKind::Prompt, text)
    }

    /// Local echo of a sent command
    pub fn command(value: &str) -> Self {
        Self::new(LineKind::Command, format!("> {}", value))
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(LineKind::Notice, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(LineKind::Error, text)
    }

    pub fn separator(text: impl Into<String>) -> Self {
        Self::new(LineKind::Separator, text)
    }
}

fn render_payload(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Object(_) | Value::Array(_) => format!("[object] {}", value),
        other => other.to_string(),
    }
}
