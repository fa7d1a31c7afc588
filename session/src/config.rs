//! Session manager configuration

use std::time::Duration;

use serde::Deserialize;

/// Session manager configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path prefix of the process routes (start, stop, stream, ...)
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Timeout for start/stop/send_input requests in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,

    /// Timeout for status requests in seconds
    #[serde(default = "default_status_timeout")]
    pub status_timeout: u64,

    /// Minimum spacing between status polls in seconds
    #[serde(default = "default_poll_floor")]
    pub poll_floor: u64,

    /// Minimum spacing between status polls while anything is running, in seconds
    #[serde(default = "default_poll_busy_floor")]
    pub poll_busy_floor: u64,

    /// Delay before the reconciliation tick that follows a stop or an end of stream
    #[serde(default = "default_reconcile_delay_ms")]
    pub reconcile_delay_ms: u64,

    /// Delay before the reconciliation tick that follows a remote start
    #[serde(default = "default_start_settle_ms")]
    pub start_settle_ms: u64,

    /// How long a locally observed lifecycle change outranks the batch status
    /// snapshot, in milliseconds; covers polls already in flight and batch
    /// replies cached by the backend
    #[serde(default = "default_snapshot_grace_ms")]
    pub snapshot_grace_ms: u64,

    /// Seconds without any frame before a stream is considered dead (0 = no watchdog)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Console command sent before the interrupt of a graceful stop (e.g. "stop")
    #[serde(default)]
    pub graceful_stop_command: Option<String>,

    /// Number of sent commands kept for recall
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Backend wording that means "the process is not running"
    #[serde(default = "default_not_running_markers")]
    pub not_running_markers: Vec<String>,

    /// Backend wording that means "the start script failed"
    #[serde(default = "default_start_failure_markers")]
    pub start_failure_markers: Vec<String>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_api_prefix() -> String {
    "/api/server".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_status_timeout() -> u64 {
    5
}

fn default_poll_floor() -> u64 {
    3
}

fn default_poll_busy_floor() -> u64 {
    30
}

fn default_reconcile_delay_ms() -> u64 {
    500
}

fn default_start_settle_ms() -> u64 {
    2000
}

fn default_snapshot_grace_ms() -> u64 {
    5000
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_history_limit() -> usize {
    50
}

fn default_not_running_markers() -> Vec<String> {
    vec![
        "not running".to_string(),
        "未运行".to_string(),
        "已停止".to_string(),
    ]
}

fn default_start_failure_markers() -> Vec<String> {
    vec![
        "start failed".to_string(),
        "failed to start".to_string(),
        "启动失败".to_string(),
    ]
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        let mut config = Config::default();

        if let Ok(val) = std::env::var("CONSOLE_BASE_URL") {
            config.base_url = val;
        }
        if let Ok(val) = std::env::var("CONSOLE_API_PREFIX") {
            config.api_prefix = val;
        }
        if let Ok(val) = std::env::var("CONSOLE_AUTH_TOKEN") {
            if !val.is_empty() {
                config.auth_token = Some(val);
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_HTTP_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.http_timeout = secs;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_STATUS_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.status_timeout = secs;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_POLL_FLOOR") {
            if let Ok(secs) = val.parse() {
                config.poll_floor = secs;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_POLL_BUSY_FLOOR") {
            if let Ok(secs) = val.parse() {
                config.poll_busy_floor = secs;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_RECONCILE_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                config.reconcile_delay_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_START_SETTLE_MS") {
            if let Ok(ms) = val.parse() {
                config.start_settle_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_SNAPSHOT_GRACE_MS") {
            if let Ok(ms) = val.parse() {
                config.snapshot_grace_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_IDLE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.idle_timeout = secs;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_GRACEFUL_STOP_COMMAND") {
            if !val.trim().is_empty() {
                config.graceful_stop_command = Some(val);
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_HISTORY_LIMIT") {
            if let Ok(limit) = val.parse() {
                config.history_limit = limit;
            }
        }
        if let Ok(val) = std::env::var("CONSOLE_NOT_RUNNING_MARKERS") {
            config.not_running_markers = parse_list(&val);
        }
        if let Ok(val) = std::env::var("CONSOLE_START_FAILURE_MARKERS") {
            config.start_failure_markers = parse_list(&val);
        }

        config
    }

    /// Full URL of a process route, e.g. `route("stop")`
    pub fn route(&self, name: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_end_matches('/'),
            name
        )
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout)
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    pub fn start_settle(&self) -> Duration {
        Duration::from_millis(self.start_settle_ms)
    }

    pub fn snapshot_grace(&self) -> Duration {
        Duration::from_millis(self.snapshot_grace_ms)
    }

    /// Stream watchdog, `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
            auth_token: None,
            http_timeout: default_http_timeout(),
            status_timeout: default_status_timeout(),
            poll_floor: default_poll_floor(),
            poll_busy_floor: default_poll_busy_floor(),
            reconcile_delay_ms: default_reconcile_delay_ms(),
            start_settle_ms: default_start_settle_ms(),
            snapshot_grace_ms: default_snapshot_grace_ms(),
            idle_timeout: default_idle_timeout(),
            graceful_stop_command: None,
            history_limit: default_history_limit(),
            not_running_markers: default_not_running_markers(),
            start_failure_markers: default_start_failure_markers(),
        }
    }
}
