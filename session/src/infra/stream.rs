//! Server-push transport
//!
//! A connection yields the raw `data:` payload of every server-sent event.
//! Decoding into [`StreamEvent`](crate::domain::types::StreamEvent) happens
//! in the channel, so transports stay protocol-agnostic.

use async_trait::async_trait;
use eventsource_client::Client as _;
use eventsource_client::{ClientBuilder, ReconnectOptions, SSE};
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tracing::debug;

use crate::config::Config;
use crate::domain::types::StreamParams;
use crate::error::{Error, Result};

/// Stream of raw event payloads; ends or errors when the connection drops
pub type EventStream = BoxStream<'static, Result<String>>;

/// Opens server-push connections for a process
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, process_id: &str, params: StreamParams) -> Result<EventStream>;
}

/// Server-sent events transport
pub struct SseTransport {
    url: String,
    auth_token: Option<String>,
}

impl SseTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.route("stream"),
            auth_token: config.auth_token.clone(),
        }
    }

    /// Stream URL with its query string
    pub fn stream_url(&self, process_id: &str, params: StreamParams) -> Result<String> {
        let mut query = vec![
            ("game_id", process_id.to_string()),
            ("include_history", params.include_history.to_string()),
            ("restart", params.restart.to_string()),
        ];
        if let Some(token) = &self.auth_token {
            query.push(("token", token.clone()));
        }
        let url = reqwest::Url::parse_with_params(&self.url, &query)
            .map_err(|e| Error::InvalidParameter(format!("stream url: {}", e)))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl StreamTransport for SseTransport {
    async fn connect(&self, process_id: &str, params: StreamParams) -> Result<EventStream> {
        let url = self.stream_url(process_id, params)?;
        debug!("Connecting stream {}", url);

        let mut builder = ClientBuilder::for_url(&url)?;
        if let Some(token) = &self.auth_token {
            builder = builder.header("Authorization", &format!("Bearer {}", token))?;
        }
        // Reconnecting is always an explicit caller action
        let client = builder
            .reconnect(ReconnectOptions::reconnect(false).build())
            .build();

        let stream = client
            .stream()
            .filter_map(|item| {
                future::ready(match item {
                    Ok(SSE::Event(event)) => Some(Ok(event.data)),
                    Ok(_) => None,
                    Err(e) => Some(Err(Error::from(e))),
                })
            })
            .boxed();
        Ok(stream)
    }
}
