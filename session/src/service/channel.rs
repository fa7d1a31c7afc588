//! Stream channel
//!
//! One server-push connection for one process. A background task reads raw
//! frames, decodes them and forwards [`ChannelEvent`]s over an mpsc channel.
//! Any terminal event ends the task. `close()` cancels the task together
//! with its idle watchdog and may be called any number of times.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::output::OutputLine;
use crate::domain::types::{CompletionStatus, StreamEvent, StreamParams};
use crate::error::Result;
use crate::infra::stream::{EventStream, StreamTransport};

const DEFAULT_TIMEOUT_MESSAGE: &str = "connection timed out";

/// Decoded event delivered to the channel owner
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Output or prompt line
    Line(OutputLine),
    Heartbeat { timestamp: Option<f64> },
    /// Server-side timeout or local heartbeat loss
    Timeout { message: String },
    /// Error frame or undecodable frame
    Error { message: String },
    /// Normal end of stream
    Complete {
        status: CompletionStatus,
        message: Option<String>,
        error_details: Option<String>,
    },
    /// Transport failed or ended without `complete`
    Disconnected { reason: String },
}

impl ChannelEvent {
    /// Whether the channel is finished after this event
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChannelEvent::Line(_) | ChannelEvent::Heartbeat { .. })
    }

    fn from_stream_event(event: StreamEvent) -> Option<Self> {
        let event = match event {
            StreamEvent::Line { payload, history } => {
                ChannelEvent::Line(OutputLine::from_payload(payload, history))
            }
            StreamEvent::Prompt { text } => ChannelEvent::Line(OutputLine::prompt(text)),
            StreamEvent::Heartbeat { timestamp } => ChannelEvent::Heartbeat { timestamp },
            StreamEvent::Timeout { message }
            | StreamEvent::Complete {
                status: CompletionStatus::Timeout,
                message,
                ..
            } => ChannelEvent::Timeout {
                message: message.unwrap_or_else(|| DEFAULT_TIMEOUT_MESSAGE.to_string()),
            },
            StreamEvent::Error { message } => ChannelEvent::Error { message },
            StreamEvent::Complete {
                status,
                message,
                error_details,
            } => ChannelEvent::Complete {
                status,
                message,
                error_details,
            },
            StreamEvent::Ignored => return None,
        };
        Some(event)
    }
}

/// Handle to one open stream
pub struct StreamChannel {
    id: Uuid,
    process_id: String,
    params: StreamParams,
    cancel: CancellationToken,
}

impl StreamChannel {
    /// Connect through `transport` and start forwarding events
    pub async fn open(
        transport: &dyn StreamTransport,
        process_id: &str,
        params: StreamParams,
        idle_timeout: Option<Duration>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let stream = transport.connect(process_id, params).await?;
        Ok(Self::spawn(process_id, params, stream, idle_timeout))
    }

    /// Start forwarding events from an already connected stream
    pub fn spawn(
        process_id: &str,
        params: StreamParams,
        stream: EventStream,
        idle_timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        info!(
            "Stream {} opened for {} (history: {}, restart: {})",
            id, process_id, params.include_history, params.restart
        );

        tokio::spawn(run_channel(
            id,
            process_id.to_string(),
            stream,
            tx,
            cancel.clone(),
            idle_timeout,
        ));

        let channel = Self {
            id,
            process_id: process_id.to_string(),
            params,
            cancel,
        };
        (channel, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn params(&self) -> StreamParams {
        self.params
    }

    /// Close the stream; idempotent
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Closing stream {} for {}", self.id, self.process_id);
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Frame {
    Data(String),
    Failed(String),
    Ended,
    Idle(Duration),
}

async fn next_frame(stream: &mut EventStream, idle_timeout: Option<Duration>) -> Frame {
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Frame::Idle(limit),
        },
        None => stream.next().await,
    };
    match next {
        Some(Ok(data)) => Frame::Data(data),
        Some(Err(e)) => Frame::Failed(e.to_string()),
        None => Frame::Ended,
    }
}

async fn run_channel(
    id: Uuid,
    process_id: String,
    mut stream: EventStream,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
    idle_timeout: Option<Duration>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = next_frame(&mut stream, idle_timeout) => frame,
        };

        let event = match frame {
            Frame::Data(data) => match StreamEvent::decode(&data) {
                Ok(event) => match ChannelEvent::from_stream_event(event) {
                    Some(event) => event,
                    None => {
                        debug!("Stream {} ignored frame: {}", id, data);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("Stream {} for {} sent a bad frame: {}", id, process_id, e);
                    ChannelEvent::Error {
                        message: e.to_string(),
                    }
                }
            },
            Frame::Failed(reason) => {
                warn!("Stream {} for {} failed: {}", id, process_id, reason);
                ChannelEvent::Disconnected { reason }
            }
            Frame::Ended => ChannelEvent::Disconnected {
                reason: "stream ended".to_string(),
            },
            Frame::Idle(limit) => {
                warn!(
                    "Stream {} for {} idle for {}s",
                    id,
                    process_id,
                    limit.as_secs()
                );
                ChannelEvent::Timeout {
                    message: format!("no data for {}s", limit.as_secs()),
                }
            }
        };

        let terminal = event.is_terminal();
        if tx.send(event).is_err() || terminal {
            break;
        }
    }

    cancel.cancel();
    info!("Stream {} for {} closed", id, process_id);
}
