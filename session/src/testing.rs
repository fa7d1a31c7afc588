//! Test doubles shared by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::Config;
use crate::domain::types::{
    ReplyStatus, RunState, SendInputResponse, StartResponse, StartStatus, StopResponse,
    StopStatus, StreamParams,
};
use crate::error::Result;
use crate::infra::backend::ProcessBackend;
use crate::infra::stream::{EventStream, StreamTransport};
use crate::service::events::SessionEvent;
use crate::service::registry::SessionRegistry;

/// Config with the production poll floors and fast reconciliation
pub(crate) fn test_config() -> Config {
    Config {
        idle_timeout: 0,
        reconcile_delay_ms: 10,
        start_settle_ms: 20,
        snapshot_grace_ms: 0,
        ..Config::default()
    }
}

/// Registry over a fresh fake backend and transport
pub(crate) fn fake_registry() -> (Arc<SessionRegistry>, Arc<FakeBackend>, Arc<FakeTransport>) {
    fake_registry_with(test_config())
}

pub(crate) fn fake_registry_with(
    config: Config,
) -> (Arc<SessionRegistry>, Arc<FakeBackend>, Arc<FakeTransport>) {
    let backend = Arc::new(FakeBackend::new());
    let transport = Arc::new(FakeTransport::new());
    let registry = SessionRegistry::with_parts(config, backend.clone(), transport.clone());
    (registry, backend, transport)
}

/// Poll `check` for up to a second
pub(crate) async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Receive until an event matches `pred`
pub(crate) async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await;
    found.expect("expected event did not arrive")
}

/// Stateful in-memory backend
#[derive(Default)]
pub(crate) struct FakeBackend {
    running: Mutex<HashSet<String>>,
    scripts: Mutex<Vec<String>>,
    start_scripts: Mutex<Vec<Option<String>>>,
    sent: Mutex<Vec<(String, String)>>,
    start_reply: Mutex<Option<StartResponse>>,
    stop_reply: Mutex<Option<StopResponse>>,
    survive_stop: Mutex<bool>,
    cached_batch: Mutex<Option<Vec<String>>>,
    status_delay: Mutex<Option<Duration>>,
    start_delay: Mutex<Option<Duration>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    status_calls: AtomicUsize,
    status_all_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, process_id: &str, running: bool) {
        let mut set = self.running.lock().unwrap();
        if running {
            set.insert(process_id.to_string());
        } else {
            set.remove(process_id);
        }
    }

    pub fn is_running(&self, process_id: &str) -> bool {
        self.running.lock().unwrap().contains(process_id)
    }

    /// Start scripts found on disk; more than one needs a pick
    pub fn set_scripts(&self, scripts: &[&str]) {
        *self.scripts.lock().unwrap() = scripts.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_start_reply(&self, reply: StartResponse) {
        *self.start_reply.lock().unwrap() = Some(reply);
    }

    pub fn set_stop_reply(&self, reply: StopResponse) {
        *self.stop_reply.lock().unwrap() = Some(reply);
    }

    /// The process keeps running whatever stop says
    pub fn set_survive_stop(&self, survive: bool) {
        *self.survive_stop.lock().unwrap() = survive;
    }

    /// Batch status keeps answering with this running set
    pub fn set_cached_batch(&self, running: &[&str]) {
        *self.cached_batch.lock().unwrap() = Some(running.iter().map(|s| s.to_string()).collect());
    }

    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    /// The start request takes this long to answer
    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = Some(delay);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn status_all_calls(&self) -> usize {
        self.status_all_calls.load(Ordering::SeqCst)
    }

    pub fn start_scripts(&self) -> Vec<Option<String>> {
        self.start_scripts.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    async fn delay(&self) {
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ProcessBackend for FakeBackend {
    async fn start(
        &self,
        process_id: &str,
        script_name: Option<String>,
        _reconnect: bool,
    ) -> Result<StartResponse> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.start_scripts.lock().unwrap().push(script_name.clone());
        let delay = *self.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reply) = self.start_reply.lock().unwrap().clone() {
            return Ok(reply);
        }
        let scripts = self.scripts.lock().unwrap().clone();
        if scripts.len() > 1 && script_name.is_none() {
            return Ok(StartResponse {
                status: StartStatus::MultipleScripts,
                scripts: Some(scripts),
                message: Some("several start scripts found".to_string()),
                reconnect: None,
            });
        }
        self.set_running(process_id, true);
        Ok(StartResponse::success())
    }

    async fn stop(&self, process_id: &str, _force: bool) -> Result<StopResponse> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = self.stop_reply.lock().unwrap().clone() {
            return Ok(reply);
        }
        if !*self.survive_stop.lock().unwrap() {
            self.set_running(process_id, false);
        }
        Ok(StopResponse {
            status: StopStatus::Success,
            message: None,
        })
    }

    async fn send_input(&self, process_id: &str, value: &str) -> Result<SendInputResponse> {
        self.sent
            .lock()
            .unwrap()
            .push((process_id.to_string(), value.to_string()));
        if self.is_running(process_id) {
            Ok(SendInputResponse {
                status: ReplyStatus::Success,
                message: None,
                server_status: Some("running".to_string()),
                http_status: Some(200),
            })
        } else {
            Ok(SendInputResponse {
                status: ReplyStatus::Error,
                message: Some(format!(
                    "server {} console is gone or detached from the manager; restart it",
                    process_id
                )),
                server_status: None,
                http_status: Some(400),
            })
        }
    }

    async fn status(&self, process_id: &str) -> Result<RunState> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(if self.is_running(process_id) {
            RunState::running()
        } else {
            RunState::stopped()
        })
    }

    async fn status_all(&self) -> Result<HashMap<String, RunState>> {
        self.status_all_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if let Some(cached) = self.cached_batch.lock().unwrap().clone() {
            return Ok(cached
                .into_iter()
                .map(|id| (id, RunState::running()))
                .collect());
        }
        Ok(self
            .running
            .lock()
            .unwrap()
            .iter()
            .map(|id| (id.clone(), RunState::running()))
            .collect())
    }
}

struct FakeStream {
    process_id: String,
    params: StreamParams,
    frames: mpsc::UnboundedSender<Result<String>>,
}

/// Transport whose streams are fed by the test
#[derive(Default)]
pub(crate) struct FakeTransport {
    opened: Mutex<Vec<FakeStream>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn params(&self, index: usize) -> StreamParams {
        self.opened.lock().unwrap()[index].params
    }

    pub fn process_id(&self, index: usize) -> String {
        self.opened.lock().unwrap()[index].process_id.clone()
    }

    /// Push one raw `data:` payload into stream `index`
    pub fn send(&self, index: usize, data: &str) {
        let opened = self.opened.lock().unwrap();
        let _ = opened[index].frames.send(Ok(data.to_string()));
    }

    /// Make stream `index` fail like a dropped connection
    pub fn fail(&self, index: usize, reason: &str) {
        let opened = self.opened.lock().unwrap();
        let _ = opened[index]
            .frames
            .send(Err(crate::error::Error::Stream(reason.to_string())));
    }

    /// Whether the consumer of stream `index` has gone away
    pub fn is_closed(&self, index: usize) -> bool {
        self.opened.lock().unwrap()[index].frames.is_closed()
    }

    /// Streams still being consumed
    pub fn live_count(&self) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.frames.is_closed())
            .count()
    }
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn connect(&self, process_id: &str, params: StreamParams) -> Result<EventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.opened.lock().unwrap().push(FakeStream {
            process_id: process_id.to_string(),
            params,
            frames: tx,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
