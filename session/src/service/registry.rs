//! Session registry
//!
//! Process-wide owner of every console session. UI components look sessions
//! up by id and subscribe to the event bus instead of sharing mutable state.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future;
use futures::stream::{Stream, StreamExt};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::infra::backend::{HttpBackend, ProcessBackend};
use crate::infra::stream::{SseTransport, StreamTransport};
use crate::service::advisory::{AdvisoryMatcher, SignatureMatcher, StartFailureAdvisor};
use crate::service::controller::{SessionContext, SessionController};
use crate::service::dispatcher::CommandDispatcher;
use crate::service::events::{SessionEvent, EVENT_BUS_CAPACITY};
use crate::service::guard::LifecycleGuard;
use crate::service::poller::{PollOutcome, PollPolicy, StatusPoller};

/// Registry of console sessions keyed by process id
pub struct SessionRegistry {
    ctx: Arc<SessionContext>,
    sessions: DashMap<String, Arc<SessionController>>,
    active: RwLock<Option<String>>,
}

impl SessionRegistry {
    /// Registry talking to the configured backend over HTTP and SSE
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let backend: Arc<dyn ProcessBackend> = Arc::new(HttpBackend::new(&config)?);
        let transport: Arc<dyn StreamTransport> = Arc::new(SseTransport::new(&config));
        Ok(Self::with_parts(config, backend, transport))
    }

    /// Registry over custom collaborators with the default start-failure advisor
    pub fn with_parts(
        config: Config,
        backend: Arc<dyn ProcessBackend>,
        transport: Arc<dyn StreamTransport>,
    ) -> Arc<Self> {
        let advisor = Arc::new(StartFailureAdvisor::new(&config.start_failure_markers));
        Self::with_advisor(config, backend, transport, advisor)
    }

    pub fn with_advisor(
        config: Config,
        backend: Arc<dyn ProcessBackend>,
        transport: Arc<dyn StreamTransport>,
        advisor: Arc<dyn AdvisoryMatcher>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let not_running = SignatureMatcher::new(&config.not_running_markers);
        let poller = StatusPoller::new(
            Arc::clone(&backend),
            PollPolicy::from_config(&config),
            config.status_timeout(),
            events.clone(),
        );
        let dispatcher = CommandDispatcher::new(Arc::clone(&backend), not_running.clone());

        let ctx = SessionContext {
            config,
            backend,
            transport,
            poller,
            guard: LifecycleGuard::new(),
            dispatcher,
            advisor,
            not_running,
            events,
            shutdown: CancellationToken::new(),
        };

        Arc::new(Self {
            ctx: Arc::new(ctx),
            sessions: DashMap::new(),
            active: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.ctx.poller
    }

    /// Every event of every session
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.ctx.events.subscribe()
    }

    /// Events concerning one process
    pub fn subscribe_to(&self, process_id: &str) -> impl Stream<Item = SessionEvent> + Send + 'static {
        let process_id = process_id.to_string();
        BroadcastStream::new(self.subscribe()).filter_map(move |item| {
            future::ready(match item {
                Ok(event) if event.process_id() == Some(process_id.as_str()) => Some(event),
                _ => None,
            })
        })
    }

    /// Get or create the session of `process_id`
    pub fn session(&self, process_id: &str) -> Arc<SessionController> {
        self.sessions
            .entry(process_id.to_string())
            .or_insert_with(|| {
                debug!("Creating session for {}", process_id);
                Arc::new(SessionController::new(process_id, Arc::clone(&self.ctx)))
            })
            .clone()
    }

    pub fn get(&self, process_id: &str) -> Option<Arc<SessionController>> {
        self.sessions.get(process_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Destroy a session, closing its stream; the remote process is untouched
    pub async fn remove(&self, process_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(process_id) else {
            return false;
        };
        session.detach().await;
        self.ctx.guard.forget(process_id);

        let mut active = self.active.write().await;
        if active.as_deref() == Some(process_id) {
            *active = None;
        }
        info!("Session {} removed", process_id);
        true
    }

    /// Ids of all sessions, ordered
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Authoritative running set as last observed
    pub async fn running(&self) -> BTreeSet<String> {
        self.ctx.poller.snapshot().await.running_ids()
    }

    /// Poll and reconcile every idle session with the result
    pub async fn refresh(&self) -> PollOutcome {
        let (_, outcome) = self.ctx.poller.poll().await;
        if let PollOutcome::Fetched { .. } = outcome {
            let sessions: Vec<Arc<SessionController>> =
                self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
            for session in sessions {
                session.sync_with_poller().await;
            }
        }
        outcome
    }

    /// Route keyboard focus to a session and refresh status
    pub async fn focus(&self, process_id: Option<&str>) -> PollOutcome {
        {
            let mut active = self.active.write().await;
            if active.as_deref() != process_id {
                *active = process_id.map(str::to_string);
                self.ctx.emit(SessionEvent::FocusChanged {
                    process_id: process_id.map(str::to_string),
                });
            }
        }
        self.refresh().await
    }

    pub async fn active(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Poll on the adaptive timer until shutdown; the first poll is immediate
    pub fn spawn_status_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let shutdown = self.ctx.shutdown.clone();
        tokio::spawn(async move {
            info!("Status loop started");
            loop {
                registry.refresh().await;
                let delay = registry.ctx.poller.next_delay().await;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            info!("Status loop stopped");
        })
    }

    /// Stop background tasks and close every stream
    pub async fn shutdown(&self) {
        self.ctx.shutdown.cancel();
        let sessions: Vec<Arc<SessionController>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for session in sessions {
            session.detach().await;
        }
        info!("Session registry shut down");
    }
}
