//! Status poller
//!
//! The poller is the one authoritative source of "what is actually running".
//! Batch polls go through a min-interval gate whose floor rises while
//! anything is running; single-process queries used by lifecycle
//! reconciliation bypass the gate. A failed or timed out poll keeps the
//! previous snapshot.
//!
//! Queries and local lifecycle marks are newer than any batch reply issued
//! before them. Such an entry outranks batch replies issued less than
//! `snapshot_grace` after it was recorded, since the backend may serve the
//! batch from a cache.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::types::RunState;
use crate::error::{Error, Result};
use crate::infra::backend::ProcessBackend;
use crate::service::events::SessionEvent;

/// Lower bound of the status loop period
const MIN_LOOP_DELAY: Duration = Duration::from_millis(100);

/// Min-interval gate with an adaptive floor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Always enforced
    pub floor: Duration,
    /// Enforced while any process is running
    pub busy_floor: Duration,
    /// How long a local observation outranks batch replies
    pub snapshot_grace: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            floor: Duration::from_secs(config.poll_floor),
            busy_floor: Duration::from_secs(config.poll_busy_floor),
            snapshot_grace: config.snapshot_grace(),
        }
    }

    pub fn min_interval(&self, any_running: bool) -> Duration {
        if any_running {
            self.floor.max(self.busy_floor)
        } else {
            self.floor
        }
    }

    pub fn is_due(&self, last_poll_at: Option<Instant>, now: Instant, any_running: bool) -> bool {
        match last_poll_at {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval(any_running),
            None => true,
        }
    }
}

/// Authoritative run states keyed by process id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStateSnapshot {
    states: HashMap<String, RunState>,
}

impl RunStateSnapshot {
    pub fn get(&self, process_id: &str) -> Option<&RunState> {
        self.states.get(process_id)
    }

    pub fn is_running(&self, process_id: &str) -> bool {
        self.states
            .get(process_id)
            .is_some_and(|state| state.is_running())
    }

    pub fn any_running(&self) -> bool {
        self.states.values().any(|state| state.is_running())
    }

    /// Ids of running processes, ordered
    pub fn running_ids(&self) -> BTreeSet<String> {
        self.states
            .iter()
            .filter(|(_, state)| state.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// What a `poll` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Fetched { changed: bool },
    /// Inside the min interval or another poll in flight; cached snapshot
    Skipped,
    /// Request failed; previous snapshot kept
    Failed,
}

struct PollState {
    last_poll_at: Option<Instant>,
    snapshot: RunStateSnapshot,
    /// When each process was last observed outside a batch poll
    observed_at: HashMap<String, Instant>,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Rate-limited puller of authoritative run state
pub struct StatusPoller {
    backend: Arc<dyn ProcessBackend>,
    policy: PollPolicy,
    request_timeout: Duration,
    state: RwLock<PollState>,
    in_flight: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn ProcessBackend>,
        policy: PollPolicy,
        request_timeout: Duration,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            backend,
            policy,
            request_timeout,
            state: RwLock::new(PollState {
                last_poll_at: None,
                snapshot: RunStateSnapshot::default(),
                observed_at: HashMap::new(),
            }),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Poll every process unless the gate says it is too early
    pub async fn poll(&self) -> (RunStateSnapshot, PollOutcome) {
        let now = Instant::now();
        {
            let mut state = self.state.write().await;
            let any_running = state.snapshot.any_running();
            if !self.policy.is_due(state.last_poll_at, now, any_running) {
                debug!("Status poll skipped (min interval)");
                return (state.snapshot.clone(), PollOutcome::Skipped);
            }
            if self.in_flight.swap(true, Ordering::SeqCst) {
                debug!("Status poll skipped (in flight)");
                return (state.snapshot.clone(), PollOutcome::Skipped);
            }
            state.last_poll_at = Some(now);
        }
        let _in_flight = InFlight(&self.in_flight);

        let states = match timeout(self.request_timeout, self.backend.status_all()).await {
            Ok(Ok(states)) => states,
            Ok(Err(e)) => {
                warn!("Status poll failed: {}", e);
                return (self.snapshot().await, PollOutcome::Failed);
            }
            Err(_) => {
                warn!(
                    "Status poll timed out after {}s",
                    self.request_timeout.as_secs()
                );
                return (self.snapshot().await, PollOutcome::Failed);
            }
        };

        let mut state = self.state.write().await;
        let before = state.snapshot.running_ids();
        let fetched = self.merge_observed(&mut state, now, RunStateSnapshot { states });
        state.snapshot = fetched;
        let after = state.snapshot.running_ids();
        let changed = before != after;
        if changed {
            self.notify(after);
        }
        (state.snapshot.clone(), PollOutcome::Fetched { changed })
    }

    /// Query one process, bypassing the gate
    pub async fn query(&self, process_id: &str) -> Result<RunState> {
        let run_state = timeout(self.request_timeout, self.backend.status(process_id))
            .await
            .map_err(|_| Error::RequestTimeout)??;
        self.record(process_id, run_state.clone()).await;
        Ok(run_state)
    }

    pub async fn snapshot(&self) -> RunStateSnapshot {
        self.state.read().await.snapshot.clone()
    }

    pub async fn is_running(&self, process_id: &str) -> bool {
        self.state.read().await.snapshot.is_running(process_id)
    }

    /// Time until the gate opens again
    pub async fn next_delay(&self) -> Duration {
        let state = self.state.read().await;
        let interval = self.policy.min_interval(state.snapshot.any_running());
        let delay = match state.last_poll_at {
            Some(last) => interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        delay.max(MIN_LOOP_DELAY)
    }

    pub(crate) async fn mark_running(&self, process_id: &str) {
        let mut state = self.state.write().await;
        if state.snapshot.is_running(process_id) {
            state.observed_at.insert(process_id.to_string(), Instant::now());
            return;
        }
        self.apply(&mut state, process_id, RunState::running());
    }

    pub(crate) async fn mark_stopped(&self, process_id: &str) {
        let mut state = self.state.write().await;
        if !state.snapshot.is_running(process_id) {
            state.observed_at.insert(process_id.to_string(), Instant::now());
            return;
        }
        self.apply(&mut state, process_id, RunState::stopped());
    }

    /// Keep local observations a batch reply issued at `issued_at` cannot have seen
    fn merge_observed(
        &self,
        state: &mut PollState,
        issued_at: Instant,
        mut fetched: RunStateSnapshot,
    ) -> RunStateSnapshot {
        let grace = self.policy.snapshot_grace;
        let previous = &state.snapshot;
        state.observed_at.retain(|process_id, observed_at| {
            if issued_at >= *observed_at + grace {
                return false;
            }
            match previous.states.get(process_id) {
                Some(local) => {
                    fetched.states.insert(process_id.clone(), local.clone());
                }
                None => {
                    fetched.states.remove(process_id);
                }
            }
            debug!("Batch status for {} predates a local observation", process_id);
            true
        });
        fetched
    }

    async fn record(&self, process_id: &str, run_state: RunState) {
        let mut state = self.state.write().await;
        self.apply(&mut state, process_id, run_state);
    }

    fn apply(&self, state: &mut PollState, process_id: &str, run_state: RunState) {
        state.observed_at.insert(process_id.to_string(), Instant::now());
        let before = state.snapshot.running_ids();
        if run_state.is_running() {
            state.snapshot.states.insert(process_id.to_string(), run_state);
        } else {
            state.snapshot.states.remove(process_id);
        }
        let after = state.snapshot.running_ids();
        if before != after {
            self.notify(after);
        }
    }

    fn notify(&self, running: BTreeSet<String>) {
        info!("Running set changed: {:?}", running);
        let _ = self.events.send(SessionEvent::RunningSetChanged {
            running: running.into_iter().collect(),
        });
    }
}
