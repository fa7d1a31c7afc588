//! Session controller
//!
//! Per-process façade over the buffer, stream channel, poller, dispatcher
//! and lifecycle guard. It is the only owner of a session's stream handle:
//! any previous handle is closed before a new one is stored, under the same
//! state lock, so two handles are never current for one process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::output::{LineKind, OutputLine};
use crate::domain::session::{
    ProcessSession, ProcessStatus, SessionView, StartOptions, StartOutcome, StopMode, StopOutcome,
    StopPrompt,
};
use crate::domain::types::{CompletionStatus, StreamParams};
use crate::error::{Error, Result};
use crate::infra::backend::ProcessBackend;
use crate::infra::stream::StreamTransport;
use crate::service::advisory::{AdvisoryMatcher, SignatureMatcher};
use crate::service::buffer::OutputBuffer;
use crate::service::channel::{ChannelEvent, StreamChannel};
use crate::service::dispatcher::{CommandDispatcher, CommandHistory, CommandInput, DispatchOutcome};
use crate::service::events::SessionEvent;
use crate::service::guard::{LifecycleGuard, StartDecision, StartPlan, StopDecision};
use crate::service::poller::StatusPoller;

const RECONNECT_SEPARATOR: &str = "--- reconnected ---";
const NOT_RUNNING_LINE: &str = "error: the process is not running; the command was not delivered";

/// Collaborators shared by every session of a registry
pub(crate) struct SessionContext {
    pub config: Config,
    pub backend: Arc<dyn ProcessBackend>,
    pub transport: Arc<dyn StreamTransport>,
    pub poller: StatusPoller,
    pub guard: LifecycleGuard,
    pub dispatcher: CommandDispatcher,
    pub advisor: Arc<dyn AdvisoryMatcher>,
    pub not_running: SignatureMatcher,
    pub events: broadcast::Sender<SessionEvent>,
    pub shutdown: CancellationToken,
}

impl SessionContext {
    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Which check a delayed reconciliation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconcile {
    /// Plain authoritative refresh
    Refresh,
    AfterGracefulStop,
    AfterForcedStop,
    /// Graceful stop answered with a warning; escalation is already offered
    AfterStopWarning,
}

struct SessionState {
    session: ProcessSession,
    buffer: OutputBuffer,
    channel: Option<StreamChannel>,
    history: CommandHistory,
}

/// Console session of one process
pub struct SessionController {
    process_id: String,
    ctx: Arc<SessionContext>,
    state: Mutex<SessionState>,
}

impl SessionController {
    pub(crate) fn new(process_id: &str, ctx: Arc<SessionContext>) -> Self {
        let history = CommandHistory::new(ctx.config.history_limit);
        Self {
            process_id: process_id.to_string(),
            state: Mutex::new(SessionState {
                session: ProcessSession::new(process_id),
                buffer: OutputBuffer::new(),
                channel: None,
                history,
            }),
            ctx,
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Snapshot for rendering
    pub async fn view(&self) -> SessionView {
        let state = self.state.lock().await;
        SessionView {
            process_id: self.process_id.clone(),
            status: state.session.status,
            lines: state.buffer.lines().to_vec(),
            replay_from: state.buffer.replay_from(),
            pending_script_choice: state.session.pending_script_choice.clone(),
            streaming: state.channel.is_some(),
            last_activity_at: state.session.last_activity_at,
        }
    }

    pub async fn status(&self) -> ProcessStatus {
        self.state.lock().await.session.status
    }

    pub async fn is_streaming(&self) -> bool {
        self.state.lock().await.channel.is_some()
    }

    /// Id of the open stream, if any
    pub async fn channel_id(&self) -> Option<Uuid> {
        self.state.lock().await.channel.as_ref().map(StreamChannel::id)
    }

    /// Confirmation text offering both stop modes
    pub fn stop_prompt(&self) -> StopPrompt {
        StopPrompt::new(&self.process_id)
    }

    /// Attach to a running process or start it
    pub async fn attach_or_start(self: &Arc<Self>, opts: StartOptions) -> Result<StartOutcome> {
        self.ctx.guard.ensure_not_starting(&self.process_id)?;
        let _lock = self.ctx.guard.acquire(&self.process_id).await;

        let running = self.ctx.poller.query(&self.process_id).await?.is_running();
        match LifecycleGuard::plan_start(running, &opts) {
            StartPlan::RejectReconnect => {
                let err = Error::ReconnectNotRunning(self.process_id.clone());
                warn!("{}", err);
                let mut state = self.state.lock().await;
                self.set_status(&mut state, ProcessStatus::Stopped);
                state.buffer.push(OutputLine::notice(err.to_string()));
                self.emit_warning(err.to_string());
                Err(err)
            }
            StartPlan::Attach { reconnect } => {
                info!(
                    "Attaching to running process {} (reconnect: {})",
                    self.process_id, reconnect
                );
                {
                    let mut state = self.state.lock().await;
                    state.session.pending_script_choice = None;
                    self.set_status(&mut state, ProcessStatus::Running);
                    let marker = if reconnect {
                        OutputLine::separator(RECONNECT_SEPARATOR)
                    } else {
                        OutputLine::notice("process already running, attaching")
                    };
                    state.buffer.begin_replay(Some(marker));
                }
                self.open_channel(StreamParams {
                    include_history: true,
                    restart: reconnect,
                })
                .await?;
                Ok(StartOutcome::Attached)
            }
            StartPlan::RemoteStart => self.remote_start(opts.script_name).await,
        }
    }

    /// Re-attach to a running process; never starts a stopped one
    pub async fn reconnect(self: &Arc<Self>) -> Result<StartOutcome> {
        self.attach_or_start(StartOptions::reconnect()).await
    }

    /// Start with one of the scripts the backend offered
    pub async fn resolve_script(self: &Arc<Self>, script_name: &str) -> Result<StartOutcome> {
        {
            let state = self.state.lock().await;
            match &state.session.pending_script_choice {
                Some(scripts) if scripts.iter().any(|s| s == script_name) => {}
                Some(_) => {
                    return Err(Error::InvalidParameter(format!(
                        "{} is not one of the offered start scripts",
                        script_name
                    )))
                }
                None => {
                    return Err(Error::InvalidParameter(
                        "no start script choice is pending".to_string(),
                    ))
                }
            }
        }
        self.attach_or_start(StartOptions::with_script(script_name))
            .await
    }

    async fn remote_start(self: &Arc<Self>, script_name: Option<String>) -> Result<StartOutcome> {
        let id = self.process_id.as_str();
        let _ticket = self.ctx.guard.begin_start(id);
        info!("Starting {} (script: {:?})", id, script_name);

        {
            let mut state = self.state.lock().await;
            self.set_status(&mut state, ProcessStatus::Starting);
        }

        let reply = match self.ctx.backend.start(id, script_name.clone(), false).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Start request for {} failed: {}", id, e);
                let mut state = self.state.lock().await;
                self.set_status(&mut state, ProcessStatus::Stopped);
                state.buffer.push(OutputLine::error(format!("start failed: {}", e)));
                self.emit_error(e.to_string());
                return Err(e);
            }
        };

        match LifecycleGuard::classify_start(reply) {
            StartDecision::Started => {
                {
                    let mut state = self.state.lock().await;
                    state.session.pending_script_choice = None;
                    self.set_status(&mut state, ProcessStatus::Running);
                    let notice = match &script_name {
                        Some(script) => format!("process started with {}", script),
                        None => "process started".to_string(),
                    };
                    state.buffer.push(OutputLine::notice(notice));
                }
                self.ctx.poller.mark_running(id).await;
                self.open_channel(StreamParams::default()).await?;
                self.schedule_reconcile(self.ctx.config.start_settle(), Reconcile::Refresh);
                Ok(StartOutcome::Started)
            }
            StartDecision::ChooseScript(scripts) => {
                info!("{} has several start scripts: {:?}", id, scripts);
                let mut state = self.state.lock().await;
                self.set_status(&mut state, ProcessStatus::Stopped);
                state.session.pending_script_choice = Some(scripts.clone());
                self.ctx.emit(SessionEvent::ScriptChoiceRequired {
                    process_id: self.process_id.clone(),
                    scripts: scripts.clone(),
                });
                Ok(StartOutcome::ScriptChoiceRequired(scripts))
            }
            StartDecision::Failed(message) => {
                warn!("Start of {} failed: {}", id, message);
                let mut state = self.state.lock().await;
                self.set_status(&mut state, ProcessStatus::Stopped);
                state.buffer.push(OutputLine::error(format!("error: {}", message)));
                self.push_advice(&mut state, &message, None);
                self.emit_error(message.clone());
                Err(Error::StartFailed(message))
            }
        }
    }

    /// Stop the process
    pub async fn stop(self: &Arc<Self>, mode: StopMode) -> Result<StopOutcome> {
        let id = self.process_id.as_str();
        let _lock = self.ctx.guard.acquire(id).await;
        info!("Stopping {} ({})", id, mode.as_str());

        let previous = {
            let mut state = self.state.lock().await;
            let previous = state.session.status;
            self.set_status(&mut state, ProcessStatus::Stopping);
            previous
        };

        if let (StopMode::Graceful, Some(command)) = (mode, &self.ctx.config.graceful_stop_command)
        {
            match self.ctx.dispatcher.dispatch(id, command).await {
                Ok(DispatchOutcome::Sent) => {
                    self.state.lock().await.buffer.push(OutputLine::command(command));
                }
                Ok(DispatchOutcome::NotRunning { .. }) => {
                    debug!("Pre-stop command skipped, {} not running", id)
                }
                Err(e) => debug!("Pre-stop command to {} failed: {}", id, e),
            }
        }

        let reply = self.ctx.backend.stop(id, mode.is_forced()).await;
        match LifecycleGuard::classify_stop(mode, reply, &self.ctx.not_running) {
            StopDecision::Stopped { message } => {
                {
                    let mut state = self.state.lock().await;
                    self.set_status(&mut state, ProcessStatus::Stopped);
                    let notice = message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| format!("{} stop requested", mode.as_str()));
                    state.buffer.push(OutputLine::notice(notice));
                }
                self.ctx.poller.mark_stopped(id).await;
                let check = match mode {
                    StopMode::Graceful => Reconcile::AfterGracefulStop,
                    StopMode::Forced => Reconcile::AfterForcedStop,
                };
                self.schedule_reconcile(self.ctx.config.reconcile_delay(), check);
                Ok(StopOutcome::Stopped)
            }
            StopDecision::Escalate { message } => {
                warn!("Graceful stop of {} not acknowledged: {}", id, message);
                {
                    let mut state = self.state.lock().await;
                    state.buffer.push(OutputLine::notice(message.clone()));
                }
                self.ctx.emit(SessionEvent::EscalationSuggested {
                    process_id: self.process_id.clone(),
                    message: message.clone(),
                });
                self.schedule_reconcile(
                    self.ctx.config.reconcile_delay(),
                    Reconcile::AfterStopWarning,
                );
                Ok(StopOutcome::EscalationRequired { message })
            }
            StopDecision::Failed(err) => {
                warn!("Stop of {} failed: {}", id, err);
                let mut state = self.state.lock().await;
                self.set_status(&mut state, previous);
                state.buffer.push(OutputLine::error(format!("stop failed: {}", err)));
                self.emit_error(err.to_string());
                Err(err)
            }
        }
    }

    /// Send console input
    pub async fn send_command(&self, input: CommandInput) -> Result<()> {
        let value = CommandDispatcher::prepare(&input)?;
        let id = self.process_id.as_str();
        let _lock = self.ctx.guard.acquire(id).await;

        {
            let mut state = self.state.lock().await;
            state.buffer.push(OutputLine::command(&value));
            if let CommandInput::Text(_) = input {
                state.history.push(value.clone());
            }
            state.history.reset();
        }

        match self.ctx.dispatcher.dispatch(id, &value).await {
            Ok(DispatchOutcome::Sent) => Ok(()),
            Ok(DispatchOutcome::NotRunning { message }) => {
                self.ctx.poller.mark_stopped(id).await;
                let mut state = self.state.lock().await;
                self.set_status(&mut state, ProcessStatus::Stopped);
                state.buffer.push(OutputLine::error(NOT_RUNNING_LINE));
                let err = Error::ProcessNotRunning(self.process_id.clone());
                debug!("Backend said: {}", message);
                self.emit_warning(err.to_string());
                Err(err)
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.buffer.push(OutputLine::error(format!("command failed: {}", e)));
                self.emit_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Older command from history
    pub async fn recall_previous(&self) -> Option<String> {
        self.state.lock().await.history.previous().map(str::to_string)
    }

    /// Newer command from history; `None` past the newest
    pub async fn recall_next(&self) -> Option<String> {
        self.state.lock().await.history.next().map(str::to_string)
    }

    /// Sent commands, oldest first
    pub async fn history(&self) -> Vec<String> {
        self.state.lock().await.history.entries()
    }

    /// Drop the transcript
    pub async fn clear_output(&self) {
        let removed = self.state.lock().await.buffer.clear();
        debug!("Cleared {} lines of {}", removed, self.process_id);
        self.ctx.emit(SessionEvent::OutputCleared {
            process_id: self.process_id.clone(),
        });
    }

    /// Close the stream without touching the remote process
    pub async fn detach(&self) {
        let mut state = self.state.lock().await;
        self.close_channel(&mut state);
    }

    /// Reconcile with the poller's current view; skipped while an operation holds the guard
    ///
    /// The view is read under the guard, so a start or stop that finished
    /// after the batch reply arrived is already part of it.
    pub(crate) async fn sync_with_poller(&self) -> bool {
        let Some(_lock) = self.ctx.guard.try_acquire(&self.process_id) else {
            debug!("Reconcile of {} skipped, operation in flight", self.process_id);
            return false;
        };
        let running = self.ctx.poller.is_running(&self.process_id).await;
        let mut state = self.state.lock().await;
        self.apply_authoritative(&mut state, running);
        true
    }

    async fn open_channel(self: &Arc<Self>, params: StreamParams) -> Result<()> {
        let mut state = self.state.lock().await;
        self.close_channel(&mut state);

        let opened = StreamChannel::open(
            self.ctx.transport.as_ref(),
            &self.process_id,
            params,
            self.ctx.config.idle_timeout(),
        )
        .await;
        let (channel, events) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Opening stream for {} failed: {}", self.process_id, e);
                state.buffer.push(OutputLine::error(format!("stream failed: {}", e)));
                self.emit_error(e.to_string());
                return Err(e);
            }
        };

        let channel_id = channel.id();
        state.channel = Some(channel);
        drop(state);

        tokio::spawn(Arc::clone(self).pump(channel_id, events));
        Ok(())
    }

    async fn pump(
        self: Arc<Self>,
        channel_id: Uuid,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        while let Some(event) = events.recv().await {
            self.apply_channel_event(channel_id, event).await;
        }
    }

    async fn apply_channel_event(self: &Arc<Self>, channel_id: Uuid, event: ChannelEvent) {
        let mut state = self.state.lock().await;
        if state.channel.as_ref().map(StreamChannel::id) != Some(channel_id) {
            debug!("Dropping event of stale stream {}", channel_id);
            return;
        }
        state.session.touch();

        match event {
            ChannelEvent::Line(line) => {
                let live = !line.is_history;
                if live && line.kind == LineKind::Prompt {
                    self.ctx.emit(SessionEvent::InputRequested {
                        process_id: self.process_id.clone(),
                        prompt: line.text.clone(),
                    });
                }
                if live {
                    self.ctx.emit(SessionEvent::Output {
                        process_id: self.process_id.clone(),
                        line: line.clone(),
                    });
                }
                state.buffer.push(line);
            }
            ChannelEvent::Heartbeat { .. } => {}
            ChannelEvent::Timeout { message } => {
                self.close_channel(&mut state);
                state
                    .buffer
                    .push(OutputLine::notice(format!("connection timed out: {}", message)));
                self.emit_warning(format!("connection timed out: {}", message));
            }
            ChannelEvent::Error { message } => {
                self.close_channel(&mut state);
                state.buffer.push(OutputLine::error(format!("error: {}", message)));
                if self.ctx.not_running.matches(&message) {
                    self.set_status(&mut state, ProcessStatus::Stopped);
                    self.ctx.poller.mark_stopped(&self.process_id).await;
                }
                self.emit_error(message);
            }
            ChannelEvent::Complete {
                status: CompletionStatus::Error,
                message,
                error_details,
            } => {
                self.close_channel(&mut state);
                let message = message.unwrap_or_else(|| "process exited with an error".to_string());
                state.buffer.push(OutputLine::error(format!("error: {}", message)));
                if let Some(details) = &error_details {
                    state.buffer.push(OutputLine::error(details.clone()));
                }
                self.push_advice(&mut state, &message, error_details.as_deref());
                self.emit_error(message);
                self.schedule_reconcile(self.ctx.config.reconcile_delay(), Reconcile::Refresh);
            }
            ChannelEvent::Complete { status, message, .. } => {
                self.close_channel(&mut state);
                let message = message.unwrap_or_else(|| match status {
                    CompletionStatus::Terminated => "process terminated".to_string(),
                    _ => "process finished".to_string(),
                });
                state.buffer.push(OutputLine::notice(message));
                self.schedule_reconcile(self.ctx.config.reconcile_delay(), Reconcile::Refresh);
            }
            ChannelEvent::Disconnected { reason } => {
                self.close_channel(&mut state);
                state
                    .buffer
                    .push(OutputLine::notice(format!("connection lost: {}", reason)));
                self.emit_warning("connection lost".to_string());
            }
        }
    }

    fn schedule_reconcile(self: &Arc<Self>, delay: Duration, check: Reconcile) {
        let controller = Arc::clone(self);
        let shutdown = self.ctx.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Err(e) = controller.reconcile(check).await {
                debug!("Reconcile of {} failed: {}", controller.process_id, e);
            }
        });
    }

    async fn reconcile(&self, check: Reconcile) -> Result<()> {
        let _lock = self.ctx.guard.acquire(&self.process_id).await;
        let running = self.ctx.poller.query(&self.process_id).await?.is_running();
        let mut state = self.state.lock().await;

        match check {
            Reconcile::AfterForcedStop if running => {
                warn!("{} still running after a forced stop", self.process_id);
                self.set_status(&mut state, ProcessStatus::Running);
                state.buffer.push(OutputLine::error(
                    "the process is still running after a forced stop; stop it again",
                ));
                self.ctx.emit(SessionEvent::ForceStopIneffective {
                    process_id: self.process_id.clone(),
                });
            }
            Reconcile::AfterGracefulStop if running => {
                info!("{} still running after a graceful stop", self.process_id);
                self.set_status(&mut state, ProcessStatus::Stopping);
                self.ctx.emit(SessionEvent::EscalationSuggested {
                    process_id: self.process_id.clone(),
                    message: "the process is still running; a forced stop is available"
                        .to_string(),
                });
            }
            Reconcile::AfterStopWarning if running => {
                debug!("{} still running, escalation pending", self.process_id);
            }
            _ => self.apply_authoritative(&mut state, running),
        }
        Ok(())
    }

    fn apply_authoritative(&self, state: &mut MutexGuard<'_, SessionState>, running: bool) {
        let next = match (running, state.session.status) {
            (true, ProcessStatus::Running) | (false, ProcessStatus::Stopped) => return,
            (true, _) => ProcessStatus::Running,
            (false, _) => ProcessStatus::Stopped,
        };
        self.set_status(state, next);
    }

    /// Set the status; a status that cannot own a stream closes it
    fn set_status(&self, state: &mut MutexGuard<'_, SessionState>, status: ProcessStatus) {
        if !status.allows_stream() {
            self.close_channel(state);
        }
        let previous = state.session.status;
        if state.session.set_status(status) {
            info!(
                "{}: {} -> {}",
                self.process_id,
                previous.as_str(),
                status.as_str()
            );
            self.ctx.emit(SessionEvent::StatusChanged {
                process_id: self.process_id.clone(),
                status,
            });
        }
    }

    fn close_channel(&self, state: &mut MutexGuard<'_, SessionState>) {
        if let Some(channel) = state.channel.take() {
            channel.close();
            self.ctx.emit(SessionEvent::StreamClosed {
                process_id: self.process_id.clone(),
            });
        }
    }

    fn push_advice(
        &self,
        state: &mut MutexGuard<'_, SessionState>,
        message: &str,
        details: Option<&str>,
    ) {
        if let Some(lines) = self.ctx.advisor.advise(message, details) {
            for line in lines {
                state.buffer.push(OutputLine::notice(line));
            }
        }
    }

    fn emit_warning(&self, message: String) {
        self.ctx.emit(SessionEvent::Warning {
            process_id: self.process_id.clone(),
            message,
        });
    }

    fn emit_error(&self, message: String) {
        self.ctx.emit(SessionEvent::Error {
            process_id: self.process_id.clone(),
            message,
        });
    }
}
