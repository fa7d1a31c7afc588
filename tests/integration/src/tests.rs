//! End-to-end tests of console sessions against a mock backend
//!
//! Every test spins up its own [`MockBackend`] on a free local port and
//! drives a real `SessionRegistry` over HTTP and server-sent events.

use console_session::{
    CommandInput, Error, LineKind, PollOutcome, ProcessStatus, SessionEvent, SessionRegistry,
    StartOptions, StartOutcome, StopMode, StopOutcome,
};
use integration_tests::*;
use serde_json::json;
use std::sync::Arc;

async fn setup() -> (MockBackend, Arc<SessionRegistry>) {
    let backend = MockBackend::spawn().await.expect("Failed to start mock backend");
    let registry = SessionRegistry::new(backend.config()).expect("Failed to build registry");
    (backend, registry)
}

fn is_output(event: &SessionEvent, text: &str) -> bool {
    matches!(event, SessionEvent::Output { line, .. } if line.text == text)
}

// ============================================================================
// Attach Tests
// ============================================================================

#[tokio::test]
async fn test_attach_replays_history_then_streams_live() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &["[Server] Loading world", "[Server] Done"]);
    let mut rx = registry.subscribe();

    let session = registry.session("mc1");
    let outcome = session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert_eq!(outcome, StartOutcome::Attached);
    assert!(backend.started_with().is_empty(), "attach must not start");

    assert!(backend.wait_for_streams(1).await);
    let query = &backend.stream_requests()[0];
    assert_eq!(query.game_id, "mc1");
    assert!(query.include_history);
    assert!(!query.restart);
    assert_eq!(query.token.as_deref(), Some(TEST_TOKEN));

    backend.emit_line("mc1", "player joined");
    wait_for(&mut rx, |e| is_output(e, "player joined"))
        .await
        .expect("Live line not delivered");

    let view = session.view().await;
    assert_eq!(view.status, ProcessStatus::Running);
    assert!(view.streaming);
    let history: Vec<&str> = view
        .lines
        .iter()
        .filter(|l| l.is_history)
        .map(|l| l.text.as_str())
        .collect();
    assert_eq!(history, vec!["[Server] Loading world", "[Server] Done"]);
    let live = view.lines.last().expect("Transcript is empty");
    assert_eq!(live.text, "player joined");
    assert!(!live.is_history);
}

#[tokio::test]
async fn test_history_replay_raises_no_output_events() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &["old line"]);
    let mut rx = registry.subscribe();

    registry
        .session("mc1")
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert!(backend.wait_for_streams(1).await);
    backend.emit_line("mc1", "new line");

    // The first Output event is the live line, never the replayed one
    let event = wait_for(&mut rx, |e| matches!(e, SessionEvent::Output { .. }))
        .await
        .expect("No output event");
    assert!(is_output(&event, "new line"));
}

#[tokio::test]
async fn test_reconnect_to_running_process_restarts_stream() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);

    let outcome = registry
        .session("mc1")
        .reconnect()
        .await
        .expect("Failed to reconnect");
    assert_eq!(outcome, StartOutcome::Attached);

    assert!(backend.wait_for_streams(1).await);
    let query = &backend.stream_requests()[0];
    assert!(query.include_history);
    assert!(query.restart);
}

#[tokio::test]
async fn test_reconnect_to_stopped_process_is_rejected() {
    let (backend, registry) = setup().await;

    let session = registry.session("mc1");
    let err = session.reconnect().await.expect_err("Reconnect should fail");
    assert!(matches!(err, Error::ReconnectNotRunning(_)));
    assert_eq!(session.status().await, ProcessStatus::Stopped);
    assert!(backend.started_with().is_empty());
    assert!(backend.stream_requests().is_empty());
}

// ============================================================================
// Start Tests
// ============================================================================

#[tokio::test]
async fn test_start_stopped_process() {
    let (backend, registry) = setup().await;

    let session = registry.session("mc1");
    let outcome = session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to start");
    assert_eq!(outcome, StartOutcome::Started);
    assert!(backend.is_running("mc1"));
    assert_eq!(session.status().await, ProcessStatus::Running);

    assert!(backend.wait_for_streams(1).await);
    let query = &backend.stream_requests()[0];
    assert!(!query.include_history);
    assert!(!query.restart);
}

#[tokio::test]
async fn test_start_with_several_scripts_asks_for_a_choice() {
    let (backend, registry) = setup().await;
    backend.set_scripts("mc1", &["start.sh", "start-modded.sh"]);
    let mut rx = registry.subscribe();

    let session = registry.session("mc1");
    let outcome = session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to start");
    assert_eq!(
        outcome,
        StartOutcome::ScriptChoiceRequired(vec![
            "start.sh".to_string(),
            "start-modded.sh".to_string()
        ])
    );
    wait_for(&mut rx, |e| matches!(e, SessionEvent::ScriptChoiceRequired { .. }))
        .await
        .expect("No script choice event");
    assert!(!backend.is_running("mc1"));
    assert!(backend.stream_requests().is_empty());

    let outcome = session
        .resolve_script("start-modded.sh")
        .await
        .expect("Failed to start with script");
    assert_eq!(outcome, StartOutcome::Started);
    assert_eq!(
        backend.started_with().last().cloned(),
        Some(("mc1".to_string(), Some("start-modded.sh".to_string())))
    );
    assert!(session.view().await.pending_script_choice.is_none());
    assert!(backend.wait_for_streams(1).await);
}

#[tokio::test]
async fn test_start_script_failure_adds_checklist() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);
    let mut rx = registry.subscribe();

    let session = registry.session("mc1");
    session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert!(backend.wait_for_streams(1).await);

    assert!(backend.emit(
        "mc1",
        json!({
            "complete": true,
            "status": "error",
            "message": "start failed",
            "error_details": "./start.sh: bad interpreter",
        })
    ));
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Error { .. }))
        .await
        .expect("No error event");

    let view = session.view().await;
    assert!(!view.streaming);
    assert!(view
        .lines
        .iter()
        .any(|l| l.text.contains("bad interpreter")));
    assert!(view
        .lines
        .iter()
        .any(|l| l.text == "The start script failed. Check:"));
}

// ============================================================================
// Stream Tests
// ============================================================================

#[tokio::test]
async fn test_prompt_frame_requests_input() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);
    let mut rx = registry.subscribe();

    registry
        .session("mc1")
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert!(backend.wait_for_streams(1).await);

    assert!(backend.emit("mc1", json!({ "heartbeat": true, "timestamp": 1.0 })));
    assert!(backend.emit("mc1", json!({ "prompt": "Accept EULA? [y/n]" })));

    let event = wait_for(&mut rx, |e| matches!(e, SessionEvent::InputRequested { .. }))
        .await
        .expect("No input request");
    assert_eq!(
        event,
        SessionEvent::InputRequested {
            process_id: "mc1".to_string(),
            prompt: "Accept EULA? [y/n]".to_string(),
        }
    );
}

#[tokio::test]
async fn test_error_frame_keeps_status_unless_not_running() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);
    let mut rx = registry.subscribe();

    let session = registry.session("mc1");
    session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert!(backend.wait_for_streams(1).await);

    assert!(backend.emit("mc1", json!({ "error": "log file rotated" })));
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Error { .. }))
        .await
        .expect("No error event");
    assert!(!session.is_streaming().await);
    assert_eq!(session.status().await, ProcessStatus::Running);
}

#[tokio::test]
async fn test_stream_timeout_frame_is_a_warning() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);
    let mut rx = registry.subscribe();

    let session = registry.session("mc1");
    session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert!(backend.wait_for_streams(1).await);

    assert!(backend.emit("mc1", json!({ "timeout": true, "message": "idle for 60s" })));
    wait_for(&mut rx, |e| matches!(e, SessionEvent::Warning { .. }))
        .await
        .expect("No warning");
    assert!(!session.is_streaming().await);
    assert_eq!(session.status().await, ProcessStatus::Running);
}

// ============================================================================
// Command Tests
// ============================================================================

#[tokio::test]
async fn test_send_command_round_trip() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);
    let mut rx = registry.subscribe();

    let session = registry.session("mc1");
    session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert!(backend.wait_for_streams(1).await);

    session
        .send_command(CommandInput::Text("say hello".to_string()))
        .await
        .expect("Failed to send command");
    assert_eq!(
        backend.inputs(),
        vec![("mc1".to_string(), "say hello".to_string())]
    );
    wait_for(&mut rx, |e| is_output(e, "echo: say hello"))
        .await
        .expect("Echo not streamed");

    let view = session.view().await;
    assert!(view
        .lines
        .iter()
        .any(|l| l.kind == LineKind::Command && l.text == "> say hello"));
    assert_eq!(session.recall_previous().await.as_deref(), Some("say hello"));
}

#[tokio::test]
async fn test_send_command_to_stopped_process() {
    let (backend, registry) = setup().await;

    let session = registry.session("mc1");
    let err = session
        .send_command(CommandInput::Text("list".to_string()))
        .await
        .expect_err("Command should be refused");
    assert!(matches!(err, Error::ProcessNotRunning(_)));
    assert!(backend.inputs().is_empty());
    assert_eq!(session.status().await, ProcessStatus::Stopped);
}

// ============================================================================
// Stop Tests
// ============================================================================

#[tokio::test]
async fn test_graceful_stop_ends_stream() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);
    let mut rx = registry.subscribe();

    let session = registry.session("mc1");
    session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert!(backend.wait_for_streams(1).await);

    let outcome = session.stop(StopMode::Graceful).await.expect("Failed to stop");
    assert_eq!(outcome, StopOutcome::Stopped);
    assert!(!backend.is_running("mc1"));

    wait_for(&mut rx, |e| matches!(e, SessionEvent::StreamClosed { .. }))
        .await
        .expect("Stream not closed");
    assert_eq!(session.status().await, ProcessStatus::Stopped);
}

#[tokio::test]
async fn test_unacknowledged_graceful_stop_offers_forced_stop() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);
    backend.ignore_graceful_stop("mc1");

    let session = registry.session("mc1");
    session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");

    let outcome = session.stop(StopMode::Graceful).await.expect("Failed to stop");
    assert!(matches!(outcome, StopOutcome::EscalationRequired { .. }));
    assert!(backend.is_running("mc1"));

    let outcome = session.stop(StopMode::Forced).await.expect("Failed to force stop");
    assert_eq!(outcome, StopOutcome::Stopped);
    assert!(!backend.is_running("mc1"));
    assert_eq!(session.status().await, ProcessStatus::Stopped);
}

// ============================================================================
// Status Tests
// ============================================================================

#[tokio::test]
async fn test_refresh_tracks_running_set() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &[]);
    let mut rx = registry.subscribe();

    let outcome = registry.refresh().await;
    assert_eq!(outcome, PollOutcome::Fetched { changed: true });
    let event = wait_for(&mut rx, |e| matches!(e, SessionEvent::RunningSetChanged { .. }))
        .await
        .expect("No running set event");
    assert_eq!(
        event,
        SessionEvent::RunningSetChanged {
            running: vec!["mc1".to_string()]
        }
    );

    backend.run("ark", &[]);
    registry.refresh().await;
    let running: Vec<String> = registry.running().await.into_iter().collect();
    assert_eq!(running, vec!["ark".to_string(), "mc1".to_string()]);
    assert!(registry.poller().is_running("ark").await);
}

#[tokio::test]
async fn test_crash_is_picked_up_by_the_poll() {
    let (backend, registry) = setup().await;
    backend.run("mc1", &["[Server] Done"]);

    let session = registry.session("mc1");
    session
        .attach_or_start(StartOptions::default())
        .await
        .expect("Failed to attach");
    assert!(backend.wait_for_streams(1).await);

    backend.crash("mc1");
    registry.refresh().await;
    assert_eq!(session.status().await, ProcessStatus::Stopped);
    assert!(!session.is_streaming().await);
}
