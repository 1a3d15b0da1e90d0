//! End-to-end scenarios: decoded byte stream through the controller.

use bytes::Bytes;
use futures_util::stream;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;

use agent_panel::{
    decode_stream, Command, ControllerConfig, Decision, Part, StreamEvent, ToolStatus,
    TransportError, TurnController, TurnState, Update,
};

fn config() -> ControllerConfig {
    ControllerConfig {
        session_id: "session-7".to_string(),
        ..ControllerConfig::default()
    }
}

/// Byte chunks deliberately split mid-frame and mid-token.
fn chunked(frames: &str, step: usize) -> Vec<Result<Bytes, TransportError>> {
    frames
        .as_bytes()
        .chunks(step)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect()
}

/// An event stream fed from a channel, so tests control interleaving.
fn scripted_stream(
    capacity: usize,
) -> (
    mpsc::Sender<Result<StreamEvent, TransportError>>,
    impl futures_util::Stream<Item = Result<StreamEvent, TransportError>>,
) {
    let (tx, rx) = mpsc::channel(capacity);
    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, stream)
}

async fn wait_for(
    rx_update: &mut mpsc::Receiver<Update>,
    mut predicate: impl FnMut(&Update) -> bool,
) -> Update {
    loop {
        let update = rx_update.recv().await.expect("update channel open");
        if predicate(&update) {
            return update;
        }
    }
}

#[tokio::test]
async fn chunked_bytes_reconstruct_a_full_turn() {
    let frames = concat!(
        "{\"type\":\"text_delta\",\"content\":\"Looking at \"}\n",
        "{\"type\":\"text_delta\",\"content\":\"your bibliography.\"}\n",
        "{\"type\":\"tool_call\",\"tool_call_id\":\"c1\",\"tool_name\":\"search\",\"args\":{\"query\":\"kalman 1960\"}}\n",
        "{\"type\":\"tool_result\",\"tool_call_id\":\"c1\",\"result\":\"3 matches\"}\n",
        "{\"type\":\"text_delta\",\"content\":\"Found it.\"}\n",
    );

    for step in [1, 7, 64, frames.len()] {
        let (mut ctl, _handle, _channels) = TurnController::new(config());
        ctl.submit("check citation").await.unwrap();

        let byte_stream = stream::iter(chunked(frames, step));
        let state = ctl.run_turn(decode_stream(byte_stream)).await;
        assert_eq!(state, TurnState::Completed, "chunk step {step}");

        let turn = &ctl.transcript().turns()[1];
        assert_eq!(turn.state, TurnState::Completed);
        assert_eq!(turn.parts.len(), 3, "chunk step {step}");
        assert!(matches!(
            &turn.parts[0],
            Part::Text(text) if text.content == "Looking at your bibliography."
        ));
        assert!(matches!(
            &turn.parts[1],
            Part::Tool(call) if call.status == ToolStatus::Success
                && call.result.as_deref() == Some("3 matches")
        ));
        assert!(matches!(
            &turn.parts[2],
            Part::Text(text) if text.content == "Found it."
        ));
    }
}

#[tokio::test]
async fn approval_mid_stream_resolves_and_clears_overlay() {
    let (mut ctl, handle, channels) = TurnController::new(config());
    let mut rx_command = channels.rx_command;
    let mut rx_update = channels.rx_update;
    ctl.submit("fix the section title").await.unwrap();

    let (tx_ev, events) = scripted_stream(8);

    let driver = ctl.run_turn(events);
    let script = async {
        tx_ev
            .send(Ok(StreamEvent::ToolCall {
                tool_call_id: Some("1".to_string()),
                tool_name: "write_file".to_string(),
                args: json!({"path": "main.tex"}),
            }))
            .await
            .unwrap();
        tx_ev
            .send(Ok(StreamEvent::ApprovalRequired {
                request_id: "r1".to_string(),
                tool_call_id: None,
                tool_name: "write_file".to_string(),
                tool_args: json!({
                    "path": "main.tex",
                    "old_text": "\\section{Intro}",
                    "new_text": "\\section{Introduction}",
                }),
            }))
            .await
            .unwrap();

        wait_for(&mut rx_update, |update| {
            matches!(update, Update::ApprovalRequested { request_id, .. } if request_id == "r1")
        })
        .await;
        handle
            .resolve_approval("r1", Decision::Approve)
            .await
            .unwrap();
        wait_for(&mut rx_update, |update| {
            matches!(update, Update::ApprovalCleared { request_id, .. } if request_id == "r1")
        })
        .await;
        drop(tx_ev);
    };

    let (state, ()) = tokio::join!(driver, script);
    assert_eq!(state, TurnState::Completed);

    let turn = &ctl.transcript().turns()[1];
    assert!(matches!(
        &turn.parts[0],
        Part::Tool(call) if call.status == ToolStatus::Success
    ));
    assert_eq!(ctl.pending_edit("r1"), None);

    let mut commands = Vec::new();
    while let Ok(command) = rx_command.try_recv() {
        commands.push(command);
    }
    assert!(commands.iter().any(|command| matches!(
        command,
        Command::ResolveApproval {
            request_id,
            decision: Decision::Approve,
        } if request_id == "r1"
    )));
}

#[tokio::test(start_paused = true)]
async fn steering_mid_stream_is_sent_as_follow_up_turn() {
    let (mut ctl, handle, channels) = TurnController::new(config());
    let mut rx_command = channels.rx_command;
    let mut rx_update = channels.rx_update;
    ctl.submit("draft the abstract").await.unwrap();

    let (tx_ev, events) = scripted_stream(8);

    let driver = ctl.run_turn(events);
    let script = async {
        tx_ev
            .send(Ok(StreamEvent::TextDelta {
                content: "Working on it.".to_string(),
            }))
            .await
            .unwrap();
        handle
            .queue_steering("also mention the ablation study")
            .await
            .unwrap();
        wait_for(&mut rx_update, |update| {
            matches!(update, Update::SteeringQueued { .. })
        })
        .await;
        drop(tx_ev);
    };

    let (state, ()) = tokio::join!(driver, script);
    assert_eq!(state, TurnState::Completed);
    assert!(ctl.is_turn_active(), "queued steering opened a new turn");

    let mut submits = Vec::new();
    while let Ok(command) = rx_command.try_recv() {
        if let Command::Submit {
            text, session_id, ..
        } = command
        {
            assert_eq!(session_id, "session-7");
            submits.push(text);
        }
    }
    assert_eq!(
        submits,
        vec![
            "draft the abstract".to_string(),
            "also mention the ablation study".to_string(),
        ]
    );
}

#[tokio::test]
async fn abort_mid_stream_preserves_inflight_tool_status() {
    let (mut ctl, handle, channels) = TurnController::new(config());
    let mut rx_update = channels.rx_update;
    ctl.submit("run the build").await.unwrap();

    let (tx_ev, events) = scripted_stream(8);

    let driver = ctl.run_turn(events);
    let script = async {
        tx_ev
            .send(Ok(StreamEvent::ToolCall {
                tool_call_id: Some("1".to_string()),
                tool_name: "compile".to_string(),
                args: json!({}),
            }))
            .await
            .unwrap();
        wait_for(&mut rx_update, |update| {
            matches!(update, Update::Transcript(_))
        })
        .await;
        handle.abort();
        // Keep the stream open until the abort lands, so cancellation is
        // what ends the turn.
        wait_for(&mut rx_update, |update| {
            matches!(
                update,
                Update::TurnFinished {
                    state: TurnState::Aborted,
                }
            )
        })
        .await;
        drop(tx_ev);
    };

    let (state, ()) = tokio::join!(driver, script);
    assert_eq!(state, TurnState::Aborted);

    let turn = &ctl.transcript().turns()[1];
    assert_eq!(turn.state, TurnState::Aborted);
    assert!(matches!(
        &turn.parts[0],
        Part::Tool(call) if call.status == ToolStatus::Running
    ));
}

#[tokio::test]
async fn transport_failure_is_terminal_and_user_visible() {
    let (mut ctl, _handle, _channels) = TurnController::new(config());
    ctl.submit("anything").await.unwrap();

    let byte_stream = stream::iter(vec![
        Ok(Bytes::from_static(
            b"{\"type\":\"text_delta\",\"content\":\"so far so good\"}\n",
        )),
        Err(TransportError::Read("connection reset".to_string())),
    ]);
    let state = ctl.run_turn(decode_stream(byte_stream)).await;
    assert_eq!(state, TurnState::Errored);

    let turn = &ctl.transcript().turns()[1];
    assert_eq!(turn.state, TurnState::Errored);
    assert!(matches!(
        turn.parts.last(),
        Some(Part::Text(text)) if text.notice && text.content.contains("connection reset")
    ));

    // Not retried automatically; the user resubmits.
    assert!(ctl.submit("try again").await.is_ok());
}

#[tokio::test]
async fn unknown_and_malformed_frames_do_not_derail_the_turn() {
    let frames = concat!(
        "{\"type\":\"usage_report\",\"tokens\":512}\n",
        "this is not json\n",
        "{\"type\":\"tool_call\",\"args\":{}}\n",
        "{\"type\":\"text_delta\",\"content\":\"fine\"}\n",
    );
    let (mut ctl, _handle, _channels) = TurnController::new(config());
    ctl.submit("go").await.unwrap();

    let state = ctl
        .run_turn(decode_stream(stream::iter(chunked(frames, 16))))
        .await;
    assert_eq!(state, TurnState::Completed);

    let turn = &ctl.transcript().turns()[1];
    // The schema-invalid tool_call surfaced as an error notice, the unknown
    // kind and the junk line vanished, and the text still landed.
    assert_eq!(turn.parts.len(), 2);
    assert!(matches!(
        &turn.parts[0],
        Part::Text(text) if text.notice && text.content.contains("tool_call")
    ));
    assert!(matches!(
        &turn.parts[1],
        Part::Text(text) if text.content == "fine"
    ));
}
