//! Turn lifecycle, steering, and command routing.
//!
//! The controller owns the single-active-turn invariant. It folds the decoded
//! event stream into the transcript, routes approval traffic through the
//! gate, and talks to the host over two channels: outbound [`Command`]s for
//! the transport, and [`Update`]s for the UI.
//! Cancellation is cooperative at the transport layer
//! (token) and immediate at the state-machine layer (the turn is marked
//! aborted synchronously).

use std::pin::pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalGate;
use crate::error::{SubmitError, TransportError};
use crate::locate::{self, EditLocation};
use crate::protocol::{Decision, StreamEvent};
use crate::transcript::{Role, Transcript, TranscriptDelta, TurnState};
use crate::update::Update;

const STEER_CHANNEL_CAPACITY: usize = 64;
const APPROVAL_CHANNEL_CAPACITY: usize = 64;
const STEER_PREVIEW_CHARS: usize = 120;

// === Types ===

/// Commands sent to the host transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start a new turn.
    Submit {
        text: String,
        history: Vec<(Role, String)>,
        session_id: String,
    },

    /// Stop the in-flight turn. Signal only, no payload.
    Abort,

    /// Forward an approval decision to the backend.
    ResolveApproval {
        request_id: String,
        decision: Decision,
    },
}

/// Configuration for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Session identifier attached to every `Submit`.
    pub session_id: String,
    /// Grace period between a turn reaching a terminal state and the queued
    /// steering message being submitted, so terminal bookkeeping settles
    /// first. Bounded and short; not a correctness requirement.
    pub steer_drain_delay: Duration,
    /// Capacity of the outbound command channel.
    pub command_capacity: usize,
    /// Capacity of the UI update channel.
    pub update_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            steer_drain_delay: Duration::from_millis(150),
            command_capacity: 32,
            update_capacity: 256,
        }
    }
}

/// Receiving ends handed to the host at construction.
pub struct PanelChannels {
    /// Commands for the transport layer.
    pub rx_command: mpsc::Receiver<Command>,
    /// Updates for the UI layer.
    pub rx_update: mpsc::Receiver<Update>,
}

/// Cloneable handle for commanding the controller while a turn is being
/// driven.
#[derive(Clone)]
pub struct PanelHandle {
    cancel_token: Arc<StdMutex<CancellationToken>>,
    tx_steer: mpsc::Sender<String>,
    tx_approval: mpsc::Sender<(String, Decision)>,
}

impl PanelHandle {
    /// Signal the in-flight turn to stop.
    pub fn abort(&self) {
        match self.cancel_token.lock() {
            Ok(token) => token.cancel(),
            Err(poisoned) => poisoned.into_inner().cancel(),
        }
    }

    /// Whether the current turn has been signalled to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self.cancel_token.lock() {
            Ok(token) => token.is_cancelled(),
            Err(poisoned) => poisoned.into_inner().is_cancelled(),
        }
    }

    /// Queue a steering message for the in-flight turn.
    pub async fn queue_steering(&self, content: impl Into<String>) -> Result<()> {
        self.tx_steer.send(content.into()).await?;
        Ok(())
    }

    /// Resolve a pending approval.
    pub async fn resolve_approval(
        &self,
        request_id: impl Into<String>,
        decision: Decision,
    ) -> Result<()> {
        self.tx_approval.send((request_id.into(), decision)).await?;
        Ok(())
    }
}

// === Controller ===

/// The reconciler core: transcript, approval gate, and turn state machine.
pub struct TurnController {
    config: ControllerConfig,
    transcript: Transcript,
    gate: ApprovalGate,
    /// Exactly one steering slot; queueing twice replaces the earlier
    /// message.
    steer_slot: Option<String>,
    tx_command: mpsc::Sender<Command>,
    tx_update: mpsc::Sender<Update>,
    rx_steer: mpsc::Receiver<String>,
    rx_approval: mpsc::Receiver<(String, Decision)>,
    cancel_token: CancellationToken,
    shared_cancel_token: Arc<StdMutex<CancellationToken>>,
    handle: PanelHandle,
}

impl TurnController {
    /// Create a controller plus the handle and channel ends for the host.
    #[must_use]
    pub fn new(config: ControllerConfig) -> (Self, PanelHandle, PanelChannels) {
        let (tx_command, rx_command) = mpsc::channel(config.command_capacity);
        let (tx_update, rx_update) = mpsc::channel(config.update_capacity);
        let (tx_steer, rx_steer) = mpsc::channel(STEER_CHANNEL_CAPACITY);
        let (tx_approval, rx_approval) = mpsc::channel(APPROVAL_CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();
        let shared_cancel_token = Arc::new(StdMutex::new(cancel_token.clone()));

        let handle = PanelHandle {
            cancel_token: shared_cancel_token.clone(),
            tx_steer,
            tx_approval,
        };

        let controller = Self {
            config,
            transcript: Transcript::new(),
            gate: ApprovalGate::new(),
            steer_slot: None,
            tx_command,
            tx_update,
            rx_steer,
            rx_approval,
            cancel_token,
            shared_cancel_token,
            handle: handle.clone(),
        };

        let channels = PanelChannels {
            rx_command,
            rx_update,
        };
        (controller, handle, channels)
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub fn handle(&self) -> PanelHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn is_turn_active(&self) -> bool {
        self.transcript.active_index().is_some()
    }

    /// The pending edit for an open approval, if the tool proposed one.
    #[must_use]
    pub fn pending_edit(&self, request_id: &str) -> Option<&crate::approval::PendingEdit> {
        self.gate.pending_edit(request_id)
    }

    /// Locate the pending edit's range in the given document snapshot.
    ///
    /// Recomputed on every call; both the edit and the document change
    /// independently, so the result must never be cached.
    #[must_use]
    pub fn edit_location(&self, request_id: &str, document: &str) -> Option<EditLocation> {
        let edit = self.gate.pending_edit(request_id)?;
        locate::locate(&edit.old_text, document)
    }

    fn reset_cancel_token(&mut self) {
        let token = CancellationToken::new();
        self.cancel_token = token.clone();
        match self.shared_cancel_token.lock() {
            Ok(mut shared) => {
                *shared = token;
            }
            Err(poisoned) => {
                *poisoned.into_inner() = token;
            }
        }
    }

    // === Command Surface ===

    /// Start a new turn. Rejected while a turn is active: the caller must
    /// either abort first or queue a steering message instead.
    pub async fn submit(&mut self, text: impl Into<String>) -> Result<(), SubmitError> {
        if self.is_turn_active() {
            return Err(SubmitError::TurnActive);
        }
        self.start_turn(text.into()).await
    }

    /// Queue a follow-up while a turn is active (one slot, last-write-wins);
    /// submits immediately when idle.
    pub async fn queue_steering(&mut self, text: impl Into<String>) -> Result<(), SubmitError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Ok(());
        }
        if !self.is_turn_active() {
            return self.start_turn(text).await;
        }
        self.stash_steering(text).await;
        Ok(())
    }

    /// Abort the active turn. No-op when no turn is active.
    ///
    /// The turn is marked aborted immediately; tool calls still `running` or
    /// `waiting_approval` keep that status, since their server-side effect
    /// may already be in flight.
    pub async fn abort(&mut self) {
        if !self.is_turn_active() {
            return;
        }
        self.cancel_token.cancel();
        self.finish_turn(TurnState::Aborted).await;
    }

    /// Apply an approver decision: settle the gate, settle the tool call
    /// optimistically, tell the backend, and tell the UI to drop any edit
    /// overlay. Unknown or already-resolved requests are ignored.
    pub async fn resolve_approval(&mut self, request_id: &str, decision: Decision) {
        let Some(resolution) = self.gate.resolve(request_id, decision) else {
            tracing::debug!(request_id, "approval unknown or already resolved");
            return;
        };
        if let Some(delta) = self.transcript.resolve_tool_approval(request_id, decision) {
            let _ = self.tx_update.send(Update::Transcript(delta)).await;
        }
        let _ = self
            .tx_command
            .send(Command::ResolveApproval {
                request_id: resolution.request_id.clone(),
                decision: resolution.decision,
            })
            .await;
        // A stale overlay after resolution is a correctness bug, not a
        // cosmetic one: the host must drop it now.
        let _ = self
            .tx_update
            .send(Update::ApprovalCleared {
                request_id: resolution.request_id,
                decision,
            })
            .await;
    }

    // === Stream Driving ===

    /// Drive the active turn to a terminal state from its event stream.
    ///
    /// Processes events strictly in arrival order, interleaving steering and
    /// approval traffic from the handle. The stream ending completes the
    /// turn; a transport error marks it errored with the message appended;
    /// cancellation aborts it.
    pub async fn run_turn<S>(&mut self, stream: S) -> TurnState
    where
        S: Stream<Item = Result<StreamEvent, TransportError>>,
    {
        let mut stream = pin!(stream);
        let outcome = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break TurnState::Aborted,
                steer = self.rx_steer.recv() => {
                    if let Some(text) = steer {
                        let text = text.trim().to_string();
                        if !text.is_empty() {
                            self.stash_steering(text).await;
                        }
                    }
                }
                decision = self.rx_approval.recv() => {
                    if let Some((request_id, decision)) = decision {
                        self.resolve_approval(&request_id, decision).await;
                    }
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(err)) => {
                        let delta = self
                            .transcript
                            .append_notice(&format!("Turn failed: {err}"));
                        if delta != TranscriptDelta::Ignored {
                            let _ = self.tx_update.send(Update::Transcript(delta)).await;
                        }
                        break TurnState::Errored;
                    }
                    None => break TurnState::Completed,
                },
            }
        };
        self.finish_turn(outcome).await;
        outcome
    }

    /// Fold one stream event into transcript and gate.
    pub async fn handle_event(&mut self, event: StreamEvent) {
        match &event {
            StreamEvent::ApprovalRequired {
                request_id,
                tool_name,
                tool_args,
                ..
            } => {
                if self.gate.register(request_id, tool_name, tool_args) {
                    let _ = self
                        .tx_update
                        .send(Update::ApprovalRequested {
                            request_id: request_id.clone(),
                            tool_name: tool_name.clone(),
                        })
                        .await;
                }
            }
            StreamEvent::ApprovalResolved {
                request_id,
                decision,
            } => {
                if self.gate.resolve(request_id, *decision).is_some() {
                    let _ = self
                        .tx_update
                        .send(Update::ApprovalCleared {
                            request_id: request_id.clone(),
                            decision: *decision,
                        })
                        .await;
                }
            }
            _ => {}
        }

        let delta = self.transcript.apply(&event);
        if delta != TranscriptDelta::Ignored {
            let _ = self.tx_update.send(Update::Transcript(delta)).await;
        }
    }

    // === Internals ===

    async fn start_turn(&mut self, text: String) -> Result<(), SubmitError> {
        let history = self.transcript.history();
        self.tx_command
            .send(Command::Submit {
                text: text.clone(),
                history,
                session_id: self.config.session_id.clone(),
            })
            .await
            .map_err(|_| SubmitError::ChannelClosed)?;

        self.reset_cancel_token();
        let user = self.transcript.begin_user_turn(&text);
        let agent = self.transcript.begin_agent_turn();
        let _ = self
            .tx_update
            .send(Update::Transcript(TranscriptDelta::TurnOpened { turn: user }))
            .await;
        let _ = self
            .tx_update
            .send(Update::Transcript(TranscriptDelta::TurnOpened { turn: agent }))
            .await;
        Ok(())
    }

    async fn stash_steering(&mut self, text: String) {
        let preview = summarize(&text, STEER_PREVIEW_CHARS);
        self.steer_slot = Some(text);
        let _ = self.tx_update.send(Update::SteeringQueued { preview }).await;
    }

    async fn finish_turn(&mut self, outcome: TurnState) {
        if self.is_turn_active() {
            if outcome == TurnState::Aborted {
                let delta = self.transcript.append_notice("Interrupted by user");
                if delta != TranscriptDelta::Ignored {
                    let _ = self.tx_update.send(Update::Transcript(delta)).await;
                }
            }
            self.transcript.finalize_active(outcome);
            if outcome == TurnState::Aborted {
                let _ = self.tx_command.send(Command::Abort).await;
                let _ = self.tx_update.send(Update::status("Request cancelled")).await;
            }
            let _ = self
                .tx_update
                .send(Update::TurnFinished { state: outcome })
                .await;
        }

        // Steers that raced the end of the stream still land in the slot.
        while let Ok(text) = self.rx_steer.try_recv() {
            let text = text.trim().to_string();
            if !text.is_empty() {
                self.stash_steering(text).await;
            }
        }

        if self.steer_slot.is_some() {
            tokio::time::sleep(self.config.steer_drain_delay).await;
            if let Some(text) = self.steer_slot.take()
                && let Err(err) = self.start_turn(text).await
            {
                tracing::warn!(%err, "failed to submit queued steering message");
            }
        }
    }
}

fn summarize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}
