//! Client-side reconciliation core for an IDE's AI agent panel.
//!
//! The backend streams an agent turn as newline-delimited events; this crate
//! reconstructs an ordered transcript from them, correlates tool results
//! with the invocations they complete, gates file mutations behind human
//! approval, and keeps the located edit range consistent with the approval
//! outcome. Transport, rendering, and tool execution live with the host.
//!
//! Typical wiring:
//!
//! ```no_run
//! use agent_panel::{decode_stream, ControllerConfig, TurnController};
//!
//! # async fn wire(byte_stream: impl futures_util::Stream<Item = Result<bytes::Bytes, agent_panel::TransportError>>) {
//! let (mut controller, handle, channels) = TurnController::new(ControllerConfig::default());
//! // Forward `channels.rx_command` to the transport and `channels.rx_update`
//! // to the UI; hand `handle` to the input layer for abort/steer/approve.
//! controller.submit("tighten the introduction").await.unwrap();
//! let state = controller.run_turn(decode_stream(byte_stream)).await;
//! # let _ = state;
//! # }
//! ```

pub mod approval;
pub mod controller;
pub mod correlate;
pub mod error;
pub mod locate;
pub mod protocol;
pub mod transcript;
pub mod update;

pub use approval::{ApprovalGate, PendingEdit, Resolution};
pub use controller::{Command, ControllerConfig, PanelChannels, PanelHandle, TurnController};
pub use error::{ProtocolError, SubmitError, TransportError};
pub use locate::{locate, EditLocation};
pub use protocol::{decode_stream, Decision, StepStatus, StreamDecoder, StreamEvent};
pub use transcript::{
    Part, Plan, PlanStep, Role, TextPart, ToolCall, ToolStatus, Transcript, TranscriptDelta, Turn,
    TurnState,
};
pub use update::Update;
