//! Wire protocol for the agent session stream.
//!
//! The backend delivers newline-delimited JSON envelopes, each an object with
//! a `type` field selecting the event kind. [`StreamDecoder`] turns raw byte
//! chunks into typed [`StreamEvent`] values, tolerating frames split across
//! reads. Unknown kinds are skipped without failing the stream; envelopes
//! whose payload fails validation become generic `error` events so the
//! breakage stays visible in the transcript.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, TransportError};

// === Wire Events ===

/// Events on the agent session stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta { content: String },

    /// The agent invoked a tool.
    ToolCall {
        #[serde(default)]
        tool_call_id: Option<String>,
        tool_name: String,
        #[serde(default)]
        args: Value,
    },

    /// A tool invocation finished.
    ToolResult {
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        result: Value,
    },

    /// Backend-reported error, informational for the transcript.
    Error { message: String },

    /// A tool invocation is paused on human sign-off.
    ApprovalRequired {
        request_id: String,
        #[serde(default)]
        tool_call_id: Option<String>,
        tool_name: String,
        #[serde(default)]
        tool_args: Value,
    },

    /// An approval was resolved outside this client.
    ApprovalResolved {
        request_id: String,
        decision: Decision,
    },

    /// The agent published a plan.
    PlanCreated {
        plan_id: String,
        goal: String,
        #[serde(default)]
        steps: Vec<PlanStepSeed>,
    },

    /// A plan step changed status.
    PlanStep {
        plan_id: String,
        step_number: u32,
        status: StepStatus,
    },

    /// The plan ran to its end; terminal step statuses stay visible.
    PlanCompleted { plan_id: String },
}

/// Approver verdict for a gated tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Status of a single plan step.
///
/// Transitions are monotonic: `pending → in_progress → {completed, failed,
/// skipped}`; the three end states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Failed | Self::Skipped => 2,
        }
    }

    /// Whether a step may move from `self` to `next`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// A plan step as announced in `plan_created`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanStepSeed {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub status: StepStatus,
}

// === Frame Parsing ===

fn is_known_kind(kind: &str) -> bool {
    matches!(
        kind,
        "text_delta"
            | "tool_call"
            | "tool_result"
            | "error"
            | "approval_required"
            | "approval_resolved"
            | "plan_created"
            | "plan_step"
            | "plan_completed"
    )
}

/// Parse one newline-delimited frame.
///
/// `Err` means the frame carries nothing usable (not an envelope, or a kind
/// this client does not know). A recognized kind with an invalid payload maps
/// to `Ok(StreamEvent::Error { .. })` instead.
pub fn parse_frame(line: &str) -> Result<StreamEvent, ProtocolError> {
    let value: Value =
        serde_json::from_str(line).map_err(|_| ProtocolError::MalformedFrame)?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(ProtocolError::MalformedFrame);
    };
    if !is_known_kind(kind) {
        return Err(ProtocolError::UnknownKind(kind.to_string()));
    }

    let kind = kind.to_string();
    match serde_json::from_value::<StreamEvent>(value) {
        Ok(event) => Ok(event),
        Err(err) => {
            tracing::warn!(%kind, error = %err, "event payload failed validation");
            Ok(StreamEvent::Error {
                message: format!("Malformed `{kind}` event from backend"),
            })
        }
    }
}

// === Decoder ===

/// Incremental frame decoder over raw byte chunks.
///
/// Frames are newline-delimited; a trailing partial frame is retained and
/// prefixed to the next chunk. Bytes are only interpreted as text at frame
/// boundaries, so multi-byte characters split across reads survive intact.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: Vec<u8>,
}

impl StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk, returning every complete event it finishes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let frame: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&frame[..pos]);
            Self::push_frame(line.trim_end_matches('\r'), &mut events);
        }
        events
    }

    /// Flush a final unterminated frame at end of stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buf);
        let line = String::from_utf8_lossy(&rest);

        let mut events = Vec::new();
        Self::push_frame(line.trim_end_matches('\r'), &mut events);
        events
    }

    fn push_frame(line: &str, events: &mut Vec<StreamEvent>) {
        if line.trim().is_empty() {
            return;
        }
        match parse_frame(line) {
            Ok(event) => events.push(event),
            Err(ProtocolError::UnknownKind(kind)) => {
                tracing::debug!(%kind, "ignoring unknown event kind");
            }
            Err(ProtocolError::MalformedFrame) => {
                tracing::warn!(frame = %line, "dropping unparseable frame");
            }
        }
    }
}

/// Adapt a byte-chunk stream into a typed event stream.
///
/// Read failures end the stream with a [`TransportError`]; everything decoded
/// up to that point has already been yielded.
pub fn decode_stream<S>(
    chunks: S,
) -> impl Stream<Item = Result<StreamEvent, TransportError>>
where
    S: Stream<Item = Result<Bytes, TransportError>>,
{
    async_stream::stream! {
        let mut decoder = StreamDecoder::new();
        let mut chunks = std::pin::pin!(chunks);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.feed(&bytes) {
                        yield Ok(event);
                    }
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }

        for event in decoder.finish() {
            yield Ok(event);
        }
    }
}
