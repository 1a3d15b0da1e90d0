//! Updates emitted by the controller to the host UI.
//!
//! These flow over a channel so the host can re-render without polling the
//! transcript wholesale.

use crate::protocol::Decision;
use crate::transcript::{TranscriptDelta, TurnState};

/// Events emitted to the host UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// The transcript changed; the delta names the turn/part to re-render.
    Transcript(TranscriptDelta),

    /// A tool invocation is waiting on the approver. The host pulls the
    /// pending edit (if any) and locates its overlay range on demand.
    ApprovalRequested {
        request_id: String,
        tool_name: String,
    },

    /// An approval was resolved; any edit-location overlay for this request
    /// is stale and must be dropped.
    ApprovalCleared {
        request_id: String,
        decision: Decision,
    },

    /// A steering message was stored (replacing any earlier one).
    SteeringQueued { preview: String },

    /// The active turn reached a terminal state.
    TurnFinished { state: TurnState },

    /// Status line for display.
    Status { message: String },
}

impl Update {
    /// Create a new status update.
    pub fn status(message: impl Into<String>) -> Self {
        Update::Status {
            message: message.into(),
        }
    }
}
