//! Human-in-the-loop approval gate.
//!
//! Each `approval_required` event opens a per-request state machine
//! `requested → {approved, rejected}`. Transitions fire only via an explicit
//! external decision; there is no timeout at this layer. For file-mutation
//! tools the gate also owns the proposed [`PendingEdit`] until the request is
//! resolved, after which the edit is discarded.

use std::path::PathBuf;

use serde_json::Value;

pub use crate::protocol::Decision;

/// A proposed text replacement awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub request_id: String,
    pub target_path: PathBuf,
    pub old_text: String,
    pub new_text: String,
}

/// Outcome handed back when a request is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub request_id: String,
    pub decision: Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Requested,
    Approved,
    Rejected,
}

#[derive(Debug)]
struct Request {
    request_id: String,
    tool_name: String,
    edit: Option<PendingEdit>,
    state: GateState,
}

/// Tools whose effect is a file mutation and therefore carries a pending
/// edit alongside the approval request.
#[must_use]
pub fn is_file_mutation_tool(name: &str) -> bool {
    matches!(name, "write_file" | "edit_file" | "apply_patch")
}

fn edit_from_args(request_id: &str, args: &Value) -> Option<PendingEdit> {
    let path = args.get("path").and_then(Value::as_str)?;
    let old_text = args
        .get("old_text")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let new_text = args
        .get("new_text")
        .or_else(|| args.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(PendingEdit {
        request_id: request_id.to_string(),
        target_path: PathBuf::from(path),
        old_text: old_text.to_string(),
        new_text: new_text.to_string(),
    })
}

/// The approval gate. Owns open requests and their pending edits.
#[derive(Debug, Default)]
pub struct ApprovalGate {
    requests: Vec<Request>,
}

impl ApprovalGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an `approval_required` event. Returns false on duplicate
    /// delivery (already open or already resolved), which is ignored
    /// idempotently.
    pub fn register(&mut self, request_id: &str, tool_name: &str, tool_args: &Value) -> bool {
        if self.requests.iter().any(|req| req.request_id == request_id) {
            tracing::debug!(request_id, "duplicate approval request ignored");
            return false;
        }

        let edit = is_file_mutation_tool(tool_name)
            .then(|| edit_from_args(request_id, tool_args))
            .flatten();
        self.requests.push(Request {
            request_id: request_id.to_string(),
            tool_name: tool_name.to_string(),
            edit,
            state: GateState::Requested,
        });
        true
    }

    /// Apply an external decision. Returns `None` for an unknown or
    /// already-resolved request; the pending edit, if any, is dropped here.
    pub fn resolve(&mut self, request_id: &str, decision: Decision) -> Option<Resolution> {
        let request = self
            .requests
            .iter_mut()
            .find(|req| req.request_id == request_id)?;
        if request.state != GateState::Requested {
            return None;
        }

        request.state = match decision {
            Decision::Approve => GateState::Approved,
            Decision::Reject => GateState::Rejected,
        };
        request.edit = None;
        Some(Resolution {
            request_id: request.request_id.clone(),
            decision,
        })
    }

    /// The pending edit for an open request, if the tool proposed one.
    #[must_use]
    pub fn pending_edit(&self, request_id: &str) -> Option<&PendingEdit> {
        self.requests
            .iter()
            .find(|req| req.request_id == request_id && req.state == GateState::Requested)
            .and_then(|req| req.edit.as_ref())
    }

    /// Ids and tool names of requests still awaiting a decision.
    pub fn open_requests(&self) -> impl Iterator<Item = (&str, &str)> {
        self.requests
            .iter()
            .filter(|req| req.state == GateState::Requested)
            .map(|req| (req.request_id.as_str(), req.tool_name.as_str()))
    }
}
