//! Matching of result/approval events to the tool invocation they complete.
//!
//! Centralized here as one pure function so the heuristic is testable on its
//! own and applied identically for `tool_result` and `approval_required`.

use crate::transcript::{Part, ToolStatus};

/// Find the index of the tool part an incoming event targets.
///
/// Precedence:
/// 1. An explicit call identifier matches a tool part by exact `id`,
///    regardless of that part's current status.
/// 2. Otherwise, the earliest part (emission order) whose `name` equals the
///    event's tool name and whose status is still `running` or
///    `waiting_approval` is the target. With several same-named calls in
///    flight this resolves first-issued, first-resolved; call arguments are
///    not consulted.
/// 3. No match: `None`. The caller drops the event rather than risk
///    corrupting an unrelated tool call.
#[must_use]
pub fn find_target(
    parts: &[Part],
    call_id: Option<&str>,
    tool_name: Option<&str>,
) -> Option<usize> {
    if let Some(call_id) = call_id
        && let Some(index) = parts.iter().position(|part| {
            matches!(part, Part::Tool(call) if call.id == call_id)
        })
    {
        return Some(index);
    }

    let tool_name = tool_name?;
    parts.iter().position(|part| {
        matches!(
            part,
            Part::Tool(call)
                if call.name == tool_name
                    && matches!(
                        call.status,
                        ToolStatus::Running | ToolStatus::WaitingApproval
                    )
        )
    })
}
