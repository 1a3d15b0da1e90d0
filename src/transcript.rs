//! Transcript entities and the event reducer.
//!
//! The transcript is the ordered record of turns the host UI renders. It is
//! owned here and mutated only through [`Transcript::apply`], which folds one
//! stream event at a time into the active turn and reports what changed as a
//! [`TranscriptDelta`]. Events are never reordered; parts are append-only
//! except that the trailing text part absorbs consecutive deltas and tool
//! parts are updated in place when their result or approval arrives.

use serde_json::Value;

use crate::correlate;
use crate::protocol::{Decision, PlanStepSeed, StepStatus, StreamEvent};

// === Entities ===

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Agent,
}

/// Lifecycle state of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Active,
    Completed,
    Aborted,
    Errored,
}

impl TurnState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }
}

/// Status of a tool invocation.
///
/// Transitions are monotonic along `running → waiting_approval → {success,
/// error}` or `running → {success, error}` directly; never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Pending,
    Running,
    WaitingApproval,
    Success,
    Error,
}

impl ToolStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::WaitingApproval => 2,
            Self::Success | Self::Error => 3,
        }
    }
}

/// One tool invocation inside a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Server-assigned identifier, or locally generated when the backend
    /// omits one.
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub status: ToolStatus,
    pub result: Option<String>,
    pub approval_request_id: Option<String>,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: Option<String>, name: String, arguments: Value) -> Self {
        Self {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name,
            arguments,
            status: ToolStatus::Running,
            result: None,
            approval_request_id: None,
        }
    }

    /// Advance the status monotonically. Returns false (and leaves the call
    /// untouched) on a backward or terminal-escaping transition.
    fn advance(&mut self, next: ToolStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            tracing::debug!(
                tool = %self.name,
                from = ?self.status,
                to = ?next,
                "refusing non-monotonic tool status transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}

/// One step of a published plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub number: u32,
    pub title: String,
    pub status: StepStatus,
}

/// A plan snapshot published by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub plan_id: String,
    pub goal: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    fn from_seeds(plan_id: String, goal: String, seeds: Vec<PlanStepSeed>) -> Self {
        let steps = seeds
            .into_iter()
            .map(|seed| PlanStep {
                number: seed.number,
                title: seed.title,
                status: seed.status,
            })
            .collect();
        Self {
            plan_id,
            goal,
            steps,
        }
    }
}

/// A span of assistant text.
///
/// `notice` marks informational markers (stream errors, interruption) that
/// must not absorb later streamed deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct TextPart {
    pub content: String,
    pub notice: bool,
}

/// An ordered fragment of a turn's content.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(TextPart),
    Tool(ToolCall),
    Plan(Plan),
}

impl Part {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(TextPart {
            content: content.into(),
            notice: false,
        })
    }

    #[must_use]
    pub fn notice(content: impl Into<String>) -> Self {
        Self::Text(TextPart {
            content: content.into(),
            notice: true,
        })
    }
}

/// One request/response cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub state: TurnState,
    pub parts: Vec<Part>,
    /// Result/approval/plan events that arrived but could not be attached.
    pub dropped_events: u32,
}

/// What one `apply` call changed, for minimal re-rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptDelta {
    TurnOpened { turn: usize },
    PartOpened { turn: usize, part: usize },
    PartUpdated { turn: usize, part: usize },
    Ignored,
}

// === Transcript ===

/// The ordered conversation transcript, mutated only through [`apply`] and
/// the turn-lifecycle methods.
///
/// [`apply`]: Transcript::apply
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Index of the active turn, if any. At most one turn is ever active.
    #[must_use]
    pub fn active_index(&self) -> Option<usize> {
        match self.turns.last() {
            Some(turn) if turn.state == TurnState::Active => Some(self.turns.len() - 1),
            _ => None,
        }
    }

    #[must_use]
    pub fn active_turn(&self) -> Option<&Turn> {
        self.active_index().map(|index| &self.turns[index])
    }

    /// Record a submitted user message as its own (immediately complete)
    /// turn.
    pub fn begin_user_turn(&mut self, text: &str) -> usize {
        self.turns.push(Turn {
            role: Role::User,
            state: TurnState::Completed,
            parts: vec![Part::text(text)],
            dropped_events: 0,
        });
        self.turns.len() - 1
    }

    /// Open the agent turn that will accumulate the stream.
    pub fn begin_agent_turn(&mut self) -> usize {
        debug_assert!(self.active_index().is_none());
        self.turns.push(Turn {
            role: Role::Agent,
            state: TurnState::Active,
            parts: Vec::new(),
            dropped_events: 0,
        });
        self.turns.len() - 1
    }

    /// Close the active turn, if any, with the given terminal state.
    pub fn finalize_active(&mut self, state: TurnState) -> Option<usize> {
        debug_assert!(state.is_terminal());
        let index = self.active_index()?;
        self.turns[index].state = state;
        Some(index)
    }

    /// Append an informational marker part to the active turn.
    pub fn append_notice(&mut self, text: &str) -> TranscriptDelta {
        let Some(turn) = self.active_index() else {
            return TranscriptDelta::Ignored;
        };
        self.turns[turn].parts.push(Part::notice(text));
        TranscriptDelta::PartOpened {
            turn,
            part: self.turns[turn].parts.len() - 1,
        }
    }

    /// Flattened `(role, text)` history of prior turns, for `Submit`
    /// commands. Notices and tool/plan parts are client-side presentation
    /// state and are not replayed.
    #[must_use]
    pub fn history(&self) -> Vec<(Role, String)> {
        self.turns
            .iter()
            .filter(|turn| turn.state != TurnState::Active)
            .filter_map(|turn| {
                let text: Vec<&str> = turn
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        Part::Text(text) if !text.notice => Some(text.content.as_str()),
                        _ => None,
                    })
                    .collect();
                if text.is_empty() {
                    None
                } else {
                    Some((turn.role, text.join("\n")))
                }
            })
            .collect()
    }

    // === Reducer ===

    /// Fold one stream event into the active turn.
    pub fn apply(&mut self, event: &StreamEvent) -> TranscriptDelta {
        let Some(turn) = self.active_index() else {
            tracing::debug!(?event, "event arrived with no active turn");
            return TranscriptDelta::Ignored;
        };

        match event {
            StreamEvent::TextDelta { content } => self.apply_text_delta(turn, content),
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => {
                let call = ToolCall::new(
                    tool_call_id.clone(),
                    tool_name.clone(),
                    args.clone(),
                );
                self.turns[turn].parts.push(Part::Tool(call));
                TranscriptDelta::PartOpened {
                    turn,
                    part: self.turns[turn].parts.len() - 1,
                }
            }
            StreamEvent::ToolResult {
                tool_call_id,
                tool_name,
                result,
            } => self.apply_tool_result(
                turn,
                tool_call_id.as_deref(),
                tool_name.as_deref(),
                result,
            ),
            StreamEvent::ApprovalRequired {
                request_id,
                tool_call_id,
                tool_name,
                ..
            } => self.apply_approval_required(
                turn,
                request_id,
                tool_call_id.as_deref(),
                tool_name,
            ),
            StreamEvent::ApprovalResolved {
                request_id,
                decision,
            } => match self.resolve_tool_approval(request_id, *decision) {
                Some(delta) => delta,
                None => {
                    self.turns[turn].dropped_events += 1;
                    TranscriptDelta::Ignored
                }
            },
            StreamEvent::PlanCreated {
                plan_id,
                goal,
                steps,
            } => {
                let plan =
                    Plan::from_seeds(plan_id.clone(), goal.clone(), steps.clone());
                self.turns[turn].parts.push(Part::Plan(plan));
                TranscriptDelta::PartOpened {
                    turn,
                    part: self.turns[turn].parts.len() - 1,
                }
            }
            StreamEvent::PlanStep {
                plan_id,
                step_number,
                status,
            } => self.apply_plan_step(turn, plan_id, *step_number, *status),
            StreamEvent::PlanCompleted { .. } => TranscriptDelta::Ignored,
            StreamEvent::Error { message } => self.append_notice(message),
        }
    }

    fn apply_text_delta(&mut self, turn: usize, content: &str) -> TranscriptDelta {
        let parts = &mut self.turns[turn].parts;
        if let Some(Part::Text(text)) = parts.last_mut()
            && !text.notice
        {
            text.content.push_str(content);
            return TranscriptDelta::PartUpdated {
                turn,
                part: parts.len() - 1,
            };
        }
        parts.push(Part::text(content));
        TranscriptDelta::PartOpened {
            turn,
            part: parts.len() - 1,
        }
    }

    fn apply_tool_result(
        &mut self,
        turn: usize,
        call_id: Option<&str>,
        tool_name: Option<&str>,
        result: &Value,
    ) -> TranscriptDelta {
        let parts = &self.turns[turn].parts;
        let Some(part) = correlate::find_target(parts, call_id, tool_name) else {
            tracing::warn!(?call_id, ?tool_name, "tool result matched no tool call");
            self.turns[turn].dropped_events += 1;
            return TranscriptDelta::Ignored;
        };

        let Part::Tool(call) = &mut self.turns[turn].parts[part] else {
            unreachable!("correlator only returns tool parts");
        };
        call.result = Some(render_result(result));
        call.advance(ToolStatus::Success);
        TranscriptDelta::PartUpdated { turn, part }
    }

    fn apply_approval_required(
        &mut self,
        turn: usize,
        request_id: &str,
        call_id: Option<&str>,
        tool_name: &str,
    ) -> TranscriptDelta {
        let parts = &self.turns[turn].parts;
        let Some(part) = correlate::find_target(parts, call_id, Some(tool_name)) else {
            tracing::warn!(request_id, tool_name, "approval matched no tool call");
            self.turns[turn].dropped_events += 1;
            return TranscriptDelta::Ignored;
        };

        let Part::Tool(call) = &mut self.turns[turn].parts[part] else {
            unreachable!("correlator only returns tool parts");
        };
        if !call.advance(ToolStatus::WaitingApproval) {
            return TranscriptDelta::Ignored;
        }
        call.approval_request_id = Some(request_id.to_string());
        TranscriptDelta::PartUpdated { turn, part }
    }

    fn apply_plan_step(
        &mut self,
        turn: usize,
        plan_id: &str,
        step_number: u32,
        status: StepStatus,
    ) -> TranscriptDelta {
        let found = self.turns[turn].parts.iter().position(
            |part| matches!(part, Part::Plan(plan) if plan.plan_id == plan_id),
        );
        // Plan may have been cleared by the user.
        let Some(part) = found else {
            tracing::debug!(plan_id, "plan step for unknown plan ignored");
            self.turns[turn].dropped_events += 1;
            return TranscriptDelta::Ignored;
        };
        let Part::Plan(plan) = &mut self.turns[turn].parts[part] else {
            unreachable!("position matched a plan part");
        };

        let mut unknown_step = false;
        let advanced = match plan.steps.iter_mut().find(|step| step.number == step_number) {
            Some(step) if step.status.can_advance_to(status) => {
                step.status = status;
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!(plan_id, step_number, "plan step number unknown");
                unknown_step = true;
                false
            }
        };
        if unknown_step {
            self.turns[turn].dropped_events += 1;
        }
        if advanced {
            TranscriptDelta::PartUpdated { turn, part }
        } else {
            TranscriptDelta::Ignored
        }
    }

    /// Optimistically settle the tool call tied to a resolved approval.
    ///
    /// The UI does not re-await backend confirmation: approve marks the call
    /// `success`, reject marks it `error` with a fixed result message.
    pub fn resolve_tool_approval(
        &mut self,
        request_id: &str,
        decision: Decision,
    ) -> Option<TranscriptDelta> {
        let turn = self.active_index()?;
        let part = self.turns[turn].parts.iter().position(|part| {
            matches!(
                part,
                Part::Tool(call)
                    if call.approval_request_id.as_deref() == Some(request_id)
            )
        })?;

        let Part::Tool(call) = &mut self.turns[turn].parts[part] else {
            unreachable!("position matched a tool part");
        };
        let advanced = match decision {
            Decision::Approve => call.advance(ToolStatus::Success),
            Decision::Reject => {
                if call.advance(ToolStatus::Error) {
                    call.result = Some("Rejected by user".to_string());
                    true
                } else {
                    false
                }
            }
        };
        advanced.then_some(TranscriptDelta::PartUpdated { turn, part })
    }
}

fn render_result(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
