//! Step advancement: the state machine shared by requests and events.
use tracing::info;

use crate::category::CategoryFacts;
use crate::entity::WorkflowState;
use crate::error::WorkflowError;
use crate::quorum::QuorumStatus;
use crate::roles::{StepKind, is_applicable};
use crate::types::Status;
use crate::variant::{Track, steps};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Held { level: u32 },
    Advanced { from: u32, to: u32 },
    Completed { from: u32 },
    ReturnedToDraft { from: u32 },
    Rejected { from: u32 },
}

/// Lowest level of the variant that applies to `facts`.
pub fn first_applicable_level(state: &WorkflowState, track: Track, facts: &CategoryFacts) -> Option<u32> {
    steps(track, state.variant)
        .iter()
        .map(|s| s.level)
        .filter(|level| is_applicable(track, *level, facts))
        .min()
}

/// Smallest applicable level strictly above `current`.
pub fn next_applicable_level(
    state: &WorkflowState,
    track: Track,
    current: u32,
    facts: &CategoryFacts,
) -> Option<u32> {
    steps(track, state.variant)
        .iter()
        .map(|s| s.level)
        .filter(|level| *level > current && is_applicable(track, *level, facts))
        .min()
}

/// Draft to InProgress at the lowest applicable level. Starts a new round
/// and clears any earlier rejection reason. Returns the entry level.
pub fn submit(state: &mut WorkflowState, track: Track, facts: &CategoryFacts) -> Result<u32, WorkflowError> {
    if state.status != Status::Draft {
        return Err(WorkflowError::InvalidTransition {
            action: "submit",
            status: state.status,
        });
    }
    let Some(to) = first_applicable_level(state, track, facts) else {
        return Err(WorkflowError::NotInWorkflow(format!(
            "variant {} has no applicable steps",
            state.variant.name()
        )));
    };

    state.current_level = Some(to);
    state.status = Status::InProgress;
    state.round += 1;
    state.rejection_reason = None;

    info!(?track, level = to, round = state.round, "submitted");
    Ok(to)
}

/// Holds at the current level until `quorum` is satisfied, then moves to
/// the next applicable level or completes.
pub fn on_quorum(
    state: &mut WorkflowState,
    track: Track,
    facts: &CategoryFacts,
    quorum: &QuorumStatus,
) -> Result<Transition, WorkflowError> {
    let from = in_progress_level(state, "advance")?;
    if !quorum.satisfied {
        return Ok(Transition::Held { level: from });
    }

    match next_applicable_level(state, track, from, facts) {
        Some(to) => {
            state.current_level = Some(to);
            info!(?track, from, to, "advanced");
            Ok(Transition::Advanced { from, to })
        }
        None => {
            state.current_level = None;
            state.status = Status::Completed;
            info!(?track, from, "completed");
            Ok(Transition::Completed { from })
        }
    }
}

/// A rejection at the manager step sends the entity back to its author.
/// Anywhere else it is final.
pub fn reject(state: &mut WorkflowState, track: Track, reason: &str) -> Result<Transition, WorkflowError> {
    let from = in_progress_level(state, "reject")?;

    state.current_level = None;
    state.rejection_reason = Some(reason.to_string());

    if StepKind::of(track, from) == StepKind::Manager {
        state.status = Status::Draft;
        info!(?track, from, "returned to draft");
        Ok(Transition::ReturnedToDraft { from })
    } else {
        state.status = Status::Rejected;
        info!(?track, from, "rejected");
        Ok(Transition::Rejected { from })
    }
}

fn in_progress_level(state: &WorkflowState, action: &'static str) -> Result<u32, WorkflowError> {
    match (state.status, state.current_level) {
        (Status::InProgress, Some(level)) => Ok(level),
        (status, _) => Err(WorkflowError::InvalidTransition { action, status }),
    }
}
