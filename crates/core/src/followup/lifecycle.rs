//! Follow-up lifecycle states and actions.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    NeedsReview,
    Completed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::NeedsReview => "needs_review",
            Self::Completed => "completed",
        }
    }
}

/// A patient- or clinician-side action on the follow-up queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LifecycleAction {
    Resume,
    Skip {
        #[serde(default)]
        question_id: Option<String>,
    },
    Complete {
        #[serde(default)]
        question_id: Option<String>,
    },
    MarkAsked {
        #[serde(default)]
        question_ids: Vec<String>,
    },
}

/// How a recomputation treats a pending review.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReviewMode {
    /// Keep `needs_review` from the prior snapshot while questions remain.
    Keep,
    /// Enter `needs_review` (clinician requests were merged).
    Force,
    /// Leave `needs_review` (the queue was resumed).
    Clear,
}

pub(crate) struct StateInputs {
    pub hard_stop: bool,
    pub has_candidates: bool,
    pub extended_active: bool,
    pub prior: Option<LifecycleState>,
    pub review: ReviewMode,
}

/// Derives the lifecycle state. A hard stop always wins.
pub(crate) fn derive_state(inputs: &StateInputs) -> LifecycleState {
    if inputs.hard_stop {
        return LifecycleState::Active;
    }
    if inputs.review == ReviewMode::Force {
        return LifecycleState::NeedsReview;
    }
    if !inputs.has_candidates {
        return if inputs.extended_active {
            LifecycleState::NeedsReview
        } else {
            LifecycleState::Completed
        };
    }
    match (inputs.review, inputs.prior) {
        (ReviewMode::Keep, Some(LifecycleState::NeedsReview)) => LifecycleState::NeedsReview,
        _ => LifecycleState::Active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(has_candidates: bool, review: ReviewMode) -> StateInputs {
        StateInputs {
            hard_stop: false,
            has_candidates,
            extended_active: false,
            prior: Some(LifecycleState::NeedsReview),
            review,
        }
    }

    #[test]
    fn hard_stop_forces_active() {
        let mut forced = inputs(false, ReviewMode::Force);
        forced.hard_stop = true;
        assert_eq!(derive_state(&forced), LifecycleState::Active);
    }

    #[test]
    fn empty_queue_completes_unless_extended() {
        assert_eq!(
            derive_state(&inputs(false, ReviewMode::Keep)),
            LifecycleState::Completed
        );
        let mut extended = inputs(false, ReviewMode::Keep);
        extended.extended_active = true;
        assert_eq!(derive_state(&extended), LifecycleState::NeedsReview);
    }

    #[test]
    fn review_is_sticky_until_resumed() {
        assert_eq!(
            derive_state(&inputs(true, ReviewMode::Keep)),
            LifecycleState::NeedsReview
        );
        assert_eq!(
            derive_state(&inputs(true, ReviewMode::Clear)),
            LifecycleState::Active
        );
    }

    #[test]
    fn action_wire_format() {
        let action: LifecycleAction =
            serde_json::from_str(r#"{"action":"skip","question_id":"gap:onset"}"#).unwrap();
        assert_eq!(
            action,
            LifecycleAction::Skip {
                question_id: Some("gap:onset".to_string())
            }
        );
        let action: LifecycleAction = serde_json::from_str(r#"{"action":"complete"}"#).unwrap();
        assert_eq!(action, LifecycleAction::Complete { question_id: None });
    }
}
