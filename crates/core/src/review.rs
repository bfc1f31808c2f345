//! Review-input validation.
//!
//! Gates reviewer input before it reaches the follow-up queue: status values, required notes
//! and requested items, and the allowed status transitions.

use cre_types::NonEmptyText;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationCode, ValidationFailure};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Draft,
    InReview,
    NeedsMoreInfo,
    Approved,
    Rejected,
}

impl ReviewStatus {
    /// Parses a status from its wire value.
    pub fn parse(s: &str) -> Result<Self, ValidationFailure> {
        match s.trim() {
            "draft" => Ok(Self::Draft),
            "in_review" => Ok(Self::InReview),
            "needs_more_info" => Ok(Self::NeedsMoreInfo),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ValidationFailure::new(
                ValidationCode::UnknownStatus,
                format!("unknown review status: {other}"),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InReview => "in_review",
            Self::NeedsMoreInfo => "needs_more_info",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Statuses reachable from `from`. `None` is a record that was never reviewed.
    pub fn allowed_next(from: Option<ReviewStatus>) -> &'static [ReviewStatus] {
        use ReviewStatus::*;
        match from {
            None => &[Draft, InReview],
            Some(Draft) => &[Draft, InReview],
            Some(InReview) => &[InReview, NeedsMoreInfo, Approved, Rejected],
            Some(NeedsMoreInfo) => &[NeedsMoreInfo, InReview],
            Some(Approved) | Some(Rejected) => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw reviewer input as received from the review surface.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewInput {
    pub status: String,
    pub review_notes: Option<String>,
    pub requested_items: Vec<String>,
}

/// Reviewer input that passed validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidatedReview {
    pub status: ReviewStatus,
    pub review_notes: Option<NonEmptyText>,
    pub requested_items: Vec<NonEmptyText>,
}

pub fn validate_review_input(input: &ReviewInput) -> Result<ValidatedReview, ValidationFailure> {
    let status = ReviewStatus::parse(&input.status)?;
    let review_notes = input
        .review_notes
        .as_deref()
        .and_then(|notes| NonEmptyText::new(notes).ok());
    let requested_items = NonEmptyText::collect_non_empty(&input.requested_items);

    match status {
        ReviewStatus::NeedsMoreInfo if requested_items.is_empty() => {
            return Err(ValidationFailure::new(
                ValidationCode::MissingRequestedItems,
                "status needs_more_info requires at least one non-empty entry in requested_items",
            ));
        }
        ReviewStatus::Approved | ReviewStatus::Rejected if review_notes.is_none() => {
            return Err(ValidationFailure::new(
                ValidationCode::MissingReviewNotes,
                format!("status {status} requires non-empty review_notes"),
            ));
        }
        _ => {}
    }

    Ok(ValidatedReview {
        status,
        review_notes,
        requested_items,
    })
}

pub fn validate_transition(
    from: Option<ReviewStatus>,
    to: ReviewStatus,
) -> Result<(), ValidationFailure> {
    if ReviewStatus::allowed_next(from).contains(&to) {
        return Ok(());
    }
    let from_label = from.map(|s| s.as_str()).unwrap_or("none");
    Err(ValidationFailure::new(
        ValidationCode::InvalidTransition,
        format!("transition {from_label} -> {to} is not allowed"),
    ))
}
