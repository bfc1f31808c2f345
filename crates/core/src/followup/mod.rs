//! Follow-up objectives, question queue and lifecycle.
//!
//! Every operation here is a pure transform: it takes the current intake context and the prior
//! [`ClinicalFollowup`] snapshot and returns a new snapshot. Timestamps come from the injected
//! `now` and only move when the content they describe changes, so recomputing an unchanged
//! intake returns an identical snapshot.

pub mod candidates;
pub mod lifecycle;
pub mod objectives;
pub mod savepoints;
pub mod trigger;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_NEXT_QUESTIONS;
use crate::intake::StructuredIntakeData;
use crate::normalize::normalize_text;
use crate::overrides::EffectiveSafetyState;
use crate::reasoning::ClinicalReasoningPack;

pub use candidates::{FollowupQuestion, QuestionSource};
pub use lifecycle::{LifecycleAction, LifecycleState};
pub use objectives::{BlockId, ObjectiveState, ObjectiveStatus};
pub use savepoints::{BlockStatus, Savepoint};
pub use trigger::{TriggerReason, Uc2Trigger};

use candidates::HandledQuestions;
use lifecycle::{ReviewMode, StateInputs};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessState {
    VisitReady,
    ProblemReady,
    SafetyReady,
    ProgramReady,
}

/// Follow-up snapshot stored on the intake record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClinicalFollowup {
    pub readiness: ReadinessState,
    pub lifecycle: LifecycleState,
    pub lifecycle_updated_at: DateTime<Utc>,
    pub trigger: Uc2Trigger,
    pub objectives: Vec<ObjectiveState>,
    pub next_questions: Vec<FollowupQuestion>,
    pub queue: Vec<FollowupQuestion>,
    #[serde(default)]
    pub asked_question_ids: BTreeSet<String>,
    #[serde(default)]
    pub completed_question_ids: BTreeSet<String>,
    #[serde(default)]
    pub skipped_question_ids: BTreeSet<String>,
    #[serde(default)]
    pub clinician_requests: Vec<String>,
    pub savepoints: Vec<Savepoint>,
    pub active_block_id: Option<BlockId>,
}

impl ClinicalFollowup {
    fn offers(&self, question_id: &str) -> bool {
        self.next_questions
            .iter()
            .chain(self.queue.iter())
            .any(|q| q.id == question_id)
    }
}

/// Read-only inputs of a follow-up computation.
#[derive(Clone, Copy, Debug)]
pub struct FollowupContext<'a> {
    pub intake: &'a StructuredIntakeData,
    pub effective: &'a EffectiveSafetyState,
    pub reasoning: Option<&'a ClinicalReasoningPack>,
}

/// Question bookkeeping carried between snapshots.
#[derive(Clone, Debug, Default)]
struct QuestionLedger {
    asked: BTreeSet<String>,
    completed: BTreeSet<String>,
    skipped: BTreeSet<String>,
    clinician_requests: Vec<String>,
}

impl QuestionLedger {
    fn from_prior(prior: Option<&ClinicalFollowup>) -> Self {
        prior
            .map(|p| Self {
                asked: p.asked_question_ids.clone(),
                completed: p.completed_question_ids.clone(),
                skipped: p.skipped_question_ids.clone(),
                clinician_requests: p.clinician_requests.clone(),
            })
            .unwrap_or_default()
    }

    fn handled(&self) -> HandledQuestions<'_> {
        HandledQuestions {
            asked: &self.asked,
            completed: &self.completed,
            skipped: &self.skipped,
        }
    }
}

fn base_readiness(hard_stop: bool, extended_active: bool) -> ReadinessState {
    if hard_stop {
        ReadinessState::SafetyReady
    } else if extended_active {
        ReadinessState::ProblemReady
    } else {
        ReadinessState::VisitReady
    }
}

/// Promotes `VisitReady` to `ProgramReady` once nothing is left to collect.
fn finalize_readiness(
    readiness: ReadinessState,
    lifecycle: LifecycleState,
    extended_active: bool,
    savepoints: &[Savepoint],
) -> ReadinessState {
    if readiness == ReadinessState::VisitReady
        && lifecycle == LifecycleState::Completed
        && !extended_active
        && savepoints::all_completed(savepoints)
    {
        ReadinessState::ProgramReady
    } else {
        readiness
    }
}

fn build(
    ctx: &FollowupContext<'_>,
    prior: Option<&ClinicalFollowup>,
    ledger: QuestionLedger,
    review: ReviewMode,
    now: DateTime<Utc>,
) -> ClinicalFollowup {
    let hard_stop = ctx.effective.is_hard_stop();
    let handled = ledger.handled();

    let clinician = candidates::clinician_candidates(&ledger.clinician_requests);
    let pending_requests = clinician.iter().any(|c| !handled.contains(&c.id));
    let trigger =
        trigger::with_pending_requests(trigger::detect_trigger(ctx.intake), pending_requests);

    let answered = candidates::answered_objectives(&ledger.completed, &clinician);
    let objectives =
        objectives::evaluate_objectives(ctx.intake, trigger.active, hard_stop, &answered);

    let ranked = if hard_stop {
        Vec::new()
    } else {
        let mut all = clinician;
        all.extend(candidates::reasoning_candidates(ctx.reasoning));
        all.extend(candidates::gap_candidates(&objectives));
        candidates::rank_candidates(all, &handled, trigger.active)
    };

    let lifecycle = lifecycle::derive_state(&StateInputs {
        hard_stop,
        has_candidates: !ranked.is_empty(),
        extended_active: trigger.active,
        prior: prior.map(|p| p.lifecycle),
        review,
    });

    let mut next_questions = ranked;
    let queue = next_questions.split_off(next_questions.len().min(MAX_NEXT_QUESTIONS));

    let prior_savepoints = prior.map(|p| p.savepoints.as_slice()).unwrap_or_default();
    let savepoints = savepoints::compute_savepoints(&objectives, prior_savepoints, now);
    let active_block_id = savepoints::active_block(&savepoints);

    let readiness = finalize_readiness(
        base_readiness(hard_stop, trigger.active),
        lifecycle,
        trigger.active,
        &savepoints,
    );

    let mut followup = ClinicalFollowup {
        readiness,
        lifecycle,
        lifecycle_updated_at: now,
        trigger,
        objectives,
        next_questions,
        queue,
        asked_question_ids: ledger.asked,
        completed_question_ids: ledger.completed,
        skipped_question_ids: ledger.skipped,
        clinician_requests: ledger.clinician_requests,
        savepoints,
        active_block_id,
    };
    if let Some(prior) = prior {
        if same_lifecycle_content(prior, &followup) {
            followup.lifecycle_updated_at = prior.lifecycle_updated_at;
        }
    }

    tracing::debug!(
        lifecycle = followup.lifecycle.as_str(),
        readiness = ?followup.readiness,
        next = followup.next_questions.len(),
        queued = followup.queue.len(),
        "followup computed"
    );

    followup
}

fn same_lifecycle_content(a: &ClinicalFollowup, b: &ClinicalFollowup) -> bool {
    a.lifecycle == b.lifecycle
        && a.next_questions == b.next_questions
        && a.queue == b.queue
        && a.asked_question_ids == b.asked_question_ids
        && a.completed_question_ids == b.completed_question_ids
        && a.skipped_question_ids == b.skipped_question_ids
        && a.clinician_requests == b.clinician_requests
}

/// Recomputes the follow-up snapshot for the current intake.
pub fn compute_followup(
    ctx: &FollowupContext<'_>,
    prior: Option<&ClinicalFollowup>,
    now: DateTime<Utc>,
) -> ClinicalFollowup {
    build(
        ctx,
        prior,
        QuestionLedger::from_prior(prior),
        ReviewMode::Keep,
        now,
    )
}

/// Applies a lifecycle action.
///
/// Actions without a usable question id, or naming a question that is not offered, return the
/// prior snapshot unchanged.
pub fn apply_lifecycle_action(
    ctx: &FollowupContext<'_>,
    prior: &ClinicalFollowup,
    action: &LifecycleAction,
    now: DateTime<Utc>,
) -> ClinicalFollowup {
    let mut ledger = QuestionLedger::from_prior(Some(prior));

    let offered = |id: &Option<String>| -> Option<String> {
        id.as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && prior.offers(id))
            .map(str::to_string)
    };

    let review = match action {
        LifecycleAction::Resume => ReviewMode::Clear,
        LifecycleAction::Skip { question_id } => {
            let Some(id) = offered(question_id) else {
                tracing::debug!(action = ?action, "lifecycle action ignored");
                return prior.clone();
            };
            ledger.skipped.insert(id);
            ReviewMode::Keep
        }
        LifecycleAction::Complete { question_id } => {
            let Some(id) = offered(question_id) else {
                tracing::debug!(action = ?action, "lifecycle action ignored");
                return prior.clone();
            };
            ledger.completed.insert(id);
            ReviewMode::Keep
        }
        LifecycleAction::MarkAsked { question_ids } => {
            let ids: Vec<String> = question_ids
                .iter()
                .map(|id| id.trim())
                .filter(|id| prior.offers(id))
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                tracing::debug!(action = ?action, "lifecycle action ignored");
                return prior.clone();
            }
            ledger.asked.extend(ids);
            ReviewMode::Keep
        }
    };

    build(ctx, Some(prior), ledger, review, now)
}

/// Adds reviewer requests as clinician questions and puts the follow-up under review.
///
/// Requests that are blank or repeat an earlier request are ignored. Without any new request
/// this is a plain recomputation.
pub fn merge_clinician_requests(
    ctx: &FollowupContext<'_>,
    prior: Option<&ClinicalFollowup>,
    items: &[String],
    now: DateTime<Utc>,
) -> ClinicalFollowup {
    let mut ledger = QuestionLedger::from_prior(prior);
    let mut known: BTreeSet<String> = ledger
        .clinician_requests
        .iter()
        .filter_map(|r| candidates::clinician_question_text(r))
        .map(|q| normalize_text(&q))
        .collect();

    let mut added = 0usize;
    for item in items {
        let Some(question) = candidates::clinician_question_text(item) else {
            continue;
        };
        if known.insert(normalize_text(&question)) {
            ledger.clinician_requests.push(item.trim().to_string());
            added += 1;
        }
    }

    if added == 0 {
        return build(ctx, prior, ledger, ReviewMode::Keep, now);
    }

    tracing::info!(added, "clinician requests merged");
    build(ctx, prior, ledger, ReviewMode::Force, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::{ChatAction, EscalationLevel};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    fn safety(action: ChatAction) -> EffectiveSafetyState {
        EffectiveSafetyState {
            policy_version: "SFTY-2.1".to_string(),
            level: action.is_hard_stop().then_some(EscalationLevel::A),
            action,
            studio_badge: None,
            patient_banner: None,
            overridden: false,
            override_reason: None,
            override_author: None,
        }
    }

    fn ctx<'a>(
        intake: &'a StructuredIntakeData,
        effective: &'a EffectiveSafetyState,
    ) -> FollowupContext<'a> {
        FollowupContext {
            intake,
            effective,
            reasoning: None,
        }
    }

    fn ids(questions: &[FollowupQuestion]) -> Vec<&str> {
        questions.iter().map(|q| q.id.as_str()).collect()
    }

    fn complete_core_intake() -> StructuredIntakeData {
        let mut intake = StructuredIntakeData {
            chief_complaint: Some("Sodbrennen".into()),
            past_history: Some("keine".into()),
            medication: Some("keine".into()),
            psychosocial_factors: Some("keine Belastung".into()),
            prior_findings: vec!["Labor unauffällig".into()],
            ..Default::default()
        };
        intake.hpi.onset = Some("vor 5 Tagen".into());
        intake.hpi.duration = Some("seit 5 Tagen".into());
        intake.hpi.course = Some("gleichbleibend".into());
        intake.hpi.trigger = Some("nach dem Essen".into());
        intake.hpi.frequency = Some("täglich".into());
        intake
    }

    #[test]
    fn empty_intake_asks_for_chief_complaint_and_onset_first() {
        let intake = StructuredIntakeData::default();
        let effective = safety(ChatAction::None);
        let followup = compute_followup(&ctx(&intake, &effective), None, at(8));

        assert_eq!(
            ids(&followup.next_questions),
            vec!["gap:chief-complaint", "gap:onset", "gap:duration"]
        );
        assert!(followup.next_questions[..2].iter().all(|q| q.priority == 1));
        assert_eq!(followup.queue.len(), 7);
        assert_eq!(followup.lifecycle, LifecycleState::Active);
        assert_eq!(followup.readiness, ReadinessState::VisitReady);
        assert_eq!(followup.active_block_id, Some(BlockId::CoreSymptomProfile));
    }

    #[test]
    fn hard_stop_empties_queue_and_blocks_objectives() {
        let intake = StructuredIntakeData::default();
        let effective = safety(ChatAction::HardStop);
        let followup = compute_followup(&ctx(&intake, &effective), None, at(8));

        assert!(followup.next_questions.is_empty());
        assert!(followup.queue.is_empty());
        assert_eq!(followup.lifecycle, LifecycleState::Active);
        assert_eq!(followup.readiness, ReadinessState::SafetyReady);
        assert!(followup
            .objectives
            .iter()
            .all(|o| o.status == ObjectiveStatus::BlockedBySafety));
    }

    #[test]
    fn recomputation_is_idempotent() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Kopfschmerz".into()),
            ..Default::default()
        };
        let effective = safety(ChatAction::None);
        let context = ctx(&intake, &effective);

        let first = compute_followup(&context, None, at(8));
        let second = compute_followup(&context, Some(&first), at(9));
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn complete_intake_reaches_program_ready() {
        let intake = complete_core_intake();
        let effective = safety(ChatAction::None);
        let context = ctx(&intake, &effective);
        let followup = compute_followup(&context, None, at(8));

        assert!(followup.next_questions.is_empty());
        assert_eq!(followup.lifecycle, LifecycleState::Completed);
        assert_eq!(followup.readiness, ReadinessState::ProgramReady);
        assert_eq!(followup.active_block_id, None);

        let again = compute_followup(&context, Some(&followup), at(9));
        assert_eq!(again.readiness, ReadinessState::ProgramReady);

        let mut reopened = intake.clone();
        reopened.medication = None;
        let regressed = compute_followup(&ctx(&reopened, &effective), Some(&again), at(10));
        assert_eq!(regressed.readiness, ReadinessState::VisitReady);
        assert_eq!(ids(&regressed.next_questions), vec!["gap:medication"]);
        assert_eq!(regressed.lifecycle_updated_at, at(10));
    }

    #[test]
    fn extended_trigger_without_questions_needs_review() {
        let mut intake = complete_core_intake();
        intake.past_history = Some("Asthma".into());
        intake.hpi.associated_symptoms = vec!["Husten".into()];
        intake.hpi.aggravating_factors = Some("Liegen".into());
        intake.relevant_negatives = vec!["kein Fieber".into()];
        let effective = safety(ChatAction::None);
        let followup = compute_followup(&ctx(&intake, &effective), None, at(8));

        assert!(followup.trigger.active);
        assert_eq!(followup.objectives.len(), 13);
        assert_eq!(followup.lifecycle, LifecycleState::NeedsReview);
        assert_eq!(followup.readiness, ReadinessState::ProblemReady);
    }

    #[test]
    fn skip_and_complete_move_questions() {
        let intake = StructuredIntakeData::default();
        let effective = safety(ChatAction::None);
        let context = ctx(&intake, &effective);
        let start = compute_followup(&context, None, at(8));

        let skipped = apply_lifecycle_action(
            &context,
            &start,
            &LifecycleAction::Skip {
                question_id: Some("gap:chief-complaint".into()),
            },
            at(9),
        );
        assert!(skipped.skipped_question_ids.contains("gap:chief-complaint"));
        assert_eq!(
            ids(&skipped.next_questions),
            vec!["gap:onset", "gap:duration", "gap:course"]
        );
        assert_eq!(skipped.lifecycle_updated_at, at(9));

        let completed = apply_lifecycle_action(
            &context,
            &skipped,
            &LifecycleAction::Complete {
                question_id: Some("gap:onset".into()),
            },
            at(10),
        );
        let onset = completed
            .objectives
            .iter()
            .find(|o| o.id == "onset")
            .expect("onset objective");
        assert_eq!(onset.status, ObjectiveStatus::Answered);
        assert_eq!(completed.next_questions[0].id, "gap:duration");
    }

    #[test]
    fn invalid_actions_are_no_ops() {
        let intake = StructuredIntakeData::default();
        let effective = safety(ChatAction::None);
        let context = ctx(&intake, &effective);
        let start = compute_followup(&context, None, at(8));

        for action in [
            LifecycleAction::Skip { question_id: None },
            LifecycleAction::Complete {
                question_id: Some("  ".into()),
            },
            LifecycleAction::Complete {
                question_id: Some("gap:unknown".into()),
            },
            LifecycleAction::MarkAsked {
                question_ids: vec![],
            },
        ] {
            assert_eq!(apply_lifecycle_action(&context, &start, &action, at(9)), start);
        }
    }

    #[test]
    fn mark_asked_removes_from_queue() {
        let intake = StructuredIntakeData::default();
        let effective = safety(ChatAction::None);
        let context = ctx(&intake, &effective);
        let start = compute_followup(&context, None, at(8));

        let asked = apply_lifecycle_action(
            &context,
            &start,
            &LifecycleAction::MarkAsked {
                question_ids: vec!["gap:chief-complaint".into(), "gap:onset".into()],
            },
            at(9),
        );
        assert_eq!(asked.asked_question_ids.len(), 2);
        assert_eq!(asked.next_questions[0].id, "gap:duration");
    }

    #[test]
    fn clinician_merge_forces_review_until_resumed() {
        let intake = StructuredIntakeData::default();
        let effective = safety(ChatAction::None);
        let context = ctx(&intake, &effective);
        let start = compute_followup(&context, None, at(8));

        let merged = merge_clinician_requests(
            &context,
            Some(&start),
            &["Welche Medikamente nehmen Sie".to_string(), " ".to_string()],
            at(9),
        );
        assert_eq!(merged.lifecycle, LifecycleState::NeedsReview);
        assert_eq!(merged.clinician_requests.len(), 1);
        assert!(merged.next_questions[0]
            .id
            .starts_with("clinician:welche-medikamente-nehmen-sie-"));
        assert!(merged
            .trigger
            .reasons
            .contains(&TriggerReason::ClinicianRequest));
        assert_eq!(merged.readiness, ReadinessState::ProblemReady);

        let recomputed = compute_followup(&context, Some(&merged), at(10));
        assert_eq!(recomputed.lifecycle, LifecycleState::NeedsReview);

        let repeated = merge_clinician_requests(
            &context,
            Some(&recomputed),
            &["welche Medikamente nehmen Sie?".to_string()],
            at(11),
        );
        assert_eq!(repeated.clinician_requests.len(), 1);

        let resumed = apply_lifecycle_action(&context, &merged, &LifecycleAction::Resume, at(12));
        assert_eq!(resumed.lifecycle, LifecycleState::Active);
    }

    #[test]
    fn clinician_requests_with_shared_prefix_are_all_offered() {
        let intake = StructuredIntakeData::default();
        let effective = safety(ChatAction::None);
        let context = ctx(&intake, &effective);

        let requests = vec![
            "Bitte laden Sie die Befunde der kardiologischen Untersuchung vom Januar hoch"
                .to_string(),
            "Bitte laden Sie die Befunde der kardiologischen Untersuchung vom Februar hoch"
                .to_string(),
        ];
        let merged = merge_clinician_requests(&context, None, &requests, at(9));

        assert_eq!(merged.clinician_requests.len(), 2);
        let offered: Vec<&FollowupQuestion> = merged
            .next_questions
            .iter()
            .chain(merged.queue.iter())
            .filter(|q| q.source == QuestionSource::ClinicianRequest)
            .collect();
        assert_eq!(offered.len(), 2);
        assert_ne!(offered[0].id, offered[1].id);
    }

    #[test]
    fn clinician_merge_respects_hard_stop() {
        let intake = StructuredIntakeData::default();
        let effective = safety(ChatAction::HardStop);
        let context = ctx(&intake, &effective);

        let merged = merge_clinician_requests(
            &context,
            None,
            &["Seit wann bestehen die Beschwerden".to_string()],
            at(9),
        );
        assert_eq!(merged.lifecycle, LifecycleState::Active);
        assert!(merged.next_questions.is_empty());
        assert_eq!(merged.clinician_requests.len(), 1);
    }
}
