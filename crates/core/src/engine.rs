//! Pipeline facade.
//!
//! Runs red-flag evaluation, policy resolution, override handling, differential reasoning and
//! follow-up computation in dependency order for one intake snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{CreError, CreResult};
use crate::followup::{
    apply_lifecycle_action, compute_followup, merge_clinician_requests, ClinicalFollowup,
    FollowupContext, LifecycleAction,
};
use crate::intake::{ChatMessage, StructuredIntakeData};
use crate::overrides::{resolve_effective, EffectiveSafetyState, PolicyOverride};
use crate::policy::{evaluate_policy, resolve_policy, SafetyPolicyResult};
use crate::reasoning::{build_reasoning_pack, ClinicalReasoningPack, ReasoningInput};
use crate::red_flags::{evaluate_red_flags, ExtractedSignal, SafetyEvaluation, SafetyInput};

/// One evaluation request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationRequest {
    pub intake_id: String,
    pub intake: StructuredIntakeData,
    pub messages: Vec<ChatMessage>,
    pub extracted_signals: Vec<ExtractedSignal>,
    pub org: Option<String>,
    pub funnel: Option<String>,
    #[serde(rename = "override")]
    pub policy_override: Option<PolicyOverride>,
    /// Prior follow-up snapshot. Falls back to `intake.followup`.
    pub prior_followup: Option<ClinicalFollowup>,
    /// Reviewer requests to merge into the follow-up queue.
    pub clinician_requests: Vec<String>,
}

/// Everything one evaluation produces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    /// The input snapshot with `safety`, `reasoning` and `followup` replaced.
    pub intake: StructuredIntakeData,
    pub safety: SafetyEvaluation,
    pub policy_result: SafetyPolicyResult,
    pub effective: EffectiveSafetyState,
    pub reasoning: ClinicalReasoningPack,
    pub followup: ClinicalFollowup,
}

/// Pure clinical reasoning operations over immutable snapshots.
#[derive(Clone)]
pub struct ClinicalReasoningService {
    cfg: Arc<EngineConfig>,
}

impl ClinicalReasoningService {
    /// Creates a new instance of ClinicalReasoningService.
    pub fn new(cfg: Arc<EngineConfig>) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Runs the full pipeline for one intake.
    ///
    /// # Arguments
    ///
    /// * `request` - The intake snapshot, chat messages and request scope.
    /// * `now` - Timestamp used for every time-dependent field of the output.
    ///
    /// # Returns
    ///
    /// Returns an [`EvaluationOutcome`] holding every intermediate result and the new intake
    /// snapshot. The request itself is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`CreError::InvalidInput`] if the intake id is empty.
    pub fn evaluate(
        &self,
        request: &EvaluationRequest,
        now: DateTime<Utc>,
    ) -> CreResult<EvaluationOutcome> {
        let intake_id = request.intake_id.trim();
        if intake_id.is_empty() {
            return Err(CreError::InvalidInput("intake_id cannot be empty".into()));
        }

        let safety = evaluate_red_flags(
            &SafetyInput::new(intake_id, &request.intake, &request.messages)
                .with_tuning(self.cfg.tuning())
                .with_signals(&request.extracted_signals),
        );

        let (policy_result, effective) = self.resolve_safety(
            &safety,
            request.org.as_deref(),
            request.funnel.as_deref(),
            request.policy_override.as_ref(),
        );

        let reasoning = build_reasoning_pack(
            &ReasoningInput {
                intake: &request.intake,
                safety: &safety,
                effective: &effective,
            },
            self.cfg.reasoning(),
            self.cfg.adapter(),
        );

        let ctx = FollowupContext {
            intake: &request.intake,
            effective: &effective,
            reasoning: Some(&reasoning),
        };
        let prior = request
            .prior_followup
            .as_ref()
            .or(request.intake.followup.as_ref());
        let followup = if request.clinician_requests.is_empty() {
            compute_followup(&ctx, prior, now)
        } else {
            merge_clinician_requests(&ctx, prior, &request.clinician_requests, now)
        };

        tracing::info!(
            intake_id,
            level = ?effective.level,
            action = %effective.action,
            risk = ?reasoning.risk_level,
            lifecycle = followup.lifecycle.as_str(),
            "intake evaluated"
        );

        let mut intake = request.intake.clone();
        intake.safety = Some(safety.clone());
        intake.reasoning = Some(reasoning.clone());
        intake.followup = Some(followup.clone());

        Ok(EvaluationOutcome {
            intake,
            safety,
            policy_result,
            effective,
            reasoning,
            followup,
        })
    }

    /// Resolves the policy for the request scope and applies an optional override.
    pub fn resolve_safety(
        &self,
        safety: &SafetyEvaluation,
        org: Option<&str>,
        funnel: Option<&str>,
        policy_override: Option<&PolicyOverride>,
    ) -> (SafetyPolicyResult, EffectiveSafetyState) {
        let policy = resolve_policy(
            self.cfg.policy(),
            org.or(self.cfg.default_org()),
            funnel.or(self.cfg.default_funnel()),
        );
        let result = evaluate_policy(&safety.triggered_rules, &policy);
        let effective = resolve_effective(&result, policy_override, &policy);
        (result, effective)
    }

    /// Applies a lifecycle action to the follow-up stored on an evaluated intake.
    ///
    /// # Errors
    ///
    /// Returns [`CreError::InvalidInput`] if the intake has not been evaluated yet.
    pub fn transition(
        &self,
        intake: &StructuredIntakeData,
        effective: &EffectiveSafetyState,
        action: &LifecycleAction,
        now: DateTime<Utc>,
    ) -> CreResult<StructuredIntakeData> {
        let prior = intake.followup.as_ref().ok_or_else(|| {
            CreError::InvalidInput("intake has no followup snapshot to transition".into())
        })?;
        let ctx = FollowupContext {
            intake,
            effective,
            reasoning: intake.reasoning.as_ref(),
        };
        let followup = apply_lifecycle_action(&ctx, prior, action, now);

        let mut next = intake.clone();
        next.followup = Some(followup);
        Ok(next)
    }
}
