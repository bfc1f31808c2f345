//! Clinician overrides of the computed safety state.
//!
//! An override replaces the level and/or the action of a policy result, axis by axis. It is
//! never blended with the computed value. An override without a reason is rejected by
//! returning the policy result unchanged.

use chrono::{DateTime, Utc};
use cre_types::NonEmptyText;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationCode, ValidationFailure};
use crate::levels::{ChatAction, EscalationLevel};
use crate::policy::{ResolvedPolicy, SafetyPolicyResult};

/// A clinician-supplied replacement for the computed level and/or action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverride {
    pub level: Option<EscalationLevel>,
    pub action: Option<ChatAction>,
    pub reason: String,
    pub author: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// An override that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedOverride {
    pub level: Option<EscalationLevel>,
    pub action: Option<ChatAction>,
    pub reason: Option<NonEmptyText>,
    pub author: Option<String>,
}

impl ValidatedOverride {
    fn is_empty(&self) -> bool {
        self.level.is_none() && self.action.is_none()
    }
}

/// The safety state every downstream component reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveSafetyState {
    pub policy_version: String,
    pub level: Option<EscalationLevel>,
    pub action: ChatAction,
    pub studio_badge: Option<String>,
    pub patient_banner: Option<String>,
    pub overridden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_author: Option<String>,
}

impl EffectiveSafetyState {
    pub fn is_hard_stop(&self) -> bool {
        self.action.is_hard_stop()
    }

    fn from_policy(result: &SafetyPolicyResult) -> Self {
        Self {
            policy_version: result.policy_version.clone(),
            level: result.escalation_level,
            action: result.chat_action,
            studio_badge: result.studio_badge.clone(),
            patient_banner: result.patient_banner.clone(),
            overridden: false,
            override_reason: None,
            override_author: None,
        }
    }
}

/// Rejects an override that sets a level or action without a reason.
pub fn validate_override(candidate: &PolicyOverride) -> Result<ValidatedOverride, ValidationFailure> {
    let reason = NonEmptyText::new(&candidate.reason).ok();
    let sets_value = candidate.level.is_some() || candidate.action.is_some();

    if sets_value && reason.is_none() {
        return Err(ValidationFailure::new(
            ValidationCode::MissingOverrideReason,
            "override reason is required when level or action is set",
        ));
    }

    Ok(ValidatedOverride {
        level: candidate.level,
        action: candidate.action,
        reason,
        author: candidate
            .author
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string),
    })
}

/// Applies an optional override to a policy result.
///
/// Badge and banner follow an overridden axis through the resolved policy defaults.
pub fn resolve_effective(
    result: &SafetyPolicyResult,
    candidate: Option<&PolicyOverride>,
    policy: &ResolvedPolicy,
) -> EffectiveSafetyState {
    let mut effective = EffectiveSafetyState::from_policy(result);

    let Some(candidate) = candidate else {
        return effective;
    };

    let validated = match validate_override(candidate) {
        Ok(validated) => validated,
        Err(failure) => {
            tracing::warn!(%failure, "override ignored");
            return effective;
        }
    };
    if validated.is_empty() {
        return effective;
    }

    if let Some(level) = validated.level {
        effective.level = Some(level);
        effective.studio_badge = policy.badge_for(level);
    }
    if let Some(action) = validated.action {
        effective.action = action;
        effective.patient_banner = policy.banner_for(action);
    }
    effective.overridden = true;
    effective.override_reason = validated.reason.map(NonEmptyText::into_inner);
    effective.override_author = validated.author;

    tracing::info!(
        level = ?effective.level,
        action = %effective.action,
        "clinician override applied"
    );

    effective
}
