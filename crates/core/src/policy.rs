//! Safety policy resolution.
//!
//! A versioned policy document maps verified triggered rules to an escalation level, a chat
//! action, a studio badge and a patient banner. Organisation and funnel patches are merged over
//! the base document by [`resolve_policy`], once per request; evaluation then reads only the
//! resolved value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::SAFETY_RULESET_VERSION;
use crate::error::{ValidationCode, ValidationFailure};
use crate::levels::{ChatAction, EscalationLevel, Severity};
use crate::red_flags::catalog::is_known_rule_id;
use crate::red_flags::SafetyTriggeredRule;

/// Default mappings. In patches every map is partial and merged key by key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyDefaults {
    pub severity_levels: BTreeMap<Severity, EscalationLevel>,
    pub level_actions: BTreeMap<EscalationLevel, ChatAction>,
    pub level_badges: BTreeMap<EscalationLevel, String>,
    pub action_banners: BTreeMap<ChatAction, String>,
}

impl PolicyDefaults {
    fn merge(&mut self, patch: &PolicyDefaults) {
        self.severity_levels.extend(patch.severity_levels.iter().map(|(k, v)| (*k, *v)));
        self.level_actions.extend(patch.level_actions.iter().map(|(k, v)| (*k, *v)));
        self.level_badges.extend(patch.level_badges.iter().map(|(k, v)| (*k, v.clone())));
        self.action_banners.extend(patch.action_banners.iter().map(|(k, v)| (*k, v.clone())));
    }
}

/// Per-rule override. Unset fields fall back to the defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulePolicy {
    pub level: Option<EscalationLevel>,
    pub action: Option<ChatAction>,
    pub badge: Option<String>,
    pub banner: Option<String>,
}

impl RulePolicy {
    fn merge(&mut self, patch: &RulePolicy) {
        if patch.level.is_some() {
            self.level = patch.level;
        }
        if patch.action.is_some() {
            self.action = patch.action;
        }
        if patch.badge.is_some() {
            self.badge.clone_from(&patch.badge);
        }
        if patch.banner.is_some() {
            self.banner.clone_from(&patch.banner);
        }
    }
}

/// Partial override scoped to an organisation or a funnel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyPatch {
    pub defaults: PolicyDefaults,
    pub rules: BTreeMap<String, RulePolicy>,
}

/// The externally supplied, versioned policy document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyPolicyDocument {
    pub version: String,
    pub defaults: PolicyDefaults,
    #[serde(default)]
    pub rules: BTreeMap<String, RulePolicy>,
    #[serde(default)]
    pub organizations: BTreeMap<String, PolicyPatch>,
    #[serde(default)]
    pub funnels: BTreeMap<String, PolicyPatch>,
}

/// A policy with every applicable patch already merged in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub version: String,
    pub org: Option<String>,
    pub funnel: Option<String>,
    pub defaults: PolicyDefaults,
    pub rules: BTreeMap<String, RulePolicy>,
}

impl ResolvedPolicy {
    pub fn badge_for(&self, level: EscalationLevel) -> Option<String> {
        self.defaults.level_badges.get(&level).cloned()
    }

    pub fn banner_for(&self, action: ChatAction) -> Option<String> {
        self.defaults.action_banners.get(&action).cloned()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyPolicyResult {
    pub policy_version: String,
    pub escalation_level: Option<EscalationLevel>,
    pub chat_action: ChatAction,
    pub studio_badge: Option<String>,
    pub patient_banner: Option<String>,
}

impl SafetyPolicyDocument {
    /// The compiled-in policy shipped with the ruleset.
    pub fn builtin() -> Self {
        let defaults = PolicyDefaults {
            severity_levels: BTreeMap::from([
                (Severity::A, EscalationLevel::A),
                (Severity::B, EscalationLevel::B),
                (Severity::C, EscalationLevel::C),
            ]),
            level_actions: BTreeMap::from([
                (EscalationLevel::A, ChatAction::HardStop),
                (EscalationLevel::B, ChatAction::RequireConfirm),
                (EscalationLevel::C, ChatAction::Warn),
            ]),
            level_badges: BTreeMap::from([
                (EscalationLevel::A, "Notfall".to_string()),
                (EscalationLevel::B, "Dringend".to_string()),
                (EscalationLevel::C, "Abklären".to_string()),
            ]),
            action_banners: BTreeMap::from([
                (
                    ChatAction::Warn,
                    "Einige Angaben sind noch unklar. Bitte beantworten Sie die Rückfragen."
                        .to_string(),
                ),
                (
                    ChatAction::RequireConfirm,
                    "Ihre Angaben sollten zeitnah ärztlich abgeklärt werden. Bitte bestätigen Sie diesen Hinweis."
                        .to_string(),
                ),
                (
                    ChatAction::HardStop,
                    "Bitte wenden Sie sich sofort an den Notruf 112.".to_string(),
                ),
            ]),
        };

        let rules = BTreeMap::from([(
            "SFTY-2.1-R-SUICIDAL".to_string(),
            RulePolicy {
                banner: Some(
                    "Bitte wenden Sie sich sofort an den Notruf 112 oder die Telefonseelsorge (0800 111 0 111)."
                        .to_string(),
                ),
                ..Default::default()
            },
        )]);

        Self {
            version: SAFETY_RULESET_VERSION.to_string(),
            defaults,
            rules,
            organizations: BTreeMap::new(),
            funnels: BTreeMap::new(),
        }
    }
}

/// Merges base → organisation → funnel, defaults and rule map alike.
///
/// Unknown organisation or funnel ids contribute nothing.
pub fn resolve_policy(
    document: &SafetyPolicyDocument,
    org: Option<&str>,
    funnel: Option<&str>,
) -> ResolvedPolicy {
    let mut defaults = document.defaults.clone();
    let mut rules = document.rules.clone();

    let patches = [
        org.and_then(|id| document.organizations.get(id)),
        funnel.and_then(|id| document.funnels.get(id)),
    ];
    for patch in patches.into_iter().flatten() {
        defaults.merge(&patch.defaults);
        for (rule_id, rule_patch) in &patch.rules {
            rules.entry(rule_id.clone()).or_default().merge(rule_patch);
        }
    }

    ResolvedPolicy {
        version: document.version.clone(),
        org: org.map(str::to_string),
        funnel: funnel.map(str::to_string),
        defaults,
        rules,
    }
}

/// Maps verified triggered rules to a policy result.
///
/// Level and action are maximised independently: the rule that dominates the level need not
/// be the rule that dominates the action. Unverified rules are ignored. Ties keep the first rule.
pub fn evaluate_policy(rules: &[SafetyTriggeredRule], policy: &ResolvedPolicy) -> SafetyPolicyResult {
    let mut best_level: Option<(EscalationLevel, Option<String>)> = None;
    let mut best_action: Option<(ChatAction, Option<String>)> = None;

    for rule in rules.iter().filter(|r| r.verified) {
        let rule_policy = policy.rules.get(&rule.rule_id);

        let level = rule_policy
            .and_then(|p| p.level)
            .or_else(|| policy.defaults.severity_levels.get(&rule.severity).copied());
        let Some(level) = level else {
            tracing::warn!(rule_id = %rule.rule_id, "no level mapping for rule severity");
            continue;
        };

        let action = rule_policy
            .and_then(|p| p.action)
            .or_else(|| policy.defaults.level_actions.get(&level).copied())
            .unwrap_or_default();

        if best_level.as_ref().map_or(true, |(current, _)| level > *current) {
            let badge = rule_policy
                .and_then(|p| p.badge.clone())
                .or_else(|| policy.badge_for(level));
            best_level = Some((level, badge));
        }

        if best_action.as_ref().map_or(true, |(current, _)| action > *current) {
            let banner = rule_policy
                .and_then(|p| p.banner.clone())
                .or_else(|| policy.banner_for(action));
            best_action = Some((action, banner));
        }
    }

    let (escalation_level, studio_badge) = match best_level {
        Some((level, badge)) => (Some(level), badge),
        None => (None, None),
    };
    let (chat_action, patient_banner) = best_action.unwrap_or((ChatAction::None, None));

    SafetyPolicyResult {
        policy_version: policy.version.clone(),
        escalation_level,
        chat_action,
        studio_badge,
        patient_banner,
    }
}

/// Checks a policy document before it is used.
pub fn validate_policy_document(document: &SafetyPolicyDocument) -> Result<(), ValidationFailure> {
    let mut issues = Vec::new();

    if document.version.trim().is_empty() {
        issues.push("version cannot be empty".to_string());
    }

    for severity in [Severity::A, Severity::B, Severity::C] {
        if !document.defaults.severity_levels.contains_key(&severity) {
            issues.push(format!("defaults.severity_levels is missing {severity:?}"));
        }
    }
    for level in [EscalationLevel::A, EscalationLevel::B, EscalationLevel::C] {
        if !document.defaults.level_actions.contains_key(&level) {
            issues.push(format!("defaults.level_actions is missing {level}"));
        }
    }

    let scoped_rules = document
        .organizations
        .iter()
        .map(|(id, patch)| (format!("organizations.{id}.rules"), &patch.rules))
        .chain(
            document
                .funnels
                .iter()
                .map(|(id, patch)| (format!("funnels.{id}.rules"), &patch.rules)),
        );
    let all_rules = std::iter::once(("rules".to_string(), &document.rules)).chain(scoped_rules);
    for (scope, rules) in all_rules {
        for rule_id in rules.keys() {
            if !is_known_rule_id(rule_id) {
                issues.push(format!("{scope}: unknown rule id {rule_id}"));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure::with_issues(
            ValidationCode::InvalidPolicy,
            "safety policy document is invalid",
            issues,
        ))
    }
}
