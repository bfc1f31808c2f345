//! Red flag rule evaluation.
//!
//! Matches the fixed clinical allowlist against chat messages and intake fields, verifies every
//! hit against an [`EvidenceContext`], applies per-rule tuning and derives the escalation level.
//!
//! Only verified, qualified rules produce findings. Everything else that matched is still
//! reported in `triggered_rules` with `verified = false` so a reviewer can see it, but it never
//! contributes to the escalation level.

pub mod catalog;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{
    CHECK_EVIDENCE, CHECK_NEGATION, CHECK_UNCERTAINTY, CHEST_PAIN_PROLONGED_MINUTES,
    FINDING_CHEST_PAIN, FINDING_CHEST_PAIN_PROLONGED, FINDING_UNCERTAINTY_CLUSTER, MAX_EXCERPT_CHARS,
    RULE_CHEST_PAIN_PROLONGED, RULE_UNCERTAINTY_CLUSTER, SAFETY_RULESET_VERSION,
    UNCERTAINTY_CLUSTER_MIN,
};
use crate::duration::parse_duration;
use crate::intake::{ChatMessage, StructuredIntakeData};
use crate::levels::{EscalationLevel, Severity};
use crate::normalize::{contains_term, normalize_text, EvidenceContext};

pub use catalog::{ExclusionMode, RedFlagRule, RuleTuning};

static NEGATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:kein\w*|nicht|nie|ohne|verneint|no|denies)\b").expect("valid negation regex")
});

/// Where a piece of evidence lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Chat,
    Intake,
}

/// A traceable pointer to the text that supports a finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub source: EvidenceSource,
    /// Chat message id, or the intake id for intake evidence.
    pub source_id: String,
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
}

impl EvidenceRef {
    fn chat(message_id: &str, text: &str) -> Self {
        Self {
            source: EvidenceSource::Chat,
            source_id: message_id.to_string(),
            excerpt: excerpt(text),
            field_path: None,
        }
    }

    fn intake(intake_id: &str, field_path: &str, text: &str) -> Self {
        Self {
            source: EvidenceSource::Intake,
            source_id: intake_id.to_string(),
            excerpt: excerpt(text),
            field_path: Some(field_path.to_string()),
        }
    }

    fn same_origin(&self, other: &EvidenceRef) -> bool {
        self.source == other.source
            && self.source_id == other.source_id
            && self.field_path == other.field_path
    }
}

fn excerpt(text: &str) -> String {
    text.trim().chars().take(MAX_EXCERPT_CHARS).collect()
}

/// A rule that matched, verified or not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyTriggeredRule {
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    pub verified: bool,
    #[serde(default)]
    pub needs_review: bool,
    pub evidence: Vec<EvidenceRef>,
    pub policy_version: String,
}

/// A verified red flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedFlagFinding {
    pub id: String,
    pub rule_id: String,
    pub label: String,
    pub severity: Severity,
    pub evidence: Vec<EvidenceRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyEvaluation {
    pub intake_id: String,
    pub ruleset_version: String,
    pub escalation_level: Option<EscalationLevel>,
    pub red_flags: Vec<RedFlagFinding>,
    pub triggered_rules: Vec<SafetyTriggeredRule>,
    pub rule_ids: Vec<String>,
    pub check_ids: Vec<String>,
    pub contradiction_detected: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safety_questions: Vec<String>,
}

impl SafetyEvaluation {
    /// Triggered rules that may take part in policy resolution.
    pub fn verified_rules(&self) -> Vec<SafetyTriggeredRule> {
        self.triggered_rules
            .iter()
            .filter(|r| r.verified)
            .cloned()
            .collect()
    }
}

/// A red-flag claim made by an upstream extractor. It is only trusted once verified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSignal {
    pub rule_id: String,
    pub source: EvidenceSource,
    pub source_id: String,
    #[serde(default)]
    pub field_path: Option<String>,
    #[serde(default)]
    pub excerpt: String,
}

static NO_TUNING: BTreeMap<String, RuleTuning> = BTreeMap::new();

/// Everything the evaluator reads.
#[derive(Clone, Copy, Debug)]
pub struct SafetyInput<'a> {
    pub intake_id: &'a str,
    pub intake: &'a StructuredIntakeData,
    pub messages: &'a [ChatMessage],
    /// Replaces the catalog tuning for the given rule ids.
    pub tuning: &'a BTreeMap<String, RuleTuning>,
    pub extracted_signals: &'a [ExtractedSignal],
}

impl<'a> SafetyInput<'a> {
    pub fn new(
        intake_id: &'a str,
        intake: &'a StructuredIntakeData,
        messages: &'a [ChatMessage],
    ) -> Self {
        Self {
            intake_id,
            intake,
            messages,
            tuning: &NO_TUNING,
            extracted_signals: &[],
        }
    }

    pub fn with_tuning(mut self, tuning: &'a BTreeMap<String, RuleTuning>) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_signals(mut self, signals: &'a [ExtractedSignal]) -> Self {
        self.extracted_signals = signals;
        self
    }
}

/// Evidence that survived verification, with the normalised text it was checked against.
struct VerifiedEvidence {
    evidence: EvidenceRef,
    normalized: String,
}

enum TuningOutcome {
    Excluded,
    NeedsReview,
    Qualified,
}

fn collect_candidates(
    rule: &RedFlagRule,
    ctx: &EvidenceContext<'_>,
    intake_id: &str,
    signals: &[ExtractedSignal],
) -> Vec<EvidenceRef> {
    let mut candidates = Vec::new();

    for (id, content) in ctx.messages() {
        if rule.matches(content) {
            candidates.push(EvidenceRef::chat(id, ctx.raw_message(id).unwrap_or_default()));
        }
    }

    for field in ctx.intake().text_fields() {
        if rule.matches(&normalize_text(&field.text)) {
            candidates.push(EvidenceRef::intake(intake_id, &field.path, &field.text));
        }
    }

    for signal in signals.iter().filter(|s| s.rule_id == rule.rule_id) {
        let claimed = EvidenceRef {
            source: signal.source,
            source_id: signal.source_id.clone(),
            excerpt: excerpt(&signal.excerpt),
            field_path: signal.field_path.clone(),
        };
        if !candidates.iter().any(|c| c.same_origin(&claimed)) {
            candidates.push(claimed);
        }
    }

    candidates
}

/// Re-checks a candidate against the evidence context.
///
/// Chat evidence must name a known message whose content matches; intake evidence must name
/// this intake and a known field whose text matches. Intake claims without a field are rejected,
/// as are claims on relevant negatives: a denial is never positive evidence.
fn verify_evidence(
    rule: &RedFlagRule,
    ctx: &EvidenceContext<'_>,
    intake_id: &str,
    candidate: &EvidenceRef,
) -> Option<String> {
    let text = match candidate.source {
        EvidenceSource::Chat => ctx.message(&candidate.source_id).map(str::to_string),
        EvidenceSource::Intake => {
            if candidate.source_id != intake_id {
                return None;
            }
            candidate
                .field_path
                .as_deref()
                .filter(|path| !is_negative_path(path))
                .and_then(|path| ctx.field(path))
        }
    }?;

    rule.matches(&text).then_some(text)
}

fn is_negative_path(path: &str) -> bool {
    path.split('[').next() == Some("relevant_negatives")
}

fn apply_tuning(tuning: &RuleTuning, verified: &[VerifiedEvidence]) -> TuningOutcome {
    let any_term = |term: &str| verified.iter().any(|v| contains_term(&v.normalized, term));

    let qualified = tuning.any_of.iter().any(|group| {
        !group.is_empty()
            && verified
                .iter()
                .any(|v| group.iter().all(|term| contains_term(&v.normalized, term)))
    });
    let excluded = tuning.exclusions.iter().any(|term| any_term(term));

    if excluded {
        let drops = match tuning.exclusion_mode {
            ExclusionMode::Always => true,
            ExclusionMode::OnlyIfUnqualified => !qualified,
        };
        if drops {
            return TuningOutcome::Excluded;
        }
    }

    let any_of_ok = tuning.any_of.is_empty() || qualified;
    let all_of_ok = tuning.all_of.iter().all(|term| any_term(term));

    if any_of_ok && all_of_ok {
        TuningOutcome::Qualified
    } else {
        TuningOutcome::NeedsReview
    }
}

fn triggered(
    rule: &RedFlagRule,
    severity: Severity,
    verified: bool,
    evidence: Vec<EvidenceRef>,
) -> SafetyTriggeredRule {
    SafetyTriggeredRule {
        rule_id: rule.rule_id.to_string(),
        title: rule.title.to_string(),
        severity,
        verified,
        needs_review: !verified,
        evidence,
        policy_version: SAFETY_RULESET_VERSION.to_string(),
    }
}

/// Outcome of one catalog rule.
struct RuleOutcome {
    triggered: SafetyTriggeredRule,
    finding: Option<RedFlagFinding>,
}

fn evaluate_rule(
    rule: &RedFlagRule,
    tuning: &RuleTuning,
    ctx: &EvidenceContext<'_>,
    input: &SafetyInput<'_>,
) -> Option<RuleOutcome> {
    let candidates = collect_candidates(rule, ctx, input.intake_id, input.extracted_signals);
    if candidates.is_empty() {
        return None;
    }

    let verified: Vec<VerifiedEvidence> = candidates
        .iter()
        .filter_map(|candidate| {
            verify_evidence(rule, ctx, input.intake_id, candidate).map(|normalized| {
                VerifiedEvidence {
                    evidence: candidate.clone(),
                    normalized,
                }
            })
        })
        .collect();

    if verified.is_empty() {
        tracing::debug!(rule_id = rule.rule_id, "pattern hit without verifiable evidence");
        return Some(RuleOutcome {
            triggered: triggered(rule, rule.severity, false, candidates),
            finding: None,
        });
    }

    let evidence: Vec<EvidenceRef> = verified.iter().map(|v| v.evidence.clone()).collect();

    match apply_tuning(tuning, &verified) {
        TuningOutcome::Excluded => {
            tracing::debug!(rule_id = rule.rule_id, "rule disqualified by exclusion term");
            return None;
        }
        TuningOutcome::NeedsReview => {
            tracing::debug!(rule_id = rule.rule_id, "rule qualifiers not met; held for review");
            return Some(RuleOutcome {
                triggered: triggered(rule, rule.severity, false, evidence),
                finding: None,
            });
        }
        TuningOutcome::Qualified => {}
    }

    if rule.severity == Severity::A && !tuning.a_level_requires_any_of.is_empty() {
        let a_level_hit = tuning
            .a_level_requires_any_of
            .iter()
            .any(|term| verified.iter().any(|v| contains_term(&v.normalized, term)));
        if !a_level_hit {
            tracing::debug!(rule_id = rule.rule_id, "A-level qualifier missing; downgraded to B");
            return Some(RuleOutcome {
                triggered: triggered(rule, Severity::B, false, evidence),
                finding: None,
            });
        }
    }

    let finding = RedFlagFinding {
        id: rule.finding_id.to_string(),
        rule_id: rule.rule_id.to_string(),
        label: rule.title.to_string(),
        severity: rule.severity,
        evidence: evidence.clone(),
    };

    Some(RuleOutcome {
        triggered: triggered(rule, rule.severity, true, evidence),
        finding: Some(finding),
    })
}

/// Finds a verified statement of at least 20 minutes for a verified chest pain finding.
///
/// Duration is accepted from `hpi.duration` or from the chest pain evidence itself.
fn prolonged_chest_pain_evidence(
    ctx: &EvidenceContext<'_>,
    intake_id: &str,
    chest_pain: &RedFlagFinding,
) -> Option<EvidenceRef> {
    let long_enough = |text: &str| {
        parse_duration(text)
            .map(|d| d.minutes() >= CHEST_PAIN_PROLONGED_MINUTES)
            .unwrap_or(false)
    };

    if let Some(text) = ctx.intake().field_text("hpi.duration") {
        if long_enough(text) {
            return Some(EvidenceRef::intake(intake_id, "hpi.duration", text));
        }
    }

    chest_pain.evidence.iter().find_map(|evidence| {
        let text = match evidence.source {
            EvidenceSource::Chat => ctx.raw_message(&evidence.source_id),
            EvidenceSource::Intake => evidence
                .field_path
                .as_deref()
                .and_then(|path| ctx.intake().field_text(path)),
        }?;
        long_enough(text).then(|| EvidenceRef {
            excerpt: excerpt(text),
            ..evidence.clone()
        })
    })
}

/// Intake uncertainties that the conversation confirms, each with its chat evidence.
fn verified_uncertainties(ctx: &EvidenceContext<'_>) -> Vec<(String, EvidenceRef)> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    for uncertainty in &ctx.intake().uncertainties {
        let normalized = normalize_text(uncertainty);
        if normalized.is_empty() || !seen.insert(normalized.clone()) {
            continue;
        }
        let hit = ctx
            .messages()
            .find(|(_, content)| content.contains(&normalized))
            .map(|(id, _)| id);
        if let Some(id) = hit {
            let raw = ctx.raw_message(id).unwrap_or_default();
            out.push((uncertainty.trim().to_string(), EvidenceRef::chat(id, raw)));
        }
    }

    out
}

/// Whether a relevant negative explicitly negates one of the verified rules.
fn negation_conflict(intake: &StructuredIntakeData, verified: &[&RedFlagRule]) -> bool {
    intake
        .relevant_negatives
        .iter()
        .map(|n| normalize_text(n))
        .filter(|n| NEGATION_RE.is_match(n))
        .any(|negative| verified.iter().any(|rule| rule.matches(&negative)))
}

fn uncertainty_question(uncertainty: &str) -> String {
    format!("Können Sie genauer beschreiben, was Sie mit \"{uncertainty}\" meinen?")
}

/// Evaluates the red-flag allowlist.
///
/// Never fails: missing or unverifiable evidence resolves to fewer findings and, at the
/// extreme, to `escalation_level = None`.
pub fn evaluate_red_flags(input: &SafetyInput<'_>) -> SafetyEvaluation {
    let ctx = EvidenceContext::new(input.intake, input.messages);

    let mut triggered_rules = Vec::new();
    let mut findings = Vec::new();
    let mut verified_rules: Vec<&RedFlagRule> = Vec::new();

    for rule in catalog::rules() {
        let tuning = input.tuning.get(rule.rule_id).unwrap_or(&rule.default_tuning);
        if let Some(outcome) = evaluate_rule(rule, tuning, &ctx, input) {
            if outcome.finding.is_some() {
                verified_rules.push(rule);
            }
            triggered_rules.push(outcome.triggered);
            findings.extend(outcome.finding);
        }
    }

    let chest_pain = findings.iter().find(|f| f.id == FINDING_CHEST_PAIN).cloned();
    if let Some(chest_pain) = chest_pain {
        if let Some(duration) = prolonged_chest_pain_evidence(&ctx, input.intake_id, &chest_pain) {
            let mut evidence = chest_pain.evidence.clone();
            if !evidence.iter().any(|e| e.same_origin(&duration)) {
                evidence.push(duration);
            }
            let title = "Brustschmerz ≥ 20 Minuten";
            triggered_rules.push(SafetyTriggeredRule {
                rule_id: RULE_CHEST_PAIN_PROLONGED.to_string(),
                title: title.to_string(),
                severity: Severity::A,
                verified: true,
                needs_review: false,
                evidence: evidence.clone(),
                policy_version: SAFETY_RULESET_VERSION.to_string(),
            });
            findings.push(RedFlagFinding {
                id: FINDING_CHEST_PAIN_PROLONGED.to_string(),
                rule_id: RULE_CHEST_PAIN_PROLONGED.to_string(),
                label: title.to_string(),
                severity: Severity::A,
                evidence,
            });
        }
    }

    let mut level = findings
        .iter()
        .map(|f| EscalationLevel::from(f.severity))
        .max();

    let uncertainties = verified_uncertainties(&ctx);
    if level.is_none() && uncertainties.len() >= UNCERTAINTY_CLUSTER_MIN {
        let evidence: Vec<EvidenceRef> = uncertainties.iter().map(|(_, e)| e.clone()).collect();
        let title = "Mehrere bestätigte Unklarheiten";
        triggered_rules.push(SafetyTriggeredRule {
            rule_id: RULE_UNCERTAINTY_CLUSTER.to_string(),
            title: title.to_string(),
            severity: Severity::C,
            verified: true,
            needs_review: false,
            evidence: evidence.clone(),
            policy_version: SAFETY_RULESET_VERSION.to_string(),
        });
        findings.push(RedFlagFinding {
            id: FINDING_UNCERTAINTY_CLUSTER.to_string(),
            rule_id: RULE_UNCERTAINTY_CLUSTER.to_string(),
            label: title.to_string(),
            severity: Severity::C,
            evidence,
        });
        level = Some(EscalationLevel::C);
    }

    let contradiction_detected = negation_conflict(input.intake, &verified_rules);
    if contradiction_detected {
        level = level.max(Some(EscalationLevel::B));
    }

    let safety_questions = if level == Some(EscalationLevel::C) {
        uncertainties
            .iter()
            .map(|(u, _)| uncertainty_question(u))
            .collect()
    } else {
        Vec::new()
    };

    let mut check_ids = vec![CHECK_EVIDENCE.to_string()];
    if !input.intake.relevant_negatives.is_empty() {
        check_ids.push(CHECK_NEGATION.to_string());
    }
    if !input.intake.uncertainties.is_empty() {
        check_ids.push(CHECK_UNCERTAINTY.to_string());
    }

    let rule_ids = triggered_rules
        .iter()
        .filter(|r| r.verified)
        .map(|r| r.rule_id.clone())
        .collect();

    tracing::info!(
        intake_id = input.intake_id,
        level = ?level,
        findings = findings.len(),
        triggered = triggered_rules.len(),
        contradiction = contradiction_detected,
        "red flag evaluation complete"
    );

    SafetyEvaluation {
        intake_id: input.intake_id.to_string(),
        ruleset_version: SAFETY_RULESET_VERSION.to_string(),
        escalation_level: level,
        red_flags: findings,
        triggered_rules,
        rule_ids,
        check_ids,
        contradiction_detected,
        safety_questions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::HistoryOfPresentIllness;

    fn evaluate(intake: &StructuredIntakeData, messages: &[ChatMessage]) -> SafetyEvaluation {
        evaluate_red_flags(&SafetyInput::new("intake-1", intake, messages))
    }

    fn finding_ids(eval: &SafetyEvaluation) -> Vec<&str> {
        eval.red_flags.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn prolonged_chest_pain_escalates_to_a() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Brustschmerz seit 30 Minuten".into()),
            hpi: HistoryOfPresentIllness {
                duration: Some("30 Minuten".into()),
                ..Default::default()
            },
            ..Default::default()
        };

        let eval = evaluate(&intake, &[]);
        assert_eq!(eval.escalation_level, Some(EscalationLevel::A));
        assert!(finding_ids(&eval).contains(&"CHEST_PAIN_PROLONGED"));
        assert!(eval.rule_ids.iter().any(|id| id == "SFTY-2.1-R-CHEST-PAIN-20M"));
    }

    #[test]
    fn short_chest_pain_stays_b() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Brustschmerz seit 5 Minuten".into()),
            ..Default::default()
        };
        let eval = evaluate(&intake, &[]);
        assert_eq!(eval.escalation_level, Some(EscalationLevel::B));
        assert_eq!(finding_ids(&eval), vec!["CHEST_PAIN"]);
    }

    #[test]
    fn palpitations_and_syncope_in_one_message() {
        let messages = vec![ChatMessage::new("m1", "Herzrasen und ich bin umgekippt")];
        let eval = evaluate(&StructuredIntakeData::default(), &messages);

        assert_eq!(eval.escalation_level, Some(EscalationLevel::B));
        let ids = finding_ids(&eval);
        assert!(ids.contains(&"SEVERE_PALPITATIONS"));
        assert!(ids.contains(&"SYNCOPE"));
        let evidence = &eval.red_flags[0].evidence[0];
        assert_eq!(evidence.source, EvidenceSource::Chat);
        assert_eq!(evidence.source_id, "m1");
    }

    #[test]
    fn unverifiable_signal_is_reported_but_not_escalated() {
        let intake = StructuredIntakeData::default();
        let signals = vec![
            ExtractedSignal {
                rule_id: "SFTY-2.1-R-SUICIDAL".into(),
                source: EvidenceSource::Chat,
                source_id: "ghost".into(),
                field_path: None,
                excerpt: "will nicht mehr leben".into(),
            },
            ExtractedSignal {
                rule_id: "SFTY-2.1-R-SYNCOPE".into(),
                source: EvidenceSource::Intake,
                source_id: "intake-1".into(),
                field_path: None,
                excerpt: "the intake mentions fainting".into(),
            },
        ];
        let eval = evaluate_red_flags(&SafetyInput::new("intake-1", &intake, &[]).with_signals(&signals));

        assert_eq!(eval.escalation_level, None);
        assert!(eval.red_flags.is_empty());
        assert_eq!(eval.triggered_rules.len(), 2);
        assert!(eval.triggered_rules.iter().all(|r| !r.verified && r.needs_review));
        assert!(eval.rule_ids.is_empty());
    }

    #[test]
    fn signal_pointing_at_matching_field_is_verified() {
        let intake = StructuredIntakeData {
            past_history: Some("Letzte Woche kurz ohnmächtig geworden".into()),
            ..Default::default()
        };
        let signals = vec![ExtractedSignal {
            rule_id: "SFTY-2.1-R-SYNCOPE".into(),
            source: EvidenceSource::Intake,
            source_id: "intake-1".into(),
            field_path: Some("past_history".into()),
            excerpt: "ohnmächtig".into(),
        }];
        let eval = evaluate_red_flags(&SafetyInput::new("intake-1", &intake, &[]).with_signals(&signals));
        assert_eq!(eval.escalation_level, Some(EscalationLevel::B));
        assert_eq!(eval.red_flags[0].evidence.len(), 1);
    }

    #[test]
    fn a_level_without_qualifier_is_held_for_review() {
        let messages = vec![ChatMessage::new("m1", "Beim Treppensteigen habe ich Atemnot")];
        let eval = evaluate(&StructuredIntakeData::default(), &messages);

        assert_eq!(eval.escalation_level, None);
        let rule = &eval.triggered_rules[0];
        assert_eq!(rule.rule_id, "SFTY-2.1-R-DYSPNEA");
        assert_eq!(rule.severity, Severity::B);
        assert!(!rule.verified);
        assert!(rule.needs_review);
    }

    #[test]
    fn a_level_with_qualifier_escalates() {
        let messages = vec![ChatMessage::new("m1", "Ich habe Atemnot schon in Ruhe")];
        let eval = evaluate(&StructuredIntakeData::default(), &messages);
        assert_eq!(eval.escalation_level, Some(EscalationLevel::A));
    }

    #[test]
    fn exclusion_always_drops_rule() {
        let messages = vec![ChatMessage::new("m1", "Ich habe keine Suizidgedanken")];
        let eval = evaluate(&StructuredIntakeData::default(), &messages);
        assert!(eval.triggered_rules.is_empty());
        assert_eq!(eval.escalation_level, None);
    }

    #[test]
    fn any_of_group_must_co_occur_in_one_message() {
        let mut tuning = BTreeMap::new();
        tuning.insert(
            "SFTY-2.1-R-PALPITATIONS".to_string(),
            RuleTuning {
                any_of: vec![vec!["herzrasen".into(), "schwindel".into()]],
                ..Default::default()
            },
        );
        let intake = StructuredIntakeData::default();

        let split = vec![
            ChatMessage::new("m1", "Ich habe Herzrasen"),
            ChatMessage::new("m2", "Mir ist oft Schwindel"),
        ];
        let eval = evaluate_red_flags(&SafetyInput::new("i", &intake, &split).with_tuning(&tuning));
        assert_eq!(eval.escalation_level, None);
        assert!(eval.triggered_rules[0].needs_review);

        let together = vec![ChatMessage::new("m1", "Herzrasen mit Schwindel")];
        let eval =
            evaluate_red_flags(&SafetyInput::new("i", &intake, &together).with_tuning(&tuning));
        assert_eq!(eval.escalation_level, Some(EscalationLevel::B));
    }

    #[test]
    fn all_of_terms_may_span_messages() {
        let mut tuning = BTreeMap::new();
        tuning.insert(
            "SFTY-2.1-R-PALPITATIONS".to_string(),
            RuleTuning {
                all_of: vec!["abends".into(), "schwindel".into()],
                ..Default::default()
            },
        );
        let intake = StructuredIntakeData::default();
        let messages = vec![
            ChatMessage::new("m1", "Herzrasen meist abends"),
            ChatMessage::new("m2", "Herzrasen mit Schwindel"),
        ];
        let eval =
            evaluate_red_flags(&SafetyInput::new("i", &intake, &messages).with_tuning(&tuning));
        assert_eq!(eval.escalation_level, Some(EscalationLevel::B));
    }

    #[test]
    fn only_if_unqualified_exclusion_respects_qualifier() {
        let mut tuning = BTreeMap::new();
        tuning.insert(
            "SFTY-2.1-R-CHEST-PAIN".to_string(),
            RuleTuning {
                any_of: vec![vec!["ausstrahl".into()]],
                exclusions: vec!["muskelkater".into()],
                exclusion_mode: ExclusionMode::OnlyIfUnqualified,
                ..Default::default()
            },
        );
        let intake = StructuredIntakeData::default();

        let unqualified = vec![ChatMessage::new("m1", "Brustschmerz, wohl Muskelkater")];
        let eval =
            evaluate_red_flags(&SafetyInput::new("i", &intake, &unqualified).with_tuning(&tuning));
        assert!(eval.triggered_rules.is_empty());

        let qualified = vec![ChatMessage::new(
            "m1",
            "Brustschmerz mit Ausstrahlung in den Arm, kein Muskelkater",
        )];
        let eval =
            evaluate_red_flags(&SafetyInput::new("i", &intake, &qualified).with_tuning(&tuning));
        assert_eq!(eval.escalation_level, Some(EscalationLevel::B));
    }

    #[test]
    fn verified_uncertainties_raise_level_c() {
        let intake = StructuredIntakeData {
            uncertainties: vec!["Schwindel".into(), "Sehstörung".into(), "Fieber".into()],
            ..Default::default()
        };
        let messages = vec![
            ChatMessage::new("m1", "Manchmal Schwindel"),
            ChatMessage::new("m2", "Und eine komische Sehstörung"),
        ];
        let eval = evaluate(&intake, &messages);

        assert_eq!(eval.escalation_level, Some(EscalationLevel::C));
        assert_eq!(finding_ids(&eval), vec!["UNCERTAINTY_CLUSTER"]);
        assert_eq!(eval.safety_questions.len(), 2);
    }

    #[test]
    fn single_uncertainty_is_not_enough() {
        let intake = StructuredIntakeData {
            uncertainties: vec!["Schwindel".into(), "Fieber".into()],
            ..Default::default()
        };
        let messages = vec![ChatMessage::new("m1", "Manchmal Schwindel")];
        assert_eq!(evaluate(&intake, &messages).escalation_level, None);
    }

    #[test]
    fn negation_of_verified_rule_sets_contradiction() {
        let intake = StructuredIntakeData {
            relevant_negatives: vec!["kein Herzrasen".into()],
            ..Default::default()
        };
        let messages = vec![ChatMessage::new("m1", "Nachts habe ich Herzrasen")];
        let eval = evaluate(&intake, &messages);

        assert!(eval.contradiction_detected);
        assert_eq!(eval.escalation_level, Some(EscalationLevel::B));
        assert!(eval.check_ids.iter().any(|c| c == CHECK_NEGATION));
    }

    #[test]
    fn negation_ignores_unverified_rules() {
        let intake = StructuredIntakeData {
            relevant_negatives: vec!["kein Herzrasen".into()],
            ..Default::default()
        };
        let signals = vec![ExtractedSignal {
            rule_id: "SFTY-2.1-R-PALPITATIONS".into(),
            source: EvidenceSource::Chat,
            source_id: "ghost".into(),
            field_path: None,
            excerpt: "Herzrasen".into(),
        }];
        let eval =
            evaluate_red_flags(&SafetyInput::new("intake-1", &intake, &[]).with_signals(&signals));

        assert!(!eval.contradiction_detected);
        assert_eq!(eval.escalation_level, None);
        assert!(eval.red_flags.is_empty());
        assert!(eval.triggered_rules[0].needs_review);
    }

    #[test]
    fn negation_ignores_rules_held_by_tuning() {
        let intake = StructuredIntakeData {
            relevant_negatives: vec!["kein Herzrasen".into()],
            ..Default::default()
        };
        let mut tuning = BTreeMap::new();
        tuning.insert(
            "SFTY-2.1-R-PALPITATIONS".to_string(),
            RuleTuning {
                all_of: vec!["nachts".into()],
                ..Default::default()
            },
        );
        let messages = vec![ChatMessage::new("m1", "Herzrasen am Morgen")];
        let eval =
            evaluate_red_flags(&SafetyInput::new("i", &intake, &messages).with_tuning(&tuning));

        assert!(!eval.contradiction_detected);
        assert_eq!(eval.escalation_level, None);
    }

    #[test]
    fn signal_on_relevant_negative_is_not_evidence() {
        let intake = StructuredIntakeData {
            relevant_negatives: vec!["kein Brustschmerz".into()],
            ..Default::default()
        };
        let signals = vec![ExtractedSignal {
            rule_id: "SFTY-2.1-R-CHEST-PAIN".into(),
            source: EvidenceSource::Intake,
            source_id: "intake-1".into(),
            field_path: Some("relevant_negatives[0]".into()),
            excerpt: "Brustschmerz".into(),
        }];
        let eval =
            evaluate_red_flags(&SafetyInput::new("intake-1", &intake, &[]).with_signals(&signals));

        assert_eq!(eval.escalation_level, None);
        assert!(eval.red_flags.is_empty());
        assert!(!eval.triggered_rules[0].verified);
    }

    #[test]
    fn intake_signal_for_other_intake_is_rejected() {
        let intake = StructuredIntakeData {
            past_history: Some("Letzte Woche umgekippt".into()),
            ..Default::default()
        };
        let signals = vec![ExtractedSignal {
            rule_id: "SFTY-2.1-R-SYNCOPE".into(),
            source: EvidenceSource::Intake,
            source_id: "intake-2".into(),
            field_path: Some("past_history".into()),
            excerpt: "umgekippt".into(),
        }];
        let eval =
            evaluate_red_flags(&SafetyInput::new("intake-1", &intake, &[]).with_signals(&signals));

        // The field itself still matches, so the rule is verified through the real intake id only.
        let syncope = eval
            .triggered_rules
            .iter()
            .find(|r| r.rule_id == "SFTY-2.1-R-SYNCOPE")
            .expect("syncope rule");
        assert!(syncope.verified);
        assert!(syncope.evidence.iter().all(|e| e.source_id == "intake-1"));
    }

    #[test]
    fn intake_signal_with_wrong_id_alone_is_unverified() {
        let intake = StructuredIntakeData::default();
        let signals = vec![ExtractedSignal {
            rule_id: "SFTY-2.1-R-SYNCOPE".into(),
            source: EvidenceSource::Intake,
            source_id: "intake-2".into(),
            field_path: Some("past_history".into()),
            excerpt: "umgekippt".into(),
        }];
        let eval =
            evaluate_red_flags(&SafetyInput::new("intake-1", &intake, &[]).with_signals(&signals));
        assert_eq!(eval.escalation_level, None);
        assert!(eval.triggered_rules[0].needs_review);
    }

    #[test]
    fn signal_on_unknown_field_path_is_unverified() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Ich bin umgekippt".into()),
            ..Default::default()
        };
        let signals = vec![ExtractedSignal {
            rule_id: "SFTY-2.1-R-PSYCH-CRISIS".into(),
            source: EvidenceSource::Intake,
            source_id: "intake-1".into(),
            field_path: Some("hpi.mood".into()),
            excerpt: "Panikattacke".into(),
        }];
        let eval =
            evaluate_red_flags(&SafetyInput::new("intake-1", &intake, &[]).with_signals(&signals));

        let crisis = eval
            .triggered_rules
            .iter()
            .find(|r| r.rule_id == "SFTY-2.1-R-PSYCH-CRISIS")
            .expect("crisis rule");
        assert!(!crisis.verified);
        assert!(!finding_ids(&eval).contains(&"ACUTE_PSYCHIATRIC_CRISIS"));
    }

    #[test]
    fn signal_on_message_without_pattern_is_unverified() {
        let messages = vec![ChatMessage::new("m1", "Mir geht es eigentlich gut")];
        let signals = vec![ExtractedSignal {
            rule_id: "SFTY-2.1-R-PALPITATIONS".into(),
            source: EvidenceSource::Chat,
            source_id: "m1".into(),
            field_path: None,
            excerpt: "Herzrasen".into(),
        }];
        let intake = StructuredIntakeData::default();
        let eval = evaluate_red_flags(
            &SafetyInput::new("intake-1", &intake, &messages).with_signals(&signals),
        );

        assert_eq!(eval.escalation_level, None);
        assert_eq!(eval.triggered_rules.len(), 1);
        assert!(!eval.triggered_rules[0].verified);
        assert_eq!(eval.triggered_rules[0].evidence[0].source_id, "m1");
    }

    #[test]
    fn uncertainty_cluster_silent_when_flag_verified() {
        let intake = StructuredIntakeData {
            uncertainties: vec!["Schwindel".into(), "Sehstörung".into()],
            ..Default::default()
        };
        let messages = vec![
            ChatMessage::new("m1", "Manchmal Schwindel und Herzrasen"),
            ChatMessage::new("m2", "Und eine komische Sehstörung"),
        ];
        let eval = evaluate(&intake, &messages);

        assert_eq!(eval.escalation_level, Some(EscalationLevel::B));
        assert!(!finding_ids(&eval).contains(&"UNCERTAINTY_CLUSTER"));
        assert!(eval.rule_ids.iter().all(|id| id != RULE_UNCERTAINTY_CLUSTER));
        assert!(eval.safety_questions.is_empty());
    }

    #[test]
    fn negation_never_lowers_a() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Brustschmerz seit 40 Minuten".into()),
            relevant_negatives: vec!["kein Brustschmerz in Ruhe".into()],
            ..Default::default()
        };
        let eval = evaluate(&intake, &[]);
        assert!(eval.contradiction_detected);
        assert_eq!(eval.escalation_level, Some(EscalationLevel::A));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Brustschmerz und Herzrasen".into()),
            ..Default::default()
        };
        let messages = vec![ChatMessage::new("m1", "Ich bin umgekippt")];
        let first = serde_json::to_string(&evaluate(&intake, &messages)).expect("serialize");
        let second = serde_json::to_string(&evaluate(&intake, &messages)).expect("serialize");
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_resolves_to_no_level() {
        let eval = evaluate(&StructuredIntakeData::default(), &[]);
        assert_eq!(eval.escalation_level, None);
        assert!(eval.triggered_rules.is_empty());
        assert_eq!(eval.check_ids, vec![CHECK_EVIDENCE.to_string()]);
    }
}
