//! Differential reasoning.
//!
//! Turns the effective safety state and the structured intake into a risk score, matched
//! differential hypotheses and open clarifying questions. The signal heuristics are narrow
//! keyword checks on purpose; downstream expectations are pinned to them.

pub mod adapter;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BUILTIN_REASONING_VERSION, FINDING_CHEST_PAIN, FINDING_CHEST_PAIN_PROLONGED,
};
use crate::error::{ValidationCode, ValidationFailure};
use crate::intake::StructuredIntakeData;
use crate::levels::{ChatAction, EscalationLevel, Severity};
use crate::normalize::{contains_term, normalize_text};
use crate::overrides::EffectiveSafetyState;
use crate::red_flags::SafetyEvaluation;

pub use adapter::{ChecklistItem, DomainAdapterProfile, RiskThresholds};

const ANXIETY_TERMS: &[&str] = &["angst", "panik", "anxiety", "panic", "nervos", "besorgt"];

const HARD_RISK_PHRASES: &[&str] = &[
    "lebensbedrohlich",
    "notfall",
    "bewusstlos",
    "suizid",
    "kann nicht atmen",
    "emergency",
];

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Likelihood {
    #[default]
    Low,
    Medium,
    High,
}

impl Likelihood {
    /// One notch up, saturating at `High`.
    pub fn escalate(self) -> Self {
        match self {
            Likelihood::Low => Likelihood::Medium,
            Likelihood::Medium | Likelihood::High => Likelihood::High,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Active,
    #[default]
    Draft,
    Retired,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DifferentialTemplate {
    pub label: String,
    pub triggers: Vec<String>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub base_likelihood: Likelihood,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskWeights {
    pub red_flag: f64,
    pub chronicity: f64,
    pub anxiety_modifier: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionTemplate {
    pub id: String,
    /// Label of the differential this question clarifies.
    pub differential: String,
    pub question: String,
    pub priority: u8,
}

/// A versioned reasoning configuration as stored in the configuration store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReasoningConfig {
    pub version: String,
    #[serde(default)]
    pub status: ConfigStatus,
    pub differentials: Vec<DifferentialTemplate>,
    pub risk_weights: RiskWeights,
    #[serde(default)]
    pub open_questions: Vec<QuestionTemplate>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSignals {
    pub verified_red_flags: u32,
    pub chronicity: u8,
    pub anxiety: u8,
    pub hard_risk_phrase: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Differential {
    pub label: String,
    pub likelihood: Likelihood,
    pub matched_triggers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyAlignment {
    pub evaluator_level: Option<EscalationLevel>,
    pub effective_level: Option<EscalationLevel>,
    pub effective_action: ChatAction,
    pub overridden: bool,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterMetadata {
    pub adapter_id: String,
    pub adapter_version: String,
    pub config_version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClinicalReasoningPack {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub signals: ComponentSignals,
    pub differentials: Vec<Differential>,
    pub open_questions: Vec<QuestionTemplate>,
    pub recommended_next_steps: Vec<String>,
    pub uncertainties: Vec<String>,
    pub conflicts: Vec<String>,
    pub safety_alignment: SafetyAlignment,
    pub adapter: AdapterMetadata,
}

/// Inputs of one reasoning run.
#[derive(Clone, Copy, Debug)]
pub struct ReasoningInput<'a> {
    pub intake: &'a StructuredIntakeData,
    pub safety: &'a SafetyEvaluation,
    pub effective: &'a EffectiveSafetyState,
}

fn template(
    label: &str,
    triggers: &[&str],
    required: &[&str],
    exclusions: &[&str],
    base_likelihood: Likelihood,
) -> DifferentialTemplate {
    let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
    DifferentialTemplate {
        label: label.to_string(),
        triggers: owned(triggers),
        required: owned(required),
        exclusions: owned(exclusions),
        base_likelihood,
    }
}

fn question(id: &str, differential: &str, text: &str, priority: u8) -> QuestionTemplate {
    QuestionTemplate {
        id: id.to_string(),
        differential: differential.to_string(),
        question: text.to_string(),
        priority,
    }
}

impl ReasoningConfig {
    /// The compiled-in configuration, used when the store has no active entry.
    pub fn builtin() -> Self {
        use Likelihood::{Low, Medium};

        Self {
            version: BUILTIN_REASONING_VERSION.to_string(),
            status: ConfigStatus::Active,
            differentials: vec![
                template(
                    "Akutes Koronarsyndrom",
                    &["brustschmerz", "druck auf der brust", "brustenge"],
                    &[],
                    &[],
                    Medium,
                ),
                template("Lungenembolie", &["atemnot", "luftnot"], &[], &[], Low),
                template(
                    "Herzrhythmusstörung",
                    &["herzrasen", "herzstolpern", "palpitation"],
                    &[],
                    &[],
                    Medium,
                ),
                template(
                    "Panikstörung",
                    &["panik", "angst"],
                    &[],
                    &["bewusstlos", "umgekippt"],
                    Medium,
                ),
                template(
                    "Vasovagale Synkope",
                    &["umgekippt", "ohnmacht", "kollabiert"],
                    &[],
                    &[],
                    Medium,
                ),
                template(
                    "Migräne",
                    &["kopfschmerz", "migrane"],
                    &[],
                    &["lahmung", "sprachstorung"],
                    Medium,
                ),
                template(
                    "Gastroösophageale Refluxkrankheit",
                    &["sodbrennen", "saures aufstossen"],
                    &[],
                    &[],
                    Low,
                ),
                template(
                    "Depressive Episode",
                    &["niedergeschlagen", "antriebslos", "hoffnungslos", "depress"],
                    &[],
                    &[],
                    Medium,
                ),
                template(
                    "Akute Bronchitis",
                    &["husten"],
                    &["auswurf"],
                    &["atemnot"],
                    Low,
                ),
            ],
            risk_weights: RiskWeights {
                red_flag: 2.0,
                chronicity: 0.75,
                anxiety_modifier: -0.5,
            },
            open_questions: vec![
                question(
                    "acs-radiation",
                    "Akutes Koronarsyndrom",
                    "Strahlt der Schmerz in Arm, Kiefer oder Rücken aus?",
                    1,
                ),
                question(
                    "acs-exertion",
                    "Akutes Koronarsyndrom",
                    "Tritt der Schmerz bei körperlicher Belastung auf?",
                    2,
                ),
                question(
                    "arrhythmia-onset",
                    "Herzrhythmusstörung",
                    "Beginnt und endet das Herzrasen schlagartig?",
                    2,
                ),
                question(
                    "panic-situations",
                    "Panikstörung",
                    "Gibt es Situationen, in denen die Beschwerden typischerweise auftreten?",
                    3,
                ),
                question(
                    "syncope-prodrome",
                    "Vasovagale Synkope",
                    "Gab es vor dem Umkippen Schwitzen, Übelkeit oder Schwarzwerden vor Augen?",
                    2,
                ),
                question(
                    "migraine-aura",
                    "Migräne",
                    "Gehen den Kopfschmerzen Sehstörungen oder Flimmern voraus?",
                    2,
                ),
                question(
                    "depression-sleep",
                    "Depressive Episode",
                    "Wie schlafen Sie seit Beginn der Beschwerden?",
                    3,
                ),
                question(
                    "bronchitis-sputum",
                    "Akute Bronchitis",
                    "Welche Farbe hat der Auswurf?",
                    3,
                ),
            ],
        }
    }
}

/// Picks the active configuration with the greatest version string.
pub fn select_active_config(configs: &[ReasoningConfig]) -> Option<&ReasoningConfig> {
    configs
        .iter()
        .filter(|c| c.status == ConfigStatus::Active)
        .max_by(|a, b| a.version.cmp(&b.version))
}

pub fn validate_reasoning_config(config: &ReasoningConfig) -> Result<(), ValidationFailure> {
    let mut issues = Vec::new();

    if config.version.trim().is_empty() {
        issues.push("version cannot be empty".to_string());
    }

    let weights = [
        ("red_flag", config.risk_weights.red_flag),
        ("chronicity", config.risk_weights.chronicity),
        ("anxiety_modifier", config.risk_weights.anxiety_modifier),
    ];
    for (name, value) in weights {
        if !value.is_finite() {
            issues.push(format!("risk_weights.{name} must be a finite number"));
        }
    }

    let mut labels = BTreeSet::new();
    for (index, differential) in config.differentials.iter().enumerate() {
        if differential.label.trim().is_empty() {
            issues.push(format!("differentials[{index}].label cannot be empty"));
        } else if !labels.insert(differential.label.as_str()) {
            issues.push(format!("duplicate differential label {}", differential.label));
        }
        if differential.triggers.iter().all(|t| t.trim().is_empty()) {
            issues.push(format!("differentials[{index}] needs at least one trigger"));
        }
    }

    for question in &config.open_questions {
        if !labels.contains(question.differential.as_str()) {
            issues.push(format!(
                "open question {} references unknown differential {}",
                question.id, question.differential
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure::with_issues(
            ValidationCode::InvalidReasoningConfig,
            "reasoning configuration is invalid",
            issues,
        ))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 1 for day-scale durations, 2 for week/month/year-scale, else 0.
fn chronicity_signal(intake: &StructuredIntakeData) -> u8 {
    let Some(duration) = intake.field_text("hpi.duration") else {
        return 0;
    };
    let duration = normalize_text(duration);
    let long_terms = ["woche", "monat", "jahr", "week", "month", "year"];
    if long_terms.iter().any(|t| duration.contains(t)) {
        2
    } else if duration.contains("tag") || duration.contains("day") {
        1
    } else {
        0
    }
}

fn gathered_text(intake: &StructuredIntakeData) -> String {
    let joined: Vec<String> = intake.text_fields().into_iter().map(|f| f.text).collect();
    normalize_text(&joined.join("\n"))
}

fn match_differentials(
    config: &ReasoningConfig,
    adapter: &DomainAdapterProfile,
    text: &str,
    risk_level: RiskLevel,
) -> Vec<Differential> {
    let mut differentials: Vec<Differential> = config
        .differentials
        .iter()
        .filter_map(|template| {
            let matched_triggers: Vec<String> = template
                .triggers
                .iter()
                .filter(|t| contains_term(text, t))
                .cloned()
                .collect();
            let required_ok = template.required.iter().all(|t| contains_term(text, t));
            let excluded = template.exclusions.iter().any(|t| contains_term(text, t));

            if matched_triggers.is_empty() || !required_ok || excluded {
                return None;
            }

            let mut likelihood = adapter
                .priors
                .get(&template.label)
                .copied()
                .unwrap_or(template.base_likelihood);
            if risk_level == RiskLevel::High {
                likelihood = likelihood.escalate();
            }

            Some(Differential {
                label: template.label.clone(),
                likelihood,
                matched_triggers,
            })
        })
        .collect();

    differentials.sort_by(|a, b| {
        b.likelihood
            .cmp(&a.likelihood)
            .then_with(|| b.matched_triggers.len().cmp(&a.matched_triggers.len()))
            .then_with(|| a.label.cmp(&b.label))
    });
    differentials
}

fn select_open_questions(
    config: &ReasoningConfig,
    adapter: &DomainAdapterProfile,
    differentials: &[Differential],
) -> Vec<QuestionTemplate> {
    let labels: BTreeSet<&str> = differentials.iter().map(|d| d.label.as_str()).collect();
    let mut seen_ids = BTreeSet::new();
    let mut seen_text = BTreeSet::new();

    let mut questions: Vec<QuestionTemplate> = config
        .open_questions
        .iter()
        .chain(adapter.question_library.iter())
        .filter(|q| labels.contains(q.differential.as_str()))
        .filter(|q| seen_ids.insert(q.id.clone()) & seen_text.insert(normalize_text(&q.question)))
        .cloned()
        .collect();

    questions.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    questions
}

/// Compound findings and the component finding they already account for.
const SUBSUMED_FINDINGS: &[(&str, &str)] = &[(FINDING_CHEST_PAIN_PROLONGED, FINDING_CHEST_PAIN)];

/// Distinct verified rules of severity B or higher. A component of a verified compound finding
/// is not counted again.
fn verified_red_flag_count(safety: &SafetyEvaluation) -> u32 {
    let present: BTreeSet<&str> = safety.red_flags.iter().map(|f| f.id.as_str()).collect();
    let counted: BTreeSet<&str> = safety
        .red_flags
        .iter()
        .filter(|f| f.severity >= Severity::B)
        .filter(|f| {
            !SUBSUMED_FINDINGS
                .iter()
                .any(|(compound, component)| f.id == *component && present.contains(compound))
        })
        .map(|f| f.rule_id.as_str())
        .collect();
    counted.len() as u32
}

/// Builds the reasoning pack for one intake.
pub fn build_reasoning_pack(
    input: &ReasoningInput<'_>,
    config: &ReasoningConfig,
    adapter: &DomainAdapterProfile,
) -> ClinicalReasoningPack {
    let intake = input.intake;
    let effective = input.effective;
    let text = gathered_text(intake);

    let verified_red_flags = verified_red_flag_count(input.safety);
    let chronicity = chronicity_signal(intake);
    let anxiety = u8::from(ANXIETY_TERMS.iter().any(|t| text.contains(t)));
    let hard_risk_phrase = HARD_RISK_PHRASES.iter().any(|p| text.contains(p));

    let weights = config.risk_weights;
    let raw = f64::from(verified_red_flags) * weights.red_flag
        + f64::from(chronicity) * weights.chronicity
        + f64::from(anxiety) * weights.anxiety_modifier;
    let risk_score = round2(raw.max(0.0));

    let mut scored_level = adapter.thresholds.level_for(risk_score);
    if scored_level == RiskLevel::High && verified_red_flags == 0 && !hard_risk_phrase {
        scored_level = RiskLevel::Medium;
    }
    let risk_level = if effective.level == Some(EscalationLevel::A) {
        RiskLevel::High
    } else {
        scored_level
    };

    let differentials = match_differentials(config, adapter, &text, risk_level);
    let open_questions = select_open_questions(config, adapter, &differentials);

    let missing_checklist: Vec<&ChecklistItem> = adapter
        .short_anamnesis
        .iter()
        .filter(|item| !intake.has_field(&item.field_path))
        .collect();

    let mut next_steps = Vec::new();
    match effective.level {
        Some(EscalationLevel::A) => {
            next_steps.push("Sofortige notfallmedizinische Abklärung veranlassen (Notruf 112).".to_string())
        }
        Some(EscalationLevel::B) => next_steps.push("Ärztliche Abklärung noch heute einplanen.".to_string()),
        Some(EscalationLevel::C) => next_steps.push("Unklare Angaben im Gespräch klären.".to_string()),
        None => {}
    }
    if risk_level == RiskLevel::High && effective.level != Some(EscalationLevel::A) {
        next_steps.push("Fall priorisiert ärztlich sichten.".to_string());
    }
    next_steps.extend(
        differentials
            .iter()
            .map(|d| format!("Differenzialdiagnose prüfen: {}", d.label)),
    );
    if !open_questions.is_empty() {
        next_steps.push(format!(
            "Offene Fragen im Folgegespräch klären ({}).",
            open_questions.len()
        ));
    }
    if !missing_checklist.is_empty() {
        let labels: Vec<&str> = missing_checklist.iter().map(|i| i.label.as_str()).collect();
        next_steps.push(format!("Kurzanamnese vervollständigen: {}.", labels.join(", ")));
    }

    let mut uncertainties: Vec<String> = intake
        .uncertainties
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect();
    if differentials.is_empty() && intake.has_field("chief_complaint") {
        uncertainties.push("Keine passende Differenzialdiagnose gefunden.".to_string());
    }
    uncertainties.extend(
        missing_checklist
            .iter()
            .map(|i| format!("Kurzanamnese unvollständig: {}", i.label)),
    );

    let mut conflicts = Vec::new();
    if input.safety.contradiction_detected {
        conflicts.push("Relevante Negativangabe widerspricht einem ausgelösten Warnsignal.".to_string());
    }
    if effective.level == Some(EscalationLevel::A) && scored_level != RiskLevel::High {
        conflicts.push(format!(
            "Berechnete Risikostufe {scored_level:?} liegt unter der aktiven Sicherheitsstufe A."
        ));
    }
    if effective.overridden && effective.level != input.safety.escalation_level {
        conflicts.push("Klinische Übersteuerung weicht von der automatischen Einstufung ab.".to_string());
    }
    let unverified = input
        .safety
        .triggered_rules
        .iter()
        .filter(|r| !r.verified)
        .count();
    if unverified > 0 {
        conflicts.push(format!("Ungeprüfte Warnsignale erfordern Review ({unverified})."));
    }

    let level_label = effective
        .level
        .map(|l| l.to_string())
        .unwrap_or_else(|| "keine".to_string());
    let safety_alignment = SafetyAlignment {
        evaluator_level: input.safety.escalation_level,
        effective_level: effective.level,
        effective_action: effective.action,
        overridden: effective.overridden,
        summary: format!(
            "Sicherheitsstufe {level_label}, Aktion {}, Risiko {:?}",
            effective.action, risk_level
        ),
    };

    tracing::debug!(
        risk_score,
        risk_level = ?risk_level,
        differentials = differentials.len(),
        "reasoning pack built"
    );

    ClinicalReasoningPack {
        risk_score,
        risk_level,
        signals: ComponentSignals {
            verified_red_flags,
            chronicity,
            anxiety,
            hard_risk_phrase,
        },
        differentials,
        open_questions,
        recommended_next_steps: next_steps,
        uncertainties,
        conflicts,
        safety_alignment,
        adapter: AdapterMetadata {
            adapter_id: adapter.id.clone(),
            adapter_version: adapter.version.clone(),
            config_version: config.version.clone(),
        },
    }
}
