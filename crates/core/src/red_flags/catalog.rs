//! The fixed clinical red-flag allowlist.
//!
//! Patterns are regular expressions over normalised text (see [`crate::normalize`]). Default
//! tunings can be replaced per rule id by configuration; the patterns themselves cannot.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::levels::Severity;

/// How exclusion terms interact with qualifier groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionMode {
    /// Any exclusion hit drops the rule.
    #[default]
    Always,
    /// An exclusion hit drops the rule only when no `any_of` group qualified it.
    OnlyIfUnqualified,
}

/// Per-rule qualifier and exclusion tuning.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleTuning {
    /// Groups of terms; a group qualifies when all of its terms occur in one message or field.
    pub any_of: Vec<Vec<String>>,
    /// Terms that must all occur somewhere in the verified evidence.
    pub all_of: Vec<String>,
    pub exclusions: Vec<String>,
    pub exclusion_mode: ExclusionMode,
    /// For A-severity rules: at least one of these terms must occur, else the rule is
    /// downgraded to B and held for review.
    pub a_level_requires_any_of: Vec<String>,
}

/// One entry of the allowlist.
#[derive(Debug)]
pub struct RedFlagRule {
    pub finding_id: &'static str,
    pub rule_id: &'static str,
    pub title: &'static str,
    pub severity: Severity,
    patterns: Vec<Regex>,
    pub default_tuning: RuleTuning,
}

impl RedFlagRule {
    /// Whether any pattern matches the normalised text.
    pub fn matches(&self, normalized: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(normalized))
    }
}

fn terms(items: &[&str]) -> Vec<String> {
    items.iter().map(|t| t.to_string()).collect()
}

fn rule(
    finding_id: &'static str,
    rule_id: &'static str,
    title: &'static str,
    severity: Severity,
    patterns: &[&str],
    default_tuning: RuleTuning,
) -> RedFlagRule {
    RedFlagRule {
        finding_id,
        rule_id,
        title,
        severity,
        patterns: patterns
            .iter()
            .map(|p| Regex::new(p).expect("valid red flag pattern"))
            .collect(),
        default_tuning,
    }
}

static CATALOG: LazyLock<Vec<RedFlagRule>> = LazyLock::new(|| {
    vec![
        rule(
            "CHEST_PAIN",
            "SFTY-2.1-R-CHEST-PAIN",
            "Brustschmerz",
            Severity::B,
            &[
                r"brustschmerz",
                r"schmerz\w* (?:in|auf|hinter) (?:der|dem) brust",
                r"druck auf der brust",
                r"engegefuhl in der brust",
                r"brustenge",
                r"chest pain",
            ],
            RuleTuning {
                exclusions: terms(&["muskelkater", "beim abtasten"]),
                exclusion_mode: ExclusionMode::OnlyIfUnqualified,
                ..Default::default()
            },
        ),
        rule(
            "SYNCOPE",
            "SFTY-2.1-R-SYNCOPE",
            "Synkope / Bewusstseinsverlust",
            Severity::B,
            &[
                r"umgekippt",
                r"ohnmacht",
                r"bewusstlos",
                r"synkope",
                r"kollabiert",
                r"zusammengebrochen",
                r"fainted",
                r"passed out",
            ],
            RuleTuning::default(),
        ),
        rule(
            "SEVERE_DYSPNEA",
            "SFTY-2.1-R-DYSPNEA",
            "Schwere Atemnot",
            Severity::A,
            &[
                r"atemnot",
                r"luftnot",
                r"keine luft",
                r"kann (?:kaum|nicht) (?:mehr )?atmen",
                r"ersticke",
                r"shortness of breath",
            ],
            RuleTuning {
                a_level_requires_any_of: terms(&[
                    "in ruhe",
                    "beim sprechen",
                    "blaue lippen",
                    "nicht atmen",
                    "kaum atmen",
                    "erstick",
                    "zunehmend",
                ]),
                ..Default::default()
            },
        ),
        rule(
            "SUICIDAL_IDEATION",
            "SFTY-2.1-R-SUICIDAL",
            "Suizidgedanken",
            Severity::A,
            &[
                r"suizid",
                r"selbstmord",
                r"(?:mich|mir) (?:umbringen|das leben nehmen)",
                r"nicht mehr leben",
                r"will sterben",
                r"lebensmude",
            ],
            RuleTuning {
                exclusions: terms(&["keine suizid", "nie suizid", "nicht suizid", "keine selbstmord"]),
                exclusion_mode: ExclusionMode::Always,
                ..Default::default()
            },
        ),
        rule(
            "ACUTE_PSYCHIATRIC_CRISIS",
            "SFTY-2.1-R-PSYCH-CRISIS",
            "Akute psychische Krise",
            Severity::B,
            &[
                r"stimmen hor",
                r"halluzin",
                r"psychose",
                r"verfolgt (?:mich|werde)",
                r"ausser kontrolle",
                r"nervenzusammenbruch",
                r"jemandem (?:etwas )?antun",
            ],
            RuleTuning::default(),
        ),
        rule(
            "SEVERE_PALPITATIONS",
            "SFTY-2.1-R-PALPITATIONS",
            "Starkes Herzrasen",
            Severity::B,
            &[
                r"herzrasen",
                r"herzjagen",
                r"herz rast",
                r"herzstolpern",
                r"palpitation",
                r"heart racing",
            ],
            RuleTuning::default(),
        ),
        rule(
            "ACUTE_NEUROLOGICAL",
            "SFTY-2.1-R-NEURO",
            "Akutes neurologisches Defizit",
            Severity::A,
            &[
                r"lahmung",
                r"gelahmt",
                r"sprachstorung",
                r"kann nicht (?:mehr )?sprechen",
                r"hangender mundwinkel",
                r"halbseitig",
                r"taubheit\w* (?:im|in der|einer) (?:arm|bein|gesicht|korperhalfte)",
                r"schlimmste\w* kopfschmerz",
                r"krampfanfall",
                r"sehverlust",
            ],
            RuleTuning {
                a_level_requires_any_of: terms(&[
                    "plotzlich",
                    "seit heute",
                    "seit stunden",
                    "gerade eben",
                    "halbseitig",
                    "akut",
                    "schlimmste",
                ]),
                ..Default::default()
            },
        ),
        rule(
            "SEVERE_UNCONTROLLED_SYMPTOMS",
            "SFTY-2.1-R-SEVERE-SYMPTOMS",
            "Schwere unkontrollierte Beschwerden",
            Severity::B,
            &[
                r"unertraglich",
                r"nicht (?:mehr )?auszuhalten",
                r"starkste\w* schmerz",
                r"blut (?:erbrochen|gespuckt)",
                r"bluterbrechen",
                r"hohes fieber",
                r"schwarzer stuhl",
            ],
            RuleTuning::default(),
        ),
    ]
});

/// The allowlist in evaluation order.
pub fn rules() -> &'static [RedFlagRule] {
    &CATALOG
}

/// Looks up a catalog rule by its rule id.
pub fn rule_by_id(rule_id: &str) -> Option<&'static RedFlagRule> {
    CATALOG.iter().find(|r| r.rule_id == rule_id)
}

/// Whether `rule_id` names a catalog rule or one of the synthetic rules.
pub fn is_known_rule_id(rule_id: &str) -> bool {
    rule_by_id(rule_id).is_some()
        || rule_id == crate::constants::RULE_CHEST_PAIN_PROLONGED
        || rule_id == crate::constants::RULE_UNCERTAINTY_CLUSTER
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_text;

    #[test]
    fn catalog_covers_eight_categories() {
        let ids: Vec<&str> = rules().iter().map(|r| r.finding_id).collect();
        assert_eq!(ids.len(), 8);
        assert!(ids.contains(&"SUICIDAL_IDEATION"));
        assert!(ids.contains(&"ACUTE_NEUROLOGICAL"));
    }

    #[test]
    fn patterns_match_normalised_german_text() {
        let syncope = rule_by_id("SFTY-2.1-R-SYNCOPE").expect("syncope rule");
        assert!(syncope.matches(&normalize_text("Ich bin umgekippt")));

        let neuro = rule_by_id("SFTY-2.1-R-NEURO").expect("neuro rule");
        assert!(neuro.matches(&normalize_text("Plötzliche Lähmung im Arm")));

        let chest = rule_by_id("SFTY-2.1-R-CHEST-PAIN").expect("chest rule");
        assert!(chest.matches(&normalize_text("Schmerzen hinter der Brust")));
        assert!(!chest.matches(&normalize_text("Bauchschmerzen")));
    }

    #[test]
    fn synthetic_rule_ids_are_known() {
        assert!(is_known_rule_id("SFTY-2.1-R-CHEST-PAIN-20M"));
        assert!(is_known_rule_id("SFTY-2.1-R-UNCERTAINTY"));
        assert!(!is_known_rule_id("SFTY-9-R-UNKNOWN"));
    }

    #[test]
    fn tuning_deserializes_with_defaults() {
        let tuning: RuleTuning = serde_yaml::from_str(
            "any_of:\n  - [druck, ausstrahlung]\nexclusion_mode: only_if_unqualified\n",
        )
        .expect("parse tuning");
        assert_eq!(tuning.any_of.len(), 1);
        assert_eq!(tuning.exclusion_mode, ExclusionMode::OnlyIfUnqualified);
        assert!(tuning.exclusions.is_empty());
    }
}
