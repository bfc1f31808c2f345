//! Extended-workup (UC2) trigger detection.

use serde::{Deserialize, Serialize};

use crate::constants::UC2_DURATION_WEEKS;
use crate::duration::parse_duration;
use crate::intake::StructuredIntakeData;
use crate::normalize::normalize_text;

const SYMPTOM_CLUSTERS: &[(&str, &[&str])] = &[
    (
        "cardio",
        &["brustschmerz", "herzrasen", "herzstolpern", "palpitation", "brustenge"],
    ),
    ("respiratory", &["atemnot", "luftnot", "husten", "keuchen"]),
    (
        "gastro",
        &["ubelkeit", "erbrechen", "durchfall", "bauchschmerz", "sodbrennen", "verstopfung"],
    ),
    ("neuro", &["kopfschmerz", "schwindel", "taubheit", "kribbeln", "migrane"]),
    (
        "musculoskeletal",
        &["ruckenschmerz", "gelenkschmerz", "muskelschmerz", "nackenschmerz"],
    ),
    (
        "psych",
        &["niedergeschlagen", "antriebslos", "angst", "panik", "schlafstorung"],
    ),
    ("dermatologic", &["ausschlag", "juckreiz", "hautrotung", "ekzem"]),
];

const CAUSAL_PHRASES: &[&str] = &[
    "wegen",
    "durch",
    "seitdem",
    "ausgelost",
    "infolge",
    "because",
    "caused by",
];

const CHRONIC_CONDITIONS: &[&str] = &[
    "chronisch",
    "diabetes",
    "hypertonie",
    "bluthochdruck",
    "asthma",
    "copd",
    "rheuma",
    "herzinsuffizienz",
    "epilepsie",
    "depression",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerReason {
    LongDuration { weeks: f64 },
    MultiCluster { clusters: Vec<String> },
    ChronicCondition { keyword: String },
    ClinicianRequest,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Uc2Trigger {
    pub active: bool,
    pub reasons: Vec<TriggerReason>,
}

impl Uc2Trigger {
    fn push(&mut self, reason: TriggerReason) {
        self.active = true;
        self.reasons.push(reason);
    }
}

/// Symptom duration in weeks, from the HPI duration or else the chief complaint.
fn symptom_weeks(intake: &StructuredIntakeData) -> Option<f64> {
    ["hpi.duration", "chief_complaint"]
        .iter()
        .filter_map(|path| intake.field_text(path))
        .find_map(parse_duration)
        .map(|d| d.weeks())
}

/// Whole-word phrase test on normalised text, so `durch` does not match `durchfall`.
fn has_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn matched_clusters(text: &str) -> Vec<String> {
    SYMPTOM_CLUSTERS
        .iter()
        .filter(|(_, terms)| terms.iter().any(|t| text.contains(t)))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Evaluates the trigger conditions that come from the intake record.
///
/// Pending clinician requests are added by the caller once the excluded question sets are
/// known.
pub fn detect_trigger(intake: &StructuredIntakeData) -> Uc2Trigger {
    let mut trigger = Uc2Trigger::default();

    if let Some(weeks) = symptom_weeks(intake) {
        if weeks >= UC2_DURATION_WEEKS {
            trigger.push(TriggerReason::LongDuration {
                weeks: (weeks * 10.0).round() / 10.0,
            });
        }
    }

    let text = normalize_text(
        &intake
            .text_fields()
            .into_iter()
            .filter(|f| f.path != "past_history" && f.path != "medication")
            .map(|f| f.text)
            .collect::<Vec<_>>()
            .join("\n"),
    );
    let clusters = matched_clusters(&text);
    let causal = CAUSAL_PHRASES.iter().any(|p| has_phrase(&text, p));
    if clusters.len() >= 2 && !causal {
        trigger.push(TriggerReason::MultiCluster { clusters });
    }

    if let Some(history) = intake.field_text("past_history") {
        let history = normalize_text(history);
        if let Some(keyword) = CHRONIC_CONDITIONS.iter().find(|k| history.contains(*k)) {
            trigger.push(TriggerReason::ChronicCondition {
                keyword: keyword.to_string(),
            });
        }
    }

    trigger
}

/// Adds the clinician-request reason when reviewer questions are still pending.
pub fn with_pending_requests(mut trigger: Uc2Trigger, pending: bool) -> Uc2Trigger {
    if pending {
        trigger.push(TriggerReason::ClinicianRequest);
    }
    trigger
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::HistoryOfPresentIllness;

    #[test]
    fn long_duration_activates() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Kopfschmerz".into()),
            hpi: HistoryOfPresentIllness {
                duration: Some("seit 3 Monaten".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let trigger = detect_trigger(&intake);
        assert!(trigger.active);
        assert!(matches!(
            trigger.reasons[0],
            TriggerReason::LongDuration { weeks } if weeks >= 12.0
        ));
    }

    #[test]
    fn short_duration_does_not_activate() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Kopfschmerz seit 2 Monaten".into()),
            ..Default::default()
        };
        assert!(!detect_trigger(&intake).active);
    }

    #[test]
    fn two_clusters_without_causal_phrase() {
        let intake = StructuredIntakeData {
            chief_complaint: Some("Kopfschmerz und Übelkeit".into()),
            ..Default::default()
        };
        let trigger = detect_trigger(&intake);
        assert_eq!(
            trigger.reasons,
            vec![TriggerReason::MultiCluster {
                clusters: vec!["gastro".to_string(), "neuro".to_string()]
            }]
        );

        let causal = StructuredIntakeData {
            chief_complaint: Some("Übelkeit wegen Kopfschmerz".into()),
            ..Default::default()
        };
        assert!(!detect_trigger(&causal).active);
    }

    #[test]
    fn causal_phrase_needs_whole_word() {
        assert!(has_phrase("ubelkeit durch stress", "durch"));
        assert!(!has_phrase("durchfall und kopfschmerz", "durch"));
        let intake = StructuredIntakeData {
            chief_complaint: Some("Durchfall und Kopfschmerz".into()),
            ..Default::default()
        };
        assert!(detect_trigger(&intake).active);
    }

    #[test]
    fn chronic_condition_in_history() {
        let intake = StructuredIntakeData {
            past_history: Some("Diabetes Typ 2".into()),
            ..Default::default()
        };
        let trigger = detect_trigger(&intake);
        assert_eq!(
            trigger.reasons,
            vec![TriggerReason::ChronicCondition {
                keyword: "diabetes".to_string()
            }]
        );
    }

    #[test]
    fn pending_requests_activate() {
        let trigger = with_pending_requests(Uc2Trigger::default(), true);
        assert!(trigger.active);
        assert!(!with_pending_requests(Uc2Trigger::default(), false).active);
    }
}
