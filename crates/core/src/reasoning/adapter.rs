//! The fixed domain adapter profile.
//!
//! The adapter carries what is specific to a clinical domain rather than to a configuration
//! version: hypothesis priors, score thresholds, its own question library and the short
//! anamnesis checklist.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Likelihood, QuestionTemplate, RiskLevel};
use crate::constants::{ADAPTER_ID, ADAPTER_VERSION};

/// Score thresholds for risk levels. Scores below `medium` are low.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
}

impl RiskThresholds {
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub field_path: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainAdapterProfile {
    pub id: String,
    pub version: String,
    pub priors: BTreeMap<String, Likelihood>,
    pub thresholds: RiskThresholds,
    pub question_library: Vec<QuestionTemplate>,
    pub short_anamnesis: Vec<ChecklistItem>,
}

fn question(id: &str, differential: &str, text: &str, priority: u8) -> QuestionTemplate {
    QuestionTemplate {
        id: id.to_string(),
        differential: differential.to_string(),
        question: text.to_string(),
        priority,
    }
}

fn checklist(field_path: &str, label: &str) -> ChecklistItem {
    ChecklistItem {
        field_path: field_path.to_string(),
        label: label.to_string(),
    }
}

impl DomainAdapterProfile {
    /// Internal medicine, German-language intake.
    pub fn internal_medicine() -> Self {
        Self {
            id: ADAPTER_ID.to_string(),
            version: ADAPTER_VERSION.to_string(),
            priors: BTreeMap::from([
                ("Akutes Koronarsyndrom".to_string(), Likelihood::High),
                ("Lungenembolie".to_string(), Likelihood::Medium),
                ("Panikstörung".to_string(), Likelihood::Low),
            ]),
            thresholds: RiskThresholds {
                medium: 1.5,
                high: 4.0,
            },
            question_library: vec![
                question(
                    "adapter-acs-risk",
                    "Akutes Koronarsyndrom",
                    "Bestehen Risikofaktoren wie Rauchen, Bluthochdruck oder Diabetes?",
                    2,
                ),
                question(
                    "adapter-pe-risk",
                    "Lungenembolie",
                    "Hatten Sie kürzlich eine Operation, eine lange Reise oder ein geschwollenes Bein?",
                    1,
                ),
                question(
                    "acs-radiation",
                    "Akutes Koronarsyndrom",
                    "Strahlt der Schmerz in Arm, Kiefer oder Rücken aus?",
                    1,
                ),
            ],
            short_anamnesis: vec![
                checklist("chief_complaint", "Hauptbeschwerde"),
                checklist("hpi.onset", "Beginn"),
                checklist("hpi.duration", "Dauer"),
                checklist("medication", "Medikation"),
            ],
        }
    }
}
