//! Structured intake snapshot and chat evidence.
//!
//! The intake record is owned by the caller. Engine operations take it by reference and return
//! a new snapshot; nothing here is mutated in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::followup::ClinicalFollowup;
use crate::reasoning::ClinicalReasoningPack;
use crate::red_flags::SafetyEvaluation;

/// A verbatim chat message from the intake conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// History of present illness.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOfPresentIllness {
    pub onset: Option<String>,
    pub duration: Option<String>,
    pub course: Option<String>,
    pub trigger: Option<String>,
    pub frequency: Option<String>,
    pub associated_symptoms: Vec<String>,
    pub aggravating_factors: Option<String>,
    pub relieving_factors: Option<String>,
}

/// The semantic intake record consumed by every engine component.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredIntakeData {
    pub chief_complaint: Option<String>,
    pub hpi: HistoryOfPresentIllness,
    pub relevant_negatives: Vec<String>,
    pub past_history: Option<String>,
    pub medication: Option<String>,
    pub psychosocial_factors: Option<String>,
    pub prior_findings: Vec<String>,
    pub uncertainties: Vec<String>,
    /// Raw objective status overrides keyed by objective id. Unknown values are ignored.
    pub objective_overrides: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ClinicalReasoningPack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followup: Option<ClinicalFollowup>,
}

/// One non-empty text field of the intake record, addressed by its field path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntakeField {
    pub path: String,
    pub text: String,
}

fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn filled_item(items: &[String], index: usize) -> Option<&str> {
    items
        .get(index)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Splits `name[3]` into `("name", Some(3))`.
fn split_index(segment: &str) -> (&str, Option<usize>) {
    match segment.split_once('[') {
        Some((name, rest)) => {
            let index = rest.strip_suffix(']').and_then(|i| i.parse().ok());
            (name, index)
        }
        None => (segment, None),
    }
}

impl StructuredIntakeData {
    /// Scalar fields in a fixed order (list fields are appended by [`Self::text_fields`]).
    fn scalar_fields(&self) -> [(&'static str, &Option<String>); 11] {
        [
            ("chief_complaint", &self.chief_complaint),
            ("hpi.onset", &self.hpi.onset),
            ("hpi.duration", &self.hpi.duration),
            ("hpi.course", &self.hpi.course),
            ("hpi.trigger", &self.hpi.trigger),
            ("hpi.frequency", &self.hpi.frequency),
            ("hpi.aggravating_factors", &self.hpi.aggravating_factors),
            ("hpi.relieving_factors", &self.hpi.relieving_factors),
            ("past_history", &self.past_history),
            ("medication", &self.medication),
            ("psychosocial_factors", &self.psychosocial_factors),
        ]
    }

    /// All non-empty text fields, in a stable order.
    ///
    /// Relevant negatives are excluded: they are evidence *against* a finding and are handled
    /// by the contradiction check instead.
    pub fn text_fields(&self) -> Vec<IntakeField> {
        let mut fields: Vec<IntakeField> = self
            .scalar_fields()
            .into_iter()
            .filter_map(|(path, value)| {
                filled(value).map(|text| IntakeField {
                    path: path.to_string(),
                    text: text.to_string(),
                })
            })
            .collect();

        let lists: [(&str, &Vec<String>); 2] = [
            ("hpi.associated_symptoms", &self.hpi.associated_symptoms),
            ("prior_findings", &self.prior_findings),
        ];
        for (name, items) in lists {
            for (index, _) in items.iter().enumerate() {
                if let Some(text) = filled_item(items, index) {
                    fields.push(IntakeField {
                        path: format!("{name}[{index}]"),
                        text: text.to_string(),
                    });
                }
            }
        }

        fields
    }

    /// Looks up the text behind a field path, e.g. `hpi.duration` or `relevant_negatives[0]`.
    ///
    /// Returns `None` for unknown paths and empty fields.
    pub fn field_text(&self, path: &str) -> Option<&str> {
        let (name, index) = split_index(path);
        match (name, index) {
            ("hpi.associated_symptoms", Some(i)) => filled_item(&self.hpi.associated_symptoms, i),
            ("relevant_negatives", Some(i)) => filled_item(&self.relevant_negatives, i),
            ("prior_findings", Some(i)) => filled_item(&self.prior_findings, i),
            (name, None) => self
                .scalar_fields()
                .into_iter()
                .find(|(candidate, _)| *candidate == name)
                .and_then(|(_, value)| filled(value)),
            _ => None,
        }
    }

    /// Whether the field (or, for list fields, at least one item) has content.
    pub fn has_field(&self, path: &str) -> bool {
        match path {
            "hpi.associated_symptoms" => has_any(&self.hpi.associated_symptoms),
            "relevant_negatives" => has_any(&self.relevant_negatives),
            "prior_findings" => has_any(&self.prior_findings),
            other => self.field_text(other).is_some(),
        }
    }

    /// Concatenation of every text field plus relevant negatives, separated by newlines.
    pub fn free_text(&self) -> String {
        let mut parts: Vec<String> = self.text_fields().into_iter().map(|f| f.text).collect();
        parts.extend(
            self.relevant_negatives
                .iter()
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        );
        parts.join("\n")
    }
}

fn has_any(items: &[String]) -> bool {
    items.iter().any(|item| !item.trim().is_empty())
}
