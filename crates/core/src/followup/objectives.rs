//! Objective slots and their status.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::intake::StructuredIntakeData;

/// Status of one objective slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Missing,
    Unclear,
    Resolved,
    Answered,
    Verified,
    BlockedBySafety,
}

impl ObjectiveStatus {
    /// Parses a status value set by a clinician.
    ///
    /// `blocked_by_safety` is derived from the safety state only and is not accepted here.
    pub fn parse_override(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "missing" => Some(Self::Missing),
            "unclear" => Some(Self::Unclear),
            "resolved" => Some(Self::Resolved),
            "answered" => Some(Self::Answered),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Unclear => "unclear",
            Self::Resolved => "resolved",
            Self::Answered => "answered",
            Self::Verified => "verified",
            Self::BlockedBySafety => "blocked_by_safety",
        }
    }

    /// Whether the patient-facing part of this objective is done.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Answered | Self::Verified | Self::BlockedBySafety
        )
    }
}

/// Savepoint blocks, in their fixed order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockId {
    CoreSymptomProfile,
    MedicalContext,
    SupportingContext,
    ProgramSpecific,
}

impl BlockId {
    pub const ALL: [BlockId; 4] = [
        BlockId::CoreSymptomProfile,
        BlockId::MedicalContext,
        BlockId::SupportingContext,
        BlockId::ProgramSpecific,
    ];
}

/// One slot of the fixed objective catalog.
#[derive(Debug)]
pub struct ObjectiveDef {
    pub id: &'static str,
    pub label: &'static str,
    pub priority: u8,
    pub block: BlockId,
    /// Only active while the extended-workup trigger is active.
    pub extended: bool,
    /// Field paths; the objective is filled when any of them holds text.
    pub fields: &'static [&'static str],
    pub question: &'static str,
}

const fn objective(
    id: &'static str,
    label: &'static str,
    priority: u8,
    block: BlockId,
    fields: &'static [&'static str],
    question: &'static str,
) -> ObjectiveDef {
    ObjectiveDef {
        id,
        label,
        priority,
        block,
        extended: false,
        fields,
        question,
    }
}

const fn extended(
    id: &'static str,
    label: &'static str,
    priority: u8,
    fields: &'static [&'static str],
    question: &'static str,
) -> ObjectiveDef {
    ObjectiveDef {
        id,
        label,
        priority,
        block: BlockId::ProgramSpecific,
        extended: true,
        fields,
        question,
    }
}

pub static OBJECTIVES: [ObjectiveDef; 13] = [
    objective(
        "chief-complaint",
        "Hauptbeschwerde",
        1,
        BlockId::CoreSymptomProfile,
        &["chief_complaint"],
        "Was ist Ihre Hauptbeschwerde?",
    ),
    objective(
        "onset",
        "Beginn",
        1,
        BlockId::CoreSymptomProfile,
        &["hpi.onset"],
        "Wann haben die Beschwerden begonnen?",
    ),
    objective(
        "duration",
        "Dauer",
        2,
        BlockId::CoreSymptomProfile,
        &["hpi.duration"],
        "Wie lange halten die Beschwerden jeweils an?",
    ),
    objective(
        "course",
        "Verlauf",
        3,
        BlockId::CoreSymptomProfile,
        &["hpi.course"],
        "Wie haben sich die Beschwerden seitdem entwickelt?",
    ),
    objective(
        "trigger",
        "Auslöser",
        3,
        BlockId::CoreSymptomProfile,
        &["hpi.trigger"],
        "Gibt es einen erkennbaren Auslöser?",
    ),
    objective(
        "frequency",
        "Häufigkeit",
        3,
        BlockId::CoreSymptomProfile,
        &["hpi.frequency"],
        "Wie häufig treten die Beschwerden auf?",
    ),
    objective(
        "medication",
        "Medikation",
        4,
        BlockId::MedicalContext,
        &["medication"],
        "Welche Medikamente nehmen Sie regelmäßig ein?",
    ),
    objective(
        "past-history",
        "Vorerkrankungen",
        4,
        BlockId::MedicalContext,
        &["past_history"],
        "Welche Vorerkrankungen sind bei Ihnen bekannt?",
    ),
    objective(
        "prior-findings",
        "Vorbefunde",
        5,
        BlockId::MedicalContext,
        &["prior_findings"],
        "Liegen Ihnen Vorbefunde oder Arztbriefe vor, die Sie hochladen können?",
    ),
    objective(
        "psychosocial",
        "Psychosoziale Faktoren",
        6,
        BlockId::SupportingContext,
        &["psychosocial_factors"],
        "Gibt es berufliche oder private Belastungen, die mit den Beschwerden zusammenhängen?",
    ),
    extended(
        "associated-symptoms",
        "Begleitsymptome",
        2,
        &["hpi.associated_symptoms"],
        "Welche weiteren Beschwerden treten zusammen mit den Hauptbeschwerden auf?",
    ),
    extended(
        "aggravating-relieving",
        "Verstärkende und lindernde Faktoren",
        3,
        &["hpi.aggravating_factors", "hpi.relieving_factors"],
        "Was verschlimmert die Beschwerden und was lindert sie?",
    ),
    extended(
        "relevant-negatives",
        "Relevante Negativbefunde",
        3,
        &["relevant_negatives"],
        "Welche Beschwerden haben Sie ausdrücklich nicht?",
    ),
];

pub fn objective_by_id(id: &str) -> Option<&'static ObjectiveDef> {
    OBJECTIVES.iter().find(|o| o.id == id)
}

/// Objectives that take part in the current computation.
pub fn active_objectives(extended_active: bool) -> impl Iterator<Item = &'static ObjectiveDef> {
    OBJECTIVES
        .iter()
        .filter(move |o| !o.extended || extended_active)
}

pub fn is_filled(def: &ObjectiveDef, intake: &StructuredIntakeData) -> bool {
    def.fields.iter().any(|path| intake.has_field(path))
}

/// Computed state of one active objective.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveState {
    pub id: String,
    pub label: String,
    pub block: BlockId,
    pub priority: u8,
    pub extended: bool,
    pub status: ObjectiveStatus,
}

/// Parses clinician status overrides, dropping unknown values.
pub fn parse_overrides(raw: &BTreeMap<String, String>) -> BTreeMap<&str, ObjectiveStatus> {
    raw.iter()
        .filter_map(|(id, value)| {
            if objective_by_id(id).is_none() {
                tracing::warn!(objective = %id, "override for unknown objective dropped");
                return None;
            }
            match ObjectiveStatus::parse_override(value) {
                Some(status) => Some((id.as_str(), status)),
                None => {
                    tracing::warn!(objective = %id, value = %value, "unknown objective status dropped");
                    None
                }
            }
        })
        .collect()
}

/// Resolves every active objective's status.
///
/// Filled fields win over everything. A hard safety stop blocks the rest, then clinician
/// overrides apply, then answered gap questions.
pub fn evaluate_objectives(
    intake: &StructuredIntakeData,
    extended_active: bool,
    hard_stop: bool,
    answered: &BTreeSet<String>,
) -> Vec<ObjectiveState> {
    let overrides = parse_overrides(&intake.objective_overrides);

    active_objectives(extended_active)
        .map(|def| {
            let status = if is_filled(def, intake) {
                ObjectiveStatus::Resolved
            } else if hard_stop {
                ObjectiveStatus::BlockedBySafety
            } else if let Some(status) = overrides.get(def.id) {
                *status
            } else if answered.contains(def.id) {
                ObjectiveStatus::Answered
            } else {
                ObjectiveStatus::Missing
            };

            ObjectiveState {
                id: def.id.to_string(),
                label: def.label.to_string(),
                block: def.block,
                priority: def.priority,
                extended: def.extended,
                status,
            }
        })
        .collect()
}
