//! Follow-up question candidates.
//!
//! Three sources feed the queue: reviewer requests, open questions from the reasoning pack and
//! one gap question per missing objective. Candidates are deduplicated, filtered and ordered
//! here; lifecycle decisions live in the parent module.

use std::collections::BTreeSet;

use cre_types::{Slug, TextError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::objectives::{objective_by_id, ObjectiveState, ObjectiveStatus, OBJECTIVES};
use crate::normalize::normalize_text;
use crate::reasoning::ClinicalReasoningPack;

/// Where a question came from. Variant order is precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    ClinicianRequest,
    Reasoning,
    GapRule,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowupQuestion {
    pub id: String,
    pub question: String,
    pub source: QuestionSource,
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_id: Option<String>,
}

const CLINICIAN_PRIORITY: u8 = 1;

/// Hex characters of the text digest appended to clinician question ids.
const CLINICIAN_DIGEST_CHARS: usize = 8;

/// Keyword heuristics mapping reviewer requests to objectives. First match wins.
const REQUEST_KEYWORDS: &[(&str, &[&str])] = &[
    ("medication", &["medikament", "medikation", "tablette", "arznei"]),
    ("prior-findings", &["befund", "arztbrief", "labor", "ekg", "rontgen"]),
    ("past-history", &["vorerkrank", "diagnose", "operation"]),
    ("onset", &["beginn", "seit wann", "angefangen"]),
    ("duration", &["dauer", "wie lange"]),
    ("frequency", &["haufig", "wie oft"]),
    ("course", &["verlauf", "entwickelt"]),
    ("trigger", &["ausloser", "ausgelost"]),
    ("associated-symptoms", &["begleit", "weitere beschwerden"]),
    ("aggravating-relieving", &["verschlimmer", "linder", "besser"]),
    ("relevant-negatives", &["ausgeschlossen", "verneint"]),
    ("psychosocial", &["stress", "belastung", "familie", "arbeit"]),
];

/// Trims a reviewer request and makes sure it reads as a question.
pub fn clinician_question_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.ends_with('?') {
        Some(trimmed.to_string())
    } else {
        Some(format!("{trimmed}?"))
    }
}

fn infer_objective(normalized: &str) -> Option<String> {
    REQUEST_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| normalized.contains(k)))
        .map(|(id, _)| id.to_string())
}

/// Stable id for a normalised reviewer request: a readable slug plus a digest of the full text.
///
/// Requests whose normalised text differs get different ids, even past the slug length limit.
pub fn clinician_question_id(normalized: &str) -> Result<String, TextError> {
    let slug = Slug::from_text(normalized)?;
    let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
    Ok(format!(
        "clinician:{slug}-{}",
        &digest[..CLINICIAN_DIGEST_CHARS]
    ))
}

/// Builds one candidate per usable reviewer request.
pub fn clinician_candidates(requests: &[String]) -> Vec<FollowupQuestion> {
    requests
        .iter()
        .filter_map(|raw| {
            let question = clinician_question_text(raw)?;
            let normalized = normalize_text(&question);
            let id = match clinician_question_id(&normalized) {
                Ok(id) => id,
                Err(error) => {
                    tracing::warn!(request = %raw, %error, "clinician request dropped");
                    return None;
                }
            };
            Some(FollowupQuestion {
                id,
                question,
                source: QuestionSource::ClinicianRequest,
                priority: CLINICIAN_PRIORITY,
                objective_id: infer_objective(&normalized),
            })
        })
        .collect()
}

pub fn reasoning_candidates(pack: Option<&ClinicalReasoningPack>) -> Vec<FollowupQuestion> {
    pack.map(|pack| {
        pack.open_questions
            .iter()
            .map(|template| FollowupQuestion {
                id: format!("reasoning:{}", template.id),
                question: template.question.clone(),
                source: QuestionSource::Reasoning,
                priority: template.priority,
                objective_id: None,
            })
            .collect()
    })
    .unwrap_or_default()
}

pub fn gap_question_id(objective_id: &str) -> String {
    format!("gap:{objective_id}")
}

/// One gap question per missing objective.
pub fn gap_candidates(objectives: &[ObjectiveState]) -> Vec<FollowupQuestion> {
    objectives
        .iter()
        .filter(|o| o.status == ObjectiveStatus::Missing)
        .filter_map(|o| {
            let def = objective_by_id(&o.id)?;
            Some(FollowupQuestion {
                id: gap_question_id(def.id),
                question: def.question.to_string(),
                source: QuestionSource::GapRule,
                priority: def.priority,
                objective_id: Some(def.id.to_string()),
            })
        })
        .collect()
}

fn order(a: &FollowupQuestion, b: &FollowupQuestion) -> std::cmp::Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.id.cmp(&b.id))
}

/// Drops duplicates by id and by normalised text. The higher-precedence source survives.
pub fn deduplicate(mut candidates: Vec<FollowupQuestion>) -> Vec<FollowupQuestion> {
    candidates.sort_by(|a, b| {
        a.source
            .cmp(&b.source)
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut ids = BTreeSet::new();
    let mut texts = BTreeSet::new();
    candidates.retain(|candidate| {
        let text = normalize_text(&candidate.question);
        if ids.contains(&candidate.id) || texts.contains(&text) {
            return false;
        }
        ids.insert(candidate.id.clone());
        texts.insert(text);
        true
    });
    candidates
}

/// Question ids the patient no longer needs to see.
#[derive(Clone, Copy, Debug)]
pub struct HandledQuestions<'a> {
    pub asked: &'a BTreeSet<String>,
    pub completed: &'a BTreeSet<String>,
    pub skipped: &'a BTreeSet<String>,
}

impl HandledQuestions<'_> {
    pub fn contains(&self, id: &str) -> bool {
        self.asked.contains(id) || self.completed.contains(id) || self.skipped.contains(id)
    }
}

/// Whether a candidate belongs to an extended objective while the extended workup is off.
fn tied_to_inactive_objective(candidate: &FollowupQuestion, extended_active: bool) -> bool {
    if extended_active {
        return false;
    }
    candidate
        .objective_id
        .as_deref()
        .and_then(objective_by_id)
        .is_some_and(|def| def.extended)
}

/// Dedup, filter and order the full candidate set.
pub fn rank_candidates(
    candidates: Vec<FollowupQuestion>,
    handled: &HandledQuestions<'_>,
    extended_active: bool,
) -> Vec<FollowupQuestion> {
    let mut ranked: Vec<FollowupQuestion> = deduplicate(candidates)
        .into_iter()
        .filter(|c| !handled.contains(&c.id))
        .filter(|c| !tied_to_inactive_objective(c, extended_active))
        .collect();
    ranked.sort_by(order);
    ranked
}

/// Objective ids whose question was completed, either as a gap question or a clinician request
/// mapped to the objective.
pub fn answered_objectives(
    completed: &BTreeSet<String>,
    clinician: &[FollowupQuestion],
) -> BTreeSet<String> {
    let from_gaps = OBJECTIVES
        .iter()
        .filter(|def| completed.contains(&gap_question_id(def.id)))
        .map(|def| def.id.to_string());
    let from_requests = clinician
        .iter()
        .filter(|c| completed.contains(&c.id))
        .filter_map(|c| c.objective_id.clone());
    from_gaps.chain(from_requests).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, text: &str, source: QuestionSource, priority: u8) -> FollowupQuestion {
        FollowupQuestion {
            id: id.to_string(),
            question: text.to_string(),
            source,
            priority,
            objective_id: None,
        }
    }

    #[test]
    fn clinician_request_is_normalised() {
        let requests = vec![
            "  Welche Medikamente nehmen Sie ein ".to_string(),
            "   ".to_string(),
            "???".to_string(),
        ];
        let candidates = clinician_candidates(&requests);
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.question, "Welche Medikamente nehmen Sie ein?");
        assert!(c.id.starts_with("clinician:welche-medikamente-nehmen-sie-ein-"));
        assert_eq!(
            c.id.len(),
            "clinician:welche-medikamente-nehmen-sie-ein-".len() + 8
        );
        assert_eq!(c.priority, 1);
        assert_eq!(c.objective_id.as_deref(), Some("medication"));
    }

    #[test]
    fn clinician_ids_are_stable() {
        let first = clinician_candidates(&["Welche Medikamente?".to_string()]);
        let second = clinician_candidates(&["  welche   Medikamente".to_string()]);
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn long_requests_differing_at_the_end_keep_distinct_ids() {
        let requests = vec![
            "Bitte laden Sie die Befunde der kardiologischen Untersuchung vom Januar hoch"
                .to_string(),
            "Bitte laden Sie die Befunde der kardiologischen Untersuchung vom Februar hoch"
                .to_string(),
        ];
        let candidates = clinician_candidates(&requests);
        assert_ne!(candidates[0].id, candidates[1].id);

        let deduped = deduplicate(candidates);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn dedup_keeps_higher_precedence_source() {
        let candidates = vec![
            candidate("gap:onset", "Wann hat es begonnen?", QuestionSource::GapRule, 1),
            candidate(
                "clinician:wann-hat-es-begonnen",
                "Wann hat es  begonnen?",
                QuestionSource::ClinicianRequest,
                1,
            ),
            candidate("reasoning:x", "Frage A?", QuestionSource::Reasoning, 2),
            candidate("reasoning:x", "Frage B?", QuestionSource::Reasoning, 3),
        ];
        let deduped = deduplicate(candidates);
        let ids: Vec<&str> = deduped.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["clinician:wann-hat-es-begonnen", "reasoning:x"]);
        assert_eq!(deduped[1].question, "Frage A?");
    }

    #[test]
    fn ranking_orders_and_filters() {
        let asked = BTreeSet::from(["gap:duration".to_string()]);
        let empty = BTreeSet::new();
        let handled = HandledQuestions {
            asked: &asked,
            completed: &empty,
            skipped: &empty,
        };
        let mut negatives = candidate(
            "gap:relevant-negatives",
            "Negativ?",
            QuestionSource::GapRule,
            3,
        );
        negatives.objective_id = Some("relevant-negatives".into());

        let ranked = rank_candidates(
            vec![
                candidate("gap:onset", "Beginn?", QuestionSource::GapRule, 1),
                candidate("gap:duration", "Dauer?", QuestionSource::GapRule, 2),
                candidate("reasoning:a", "Ausstrahlung?", QuestionSource::Reasoning, 1),
                candidate("gap:chief-complaint", "Hauptbeschwerde?", QuestionSource::GapRule, 1),
                negatives.clone(),
            ],
            &handled,
            false,
        );
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["reasoning:a", "gap:chief-complaint", "gap:onset"]);

        let ranked = rank_candidates(vec![negatives], &handled, true);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn answered_objectives_from_gap_and_clinician_questions() {
        let clinician = clinician_candidates(&["Welche Medikamente?".to_string()]);
        let completed = BTreeSet::from(["gap:onset".to_string(), clinician[0].id.clone()]);
        let answered = answered_objectives(&completed, &clinician);
        assert_eq!(
            answered,
            BTreeSet::from(["medication".to_string(), "onset".to_string()])
        );
    }
}
