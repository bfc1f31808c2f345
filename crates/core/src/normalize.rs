//! Evidence normalisation.
//!
//! Every matcher in the engine runs over normalised text: lowercase, diacritics folded to their
//! base letter, whitespace collapsed. Patterns in rule catalogs are authored in the same form
//! (`ubelkeit`, not `Übelkeit`).

use std::collections::BTreeMap;

use crate::intake::{ChatMessage, StructuredIntakeData};

fn fold_char(ch: char, out: &mut String) {
    match ch {
        'ä' | 'à' | 'á' | 'â' | 'ã' | 'å' => out.push('a'),
        'ö' | 'ò' | 'ó' | 'ô' | 'õ' | 'ø' => out.push('o'),
        'ü' | 'ù' | 'ú' | 'û' => out.push('u'),
        'è' | 'é' | 'ê' | 'ë' => out.push('e'),
        'ì' | 'í' | 'î' | 'ï' => out.push('i'),
        'ç' => out.push('c'),
        'ñ' => out.push('n'),
        'ß' => out.push_str("ss"),
        other => out.push(other),
    }
}

/// Lowercases, folds diacritics and collapses whitespace.
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        fold_char(ch, &mut out);
    }

    out
}

/// Normalised substring test. `term` is normalised too, so callers may pass raw config terms.
pub fn contains_term(normalized_haystack: &str, term: &str) -> bool {
    let term = normalize_text(term);
    !term.is_empty() && normalized_haystack.contains(&term)
}

/// Immutable evidence lookup for one evaluation.
///
/// Holds the structured snapshot and the normalised content of every chat message by id.
/// Verification always goes through this value; there is no ambient lookup.
#[derive(Debug)]
pub struct EvidenceContext<'a> {
    intake: &'a StructuredIntakeData,
    messages: BTreeMap<&'a str, MessageEntry<'a>>,
    order: Vec<&'a str>,
}

#[derive(Debug)]
struct MessageEntry<'a> {
    raw: &'a str,
    normalized: String,
}

impl<'a> EvidenceContext<'a> {
    /// Builds the context. Duplicate message ids keep the first occurrence.
    pub fn new(intake: &'a StructuredIntakeData, messages: &'a [ChatMessage]) -> Self {
        let mut map = BTreeMap::new();
        let mut order = Vec::with_capacity(messages.len());

        for message in messages {
            if map.contains_key(message.id.as_str()) {
                tracing::debug!(message_id = %message.id, "duplicate chat message id ignored");
                continue;
            }
            map.insert(
                message.id.as_str(),
                MessageEntry {
                    raw: &message.content,
                    normalized: normalize_text(&message.content),
                },
            );
            order.push(message.id.as_str());
        }

        Self {
            intake,
            messages: map,
            order,
        }
    }

    pub fn intake(&self) -> &'a StructuredIntakeData {
        self.intake
    }

    /// Normalised content of a message, if the id is known.
    pub fn message(&self, id: &str) -> Option<&str> {
        self.messages.get(id).map(|m| m.normalized.as_str())
    }

    /// Verbatim content of a message, if the id is known.
    pub fn raw_message(&self, id: &str) -> Option<&'a str> {
        self.messages.get(id).map(|m| m.raw)
    }

    /// `(id, normalised content)` in conversation order.
    pub fn messages(&self) -> impl Iterator<Item = (&'a str, &str)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| (*id, m.normalized.as_str())))
    }

    /// Normalised text of an intake field path, if the path is known and filled.
    pub fn field(&self, path: &str) -> Option<String> {
        self.intake.field_text(path).map(normalize_text)
    }
}
