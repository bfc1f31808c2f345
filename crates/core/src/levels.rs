//! Closed severity, escalation and chat-action scales.
//!
//! Variant order is rank order, so `Ord` gives `C < B < A` and `None < Warn < RequireConfirm <
//! HardStop`. `Option<EscalationLevel>` then ranks "no level" below every level.

use serde::{Deserialize, Serialize};

/// Severity of a red-flag rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    C,
    B,
    A,
}

/// Escalation tier driving chat action and downstream routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EscalationLevel {
    C,
    B,
    A,
}

impl From<Severity> for EscalationLevel {
    fn from(value: Severity) -> Self {
        match value {
            Severity::A => EscalationLevel::A,
            Severity::B => EscalationLevel::B,
            Severity::C => EscalationLevel::C,
        }
    }
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EscalationLevel::A => "A",
            EscalationLevel::B => "B",
            EscalationLevel::C => "C",
        };
        f.write_str(label)
    }
}

/// What the chat surface must do with the conversation.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    #[default]
    None,
    Warn,
    RequireConfirm,
    HardStop,
}

impl ChatAction {
    pub fn is_hard_stop(self) -> bool {
        matches!(self, ChatAction::HardStop)
    }
}

impl std::fmt::Display for ChatAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ChatAction::None => "none",
            ChatAction::Warn => "warn",
            ChatAction::RequireConfirm => "require_confirm",
            ChatAction::HardStop => "hard_stop",
        };
        f.write_str(label)
    }
}
