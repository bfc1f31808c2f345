use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("translation error: {0}")]
    Translation(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(ValidationFailure),
}

pub type CreResult<T> = std::result::Result<T, CreError>;

/// Discriminant for an expected validation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    UnknownStatus,
    MissingRequestedItems,
    MissingReviewNotes,
    InvalidTransition,
    MissingOverrideReason,
    InvalidPolicy,
    InvalidReasoningConfig,
}

/// Structured result of a failed validation.
///
/// Returned (never raised) for review inputs, overrides and configuration documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub code: ValidationCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl ValidationFailure {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            issues: Vec::new(),
        }
    }

    pub fn with_issues(code: ValidationCode, message: impl Into<String>, issues: Vec<String>) -> Self {
        Self {
            code,
            message: message.into(),
            issues,
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.issues.is_empty() {
            write!(f, " ({})", self.issues.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

impl From<ValidationFailure> for CreError {
    fn from(value: ValidationFailure) -> Self {
        CreError::InvalidConfig(value)
    }
}
