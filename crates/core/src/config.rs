//! Engine configuration.
//!
//! Configuration is resolved once at process startup and passed into
//! [`crate::engine::ClinicalReasoningService`]. Nothing in the core reads environment variables;
//! binaries decide where documents come from and hand the loaded values in here.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{CreError, CreResult};
use crate::policy::{validate_policy_document, SafetyPolicyDocument};
use crate::reasoning::{
    select_active_config, validate_reasoning_config, DomainAdapterProfile, ReasoningConfig,
};
use crate::red_flags::catalog::rule_by_id;
use crate::red_flags::RuleTuning;

/// Engine configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    policy: SafetyPolicyDocument,
    reasoning: ReasoningConfig,
    adapter: DomainAdapterProfile,
    tuning: BTreeMap<String, RuleTuning>,
    default_org: Option<String>,
    default_funnel: Option<String>,
}

impl EngineConfig {
    /// Validates the documents and picks the active reasoning configuration.
    ///
    /// When no configuration in the set is active the compiled-in one is used.
    pub fn new(
        policy: SafetyPolicyDocument,
        reasoning_configs: Vec<ReasoningConfig>,
        tuning: BTreeMap<String, RuleTuning>,
    ) -> CreResult<Self> {
        validate_policy_document(&policy)?;
        for config in &reasoning_configs {
            validate_reasoning_config(config)?;
        }
        if let Some(unknown) = tuning.keys().find(|id| rule_by_id(id).is_none()) {
            return Err(CreError::InvalidInput(format!(
                "rule tuning references unknown rule id {unknown}"
            )));
        }

        let reasoning = match select_active_config(&reasoning_configs) {
            Some(active) => active.clone(),
            None => {
                tracing::warn!("no active reasoning configuration, using built-in");
                ReasoningConfig::builtin()
            }
        };

        tracing::info!(
            policy_version = %policy.version,
            reasoning_version = %reasoning.version,
            tuned_rules = tuning.len(),
            "engine configuration resolved"
        );

        Ok(Self {
            policy,
            reasoning,
            adapter: DomainAdapterProfile::internal_medicine(),
            tuning,
            default_org: None,
            default_funnel: None,
        })
    }

    /// The compiled-in policy and reasoning configuration without tuning.
    pub fn builtin() -> Self {
        Self {
            policy: SafetyPolicyDocument::builtin(),
            reasoning: ReasoningConfig::builtin(),
            adapter: DomainAdapterProfile::internal_medicine(),
            tuning: BTreeMap::new(),
            default_org: None,
            default_funnel: None,
        }
    }

    /// Organisation and funnel used when a request names none.
    pub fn with_default_scope(mut self, org: Option<String>, funnel: Option<String>) -> Self {
        self.default_org = org.filter(|o| !o.trim().is_empty());
        self.default_funnel = funnel.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn policy(&self) -> &SafetyPolicyDocument {
        &self.policy
    }

    pub fn reasoning(&self) -> &ReasoningConfig {
        &self.reasoning
    }

    pub fn adapter(&self) -> &DomainAdapterProfile {
        &self.adapter
    }

    pub fn tuning(&self) -> &BTreeMap<String, RuleTuning> {
        &self.tuning
    }

    pub fn default_org(&self) -> Option<&str> {
        self.default_org.as_deref()
    }

    pub fn default_funnel(&self) -> Option<&str> {
        self.default_funnel.as_deref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

fn schema_mismatch<E: std::fmt::Display>(
    what: &str,
    err: serde_path_to_error::Error<E>,
) -> CreError {
    let path = err.path().to_string();
    let source = err.into_inner();
    let path = if path.is_empty() {
        "<root>"
    } else {
        path.as_str()
    };
    CreError::Translation(format!("{what} schema mismatch at {path}: {source}"))
}

/// Parses a configuration document, reporting the failing field path on schema errors.
pub fn parse_document<T: DeserializeOwned>(text: &str, json: bool, what: &str) -> CreResult<T> {
    if json {
        let mut deserializer = serde_json::Deserializer::from_str(text);
        serde_path_to_error::deserialize(&mut deserializer).map_err(|err| schema_mismatch(what, err))
    } else {
        let deserializer = serde_yaml::Deserializer::from_str(text);
        serde_path_to_error::deserialize(deserializer).map_err(|err| schema_mismatch(what, err))
    }
}

fn load_document<T: DeserializeOwned>(path: &Path, what: &str) -> CreResult<T> {
    let text = std::fs::read_to_string(path)?;
    let json = DocumentFormat::for_path(path) == DocumentFormat::Json;
    parse_document(&text, json, what)
}

/// Loads a safety policy document (YAML, or JSON by `.json` extension).
pub fn load_policy_document(path: &Path) -> CreResult<SafetyPolicyDocument> {
    let document: SafetyPolicyDocument = load_document(path, "Safety policy")?;
    validate_policy_document(&document)?;
    Ok(document)
}

/// Loads the reasoning configuration store: a list of versioned configurations.
pub fn load_reasoning_configs(path: &Path) -> CreResult<Vec<ReasoningConfig>> {
    let configs: Vec<ReasoningConfig> = load_document(path, "Reasoning configuration")?;
    for config in &configs {
        validate_reasoning_config(config)?;
    }
    Ok(configs)
}

/// Loads per-rule tuning keyed by rule id.
pub fn load_rule_tuning(path: &Path) -> CreResult<BTreeMap<String, RuleTuning>> {
    load_document(path, "Rule tuning")
}
