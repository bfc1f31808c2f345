use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cre_core::config::{load_policy_document, load_reasoning_configs, load_rule_tuning};
use cre_core::constants::DEFAULT_LOG_DIRECTIVE;
use cre_core::followup::LifecycleAction;
use cre_core::policy::SafetyPolicyDocument;
use cre_core::review::{validate_review_input, validate_transition, ReviewInput, ReviewStatus};
use cre_core::{ClinicalReasoningService, EngineConfig, EvaluationOutcome, EvaluationRequest};

#[derive(Parser)]
#[command(name = "cre")]
#[command(about = "Clinical reasoning engine CLI")]
struct Cli {
    /// Safety policy document (overrides CRE_POLICY_PATH)
    #[arg(long, global = true)]
    policy: Option<PathBuf>,
    /// Reasoning configuration store (overrides CRE_REASONING_PATH)
    #[arg(long, global = true)]
    reasoning: Option<PathBuf>,
    /// Rule tuning overrides (overrides CRE_TUNING_PATH)
    #[arg(long, global = true)]
    tuning: Option<PathBuf>,
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an intake request and print the outcome
    Evaluate {
        /// Request file (JSON, or YAML by extension); `-` reads stdin
        request: PathBuf,
        /// Evaluation time (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<String>,
        /// Default organisation scope
        #[arg(long)]
        org: Option<String>,
        /// Default funnel scope
        #[arg(long)]
        funnel: Option<String>,
    },
    /// Validate a safety policy document
    ValidatePolicy {
        /// Policy file (YAML or JSON)
        path: PathBuf,
    },
    /// Validate a review input, optionally against the current status
    ValidateReview {
        /// Review input file (JSON)
        path: PathBuf,
        /// Current review status of the record
        #[arg(long)]
        from: Option<String>,
    },
    /// Apply a lifecycle action to an evaluation outcome
    Transition {
        /// Evaluation outcome file (JSON) as printed by `cre evaluate`
        outcome: PathBuf,
        /// Action as JSON, e.g. '{"action":"skip","question_id":"gap:onset"}'
        #[arg(long)]
        action: String,
        /// Transition time (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<String>,
    },
}

/// Entry point for the `cre` binary.
///
/// # Environment Variables
/// - `CRE_POLICY_PATH`: safety policy document (default: built-in policy)
/// - `CRE_REASONING_PATH`: reasoning configuration store (default: built-in configuration)
/// - `CRE_TUNING_PATH`: rule tuning overrides (default: none)
/// - `RUST_LOG`: tracing filter, added to the `cre=info` default
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(DEFAULT_LOG_DIRECTIVE.parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Evaluate {
            request,
            now,
            org,
            funnel,
        } => {
            let config = load_engine_config(&cli)?.with_default_scope(org.clone(), funnel.clone());
            let service = ClinicalReasoningService::new(Arc::new(config));
            let request: EvaluationRequest = read_document(request)?;
            let outcome = service.evaluate(&request, parse_now(now.as_deref())?)?;
            print_json(&outcome, cli.pretty)?;
        }
        Commands::ValidatePolicy { path } => {
            let document = load_policy_document(path)
                .with_context(|| format!("policy {} is invalid", path.display()))?;
            println!(
                "policy {} is valid ({} rule overrides, {} organisations, {} funnels)",
                document.version,
                document.rules.len(),
                document.organizations.len(),
                document.funnels.len()
            );
        }
        Commands::ValidateReview { path, from } => {
            let input: ReviewInput = read_document(path)?;
            let validated = match validate_review_input(&input) {
                Ok(validated) => validated,
                Err(failure) => {
                    print_json(&failure, cli.pretty)?;
                    bail!("review input rejected: {}", failure.message);
                }
            };
            if let Some(from) = from {
                let from = ReviewStatus::parse(from)?;
                if let Err(failure) = validate_transition(Some(from), validated.status) {
                    print_json(&failure, cli.pretty)?;
                    bail!("review transition rejected: {}", failure.message);
                }
            }
            print_json(&validated, cli.pretty)?;
        }
        Commands::Transition {
            outcome,
            action,
            now,
        } => {
            let config = load_engine_config(&cli)?;
            let service = ClinicalReasoningService::new(Arc::new(config));
            let outcome: EvaluationOutcome = read_document(outcome)?;
            let action: LifecycleAction =
                serde_json::from_str(action).context("invalid lifecycle action")?;
            let intake = service.transition(
                &outcome.intake,
                &outcome.effective,
                &action,
                parse_now(now.as_deref())?,
            )?;
            print_json(&intake, cli.pretty)?;
        }
    }

    Ok(())
}

fn config_path(flag: &Option<PathBuf>, var: &str) -> Option<PathBuf> {
    flag.clone().or_else(|| {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    })
}

fn load_engine_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let policy = match config_path(&cli.policy, "CRE_POLICY_PATH") {
        Some(path) => load_policy_document(&path)
            .with_context(|| format!("failed to load policy {}", path.display()))?,
        None => SafetyPolicyDocument::builtin(),
    };
    let reasoning = match config_path(&cli.reasoning, "CRE_REASONING_PATH") {
        Some(path) => load_reasoning_configs(&path)
            .with_context(|| format!("failed to load reasoning configs {}", path.display()))?,
        None => Vec::new(),
    };
    let tuning = match config_path(&cli.tuning, "CRE_TUNING_PATH") {
        Some(path) => load_rule_tuning(&path)
            .with_context(|| format!("failed to load rule tuning {}", path.display()))?,
        None => BTreeMap::new(),
    };
    tracing::debug!(
        policy_version = %policy.version,
        reasoning_configs = reasoning.len(),
        "configuration documents loaded"
    );

    Ok(EngineConfig::new(policy, reasoning, tuning)?)
}

fn parse_now(raw: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match raw {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("invalid timestamp {raw}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

fn read_document<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let mut text = String::new();
    if path == Path::new("-") {
        std::io::stdin().read_to_string(&mut text)?;
    } else {
        text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
    }
    let yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    Ok(cre_core::config::parse_document(&text, !yaml, "Input")?)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}
