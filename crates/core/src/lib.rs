//! # CRE Core
//!
//! Core logic of the clinical reasoning engine.
//!
//! This crate turns an intake snapshot and its chat evidence into:
//! - a safety evaluation (verified red flags, triggered rules, escalation level)
//! - a resolved safety policy result and the effective state after clinician overrides
//! - a differential reasoning pack
//! - a prioritised follow-up queue with lifecycle and savepoints
//!
//! Every operation is a pure, synchronous transform over immutable inputs. Time is passed in.
//!
//! **No I/O concerns**: persistence, rendering and request routing belong to callers. The only
//! file access is the configuration loading in [`config`].

pub mod config;
pub mod constants;
pub mod duration;
pub mod engine;
pub mod error;
pub mod followup;
pub mod intake;
pub mod levels;
pub mod normalize;
pub mod overrides;
pub mod policy;
pub mod reasoning;
pub mod red_flags;
pub mod review;

pub use config::EngineConfig;
pub use engine::{ClinicalReasoningService, EvaluationOutcome, EvaluationRequest};
pub use error::{CreError, CreResult, ValidationCode, ValidationFailure};
pub use intake::{ChatMessage, StructuredIntakeData};
pub use levels::{ChatAction, EscalationLevel, Severity};

pub use cre_types::{NonEmptyText, Slug, TextError};
