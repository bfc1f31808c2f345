//! Constants used throughout the CRE core crate.
//!
//! Rule and check identifiers are part of the audit trail and must stay stable across releases.

/// Version tag of the compiled-in red-flag ruleset and the built-in safety policy.
pub const SAFETY_RULESET_VERSION: &str = "SFTY-2.1";

/// Compound rule: chest pain lasting at least [`CHEST_PAIN_PROLONGED_MINUTES`].
pub const RULE_CHEST_PAIN_PROLONGED: &str = "SFTY-2.1-R-CHEST-PAIN-20M";

/// Synthetic rule: several uncertainties confirmed by the conversation.
pub const RULE_UNCERTAINTY_CLUSTER: &str = "SFTY-2.1-R-UNCERTAINTY";

/// Check id recorded for evidence verification.
pub const CHECK_EVIDENCE: &str = "SFTY-2.1-C-EVIDENCE";

/// Check id recorded for the relevant-negative contradiction check.
pub const CHECK_NEGATION: &str = "SFTY-2.1-C-NEGATION";

/// Check id recorded for the uncertainty cluster check.
pub const CHECK_UNCERTAINTY: &str = "SFTY-2.1-C-UNCERTAINTY";

pub const FINDING_CHEST_PAIN: &str = "CHEST_PAIN";
pub const FINDING_CHEST_PAIN_PROLONGED: &str = "CHEST_PAIN_PROLONGED";
pub const FINDING_UNCERTAINTY_CLUSTER: &str = "UNCERTAINTY_CLUSTER";

/// Chest pain of at least this many minutes is escalated to level A.
pub const CHEST_PAIN_PROLONGED_MINUTES: f64 = 20.0;

/// Number of verified uncertainties that raise level C.
pub const UNCERTAINTY_CLUSTER_MIN: usize = 2;

/// Symptom duration (in weeks) that activates the extended workup.
pub const UC2_DURATION_WEEKS: f64 = 12.0;

/// Maximum number of questions surfaced as `next_questions`.
pub const MAX_NEXT_QUESTIONS: usize = 3;

/// Maximum excerpt length (in characters) stored on an evidence reference.
pub const MAX_EXCERPT_CHARS: usize = 160;

/// Identifier of the fixed domain adapter.
pub const ADAPTER_ID: &str = "internal-medicine-de";

pub const ADAPTER_VERSION: &str = "1.3.0";

/// Version of the compiled-in reasoning configuration.
pub const BUILTIN_REASONING_VERSION: &str = "CRE-R-1.0";

/// Default tracing directive installed by binaries.
pub const DEFAULT_LOG_DIRECTIVE: &str = "cre=info";
