//! Constants used throughout the intake core crate.
//!
//! Usage collection names mirror the document paths used by the admin console.

/// Per-admin usage collection; day documents live under `days/`.
pub const ADMIN_USAGE_COLLECTION: &str = "adminUsage";

/// Per-intake usage collection; day documents live under `days/`.
pub const INTAKE_USAGE_COLLECTION: &str = "intakeUsage";

pub const USAGE_DAYS_COLLECTION: &str = "days";

/// Audit event type written after a successful generation.
pub const AUDIT_AI_REPORT_GENERATED: &str = "ai_report_generated";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default prompt version stamped onto every report.
pub const DEFAULT_PROMPT_VERSION: &str = "v2-lite-mode-controller-minimised";

/// Default model provider endpoint.
pub const DEFAULT_MODEL_ENDPOINT: &str = "https://api.openai.com/v1/responses";

/// Default form version recorded on submissions that omit one.
pub const DEFAULT_FORM_VERSION: &str = "intake-v2";

/// Default SQLite database file.
pub const DEFAULT_DB_PATH: &str = "intake.db";

/// Maximum red-flag strings forwarded to the model.
pub const MAX_RED_FLAGS: usize = 12;

/// Ages outside `0..=MAX_PLAUSIBLE_AGE` are treated as unknown.
pub const MAX_PLAUSIBLE_AGE: u32 = 120;
