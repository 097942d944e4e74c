//! Report generation configuration.
//!
//! Configuration is resolved once at process startup and passed into the services. Request
//! handling never reads environment variables, so tests can construct a `ReportConfig` with
//! tiny limits (for example an admin limit of 2) and exercise boundaries deterministically.

use crate::constants::{DEFAULT_MODEL, DEFAULT_MODEL_ENDPOINT, DEFAULT_PROMPT_VERSION};
use crate::{IntakeError, IntakeResult};
use std::time::Duration;

/// Quota, spend, retry and model settings for report generation.
#[derive(Clone, Debug)]
pub struct ReportConfig {
    /// Maximum successful + in-flight generations per admin per UTC day.
    pub admin_daily_limit: u32,
    /// Maximum successful + in-flight generations per intake per UTC day.
    pub intake_daily_limit: u32,
    /// Minimum gap between two reservations by the same admin.
    pub admin_cooldown: Duration,
    /// Cost booked for a call whose real cost cannot be computed.
    pub est_cost_per_call_usd: f64,
    /// Daily spend ceiling per admin. Non-positive or non-finite disables the cap.
    pub daily_spend_cap_usd: f64,
    /// Retries after the first attempt, applied to HTTP 429 only.
    pub max_retries: u32,
    /// Backoff before retry `n` is `retry_base_delay * 2^n` plus jitter.
    pub retry_base_delay: Duration,
    /// Upper bound of the random jitter added to each backoff.
    pub retry_jitter: Duration,
    /// Per-attempt timeout for the upstream HTTP call.
    pub model_timeout: Duration,
    pub model: String,
    pub model_endpoint: String,
    pub prompt_version: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            admin_daily_limit: 50,
            intake_daily_limit: 10,
            admin_cooldown: Duration::from_secs(30),
            est_cost_per_call_usd: 0.001,
            daily_spend_cap_usd: 5.0,
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            retry_jitter: Duration::from_millis(200),
            model_timeout: Duration::from_secs(60),
            model: DEFAULT_MODEL.into(),
            model_endpoint: DEFAULT_MODEL_ENDPOINT.into(),
            prompt_version: DEFAULT_PROMPT_VERSION.into(),
        }
    }
}

impl ReportConfig {
    /// Build a configuration from `INTAKE_*` values supplied by `lookup`.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()` in `main`; tests pass a closure over a
    /// map. Missing or blank values fall back to [`ReportConfig::default`].
    ///
    /// # Errors
    ///
    /// Returns `IntakeError::InvalidConfig` if a value does not parse or fails validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> IntakeResult<Self> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> IntakeResult<Option<T>> {
            let Some(raw) = lookup(key).map(|v| v.trim().to_string()) else {
                return Ok(None);
            };
            if raw.is_empty() {
                return Ok(None);
            }
            raw.parse::<T>()
                .map(Some)
                .map_err(|_| IntakeError::InvalidConfig(format!("{key} has invalid value {raw:?}")))
        }

        let mut cfg = Self::default();
        if let Some(v) = parsed(&lookup, "INTAKE_ADMIN_DAILY_LIMIT")? {
            cfg.admin_daily_limit = v;
        }
        if let Some(v) = parsed(&lookup, "INTAKE_INTAKE_DAILY_LIMIT")? {
            cfg.intake_daily_limit = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "INTAKE_ADMIN_COOLDOWN_SECS")? {
            cfg.admin_cooldown = Duration::from_secs(v);
        }
        if let Some(v) = parsed(&lookup, "INTAKE_EST_COST_PER_CALL_USD")? {
            cfg.est_cost_per_call_usd = v;
        }
        if let Some(v) = parsed(&lookup, "INTAKE_DAILY_SPEND_CAP_USD")? {
            cfg.daily_spend_cap_usd = v;
        }
        if let Some(v) = parsed(&lookup, "INTAKE_MAX_RETRIES")? {
            cfg.max_retries = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "INTAKE_MODEL_TIMEOUT_SECS")? {
            cfg.model_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parsed::<String>(&lookup, "INTAKE_MODEL")? {
            cfg.model = v;
        }
        if let Some(v) = parsed::<String>(&lookup, "INTAKE_MODEL_ENDPOINT")? {
            cfg.model_endpoint = v;
        }
        if let Some(v) = parsed::<String>(&lookup, "INTAKE_PROMPT_VERSION")? {
            cfg.prompt_version = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check invariants that the ledger and orchestrator rely on.
    pub fn validate(&self) -> IntakeResult<()> {
        if self.admin_daily_limit == 0 || self.intake_daily_limit == 0 {
            return Err(IntakeError::InvalidConfig(
                "daily limits must be greater than zero".into(),
            ));
        }
        if !self.est_cost_per_call_usd.is_finite() || self.est_cost_per_call_usd < 0.0 {
            return Err(IntakeError::InvalidConfig(
                "fallback cost per call must be a non-negative number".into(),
            ));
        }
        if self.model_timeout.is_zero() {
            return Err(IntakeError::InvalidConfig(
                "model timeout must be greater than zero".into(),
            ));
        }
        if self.model.trim().is_empty() || self.prompt_version.trim().is_empty() {
            return Err(IntakeError::InvalidConfig(
                "model and prompt version cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// The enforced spend cap, or `None` when disabled.
    pub fn spend_cap_usd(&self) -> Option<f64> {
        (self.daily_spend_cap_usd.is_finite() && self.daily_spend_cap_usd > 0.0)
            .then_some(self.daily_spend_cap_usd)
    }
}
