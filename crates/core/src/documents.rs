//! Persisted documents written by report generation.
//!
//! Both documents are append-only children of an intake:
//!
//! ```text
//! intakes/{intakeId}/aiReports/{reportId}   ReportDocument
//! intakes/{intakeId}/audit/{eventId}        AuditEvent
//! ```

use crate::pricing::CostBasis;
use chrono::{DateTime, Utc};
use intake_types::{ReportMode, ReportType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token counters reported by the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// A generated report. Created once per successful generation and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    #[serde(rename = "type")]
    pub kind: ReportType,
    /// Duplicate of `type` kept for older admin console builds.
    pub report_type: ReportType,
    pub mode: ReportMode,
    pub model: String,
    pub prompt_version: String,
    pub usage: Option<TokenUsage>,
    pub est_cost_usd: f64,
    pub cost_basis: CostBasis,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_json: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub created_by_uid: String,
    pub created_by_email: Option<String>,
}

/// Append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub actor_uid: String,
    pub actor_email: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

/// A stored document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub id: String,
    pub document: T,
}
