//! Document storage.
//!
//! The core never talks to a database product directly. Everything it needs is behind
//! [`DocumentStore`]:
//!
//! - keyed reads and appends for intakes, reports and audit events,
//! - a report write that lands together with its audit event or not at all,
//! - an admin allowlist lookup,
//! - one atomic read-modify-write primitive over a fixed set of usage counters
//!   ([`DocumentStore::update_counters`]).
//!
//! ## Document layout
//!
//! ```text
//! adminUsers/{adminId}
//! intakes/{intakeId}
//! intakes/{intakeId}/aiReports/{reportId}
//! intakes/{intakeId}/audit/{eventId}
//! adminUsage/{adminId}/days/{YYYY-MM-DD}
//! intakeUsage/{intakeId}/days/{YYYY-MM-DD}
//! ```
//!
//! Two implementations are provided: [`MemoryStore`] for tests and local development, and
//! [`SqliteStore`] for persistent deployments.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::constants::{ADMIN_USAGE_COLLECTION, INTAKE_USAGE_COLLECTION, USAGE_DAYS_COLLECTION};
use crate::documents::{AuditEvent, ReportDocument, Stored};
use crate::IntakeResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Source of "server time" for a store.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Useful for cooldown and day-rollover tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Address of one usage counter document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterKey {
    Admin { admin_id: String, day: NaiveDate },
    Intake { intake_id: String, day: NaiveDate },
}

impl CounterKey {
    pub fn admin(admin_id: impl Into<String>, day: NaiveDate) -> Self {
        CounterKey::Admin {
            admin_id: admin_id.into(),
            day,
        }
    }

    pub fn intake(intake_id: impl Into<String>, day: NaiveDate) -> Self {
        CounterKey::Intake {
            intake_id: intake_id.into(),
            day,
        }
    }

    /// Document path, e.g. `adminUsage/u1/days/2025-01-31`.
    pub fn path(&self) -> String {
        match self {
            CounterKey::Admin { admin_id, day } => format!(
                "{ADMIN_USAGE_COLLECTION}/{admin_id}/{USAGE_DAYS_COLLECTION}/{}",
                day_key(*day)
            ),
            CounterKey::Intake { intake_id, day } => format!(
                "{INTAKE_USAGE_COLLECTION}/{intake_id}/{USAGE_DAYS_COLLECTION}/{}",
                day_key(*day)
            ),
        }
    }
}

/// `YYYY-MM-DD` key for a UTC calendar day.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// One per-day usage counter. Missing documents read as the default (all zero).
///
/// Older documents used `count`, `pendingCount` and `lastCallAttemptAt`; those names are
/// accepted on read and never written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounter {
    #[serde(default, alias = "count")]
    pub count_success: u64,
    #[serde(default, alias = "pendingCount")]
    pub count_pending: u64,
    #[serde(default)]
    pub est_cost_usd: f64,
    #[serde(
        default,
        alias = "lastCallAttemptAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_call_at: Option<DateTime<Utc>>,
}

impl UsageCounter {
    /// Successful plus in-flight calls.
    pub fn used(&self) -> u64 {
        self.count_success + self.count_pending
    }
}

/// Closure run inside a counter transaction.
///
/// Receives the transaction's server time and the counters for the requested keys, in key
/// order. Returning `Err` aborts the transaction without writing anything.
pub type CounterUpdate<'a> = dyn FnMut(DateTime<Utc>, &mut [UsageCounter]) -> IntakeResult<()> + 'a;

/// Builds the audit event for a report from the report's id.
///
/// Returning `Err` aborts the write and neither document is stored.
pub type AuditFor<'a> = dyn Fn(&str) -> IntakeResult<AuditEvent> + 'a;

/// Storage operations needed by intake submission and report generation.
pub trait DocumentStore: Send + Sync {
    /// Current server time.
    fn now(&self) -> DateTime<Utc>;

    fn admin_exists(&self, admin_id: &str) -> IntakeResult<bool>;

    /// Add `admin_id` to the allowlist, replacing any stored email.
    fn grant_admin(&self, admin_id: &str, email: Option<&str>) -> IntakeResult<()>;

    /// Email recorded for an admin, `None` when unknown or not recorded.
    fn admin_email(&self, admin_id: &str) -> IntakeResult<Option<String>>;

    /// Store a new intake document and return its generated id.
    fn create_intake(&self, document: &Value) -> IntakeResult<String>;

    fn get_intake(&self, intake_id: &str) -> IntakeResult<Option<Value>>;

    /// Shallow-merge `fields` into the top level of an existing intake document.
    fn merge_intake(&self, intake_id: &str, fields: &Map<String, Value>) -> IntakeResult<()>;

    /// Store a report and the audit event built by `audit` in one write. Returns the report id.
    fn add_report_with_audit(
        &self,
        intake_id: &str,
        report: &ReportDocument,
        audit: &AuditFor<'_>,
    ) -> IntakeResult<String>;

    /// Reports for an intake, oldest first.
    fn list_reports(&self, intake_id: &str) -> IntakeResult<Vec<Stored<ReportDocument>>>;

    /// Audit events for an intake, oldest first.
    fn list_audit_events(&self, intake_id: &str) -> IntakeResult<Vec<Stored<AuditEvent>>>;

    fn read_counter(&self, key: &CounterKey) -> IntakeResult<UsageCounter>;

    /// Atomically read, update and write back the counters at `keys`.
    ///
    /// Implementations must guarantee that no other `update_counters` call touching any of
    /// the same keys interleaves between the read and the write.
    fn update_counters(&self, keys: &[CounterKey], update: &mut CounterUpdate<'_>)
        -> IntakeResult<()>;
}

/// Generate a new document id (32 lowercase hex characters).
pub(crate) fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counter_key_paths_use_utc_day_keys() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(
            CounterKey::admin("u1", day).path(),
            "adminUsage/u1/days/2025-03-07"
        );
        assert_eq!(
            CounterKey::intake("i9", day).path(),
            "intakeUsage/i9/days/2025-03-07"
        );
    }

    #[test]
    fn test_usage_counter_reads_legacy_field_names() {
        let counter: UsageCounter = serde_json::from_value(json!({
            "count": 3,
            "pendingCount": 1,
            "estCostUsd": 0.5,
            "lastCallAttemptAt": "2025-01-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(counter.count_success, 3);
        assert_eq!(counter.count_pending, 1);
        assert_eq!(counter.used(), 4);
        assert!(counter.last_call_at.is_some());
    }

    #[test]
    fn test_usage_counter_missing_fields_default_to_zero() {
        let counter: UsageCounter = serde_json::from_value(json!({})).unwrap();
        assert_eq!(counter, UsageCounter::default());
    }

    #[test]
    fn test_new_document_id_is_simple_hex() {
        let id = new_document_id();
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
