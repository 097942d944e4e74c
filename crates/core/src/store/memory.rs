//! In-process document store.

use super::{
    new_document_id, AuditFor, Clock, CounterKey, CounterUpdate, DocumentStore, SystemClock,
    UsageCounter,
};
use crate::documents::{AuditEvent, ReportDocument, Stored};
use crate::{IntakeError, IntakeResult};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Documents {
    /// Admin uid to recorded email.
    admins: HashMap<String, Option<String>>,
    intakes: HashMap<String, Value>,
    reports: HashMap<String, Vec<Stored<ReportDocument>>>,
    audit: HashMap<String, Vec<Stored<AuditEvent>>>,
    counters: HashMap<String, UsageCounter>,
}

/// A `Mutex`-guarded map of documents.
///
/// Every operation, including a whole counter transaction, runs under the one lock, so counter
/// updates are trivially serialisable.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    docs: Mutex<Documents>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            docs: Mutex::new(Documents::default()),
        }
    }

    #[cfg(test)]
    pub(crate) fn intake_count(&self) -> usize {
        self.docs.lock().map(|d| d.intakes.len()).unwrap_or(0)
    }

    fn lock(&self) -> IntakeResult<MutexGuard<'_, Documents>> {
        self.docs
            .lock()
            .map_err(|_| IntakeError::StoreUnavailable("memory store lock poisoned".into()))
    }
}

impl DocumentStore for MemoryStore {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn admin_exists(&self, admin_id: &str) -> IntakeResult<bool> {
        Ok(self.lock()?.admins.contains_key(admin_id))
    }

    fn grant_admin(&self, admin_id: &str, email: Option<&str>) -> IntakeResult<()> {
        self.lock()?
            .admins
            .insert(admin_id.to_owned(), email.map(str::to_owned));
        Ok(())
    }

    fn admin_email(&self, admin_id: &str) -> IntakeResult<Option<String>> {
        Ok(self.lock()?.admins.get(admin_id).cloned().flatten())
    }

    fn create_intake(&self, document: &Value) -> IntakeResult<String> {
        let id = new_document_id();
        self.lock()?.intakes.insert(id.clone(), document.clone());
        Ok(id)
    }

    fn get_intake(&self, intake_id: &str) -> IntakeResult<Option<Value>> {
        Ok(self.lock()?.intakes.get(intake_id).cloned())
    }

    fn merge_intake(&self, intake_id: &str, fields: &Map<String, Value>) -> IntakeResult<()> {
        let mut docs = self.lock()?;
        let doc = docs
            .intakes
            .get_mut(intake_id)
            .ok_or_else(|| IntakeError::IntakeNotFound(intake_id.to_owned()))?;
        match doc {
            Value::Object(map) => {
                for (k, v) in fields {
                    map.insert(k.clone(), v.clone());
                }
                Ok(())
            }
            _ => Err(IntakeError::MalformedIntake(
                "intake document is not an object".into(),
            )),
        }
    }

    fn add_report_with_audit(
        &self,
        intake_id: &str,
        report: &ReportDocument,
        audit: &AuditFor<'_>,
    ) -> IntakeResult<String> {
        let report_id = new_document_id();
        let event = audit(&report_id)?;

        let mut docs = self.lock()?;
        docs.reports
            .entry(intake_id.to_owned())
            .or_default()
            .push(Stored {
                id: report_id.clone(),
                document: report.clone(),
            });
        docs.audit
            .entry(intake_id.to_owned())
            .or_default()
            .push(Stored {
                id: new_document_id(),
                document: event,
            });
        Ok(report_id)
    }

    fn list_reports(&self, intake_id: &str) -> IntakeResult<Vec<Stored<ReportDocument>>> {
        Ok(self
            .lock()?
            .reports
            .get(intake_id)
            .cloned()
            .unwrap_or_default())
    }

    fn list_audit_events(&self, intake_id: &str) -> IntakeResult<Vec<Stored<AuditEvent>>> {
        Ok(self
            .lock()?
            .audit
            .get(intake_id)
            .cloned()
            .unwrap_or_default())
    }

    fn read_counter(&self, key: &CounterKey) -> IntakeResult<UsageCounter> {
        Ok(self
            .lock()?
            .counters
            .get(&key.path())
            .cloned()
            .unwrap_or_default())
    }

    fn update_counters(
        &self,
        keys: &[CounterKey],
        update: &mut CounterUpdate<'_>,
    ) -> IntakeResult<()> {
        let mut docs = self.lock()?;
        let paths: Vec<String> = keys.iter().map(CounterKey::path).collect();
        let mut counters: Vec<UsageCounter> = paths
            .iter()
            .map(|p| docs.counters.get(p).cloned().unwrap_or_default())
            .collect();

        update(self.clock.now(), counters.as_mut_slice())?;

        for (path, counter) in paths.into_iter().zip(counters) {
            docs.counters.insert(path, counter);
        }
        Ok(())
    }
}
