//! SQLite-backed document store.
//!
//! Documents are stored as JSON text keyed by id (and parent intake for sub-collections).
//! Usage counters live in their own table keyed by document path. Counter transactions use
//! `BEGIN IMMEDIATE`, so a second writer (in this or another process) waits on the database
//! lock instead of reading stale counters.

use super::{
    new_document_id, AuditFor, Clock, CounterKey, CounterUpdate, DocumentStore, SystemClock,
    UsageCounter,
};
use crate::documents::{AuditEvent, ReportDocument, Stored};
use crate::{IntakeError, IntakeResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS admin_users (
        uid        TEXT PRIMARY KEY,
        email      TEXT,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS intakes (
        id         TEXT PRIMARY KEY,
        data       TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS ai_reports (
        id         TEXT PRIMARY KEY,
        intake_id  TEXT NOT NULL,
        data       TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_ai_reports_intake ON ai_reports (intake_id, created_at);
    CREATE TABLE IF NOT EXISTS audit_events (
        id         TEXT PRIMARY KEY,
        intake_id  TEXT NOT NULL,
        data       TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_audit_events_intake ON audit_events (intake_id, created_at);
    CREATE TABLE IF NOT EXISTS usage_counters (
        path TEXT PRIMARY KEY,
        data TEXT NOT NULL
    );
";

/// Persistent store over a single SQLite connection.
pub struct SqliteStore {
    clock: Arc<dyn Clock>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns `IntakeError::Storage` if the file cannot be opened or the schema cannot be
    /// applied.
    pub fn open(path: &Path) -> IntakeResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn, Arc::new(SystemClock))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> IntakeResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            clock,
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> IntakeResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IntakeError::StoreUnavailable("sqlite connection lock poisoned".into()))
    }

    fn list_children<T: DeserializeOwned>(
        &self,
        table: &str,
        intake_id: &str,
    ) -> IntakeResult<Vec<Stored<T>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, data FROM {table} WHERE intake_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![intake_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, data) = row?;
            let document = serde_json::from_str(&data).map_err(IntakeError::Deserialization)?;
            out.push(Stored { id, document });
        }
        Ok(out)
    }
}

fn insert_child(
    conn: &Connection,
    table: &str,
    intake_id: &str,
    data: String,
    created_at: DateTime<Utc>,
) -> IntakeResult<String> {
    let id = new_document_id();
    conn.execute(
        &format!("INSERT INTO {table} (id, intake_id, data, created_at) VALUES (?1, ?2, ?3, ?4)"),
        params![id, intake_id, data, created_at.to_rfc3339()],
    )?;
    Ok(id)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> IntakeResult<String> {
    serde_json::to_string(value).map_err(IntakeError::Serialization)
}

impl DocumentStore for SqliteStore {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn admin_exists(&self, admin_id: &str) -> IntakeResult<bool> {
        let found = self
            .lock()?
            .query_row(
                "SELECT 1 FROM admin_users WHERE uid = ?1",
                params![admin_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn grant_admin(&self, admin_id: &str, email: Option<&str>) -> IntakeResult<()> {
        self.lock()?.execute(
            "INSERT INTO admin_users (uid, email, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(uid) DO UPDATE SET email = excluded.email",
            params![admin_id, email, self.clock.now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn admin_email(&self, admin_id: &str) -> IntakeResult<Option<String>> {
        let email: Option<Option<String>> = self
            .lock()?
            .query_row(
                "SELECT email FROM admin_users WHERE uid = ?1",
                params![admin_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(email.flatten())
    }

    fn create_intake(&self, document: &Value) -> IntakeResult<String> {
        let id = new_document_id();
        self.lock()?.execute(
            "INSERT INTO intakes (id, data, created_at) VALUES (?1, ?2, ?3)",
            params![id, to_json(document)?, self.clock.now().to_rfc3339()],
        )?;
        Ok(id)
    }

    fn get_intake(&self, intake_id: &str) -> IntakeResult<Option<Value>> {
        let data: Option<String> = self
            .lock()?
            .query_row(
                "SELECT data FROM intakes WHERE id = ?1",
                params![intake_id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(IntakeError::Deserialization))
            .transpose()
    }

    fn merge_intake(&self, intake_id: &str, fields: &Map<String, Value>) -> IntakeResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM intakes WHERE id = ?1",
                params![intake_id],
                |row| row.get(0),
            )
            .optional()?;
        let data = data.ok_or_else(|| IntakeError::IntakeNotFound(intake_id.to_owned()))?;

        let mut doc: Value = serde_json::from_str(&data).map_err(IntakeError::Deserialization)?;
        let Value::Object(map) = &mut doc else {
            return Err(IntakeError::MalformedIntake(
                "intake document is not an object".into(),
            ));
        };
        for (k, v) in fields {
            map.insert(k.clone(), v.clone());
        }

        tx.execute(
            "UPDATE intakes SET data = ?1 WHERE id = ?2",
            params![to_json(&doc)?, intake_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn add_report_with_audit(
        &self,
        intake_id: &str,
        report: &ReportDocument,
        audit: &AuditFor<'_>,
    ) -> IntakeResult<String> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let report_id = insert_child(
            &tx,
            "ai_reports",
            intake_id,
            to_json(report)?,
            report.created_at,
        )?;
        let event = audit(&report_id)?;
        insert_child(&tx, "audit_events", intake_id, to_json(&event)?, event.created_at)?;
        tx.commit()?;
        Ok(report_id)
    }

    fn list_reports(&self, intake_id: &str) -> IntakeResult<Vec<Stored<ReportDocument>>> {
        self.list_children("ai_reports", intake_id)
    }

    fn list_audit_events(&self, intake_id: &str) -> IntakeResult<Vec<Stored<AuditEvent>>> {
        self.list_children("audit_events", intake_id)
    }

    fn read_counter(&self, key: &CounterKey) -> IntakeResult<UsageCounter> {
        let data: Option<String> = self
            .lock()?
            .query_row(
                "SELECT data FROM usage_counters WHERE path = ?1",
                params![key.path()],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(d) => serde_json::from_str(&d).map_err(IntakeError::Deserialization),
            None => Ok(UsageCounter::default()),
        }
    }

    fn update_counters(
        &self,
        keys: &[CounterKey],
        update: &mut CounterUpdate<'_>,
    ) -> IntakeResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let paths: Vec<String> = keys.iter().map(CounterKey::path).collect();
        let mut counters = Vec::with_capacity(paths.len());
        for path in &paths {
            let data: Option<String> = tx
                .query_row(
                    "SELECT data FROM usage_counters WHERE path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?;
            let counter = match data {
                Some(d) => serde_json::from_str(&d).map_err(IntakeError::Deserialization)?,
                None => UsageCounter::default(),
            };
            counters.push(counter);
        }

        // Dropping `tx` on the error path rolls back.
        update(self.clock.now(), counters.as_mut_slice())?;

        for (path, counter) in paths.iter().zip(&counters) {
            tx.execute(
                "INSERT INTO usage_counters (path, data) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET data = excluded.data",
                params![path, to_json(counter)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
