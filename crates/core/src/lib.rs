//! # Intake Core
//!
//! Core business logic for the clinic intake and AI report service.
//!
//! This crate contains:
//! - Intake validation and storage ([`intake`])
//! - De-identification of intake records before they reach a model ([`minimise`], [`scrub`])
//! - Per-admin and per-intake daily usage accounting ([`ledger`])
//! - The model provider client and retry policy ([`model`])
//! - Report generation, from authorization through to audit ([`service`])
//!
//! **No API concerns**: HTTP routing, wire types and caller extraction belong in `api-rest`
//! and `api-shared`.

pub mod config;
pub mod constants;
pub mod documents;
pub mod error;
pub mod intake;
pub mod ledger;
pub mod minimise;
pub mod model;
pub mod pricing;
pub mod report;
pub mod scrub;
pub mod service;
pub mod store;
pub mod validation;

pub use config::ReportConfig;
pub use error::{ErrorCategory, ErrorCode, IntakeError, IntakeResult};
pub use intake::IntakeService;
pub use ledger::{LedgerLimits, UsageLedger};
pub use model::{ModelClient, OpenAiClient};
pub use service::{GenerateReportRequest, GeneratedReport, ReportService};
pub use store::{DocumentStore, MemoryStore, SqliteStore};

pub use intake_types::{Caller, NonEmptyText, ReportMode, ReportType};
