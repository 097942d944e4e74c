//! Report generation.
//!
//! [`ReportService::generate`] runs five stages in order:
//!
//! 1. **Authorize**: caller present, arguments valid, caller on the admin allowlist, intake
//!    exists.
//! 2. **Prepare**: minimise the intake and confirm the model is configured.
//! 3. **Reserve**: take a usage slot from the ledger.
//! 4. **Generate**: build the prompt, call the model, check and render the output.
//! 5. **Commit**: store the report and its audit event, then book the slot as a success.
//!
//! Stages 1 and 2 have no side effects. From stage 3 on the slot is held by a
//! [`ReservationGuard`], so any error, panic or dropped future releases it as a failure.
//!
//! Store calls run on tokio's blocking pool so a busy database never stalls the async workers.

use crate::config::ReportConfig;
use crate::constants::AUDIT_AI_REPORT_GENERATED;
use crate::documents::{AuditEvent, ReportDocument, Stored, TokenUsage};
use crate::ledger::{LedgerLimits, ReservationGuard, UsageLedger};
use crate::minimise::{minimise, Minimised};
use crate::model::{call_with_retry, extract_text, extract_usage, ModelClient, RetryPolicy};
use crate::pricing::{resolve_call_cost, CallCost};
use crate::report::{prompt, render_output, RenderedReport};
use crate::scrub::{IdentifierDetector, PatternScrubber};
use crate::store::DocumentStore;
use crate::validation::{parse_report_mode, parse_report_type, validate_document_id};
use crate::{IntakeError, IntakeResult};
use intake_types::{Caller, ReportMode, ReportType};
use serde_json::{json, Value};
use std::sync::Arc;

/// Raw generation arguments as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateReportRequest {
    pub intake_id: Option<String>,
    pub report_type: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReport {
    pub report_id: String,
    pub content: String,
    pub model: String,
}

struct Authorized {
    caller: Caller,
    intake_id: String,
    report_type: ReportType,
    mode: ReportMode,
    record: Value,
}

struct Draft {
    rendered: RenderedReport,
    usage: Option<TokenUsage>,
    cost: CallCost,
}

pub struct ReportService {
    store: Arc<dyn DocumentStore>,
    ledger: Arc<UsageLedger>,
    model: Arc<dyn ModelClient>,
    detector: Arc<dyn IdentifierDetector>,
    config: ReportConfig,
}

impl ReportService {
    /// Build a service using the regex identifier detector.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        model: Arc<dyn ModelClient>,
        config: ReportConfig,
    ) -> IntakeResult<Self> {
        config.validate()?;
        let limits = LedgerLimits::from_config(&config)?;
        Ok(Self {
            ledger: Arc::new(UsageLedger::new(store.clone(), limits)),
            store,
            model,
            detector: Arc::new(PatternScrubber),
            config,
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn IdentifierDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Generate, store and account for one report.
    pub async fn generate(
        &self,
        caller: Option<&Caller>,
        request: &GenerateReportRequest,
    ) -> IntakeResult<GeneratedReport> {
        let result = self.run(caller, request).await;
        if let Err(e) = &result {
            tracing::warn!(
                intake_id = request.intake_id.as_deref().unwrap_or(""),
                code = %e.code(),
                category = ?e.category(),
                error = %e,
                "report generation failed"
            );
        }
        result
    }

    /// Reports stored for an intake, oldest first. Admin only.
    pub fn list_reports(
        &self,
        caller: Option<&Caller>,
        intake_id: &str,
    ) -> IntakeResult<Vec<Stored<ReportDocument>>> {
        let caller = caller.ok_or(IntakeError::Unauthenticated)?;
        validate_document_id("intakeId", intake_id)?;
        self.require_admin(caller)?;
        if self.store.get_intake(intake_id)?.is_none() {
            return Err(IntakeError::IntakeNotFound(intake_id.to_owned()));
        }
        self.store.list_reports(intake_id)
    }

    async fn run(
        &self,
        caller: Option<&Caller>,
        request: &GenerateReportRequest,
    ) -> IntakeResult<GeneratedReport> {
        let authorized = self.authorize(caller, request).await?;
        let minimised = self.prepare(&authorized)?;

        let guard = {
            let ledger = Arc::clone(&self.ledger);
            let admin_id = authorized.caller.uid().to_owned();
            let intake_id = authorized.intake_id.clone();
            on_blocking_pool(move || ledger.reserve_guarded(&admin_id, &intake_id)).await?
        };

        let draft = match self.draft(&authorized, &minimised).await {
            Ok(draft) => draft,
            Err(e) => {
                release(guard).await;
                return Err(e);
            }
        };
        let report = self.commit(&authorized, draft, guard).await?;

        self.write_back(&authorized.intake_id, &minimised).await;
        Ok(report)
    }

    fn require_admin(&self, caller: &Caller) -> IntakeResult<()> {
        if !self.store.admin_exists(caller.uid())? {
            return Err(IntakeError::PermissionDenied(caller.uid().to_owned()));
        }
        Ok(())
    }

    async fn authorize(
        &self,
        caller: Option<&Caller>,
        request: &GenerateReportRequest,
    ) -> IntakeResult<Authorized> {
        let caller = caller.ok_or(IntakeError::Unauthenticated)?;

        let intake_id = request.intake_id.as_deref().unwrap_or("");
        validate_document_id("intakeId", intake_id)?;
        let report_type = parse_report_type(request.report_type.as_deref())?;
        let mode = parse_report_mode(request.mode.as_deref());

        let record = {
            let store = Arc::clone(&self.store);
            let uid = caller.uid().to_owned();
            let intake_id = intake_id.to_owned();
            on_blocking_pool(move || {
                if !store.admin_exists(&uid)? {
                    return Err(IntakeError::PermissionDenied(uid));
                }
                match store.get_intake(&intake_id)? {
                    Some(record) => Ok(record),
                    None => Err(IntakeError::IntakeNotFound(intake_id)),
                }
            })
            .await?
        };

        Ok(Authorized {
            caller: caller.clone(),
            intake_id: intake_id.to_owned(),
            report_type,
            mode,
            record,
        })
    }

    fn prepare(&self, authorized: &Authorized) -> IntakeResult<Minimised> {
        let today = self.store.now().date_naive();
        let minimised = minimise(self.detector.as_ref(), &authorized.record, today)?;
        if !self.model.is_configured() {
            return Err(IntakeError::ModelNotConfigured);
        }
        Ok(minimised)
    }

    async fn draft(&self, authorized: &Authorized, minimised: &Minimised) -> IntakeResult<Draft> {
        let request = prompt::build_request(
            &self.config.model,
            authorized.report_type,
            authorized.mode,
            &minimised.context,
        );

        let outgoing = serde_json::to_string(&request).map_err(IntakeError::Serialization)?;
        if self.detector.contains_identifiers(&outgoing) {
            return Err(IntakeError::IdentifiersDetected);
        }

        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            base_delay: self.config.retry_base_delay,
            jitter: self.config.retry_jitter,
        };
        let body = call_with_retry(self.model.as_ref(), &request, &policy).await?;

        let text = extract_text(&body).ok_or(IntakeError::EmptyResponse)?;
        let rendered = render_output(authorized.report_type, &text)?;

        let usage = extract_usage(&body);
        let cost = resolve_call_cost(
            &self.config.model,
            usage.and_then(|u| u.input_tokens),
            usage.and_then(|u| u.output_tokens),
            self.config.est_cost_per_call_usd,
        );

        Ok(Draft {
            rendered,
            usage,
            cost,
        })
    }

    async fn commit(
        &self,
        authorized: &Authorized,
        draft: Draft,
        guard: ReservationGuard,
    ) -> IntakeResult<GeneratedReport> {
        let now = self.store.now();
        let report = ReportDocument {
            kind: authorized.report_type,
            report_type: authorized.report_type,
            mode: authorized.mode,
            model: self.config.model.clone(),
            prompt_version: self.config.prompt_version.clone(),
            usage: draft.usage,
            est_cost_usd: draft.cost.usd,
            cost_basis: draft.cost.basis,
            content: draft.rendered.content,
            content_json: draft.rendered.content_json,
            created_at: now,
            created_by_uid: authorized.caller.uid().to_owned(),
            created_by_email: authorized.caller.email.clone(),
        };
        let content = report.content.clone();
        let cost = draft.cost;

        let store = Arc::clone(&self.store);
        let intake_id = authorized.intake_id.clone();
        let report_type = authorized.report_type;
        let model = self.config.model.clone();
        let report_id = on_blocking_pool(move || {
            let report_id = store.add_report_with_audit(&intake_id, &report, &|report_id| {
                Ok(AuditEvent {
                    event_type: AUDIT_AI_REPORT_GENERATED.into(),
                    created_at: now,
                    actor_uid: report.created_by_uid.clone(),
                    actor_email: report.created_by_email.clone(),
                    meta: json!({
                        "reportId": report_id,
                        "reportType": report_type,
                        "model": model,
                    }),
                })
            })?;

            // The report exists at this point, so a failed success booking is logged rather
            // than surfaced. The guard has already released the slot in that case.
            if let Err(e) = guard.complete(cost) {
                tracing::error!(
                    intake_id = %intake_id,
                    report_id = %report_id,
                    error = %e,
                    "failed to book successful generation"
                );
            }
            Ok(report_id)
        })
        .await?;

        tracing::info!(
            intake_id = %authorized.intake_id,
            report_id = %report_id,
            report_type = %authorized.report_type,
            prompt_version = %self.config.prompt_version,
            model = %self.config.model,
            est_cost_usd = cost.usd,
            "AI report generated"
        );

        Ok(GeneratedReport {
            report_id,
            content,
            model: self.config.model.clone(),
        })
    }

    /// Best-effort merge of derived age fields onto the intake.
    async fn write_back(&self, intake_id: &str, minimised: &Minimised) {
        let fields = minimised.derived_fields();
        if fields.is_empty() {
            return;
        }
        let store = Arc::clone(&self.store);
        let id = intake_id.to_owned();
        if let Err(e) = on_blocking_pool(move || store.merge_intake(&id, &fields)).await {
            tracing::warn!(intake_id, error = %e, "failed to write back derived intake fields");
        }
    }
}

/// Run synchronous store work on tokio's blocking pool.
///
/// If the caller stops waiting, the work still runs to completion and its output is dropped
/// there, so a [`ReservationGuard`] returned from it is still released.
async fn on_blocking_pool<T, F>(work: F) -> IntakeResult<T>
where
    F: FnOnce() -> IntakeResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| IntakeError::StoreUnavailable(format!("store task failed: {e}")))?
}

/// Release a reservation as a failure without blocking the async worker.
async fn release(guard: ReservationGuard) {
    if let Err(e) = on_blocking_pool(move || {
        drop(guard);
        Ok(())
    })
    .await
    {
        tracing::error!(error = %e, "failed to release usage reservation");
    }
}
