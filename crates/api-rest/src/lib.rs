//! # API REST
//!
//! REST API implementation for the intake report service.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status codes)
//!
//! Uses `api-shared` for wire types and caller extraction, and `intake-core` for everything
//! else.

#![warn(rust_2018_idioms)]

use api_shared::auth::{
    caller_from_headers, validate_api_key, API_KEY_HEADER, CALLER_EMAIL_HEADER,
    CALLER_UID_HEADER,
};
use api_shared::{
    ErrorRes, GenerateReportReq, GenerateReportRes, HealthRes, HealthService, ListReportsRes,
    ReportSummary, SubmitIntakeRes,
};
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use intake_core::documents::{ReportDocument, Stored};
use intake_core::{ErrorCode, GenerateReportRequest, IntakeError, IntakeService, ReportService};
use intake_types::Caller;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub intakes: Arc<IntakeService>,
    pub reports: Arc<ReportService>,
    /// When set, every route except `/health` requires a matching `x-api-key` header.
    pub api_key: Option<Arc<str>>,
}

#[derive(OpenApi)]
#[openapi(
    paths(health, submit_intake, generate_report, list_reports),
    components(schemas(
        HealthRes,
        SubmitIntakeRes,
        GenerateReportReq,
        GenerateReportRes,
        ReportSummary,
        ListReportsRes,
        ErrorRes,
    ))
)]
pub struct ApiDoc;

/// Build the REST router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/intakes", post(submit_intake))
        .route("/intakes/:id/reports", get(list_reports))
        .route("/reports", post(generate_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error response carrying a stable code and a caller-safe message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorRes,
}

impl ApiError {
    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorRes {
                code: ErrorCode::Internal.as_str().into(),
                message: "Internal error.".into(),
            },
        }
    }
}

/// HTTP status for a core error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        ErrorCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        let code = e.code();
        if code == ErrorCode::Internal {
            tracing::error!(error = %e, category = ?e.category(), "request failed");
        }
        Self {
            status: status_for(code),
            body: ErrorRes {
                code: code.as_str().into(),
                message: e.public_message(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn caller(headers: &HeaderMap) -> Option<Caller> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    caller_from_headers(header(CALLER_UID_HEADER), header(CALLER_EMAIL_HEADER))
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.api_key.as_deref() {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if let Err(e) = validate_api_key(expected, provided) {
            return Err(ApiError {
                status: StatusCode::UNAUTHORIZED,
                body: ErrorRes {
                    code: ErrorCode::Unauthenticated.as_str().into(),
                    message: e.to_string(),
                },
            });
        }
    }
    Ok(next.run(request).await)
}

fn report_summary(stored: Stored<ReportDocument>) -> ReportSummary {
    let Stored { id, document } = stored;
    ReportSummary {
        id,
        report_type: document.report_type.as_str().into(),
        mode: document.mode.as_str().into(),
        model: document.model,
        prompt_version: document.prompt_version,
        est_cost_usd: document.est_cost_usd,
        cost_basis: serde_json::to_value(document.cost_basis)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default(),
        created_at: document.created_at.to_rfc3339(),
        content: document.content,
        content_json: document.content_json,
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
#[axum::debug_handler]
async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/intakes",
    request_body(content = Object, description = "Intake form submission"),
    responses(
        (status = 201, description = "Intake stored", body = SubmitIntakeRes),
        (status = 400, description = "Submission failed validation", body = ErrorRes),
        (status = 401, description = "No caller identity", body = ErrorRes),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
/// Submit a client intake form.
///
/// Every validation failure is reported in one `invalid-argument` message.
#[axum::debug_handler]
async fn submit_intake(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<SubmitIntakeRes>), ApiError> {
    let caller = caller(&headers);
    let intake_id = state.intakes.submit(caller.as_ref(), &body)?;
    Ok((StatusCode::CREATED, Json(SubmitIntakeRes { intake_id })))
}

#[utoipa::path(
    post,
    path = "/reports",
    request_body = GenerateReportReq,
    responses(
        (status = 200, description = "Report generated", body = GenerateReportRes),
        (status = 400, description = "Invalid intake id or report type", body = ErrorRes),
        (status = 401, description = "No caller identity", body = ErrorRes),
        (status = 403, description = "Caller is not an admin", body = ErrorRes),
        (status = 404, description = "Intake not found", body = ErrorRes),
        (status = 412, description = "Generation blocked by policy", body = ErrorRes),
        (status = 429, description = "Daily limit or upstream rate limit reached", body = ErrorRes),
        (status = 500, description = "Generation failed", body = ErrorRes)
    )
)]
/// Generate an AI report for an intake.
///
/// Generation runs on its own task, so a client that disconnects mid-call does not abandon
/// a model call that is already being paid for.
#[axum::debug_handler]
async fn generate_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerateReportReq>,
) -> Result<Json<GenerateReportRes>, ApiError> {
    let caller = caller(&headers);
    let request = GenerateReportRequest {
        intake_id: req.intake_id,
        report_type: req.report_type,
        mode: req.mode,
    };
    let reports = state.reports.clone();

    let report = tokio::spawn(async move { reports.generate(caller.as_ref(), &request).await })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "report generation task failed");
            ApiError::internal()
        })??;

    Ok(Json(GenerateReportRes {
        report_id: report.report_id,
        content: report.content,
        model: report.model,
    }))
}

#[utoipa::path(
    get,
    path = "/intakes/{id}/reports",
    params(("id" = String, Path, description = "Intake id")),
    responses(
        (status = 200, description = "Reports for the intake, oldest first", body = ListReportsRes),
        (status = 401, description = "No caller identity", body = ErrorRes),
        (status = 403, description = "Caller is not an admin", body = ErrorRes),
        (status = 404, description = "Intake not found", body = ErrorRes)
    )
)]
/// List generated reports for an intake.
#[axum::debug_handler]
async fn list_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ListReportsRes>, ApiError> {
    let caller = caller(&headers);
    let reports = state
        .reports
        .list_reports(caller.as_ref(), &id)?
        .into_iter()
        .map(report_summary)
        .collect();
    Ok(Json(ListReportsRes { reports }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use intake_core::model::{AttemptFailure, ModelClient, ModelFuture, ModelRequest};
    use intake_core::store::{DocumentStore, MemoryStore};
    use intake_core::ReportConfig;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    const ADMIN: &str = "admin-1";

    /// Answers every call with the same free-text body.
    struct FixedClient;

    impl ModelClient for FixedClient {
        fn is_configured(&self) -> bool {
            true
        }

        fn send<'a>(&'a self, _: &'a ModelRequest) -> ModelFuture<'a> {
            Box::pin(async {
                Ok::<Value, AttemptFailure>(json!({
                    "output_text": "## Safety\n- Any numbness?",
                    "usage": { "input_tokens": 100, "output_tokens": 50 }
                }))
            })
        }
    }

    fn app(api_key: Option<&str>, admin_daily_limit: u32) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.grant_admin(ADMIN, None).unwrap();
        let config = ReportConfig {
            admin_daily_limit,
            admin_cooldown: Duration::ZERO,
            retry_base_delay: Duration::ZERO,
            retry_jitter: Duration::ZERO,
            ..ReportConfig::default()
        };
        let state = AppState {
            intakes: Arc::new(IntakeService::new(store.clone())),
            reports: Arc::new(ReportService::new(store.clone(), Arc::new(FixedClient), config).unwrap()),
            api_key: api_key.map(Arc::from),
        };
        (router(state), store)
    }

    fn submission() -> Value {
        json!({
            "client": {
                "fullName": "Sam Example",
                "dob": "1990-01-10",
                "email": "sam@example.com"
            },
            "problem": { "mainConcern": "Shoulder pain reaching overhead" },
            "consent": { "healthDataConsent": true, "confirmTruthful": true }
        })
    }

    fn post(uri: &str, uid: Option<&str>, body: &Value) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(uid) = uid {
            builder = builder.header(CALLER_UID_HEADER, uid);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_as(uri: &str, uid: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri(uri)
            .header(CALLER_UID_HEADER, uid)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn submit(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(post("/intakes", Some("client-1"), &submission()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await["intakeId"]
            .as_str()
            .unwrap()
            .to_owned()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app(Some("secret"), 5);
        let response = app
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_submit_intake_validation_error_is_400() {
        let (app, _) = app(None, 5);
        let mut body = submission();
        body["consent"]["healthDataConsent"] = json!(false);

        let response = app
            .oneshot(post("/intakes", Some("client-1"), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], json!("invalid-argument"));
        assert_eq!(body["message"], json!("consent.healthDataConsent must be true"));
    }

    #[tokio::test]
    async fn test_generate_and_list_reports() {
        let (app, _) = app(None, 5);
        let intake_id = submit(&app).await;

        let req = json!({ "intakeId": intake_id, "reportType": "followup_questions" });
        let response = app
            .clone()
            .oneshot(post("/reports", Some(ADMIN), &req))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let generated = json_body(response).await;
        assert_eq!(generated["content"], json!("## Safety\n- Any numbness?"));
        assert_eq!(generated["model"], json!("gpt-4o-mini"));

        let response = app
            .oneshot(get_as(&format!("/intakes/{intake_id}/reports"), ADMIN))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = json_body(response).await;
        assert_eq!(listed["reports"].as_array().unwrap().len(), 1);
        assert_eq!(listed["reports"][0]["id"], generated["reportId"]);
        assert_eq!(listed["reports"][0]["reportType"], json!("followup_questions"));
        assert_eq!(listed["reports"][0]["costBasis"], json!("measured"));
    }

    #[tokio::test]
    async fn test_generate_error_statuses() {
        let (app, _) = app(None, 1);
        let intake_id = submit(&app).await;
        let req = json!({ "intakeId": intake_id, "reportType": "treatment_plan" });

        let cases = [
            (None, StatusCode::UNAUTHORIZED),
            (Some("someone"), StatusCode::FORBIDDEN),
            (Some(ADMIN), StatusCode::OK),
            (Some(ADMIN), StatusCode::TOO_MANY_REQUESTS),
        ];
        for (uid, expected) in cases {
            let response = app.clone().oneshot(post("/reports", uid, &req)).await.unwrap();
            assert_eq!(response.status(), expected, "{uid:?}");
        }

        let missing = json!({ "intakeId": "missing", "reportType": "treatment_plan" });
        let response = app
            .clone()
            .oneshot(post("/reports", Some(ADMIN), &missing))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bad_type = json!({ "intakeId": intake_id, "reportType": "essay" });
        let response = app
            .oneshot(post("/reports", Some(ADMIN), &bad_type))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["message"],
            json!("reportType is invalid.")
        );
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let (app, _) = app(Some("secret"), 5);

        let response = app
            .clone()
            .oneshot(post("/intakes", Some("client-1"), &submission()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut request = post("/intakes", Some("client-1"), &submission());
        request
            .headers_mut()
            .insert(API_KEY_HEADER, "secret".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorCode::FailedPrecondition), StatusCode::PRECONDITION_FAILED);
        assert_eq!(status_for(ErrorCode::ResourceExhausted), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorCode::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
