//! JSON request and response bodies.
//!
//! Field names are camelCase on the wire to match the admin console.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitIntakeRes {
    pub intake_id: String,
}

/// Report generation request.
///
/// Every field is optional on the wire so that missing values surface as validation errors
/// rather than JSON rejections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReportReq {
    #[schema(example = "0f8c2d6e4b2a4c1e9d7b")]
    pub intake_id: Option<String>,
    /// One of `clinician_summary`, `treatment_plan`, `followup_questions`, `both`.
    #[schema(example = "clinician_summary")]
    pub report_type: Option<String>,
    /// `patient` selects patient mode; anything else is clinician mode.
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReportRes {
    pub report_id: String,
    pub content: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub id: String,
    pub report_type: String,
    pub mode: String,
    pub model: String,
    pub prompt_version: String,
    pub est_cost_usd: f64,
    pub cost_basis: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub content_json: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ListReportsRes {
    pub reports: Vec<ReportSummary>,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    /// Stable code such as `resource-exhausted`.
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_report_req_accepts_missing_fields() {
        let req: GenerateReportReq = serde_json::from_value(json!({ "intakeId": "abc" })).unwrap();
        assert_eq!(req.intake_id.as_deref(), Some("abc"));
        assert_eq!(req.report_type, None);
        assert_eq!(req.mode, None);
    }

    #[test]
    fn test_generate_report_res_is_camel_case() {
        let res = GenerateReportRes {
            report_id: "r1".into(),
            content: "text".into(),
            model: "gpt-4o-mini".into(),
        };
        assert_eq!(
            serde_json::to_value(&res).unwrap(),
            json!({ "reportId": "r1", "content": "text", "model": "gpt-4o-mini" })
        );
    }
}
