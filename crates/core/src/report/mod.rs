//! Report prompts and output handling.

pub mod clinician_summary;
pub mod prompt;

use crate::IntakeResult;
use intake_types::ReportType;
use serde_json::Value;

/// Model output converted into what gets stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub content: String,
    /// Parsed structured output, for report types that request it.
    pub content_json: Option<Value>,
}

/// Turn raw model text into report content.
///
/// Structured types are parsed, shape-checked and rendered to markdown. Other types pass the
/// text through unchanged.
pub fn render_output(report_type: ReportType, raw_text: &str) -> IntakeResult<RenderedReport> {
    if !report_type.is_structured() {
        return Ok(RenderedReport {
            content: raw_text.to_owned(),
            content_json: None,
        });
    }

    let summary = clinician_summary::parse(raw_text)?;
    Ok(RenderedReport {
        content: clinician_summary::render_markdown(&summary),
        content_json: Some(summary),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IntakeError;

    #[test]
    fn test_free_text_types_pass_through() {
        for report_type in [
            ReportType::TreatmentPlan,
            ReportType::FollowupQuestions,
            ReportType::Both,
        ] {
            let out = render_output(report_type, "## Safety\n- Any numbness?").unwrap();
            assert_eq!(out.content, "## Safety\n- Any numbness?");
            assert_eq!(out.content_json, None);
        }
    }

    #[test]
    fn test_structured_type_requires_schema() {
        let err = render_output(ReportType::ClinicianSummary, "## Summary\nfree text").unwrap_err();
        assert!(matches!(err, IntakeError::MalformedResponse(_)));
    }
}
