//! Prompt assembly.

use super::clinician_summary;
use crate::minimise::MinimisedContext;
use crate::model::{ModelRequest, PromptTurn};
use intake_types::{ReportMode, ReportType};

const SYSTEM_PROMPT: &str = r#"You are "Soft Tissue Therapist Assistant", working in Clinician Mode unless told otherwise. Follow the MODE CONTROLLER (Lite+), Safety and Output rules below exactly. Write in UK English only.

MODE CONTROLLER (Lite+):
- Clinician Mode: concise, professional clinical phrasing for the treating clinician.
- Patient Mode: plain, reassuring language for the client. Only when explicitly requested.
- When no mode is given, stay in Clinician Mode.

Safety:
- Work only from the intake context supplied. Never invent identifiers or appointments.
- Treat red flags with care and suggest escalation only when it is warranted.
- Where information is missing, say so instead of guessing.
- Refer to the person only as "the client".

Output formats:
- Prefer concise bullet points and avoid generic filler.
- Do not repeat the same intake facts in more than one section.
- If key information is missing, state ONE assumption and carry on.
- At most eight bullets per section.
- Always include a short "Referral triggers" section."#;

const TEMPERATURE: f32 = 0.25;

/// Output token ceiling for each report type.
pub fn max_output_tokens(report_type: ReportType) -> u32 {
    match report_type {
        ReportType::ClinicianSummary => 900,
        ReportType::TreatmentPlan => 1100,
        ReportType::FollowupQuestions => 700,
        ReportType::Both => 1400,
    }
}

fn instruction_block(report_type: ReportType) -> &'static [&'static str] {
    match report_type {
        ReportType::ClinicianSummary => &[
            "Headings exactly: Presenting Snapshot / Working Hypothesis / Plan / Referral Triggers",
            "Keep bullets concise; no repetition across sections.",
        ],
        ReportType::TreatmentPlan => &[
            "Headings exactly: Session 1 Structure / Home Items / Reassess / Referral Triggers",
            "Home Items: 3–5 bullets. Max 8 bullets per subsection.",
        ],
        ReportType::FollowupQuestions => &[
            "Headings exactly: Safety / Clarifying / Goals",
            "Provide 6–10 total questions split across those headings.",
        ],
        ReportType::Both => &[],
    }
}

fn user_prompt(report_type: ReportType, mode: ReportMode, context: &MinimisedContext) -> String {
    let context_json = serde_json::to_string_pretty(context.as_value())
        .unwrap_or_else(|_| context.as_json().to_owned());
    let instructions = instruction_block(report_type)
        .iter()
        .map(|line| format!("- {line}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Generate {title} in {mode}.\n\
         Use the intake context (already minimal and de-identified):\n\
         {context_json}\n\
         \n\
         Instruction block for this report:\n\
         {instructions}\n\
         \n\
         Global constraints:\n\
         - Do not repeat intake facts across sections.\n\
         - If key info is missing: state ONE assumption, then proceed.\n\
         - Max bullets per section: 8.\n\
         \n\
         Keep headings exactly as specified above, concise bullets, UK English, and actionable.",
        title = report_type.title(),
        mode = mode.label(),
    )
}

/// Build the provider request for one report.
pub fn build_request(
    model: &str,
    report_type: ReportType,
    mode: ReportMode,
    context: &MinimisedContext,
) -> ModelRequest {
    ModelRequest {
        model: model.to_owned(),
        input: vec![
            PromptTurn::system(SYSTEM_PROMPT),
            PromptTurn::user(user_prompt(report_type, mode, context)),
        ],
        max_output_tokens: max_output_tokens(report_type),
        temperature: TEMPERATURE,
        response_format: report_type
            .is_structured()
            .then(clinician_summary::response_format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minimise::minimise;
    use crate::scrub::{IdentifierDetector, PatternScrubber};
    use chrono::NaiveDate;
    use serde_json::json;

    fn context() -> MinimisedContext {
        let record = json!({
            "status": "submitted",
            "payload": { "problem": { "mainConcern": "Hip pain on stairs" } }
        });
        minimise(
            &PatternScrubber,
            &record,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        )
        .unwrap()
        .context
    }

    #[test]
    fn test_only_clinician_summary_requests_structured_output() {
        for report_type in ReportType::ALL {
            let request = build_request("gpt-4o-mini", report_type, ReportMode::Clinician, &context());
            assert_eq!(
                request.response_format.is_some(),
                report_type == ReportType::ClinicianSummary,
                "{report_type}"
            );
            assert_eq!(request.max_output_tokens, max_output_tokens(report_type));
            assert_eq!(request.input[0].role, "system");
            assert_eq!(request.input[1].role, "user");
        }
    }

    #[test]
    fn test_user_prompt_carries_type_mode_and_context() {
        let request = build_request(
            "gpt-4o-mini",
            ReportType::FollowupQuestions,
            ReportMode::Patient,
            &context(),
        );
        let user = &request.input[1].content;
        assert!(user.starts_with("Generate Follow-up questions in Patient Mode."));
        assert!(user.contains("Hip pain on stairs"));
        assert!(user.contains("- Headings exactly: Safety / Clarifying / Goals"));
    }

    #[test]
    fn test_serialised_requests_pass_identifier_scan() {
        for report_type in ReportType::ALL {
            let request = build_request("gpt-4o-mini", report_type, ReportMode::Clinician, &context());
            let body = serde_json::to_string(&request).unwrap();
            assert!(
                !PatternScrubber.contains_identifiers(&body),
                "{report_type} request trips the identifier scan"
            );
        }
    }
}
