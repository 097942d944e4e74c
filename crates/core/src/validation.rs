//! Input validation utilities.
//!
//! Request arguments are checked here before they are used to address documents in the store.

use crate::{IntakeError, IntakeResult};
use intake_types::{ReportMode, ReportType};

/// Validates that a document id is safe to use as a path segment.
///
/// Ids are embedded into document paths such as `intakes/{id}/aiReports`, so this applies
/// guardrails against empty values, pathological lengths and path separators:
/// - Rejects empty or whitespace-only strings
/// - Bounds the length
/// - Restricts characters to ASCII alphanumerics, `-` and `_`
///
/// # Errors
///
/// Returns `IntakeError::InvalidArgument` naming `field` if the id is invalid.
pub fn validate_document_id(field: &str, id: &str) -> IntakeResult<()> {
    const MAX_ID_LEN: usize = 128;

    if id.trim().is_empty() {
        return Err(IntakeError::InvalidArgument(format!("{field} is required.")));
    }

    if id.len() > MAX_ID_LEN {
        return Err(IntakeError::InvalidArgument(format!(
            "{field} exceeds maximum length of {MAX_ID_LEN} characters."
        )));
    }

    let ok = id
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' | b'_'));

    if !ok {
        return Err(IntakeError::InvalidArgument(format!(
            "{field} contains invalid characters."
        )));
    }

    Ok(())
}

/// Parse a requested report type, rejecting anything outside the four known values.
pub fn parse_report_type(raw: Option<&str>) -> IntakeResult<ReportType> {
    raw.and_then(|r| r.parse::<ReportType>().ok())
        .ok_or_else(|| IntakeError::InvalidArgument("reportType is invalid.".into()))
}

/// Parse an optional mode. Absent or unrecognised values fall back to clinician mode.
pub fn parse_report_mode(raw: Option<&str>) -> ReportMode {
    ReportMode::from_request(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_document_id_accepts_generated_ids() {
        assert!(validate_document_id("intakeId", "3f2a9c0d1e4b4d2f9a8b7c6d5e4f3a2b").is_ok());
        assert!(validate_document_id("intakeId", "mock_intake-01").is_ok());
    }

    #[test]
    fn test_validate_document_id_rejects_empty_and_blank() {
        for id in ["", "   "] {
            let err = validate_document_id("intakeId", id).unwrap_err();
            assert!(matches!(err, IntakeError::InvalidArgument(m) if m == "intakeId is required."));
        }
    }

    #[test]
    fn test_validate_document_id_rejects_path_separators() {
        assert!(validate_document_id("intakeId", "../admin").is_err());
        assert!(validate_document_id("intakeId", "a/b").is_err());
        assert!(validate_document_id("intakeId", "naïve").is_err());
    }

    #[test]
    fn test_validate_document_id_rejects_overlong() {
        let id = "a".repeat(129);
        assert!(validate_document_id("intakeId", &id).is_err());
        assert!(validate_document_id("intakeId", &id[..128]).is_ok());
    }

    #[test]
    fn test_parse_report_type() {
        assert_eq!(
            parse_report_type(Some("both")).unwrap(),
            ReportType::Both
        );
        assert!(parse_report_type(Some("summary")).is_err());
        assert!(parse_report_type(None).is_err());
    }

    #[test]
    fn test_parse_report_mode_defaults_to_clinician() {
        assert_eq!(parse_report_mode(None), ReportMode::Clinician);
        assert_eq!(parse_report_mode(Some("patient")), ReportMode::Patient);
        assert_eq!(parse_report_mode(Some("other")), ReportMode::Clinician);
    }
}
