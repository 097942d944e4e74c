//! Shared value types for the intake report service.
//!
//! These types are used by the core crate, the API wire types, and the CLI. They are kept in a
//! separate crate so that `api-shared` can depend on them without pulling in core storage or
//! HTTP client dependencies.

use std::fmt;
use std::str::FromStr;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

/// A string type that guarantees non-empty, trimmed content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText`, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `TextError::Empty` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// The verified identity of whoever is calling the service.
///
/// Authentication itself happens upstream; by the time a `Caller` exists its `uid` has been
/// verified by the fronting identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: NonEmptyText,
    pub email: Option<String>,
}

impl Caller {
    pub fn new(uid: NonEmptyText, email: Option<String>) -> Self {
        Self { uid, email }
    }

    pub fn uid(&self) -> &str {
        self.uid.as_str()
    }
}

/// Error returned when parsing an unknown report type or mode.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseKindError {
    kind: &'static str,
    value: String,
}

/// The kinds of AI report an admin can request for an intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    ClinicianSummary,
    TreatmentPlan,
    FollowupQuestions,
    Both,
}

impl ReportType {
    pub const ALL: [ReportType; 4] = [
        ReportType::ClinicianSummary,
        ReportType::TreatmentPlan,
        ReportType::FollowupQuestions,
        ReportType::Both,
    ];

    /// Wire/storage identifier, e.g. `clinician_summary`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::ClinicianSummary => "clinician_summary",
            ReportType::TreatmentPlan => "treatment_plan",
            ReportType::FollowupQuestions => "followup_questions",
            ReportType::Both => "both",
        }
    }

    /// Human-readable title used in prompts.
    pub fn title(&self) -> &'static str {
        match self {
            ReportType::ClinicianSummary => "Clinical summary",
            ReportType::TreatmentPlan => "Treatment plan",
            ReportType::FollowupQuestions => "Follow-up questions",
            ReportType::Both => "Clinical summary + treatment plan",
        }
    }

    /// Whether the model is asked for structured JSON output for this type.
    pub fn is_structured(&self) -> bool {
        matches!(self, ReportType::ClinicianSummary)
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseKindError {
                kind: "report type",
                value: s.to_owned(),
            })
    }
}

/// Audience of a generated report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    #[default]
    Clinician,
    Patient,
}

impl ReportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportMode::Clinician => "clinician",
            ReportMode::Patient => "patient",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportMode::Clinician => "Clinician Mode",
            ReportMode::Patient => "Patient Mode",
        }
    }

    /// Anything other than an explicit `patient` request is clinician mode.
    pub fn from_request(value: Option<&str>) -> Self {
        match value {
            Some("patient") => ReportMode::Patient,
            _ => ReportMode::Clinician,
        }
    }
}

impl fmt::Display for ReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
