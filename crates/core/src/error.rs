//! Error types for the intake report core.
//!
//! Every failure inside the core is an [`IntakeError`]. Callers never see the variant itself;
//! they see a stable [`ErrorCode`] and the short text from [`IntakeError::public_message`].
//! Upstream bodies and storage details are logged, not surfaced.

use std::fmt;

/// Stable, caller-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unauthenticated,
    InvalidArgument,
    PermissionDenied,
    NotFound,
    FailedPrecondition,
    ResourceExhausted,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::NotFound => "not-found",
            ErrorCode::FailedPrecondition => "failed-precondition",
            ErrorCode::ResourceExhausted => "resource-exhausted",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational category of a failure, used for logging and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    AuthenticationMissing,
    AuthorizationDenied,
    InvalidInput,
    NotFound,
    PolicyBlocked,
    UpstreamRateLimited,
    UpstreamInvalidCredentials,
    UpstreamOtherFailure,
    ResponseMalformed,
    PersistenceFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("caller {0} is not in the admin allowlist")]
    PermissionDenied(String),
    #[error("intake {0} not found")]
    IntakeNotFound(String),

    #[error("minimised context still contains identifiable data")]
    IdentifiersDetected,
    #[error("intake record is malformed: {0}")]
    MalformedIntake(String),
    #[error("model API key is not configured")]
    ModelNotConfigured,
    #[error("admin cooldown active")]
    CooldownActive,
    #[error("admin daily limit of {limit} reached")]
    AdminQuotaExceeded { limit: u32 },
    #[error("intake daily limit of {limit} reached")]
    IntakeQuotaExceeded { limit: u32 },
    #[error("daily spend cap of {cap_usd} USD reached")]
    SpendCapReached { cap_usd: f64 },

    #[error("model provider rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("model provider rejected the API key")]
    UpstreamInvalidCredentials,
    #[error("model provider quota exhausted")]
    UpstreamQuotaExceeded,
    #[error("model call failed with status {status}")]
    UpstreamFailed { status: u16 },
    #[error("model call transport error: {0}")]
    UpstreamTransport(String),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("model response malformed: {0}")]
    MalformedResponse(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("storage unavailable: {0}")]
    StoreUnavailable(String),
    #[error("failed to serialise document: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialise document: {0}")]
    Deserialization(serde_json::Error),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IntakeError {
    /// Stable code surfaced to callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            IntakeError::Unauthenticated => ErrorCode::Unauthenticated,
            IntakeError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            IntakeError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            IntakeError::IntakeNotFound(_) => ErrorCode::NotFound,
            IntakeError::IdentifiersDetected
            | IntakeError::MalformedIntake(_)
            | IntakeError::ModelNotConfigured
            | IntakeError::CooldownActive
            | IntakeError::SpendCapReached { .. }
            | IntakeError::UpstreamInvalidCredentials
            | IntakeError::UpstreamQuotaExceeded => ErrorCode::FailedPrecondition,
            IntakeError::AdminQuotaExceeded { .. }
            | IntakeError::IntakeQuotaExceeded { .. }
            | IntakeError::RateLimited { .. } => ErrorCode::ResourceExhausted,
            IntakeError::UpstreamFailed { .. }
            | IntakeError::UpstreamTransport(_)
            | IntakeError::EmptyResponse
            | IntakeError::MalformedResponse(_)
            | IntakeError::Storage(_)
            | IntakeError::StoreUnavailable(_)
            | IntakeError::Serialization(_)
            | IntakeError::Deserialization(_)
            | IntakeError::HttpClient(_)
            | IntakeError::InvalidConfig(_) => ErrorCode::Internal,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            IntakeError::Unauthenticated => ErrorCategory::AuthenticationMissing,
            IntakeError::PermissionDenied(_) => ErrorCategory::AuthorizationDenied,
            IntakeError::InvalidArgument(_) => ErrorCategory::InvalidInput,
            IntakeError::IntakeNotFound(_) => ErrorCategory::NotFound,
            IntakeError::IdentifiersDetected
            | IntakeError::MalformedIntake(_)
            | IntakeError::ModelNotConfigured
            | IntakeError::CooldownActive
            | IntakeError::AdminQuotaExceeded { .. }
            | IntakeError::IntakeQuotaExceeded { .. }
            | IntakeError::SpendCapReached { .. } => ErrorCategory::PolicyBlocked,
            IntakeError::RateLimited { .. } => ErrorCategory::UpstreamRateLimited,
            IntakeError::UpstreamInvalidCredentials | IntakeError::UpstreamQuotaExceeded => {
                ErrorCategory::UpstreamInvalidCredentials
            }
            IntakeError::UpstreamFailed { .. }
            | IntakeError::UpstreamTransport(_)
            | IntakeError::HttpClient(_) => ErrorCategory::UpstreamOtherFailure,
            IntakeError::EmptyResponse | IntakeError::MalformedResponse(_) => {
                ErrorCategory::ResponseMalformed
            }
            IntakeError::Storage(_)
            | IntakeError::StoreUnavailable(_)
            | IntakeError::Serialization(_)
            | IntakeError::Deserialization(_)
            | IntakeError::InvalidConfig(_) => ErrorCategory::PersistenceFailure,
        }
    }

    /// Short message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            IntakeError::Unauthenticated => "Authentication required.".into(),
            IntakeError::InvalidArgument(msg) => msg.clone(),
            IntakeError::PermissionDenied(_) => "Admin access required.".into(),
            IntakeError::IntakeNotFound(_) => "Intake not found.".into(),
            IntakeError::IdentifiersDetected => {
                "Context contains identifiable data; generation blocked.".into()
            }
            IntakeError::MalformedIntake(_) => "Intake record could not be read.".into(),
            IntakeError::ModelNotConfigured => "AI model is not configured.".into(),
            IntakeError::CooldownActive => "Please wait before generating another report.".into(),
            IntakeError::AdminQuotaExceeded { .. } => {
                "Daily AI generation limit reached. Try again tomorrow.".into()
            }
            IntakeError::IntakeQuotaExceeded { .. } => {
                "Daily AI generation limit reached for this intake. Try again tomorrow.".into()
            }
            IntakeError::SpendCapReached { .. } => {
                "Daily AI spend limit reached. Try again tomorrow.".into()
            }
            IntakeError::RateLimited { .. } => "Rate limited. Try again in a moment.".into(),
            IntakeError::UpstreamInvalidCredentials => "AI provider rejected the API key.".into(),
            IntakeError::UpstreamQuotaExceeded => "AI provider quota exceeded.".into(),
            IntakeError::EmptyResponse => "Empty AI response.".into(),
            IntakeError::MalformedResponse(_) => {
                "AI response did not match the expected format.".into()
            }
            IntakeError::UpstreamFailed { .. } | IntakeError::UpstreamTransport(_) => {
                "AI generation failed.".into()
            }
            _ => "Internal error.".into(),
        }
    }
}

pub type IntakeResult<T> = std::result::Result<T, IntakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_errors_map_to_distinct_codes() {
        assert_eq!(
            IntakeError::CooldownActive.code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(
            IntakeError::AdminQuotaExceeded { limit: 2 }.code(),
            ErrorCode::ResourceExhausted
        );
        assert_eq!(
            IntakeError::SpendCapReached { cap_usd: 5.0 }.code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(
            IntakeError::RateLimited { attempts: 3 }.code(),
            ErrorCode::ResourceExhausted
        );
        assert_eq!(
            IntakeError::MalformedResponse("x".into()).code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn test_public_message_hides_upstream_details() {
        let err = IntakeError::UpstreamTransport("connect to 10.0.0.1 refused".into());
        assert!(!err.public_message().contains("10.0.0.1"));

        let err = IntakeError::StoreUnavailable("mutex poisoned".into());
        assert_eq!(err.public_message(), "Internal error.");
    }

    #[test]
    fn test_categories_separate_credentials_from_transient_failures() {
        assert_eq!(
            IntakeError::UpstreamInvalidCredentials.category(),
            ErrorCategory::UpstreamInvalidCredentials
        );
        assert_eq!(
            IntakeError::RateLimited { attempts: 3 }.category(),
            ErrorCategory::UpstreamRateLimited
        );
        assert_eq!(
            IntakeError::EmptyResponse.category(),
            ErrorCategory::ResponseMalformed
        );
    }
}
