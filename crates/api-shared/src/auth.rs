//! API key and caller identity handling.
//!
//! Identity is established by the fronting identity provider, which forwards the verified uid
//! and email as headers. This module only turns those header values into a [`Caller`].

use intake_types::{Caller, NonEmptyText};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const CALLER_UID_HEADER: &str = "x-caller-uid";
pub const CALLER_EMAIL_HEADER: &str = "x-caller-email";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing x-api-key header")]
    MissingApiKey,
    #[error("Invalid API key")]
    InvalidApiKey,
}

/// Validates the provided API key against the expected one.
///
/// Returns `Ok(())` if the key matches, or an error if it is invalid or missing.
pub fn validate_api_key(expected: &str, provided: Option<&str>) -> Result<(), AuthError> {
    let provided = provided.ok_or(AuthError::MissingApiKey)?;
    if provided == expected {
        Ok(())
    } else {
        Err(AuthError::InvalidApiKey)
    }
}

/// Builds the caller from forwarded identity headers.
///
/// A missing or blank uid means the request is anonymous. Blank emails are dropped.
pub fn caller_from_headers(uid: Option<&str>, email: Option<&str>) -> Option<Caller> {
    let uid = NonEmptyText::new(uid?).ok()?;
    let email = email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_owned);
    Some(Caller::new(uid, email))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key() {
        assert_eq!(validate_api_key("secret", Some("secret")), Ok(()));
        assert_eq!(
            validate_api_key("secret", Some("nope")),
            Err(AuthError::InvalidApiKey)
        );
        assert_eq!(
            validate_api_key("secret", None),
            Err(AuthError::MissingApiKey)
        );
    }

    #[test]
    fn test_caller_from_headers() {
        let caller = caller_from_headers(Some(" admin-1 "), Some(" a@clinic.test ")).unwrap();
        assert_eq!(caller.uid(), "admin-1");
        assert_eq!(caller.email.as_deref(), Some("a@clinic.test"));

        let caller = caller_from_headers(Some("admin-1"), Some("  ")).unwrap();
        assert_eq!(caller.email, None);

        assert!(caller_from_headers(None, Some("a@clinic.test")).is_none());
        assert!(caller_from_headers(Some("   "), None).is_none());
    }
}
