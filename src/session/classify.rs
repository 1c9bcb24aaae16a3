//! Failure classification for the refresh cycle.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::api::ApiError;

const AUTH_FAILURE_PATTERN: &str = r"(?i)invalid_token|unauthorized|permission|insufficient";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureClass {
    /// The credential was rejected; it must be cleared and the user must sign in again.
    AuthExpired,
    /// Network, 5xx or parse failure; the session survives and the next poll retries.
    Transient,
}

fn auth_failure_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(AUTH_FAILURE_PATTERN).ok())
        .as_ref()
}

/// Checks if a message carries a token-rejected pattern.
pub fn is_auth_failure_message(message: &str) -> bool {
    match auth_failure_regex() {
        Some(re) => re.is_match(message),
        None => {
            let lower = message.to_lowercase();
            ["invalid_token", "unauthorized", "permission", "insufficient"]
                .iter()
                .any(|needle| lower.contains(needle))
        }
    }
}

pub fn classify(error: &ApiError) -> FailureClass {
    if error.status == Some(401) || is_auth_failure_message(&error.message) {
        FailureClass::AuthExpired
    } else {
        FailureClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures() {
        assert_eq!(classify(&ApiError::http(401, "whatever")), FailureClass::AuthExpired);
        assert_eq!(
            classify(&ApiError::http(403, "The caller does not have permission")),
            FailureClass::AuthExpired
        );
        assert_eq!(
            classify(&ApiError::http(400, "Request had insufficient authentication scopes.")),
            FailureClass::AuthExpired
        );
        assert_eq!(
            classify(&ApiError::transport("INVALID_TOKEN returned")),
            FailureClass::AuthExpired
        );
        assert_eq!(
            classify(&ApiError::http(400, "Unauthorized client")),
            FailureClass::AuthExpired
        );
    }

    #[test]
    fn test_transient_failures() {
        assert_eq!(
            classify(&ApiError::http(503, "Service unavailable")),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&ApiError::transport("connection refused")),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&ApiError::http(200, "Malformed models response")),
            FailureClass::Transient
        );
    }
}
