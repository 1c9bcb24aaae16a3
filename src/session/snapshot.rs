//! Read-only session view broadcast on a watch channel after every transition.

use serde::Serialize;
use std::fmt;

use crate::api::ApiError;
use crate::auth::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Flow,
    AuthExpired,
    Transient,
    SignInRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state")]
pub enum SessionState {
    SignedOut,
    Authenticating,
    SignedIn {
        tier: String,
        host: String,
        last_update: Option<String>,
    },
    /// Transient; the controller always settles back into `SignedOut` or `SignedIn`.
    Error { kind: ErrorKind, message: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::SignedOut => "SignedOut",
            SessionState::Authenticating => "Authenticating",
            SessionState::SignedIn { .. } => "SignedIn",
            SessionState::Error { .. } => "Error",
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, SessionState::SignedIn { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub next_refresh_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub show_other: bool,
}

impl SessionSnapshot {
    pub fn initial(show_other: bool) -> Self {
        Self {
            state: SessionState::SignedOut,
            next_refresh_at_ms: None,
            last_error: None,
            show_other,
        }
    }
}

/// Why a controller operation did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Flow(FlowError),
    AuthExpired(ApiError),
    Transient(ApiError),
    SignInRequired,
    RefreshInProgress,
}

impl SessionError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SessionError::Flow(_) => Some(ErrorKind::Flow),
            SessionError::AuthExpired(_) => Some(ErrorKind::AuthExpired),
            SessionError::Transient(_) => Some(ErrorKind::Transient),
            SessionError::SignInRequired => Some(ErrorKind::SignInRequired),
            SessionError::RefreshInProgress => None,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Flow(e) => write!(f, "{}", e),
            SessionError::AuthExpired(e) => write!(f, "Credential rejected: {}", e),
            SessionError::Transient(e) => write!(f, "Refresh failed: {}", e),
            SessionError::SignInRequired => write!(f, "Sign in required"),
            SessionError::RefreshInProgress => write!(f, "A refresh is already in progress"),
        }
    }
}

impl std::error::Error for SessionError {}
