use std::fmt;

/// Why a single acquisition attempt failed.
///
/// Flow errors are surfaced to the user and never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The user closed the consent window or denied access.
    Cancelled,
    /// The consent window could not be opened.
    PopupBlocked,
    /// No answer arrived before the hard deadline.
    Timeout,
    /// Silent consent was attempted but the provider needs the user.
    InteractionRequired,
    /// The strategy has no way to acquire a token without the user.
    NoSilentFlow,
    /// Another acquisition is already outstanding.
    AcquisitionInProgress,
    /// The returned `state` did not match the one sent.
    StateMismatch,
    /// The authorization server reported an error.
    Provider {
        error: String,
        description: Option<String>,
    },
    /// The token endpoint rejected a code exchange or refresh grant.
    Exchange { status: u16, message: String },
    /// Network or local I/O failure.
    Transport(String),
}

impl FlowError {
    pub fn from_provider(error: &str, description: Option<&str>) -> Self {
        match error {
            "access_denied" => FlowError::Cancelled,
            "interaction_required" | "login_required" | "consent_required" => {
                FlowError::InteractionRequired
            }
            _ => FlowError::Provider {
                error: error.to_string(),
                description: description.map(str::to_string),
            },
        }
    }

    pub fn transport(err: impl fmt::Display) -> Self {
        FlowError::Transport(err.to_string())
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Cancelled => write!(f, "Sign-in was cancelled"),
            FlowError::PopupBlocked => write!(f, "Sign-in window could not be opened"),
            FlowError::Timeout => write!(f, "Sign-in timed out"),
            FlowError::InteractionRequired => write!(f, "Sign-in requires user interaction"),
            FlowError::NoSilentFlow => write!(f, "No silent flow available"),
            FlowError::AcquisitionInProgress => write!(f, "A sign-in is already in progress"),
            FlowError::StateMismatch => write!(f, "OAuth state mismatch"),
            FlowError::Provider { error, description } => match description {
                Some(desc) => write!(f, "OAuth error: {} ({})", error, desc),
                None => write!(f, "OAuth error: {}", error),
            },
            FlowError::Exchange { status, message } => {
                write!(f, "Token exchange failed ({}): {}", status, message)
            }
            FlowError::Transport(msg) => write!(f, "Token request failed: {}", msg),
        }
    }
}

impl std::error::Error for FlowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mapping() {
        assert_eq!(FlowError::from_provider("access_denied", None), FlowError::Cancelled);
        assert_eq!(
            FlowError::from_provider("interaction_required", None),
            FlowError::InteractionRequired
        );
        assert_eq!(
            FlowError::from_provider("invalid_client", Some("bad id")).to_string(),
            "OAuth error: invalid_client (bad id)"
        );
    }
}
