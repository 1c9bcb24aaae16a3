//! The polymorphic acquisition contract shared by every strategy.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::error::FlowError;
use crate::credential_store::{CredentialRecord, FlowKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// The user may be shown a consent prompt.
    Interactive,
    /// Must never show a prompt; fails fast instead.
    Silent,
}

impl AcquireMode {
    pub fn is_silent(&self) -> bool {
        matches!(self, AcquireMode::Silent)
    }
}

#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub mode: AcquireMode,
    /// Refresh token from the stored credential, when one exists.
    pub refresh_token: Option<String>,
}

impl AcquireRequest {
    pub fn interactive() -> Self {
        Self {
            mode: AcquireMode::Interactive,
            refresh_token: None,
        }
    }

    pub fn silent(refresh_token: Option<String>) -> Self {
        Self {
            mode: AcquireMode::Silent,
            refresh_token,
        }
    }
}

/// A freshly issued token as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenGrant {
    pub fn into_record(self, now_secs: i64) -> CredentialRecord {
        CredentialRecord::from_grant(
            self.access_token,
            self.token_type,
            self.scope,
            self.expires_in,
            self.refresh_token,
            now_secs,
        )
    }
}

/// Performs one concrete acquisition of a fresh token.
#[async_trait]
pub trait FlowStrategy: Send + Sync {
    fn kind(&self) -> FlowKind;

    async fn acquire(&self, request: AcquireRequest) -> Result<TokenGrant, FlowError>;

    /// Completes a redirect round-trip that returned at `url`.
    ///
    /// Returns `Ok(None)` when the URL carries nothing this strategy is waiting for.
    async fn resume(&self, _url: &Url) -> Result<Option<TokenGrant>, FlowError> {
        Ok(None)
    }
}
