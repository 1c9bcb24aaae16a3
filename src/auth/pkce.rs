//! Authorization-code flow with a proof key.
//!
//! The verifier and state are stored for exactly one redirect round-trip and
//! consumed when the browser comes back. Silent acquisition redeems the stored
//! refresh token when there is one.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::endpoints::{OAuthClient, TokenEndpoint};
use super::error::FlowError;
use super::flow::{AcquireMode, AcquireRequest, FlowStrategy, TokenGrant};
use super::user_agent::{random_token, scrub_url, UserAgent};
use crate::credential_store::{CredentialStore, FlowKind};

pub const PENDING_PKCE_KEY: &str = "ag_monitor_pkce_v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceCodes {
    pub code_verifier: String,
    pub code_challenge: String,
}

pub fn generate_pkce() -> PkceCodes {
    let code_verifier = random_token(32);
    let code_challenge = challenge_for(&code_verifier);
    PkceCodes {
        code_verifier,
        code_challenge,
    }
}

/// S256 challenge: base64url without padding of the verifier's SHA-256.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingPkce {
    verifier: String,
    state: String,
    redirect_uri: String,
}

pub struct PkceStrategy {
    client: OAuthClient,
    store: CredentialStore,
    user_agent: Arc<dyn UserAgent>,
    endpoint: Arc<dyn TokenEndpoint>,
    timeout: Duration,
}

impl PkceStrategy {
    pub fn new(
        client: OAuthClient,
        store: CredentialStore,
        user_agent: Arc<dyn UserAgent>,
        endpoint: Arc<dyn TokenEndpoint>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            user_agent,
            endpoint,
            timeout,
        }
    }

    async fn start_round_trip(&self) -> Result<TokenGrant, FlowError> {
        let codes = generate_pkce();
        let state = random_token(16);
        let redirect_uri = self.user_agent.redirect_uri().await?;

        self.store
            .put_artifact(
                PENDING_PKCE_KEY,
                &PendingPkce {
                    verifier: codes.code_verifier.clone(),
                    state: state.clone(),
                    redirect_uri: redirect_uri.clone(),
                },
            )
            .map_err(FlowError::transport)?;

        let url = self.client.authorize_url(
            "code",
            &redirect_uri,
            &state,
            &[
                ("code_challenge", codes.code_challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )?;

        tracing::info!("Redirecting to authorization endpoint");
        self.user_agent.navigate(&url).await?;

        let returned = match self.user_agent.wait_for_return(self.timeout).await {
            Ok(url) => url,
            Err(e) => {
                // The round-trip is over; a late return must not find a verifier.
                let _: Option<PendingPkce> = self.store.take_artifact(PENDING_PKCE_KEY);
                return Err(e);
            }
        };

        match self.complete(&returned).await? {
            Some(grant) => Ok(grant),
            None => {
                let _: Option<PendingPkce> = self.store.take_artifact(PENDING_PKCE_KEY);
                Err(FlowError::Provider {
                    error: "invalid_response".to_string(),
                    description: Some("Redirect carried no authorization code".to_string()),
                })
            }
        }
    }

    async fn complete(&self, url: &Url) -> Result<Option<TokenGrant>, FlowError> {
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        if !params.contains_key("code") && !params.contains_key("error") {
            return Ok(None);
        }

        let pending: Option<PendingPkce> = self.store.take_artifact(PENDING_PKCE_KEY);
        self.user_agent.replace_location(&scrub_url(url));
        let Some(pending) = pending else {
            tracing::warn!("Authorization response with no pending verifier; ignoring");
            return Ok(None);
        };

        if let Some(error) = params.get("error") {
            return Err(FlowError::from_provider(
                error,
                params.get("error_description").map(String::as_str),
            ));
        }
        if params.get("state") != Some(&pending.state) {
            return Err(FlowError::StateMismatch);
        }
        let Some(code) = params.get("code") else {
            return Ok(None);
        };

        let grant = self
            .endpoint
            .exchange_code(&self.client, code, &pending.verifier, &pending.redirect_uri)
            .await?;
        Ok(Some(grant))
    }
}

#[async_trait]
impl FlowStrategy for PkceStrategy {
    fn kind(&self) -> FlowKind {
        FlowKind::Pkce
    }

    async fn acquire(&self, request: AcquireRequest) -> Result<TokenGrant, FlowError> {
        match request.mode {
            AcquireMode::Silent => match request.refresh_token.as_deref() {
                Some(refresh_token) => self.endpoint.refresh(&self.client, refresh_token).await,
                None => Err(FlowError::NoSilentFlow),
            },
            AcquireMode::Interactive => self.start_round_trip().await,
        }
    }

    async fn resume(&self, url: &Url) -> Result<Option<TokenGrant>, FlowError> {
        self.complete(url).await
    }
}

#[cfg(test)]
#[path = "tests/pkce_tests.rs"]
mod tests;
