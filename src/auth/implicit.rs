//! Implicit grant: the token comes back directly in the redirect fragment.
//!
//! No refresh token is ever issued, so there is no silent path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::endpoints::OAuthClient;
use super::error::FlowError;
use super::flow::{AcquireMode, AcquireRequest, FlowStrategy, TokenGrant};
use super::user_agent::{random_token, scrub_url, UserAgent};
use crate::credential_store::{CredentialStore, FlowKind};

pub const PENDING_IMPLICIT_KEY: &str = "ag_monitor_implicit_v1";

/// Parameters carried in an implicit-grant redirect fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentParams {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl FragmentParams {
    pub fn has_payload(&self) -> bool {
        self.access_token.is_some() || self.error.is_some()
    }

    /// The grant carried by the fragment, or the provider's error.
    pub fn into_grant(self) -> Result<Option<TokenGrant>, FlowError> {
        if let Some(error) = &self.error {
            return Err(FlowError::from_provider(error, self.error_description.as_deref()));
        }
        Ok(self.access_token.map(|access_token| TokenGrant {
            access_token,
            token_type: self.token_type,
            scope: self.scope,
            expires_in: self.expires_in,
            refresh_token: None,
        }))
    }
}

/// Parses `access_token=...&expires_in=...` (leading `#` optional).
pub fn parse_token_fragment(fragment: &str) -> FragmentParams {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    let mut params = FragmentParams::default();
    for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
        let value = value.into_owned();
        match key.as_ref() {
            "access_token" if !value.is_empty() => params.access_token = Some(value),
            "token_type" => params.token_type = Some(value),
            "expires_in" => params.expires_in = value.parse().ok(),
            "scope" => params.scope = Some(value),
            "state" => params.state = Some(value),
            "error" => params.error = Some(value),
            "error_description" => params.error_description = Some(value),
            _ => {}
        }
    }
    params
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingImplicit {
    state: String,
}

pub struct ImplicitStrategy {
    client: OAuthClient,
    store: CredentialStore,
    user_agent: Arc<dyn UserAgent>,
    timeout: Duration,
}

impl ImplicitStrategy {
    pub fn new(
        client: OAuthClient,
        store: CredentialStore,
        user_agent: Arc<dyn UserAgent>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            user_agent,
            timeout,
        }
    }

    fn complete(&self, url: &Url) -> Result<Option<TokenGrant>, FlowError> {
        let params = parse_token_fragment(url.fragment().unwrap_or_default());
        if !params.has_payload() {
            return Ok(None);
        }

        let pending: Option<PendingImplicit> = self.store.take_artifact(PENDING_IMPLICIT_KEY);
        self.user_agent.replace_location(&scrub_url(url));
        let Some(pending) = pending else {
            tracing::warn!("Token fragment with no pending sign-in; ignoring");
            return Ok(None);
        };

        if params.error.is_none() && params.state.as_deref() != Some(pending.state.as_str()) {
            return Err(FlowError::StateMismatch);
        }
        params.into_grant()
    }
}

#[async_trait]
impl FlowStrategy for ImplicitStrategy {
    fn kind(&self) -> FlowKind {
        FlowKind::Implicit
    }

    async fn acquire(&self, request: AcquireRequest) -> Result<TokenGrant, FlowError> {
        if request.mode == AcquireMode::Silent {
            return Err(FlowError::NoSilentFlow);
        }

        let state = random_token(16);
        let redirect_uri = self.user_agent.redirect_uri().await?;
        self.store
            .put_artifact(PENDING_IMPLICIT_KEY, &PendingImplicit { state: state.clone() })
            .map_err(FlowError::transport)?;

        let url = self.client.authorize_url("token", &redirect_uri, &state, &[])?;
        tracing::info!("Redirecting to authorization endpoint for an implicit grant");
        self.user_agent.navigate(&url).await?;

        let returned = match self.user_agent.wait_for_return(self.timeout).await {
            Ok(url) => url,
            Err(e) => {
                let _: Option<PendingImplicit> = self.store.take_artifact(PENDING_IMPLICIT_KEY);
                return Err(e);
            }
        };
        match self.complete(&returned)? {
            Some(grant) => Ok(grant),
            None => {
                let _: Option<PendingImplicit> = self.store.take_artifact(PENDING_IMPLICIT_KEY);
                Err(FlowError::Provider {
                    error: "invalid_response".to_string(),
                    description: Some("Redirect carried no access token".to_string()),
                })
            }
        }
    }

    async fn resume(&self, url: &Url) -> Result<Option<TokenGrant>, FlowError> {
        self.complete(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::*;

    fn strategy(store: &CredentialStore, user_agent: Arc<FakeUserAgent>) -> ImplicitStrategy {
        ImplicitStrategy::new(test_client(), store.clone(), user_agent, Duration::from_secs(300))
    }

    #[test]
    fn test_parse_token_fragment() {
        let params = parse_token_fragment(
            "#access_token=ya29.abc&token_type=Bearer&expires_in=3599&scope=a%20b&state=s1",
        );
        assert_eq!(params.access_token.as_deref(), Some("ya29.abc"));
        assert_eq!(params.expires_in, Some(3599));
        assert_eq!(params.scope.as_deref(), Some("a b"));
        assert_eq!(params.state.as_deref(), Some("s1"));

        assert!(!parse_token_fragment("").has_payload());
        assert!(parse_token_fragment("error=access_denied").has_payload());
    }

    #[tokio::test]
    async fn test_interactive_parses_returned_fragment() {
        let store = memory_store();
        let user_agent = Arc::new(FakeUserAgent::new(|sent| {
            let state = query_param(sent, "state").unwrap_or_default();
            Ok(Url::parse(&format!(
                "{}#access_token=tok&expires_in=60&state={}",
                REDIRECT_URI, state
            ))
            .unwrap())
        }));
        let strategy = strategy(&store, user_agent.clone());

        let grant = strategy.acquire(AcquireRequest::interactive()).await.unwrap();
        assert_eq!(grant.access_token, "tok");
        assert_eq!(grant.expires_in, Some(60));
        assert_eq!(grant.refresh_token, None);

        let sent = user_agent.navigated.lock().unwrap()[0].clone();
        assert_eq!(query_param(&sent, "response_type").as_deref(), Some("token"));
        assert_eq!(
            user_agent.replaced.lock().unwrap().clone(),
            vec![Url::parse(REDIRECT_URI).unwrap()]
        );
    }

    #[tokio::test]
    async fn test_silent_reports_no_silent_flow() {
        let store = memory_store();
        let user_agent = Arc::new(FakeUserAgent::returning_code("unused"));
        let strategy = strategy(&store, user_agent.clone());

        let err = strategy
            .acquire(AcquireRequest::silent(Some("ignored".to_string())))
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::NoSilentFlow);
        assert_eq!(user_agent.navigation_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_return_drops_pending_state() {
        let store = memory_store();
        let user_agent = Arc::new(FakeUserAgent::new(|_| Ok(Url::parse(REDIRECT_URI).unwrap())));
        let strategy = strategy(&store, user_agent);

        let err = strategy
            .acquire(AcquireRequest::interactive())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Provider { ref error, .. } if error == "invalid_response"));

        let leftover: Option<serde_json::Value> = store.take_artifact(PENDING_IMPLICIT_KEY);
        assert!(leftover.is_none());
    }

    #[tokio::test]
    async fn test_resume_without_pending_state_is_noop() {
        let store = memory_store();
        let user_agent = Arc::new(FakeUserAgent::returning_code("unused"));
        let strategy = strategy(&store, user_agent);

        let url = Url::parse(&format!("{}#access_token=stale&state=x", REDIRECT_URI)).unwrap();
        assert_eq!(strategy.resume(&url).await.unwrap(), None);
    }
}
