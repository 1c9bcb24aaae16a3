//! OAuth client identity, authorization URL construction and the token endpoint.

use async_trait::async_trait;
use url::Url;

use super::error::FlowError;
use super::flow::TokenGrant;
use crate::credential_store::MonitorSettings;
use crate::http;

pub const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Runtime override for the client secret of desktop-type clients.
pub const CLIENT_SECRET_ENV: &str = "AG_MONITOR_CLIENT_SECRET";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: String,
}

impl OAuthClient {
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        let client_secret = std::env::var(CLIENT_SECRET_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| settings.client_secret.clone());
        Self {
            client_id: settings.client_id.clone(),
            client_secret,
            scopes: settings.scopes.clone(),
        }
    }

    /// Builds the authorization endpoint URL for one round-trip.
    pub fn authorize_url(
        &self,
        response_type: &str,
        redirect_uri: &str,
        state: &str,
        extra: &[(&str, &str)],
    ) -> Result<Url, FlowError> {
        let mut url = Url::parse(AUTHORIZE_URL).map_err(FlowError::transport)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("response_type", response_type)
                .append_pair("scope", &self.scopes)
                .append_pair("state", state)
                .append_pair("include_granted_scopes", "true");
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

/// The code-exchange and refresh-token grants.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(
        &self,
        client: &OAuthClient,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, FlowError>;

    async fn refresh(
        &self,
        client: &OAuthClient,
        refresh_token: &str,
    ) -> Result<TokenGrant, FlowError>;
}

pub struct GoogleTokenEndpoint {
    token_url: String,
}

impl Default for GoogleTokenEndpoint {
    fn default() -> Self {
        Self::new(TOKEN_URL)
    }
}

impl GoogleTokenEndpoint {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
        }
    }

    async fn post_form(&self, params: Vec<(&'static str, String)>) -> Result<TokenGrant, FlowError> {
        let token_url = self.token_url.clone();
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();

        let reply = tokio::task::spawn_blocking(move || {
            let response = http::agent()
                .post(&token_url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .send(&body)?;
            http::read_reply(response)
        })
        .await
        .map_err(FlowError::transport)?
        .map_err(FlowError::transport)?;

        parse_token_reply(&reply)
    }
}

fn with_secret(client: &OAuthClient, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
    params.push(("client_id", client.client_id.clone()));
    if let Some(secret) = &client.client_secret {
        params.push(("client_secret", secret.clone()));
    }
    params
}

pub(crate) fn parse_token_reply(reply: &http::HttpReply) -> Result<TokenGrant, FlowError> {
    if !reply.is_success() {
        let message = http::error_message(&reply.body).unwrap_or_else(|| reply.body.clone());
        tracing::warn!(status = reply.status, %message, "Token endpoint rejected grant");
        return Err(FlowError::Exchange {
            status: reply.status,
            message,
        });
    }
    let grant: TokenGrant = serde_json::from_str(&reply.body).map_err(|e| FlowError::Exchange {
        status: reply.status,
        message: format!("Malformed token response: {}", e),
    })?;
    if grant.access_token.is_empty() {
        return Err(FlowError::Exchange {
            status: reply.status,
            message: "Token response has no access_token".to_string(),
        });
    }
    Ok(grant)
}

#[async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn exchange_code(
        &self,
        client: &OAuthClient,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, FlowError> {
        tracing::debug!("Exchanging authorization code");
        let params = with_secret(
            client,
            vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", code.to_string()),
                ("code_verifier", verifier.to_string()),
                ("redirect_uri", redirect_uri.to_string()),
            ],
        );
        self.post_form(params).await
    }

    async fn refresh(
        &self,
        client: &OAuthClient,
        refresh_token: &str,
    ) -> Result<TokenGrant, FlowError> {
        tracing::debug!("Redeeming refresh token");
        let params = with_secret(
            client,
            vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.to_string()),
            ],
        );
        self.post_form(params).await
    }
}
