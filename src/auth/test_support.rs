//! Scripted collaborators for strategy and broker tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use super::endpoints::{OAuthClient, TokenEndpoint};
use super::error::FlowError;
use super::flow::{AcquireRequest, FlowStrategy, TokenGrant};
use super::user_agent::UserAgent;
use crate::clock::ManualClock;
use crate::credential_store::{CredentialStore, FlowKind, MemoryKvStore};

pub const REDIRECT_URI: &str = "http://127.0.0.1:4321/callback";
pub const NOW_MS: i64 = 1_700_000_000_000;

pub fn memory_store() -> CredentialStore {
    CredentialStore::new(Arc::new(MemoryKvStore::new()), Arc::new(ManualClock::new(NOW_MS)))
}

pub fn test_client() -> OAuthClient {
    OAuthClient {
        client_id: "client-123".to_string(),
        client_secret: None,
        scopes: "scope-a scope-b".to_string(),
    }
}

pub fn grant(token: &str) -> TokenGrant {
    TokenGrant {
        access_token: token.to_string(),
        token_type: Some("Bearer".to_string()),
        scope: None,
        expires_in: Some(3600),
        refresh_token: None,
    }
}

pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .into_owned()
        .collect::<HashMap<_, _>>()
        .remove(key)
}

type Responder = Box<dyn FnMut(&Url) -> Result<Url, FlowError> + Send>;

/// A browser whose return is computed from the last navigated URL.
pub struct FakeUserAgent {
    pub navigated: Mutex<Vec<Url>>,
    pub replaced: Mutex<Vec<Url>>,
    responder: Mutex<Responder>,
}

impl FakeUserAgent {
    pub fn new(responder: impl FnMut(&Url) -> Result<Url, FlowError> + Send + 'static) -> Self {
        Self {
            navigated: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
            responder: Mutex::new(Box::new(responder)),
        }
    }

    /// Returns to the redirect URI with `code` and the sent state echoed back.
    pub fn returning_code(code: &'static str) -> Self {
        Self::new(move |sent| {
            let state = query_param(sent, "state").unwrap_or_default();
            Ok(Url::parse(&format!("{}?code={}&state={}", REDIRECT_URI, code, state)).unwrap())
        })
    }

    pub fn navigation_count(&self) -> usize {
        self.navigated.lock().unwrap().len()
    }
}

#[async_trait]
impl UserAgent for FakeUserAgent {
    async fn redirect_uri(&self) -> Result<String, FlowError> {
        Ok(REDIRECT_URI.to_string())
    }

    async fn navigate(&self, url: &Url) -> Result<(), FlowError> {
        self.navigated.lock().unwrap().push(url.clone());
        Ok(())
    }

    async fn wait_for_return(&self, _timeout: Duration) -> Result<Url, FlowError> {
        let last = self.navigated.lock().unwrap().last().cloned();
        let last = last.ok_or(FlowError::Timeout)?;
        (self.responder.lock().unwrap())(&last)
    }

    fn replace_location(&self, url: &Url) {
        self.replaced.lock().unwrap().push(url.clone());
    }
}

/// Records grant calls and answers with a fixed result.
pub struct FakeTokenEndpoint {
    pub exchanges: Mutex<Vec<(String, String)>>,
    pub refreshes: Mutex<Vec<String>>,
    result: Result<TokenGrant, FlowError>,
}

impl FakeTokenEndpoint {
    pub fn answering(result: Result<TokenGrant, FlowError>) -> Self {
        Self {
            exchanges: Mutex::new(Vec::new()),
            refreshes: Mutex::new(Vec::new()),
            result,
        }
    }
}

#[async_trait]
impl TokenEndpoint for FakeTokenEndpoint {
    async fn exchange_code(
        &self,
        _client: &OAuthClient,
        code: &str,
        verifier: &str,
        _redirect_uri: &str,
    ) -> Result<TokenGrant, FlowError> {
        self.exchanges
            .lock()
            .unwrap()
            .push((code.to_string(), verifier.to_string()));
        self.result.clone()
    }

    async fn refresh(
        &self,
        _client: &OAuthClient,
        refresh_token: &str,
    ) -> Result<TokenGrant, FlowError> {
        self.refreshes.lock().unwrap().push(refresh_token.to_string());
        self.result.clone()
    }
}

/// A strategy that records requests and optionally blocks until released.
pub struct ScriptedStrategy {
    pub requests: Mutex<Vec<AcquireRequest>>,
    pub calls: AtomicUsize,
    gate: Option<Arc<tokio::sync::Notify>>,
    result: Result<TokenGrant, FlowError>,
}

impl ScriptedStrategy {
    pub fn answering(result: Result<TokenGrant, FlowError>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
            result,
        }
    }

    pub fn gated(result: Result<TokenGrant, FlowError>, gate: Arc<tokio::sync::Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::answering(result)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlowStrategy for ScriptedStrategy {
    fn kind(&self) -> FlowKind {
        FlowKind::Popup
    }

    async fn acquire(&self, request: AcquireRequest) -> Result<TokenGrant, FlowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.result.clone()
    }
}
