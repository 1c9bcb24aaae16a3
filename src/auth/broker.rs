//! Orchestrates acquisition across the store and the active flow strategy.
//!
//! Only one acquisition may be outstanding. A second interactive caller is
//! rejected with `AcquisitionInProgress`; a silent caller gets `None`.

use std::sync::Arc;
use url::Url;

use super::error::FlowError;
use super::flow::{AcquireRequest, FlowStrategy, TokenGrant};
use crate::credential_store::{CredentialRecord, CredentialStore, FlowKind};

pub struct CredentialBroker {
    store: CredentialStore,
    strategy: Arc<dyn FlowStrategy>,
    in_flight: tokio::sync::Mutex<()>,
}

impl CredentialBroker {
    pub fn new(store: CredentialStore, strategy: Arc<dyn FlowStrategy>) -> Self {
        Self {
            store,
            strategy,
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn flow_kind(&self) -> FlowKind {
        self.strategy.kind()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// The stored token if it is still valid. Never touches the network.
    pub fn stored_access_token(&self) -> Option<String> {
        self.store.stored_access_token()
    }

    /// Returns a valid token, prompting the user when none is stored.
    pub async fn get_interactive(&self) -> Result<String, FlowError> {
        if let Some(token) = self.stored_access_token() {
            return Ok(token);
        }
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::warn!("Rejected interactive acquisition while another is outstanding");
            return Err(FlowError::AcquisitionInProgress);
        };
        // Another caller may have finished while we waited for the guard.
        if let Some(token) = self.stored_access_token() {
            return Ok(token);
        }

        tracing::info!(flow = %self.strategy.kind(), "Starting interactive acquisition");
        let grant = self.strategy.acquire(AcquireRequest::interactive()).await?;
        self.persist(grant)
    }

    /// Returns a valid token without prompting, or `None`.
    pub async fn get_silent(&self) -> Option<String> {
        if let Some(token) = self.stored_access_token() {
            return Some(token);
        }
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Silent acquisition skipped; another acquisition is outstanding");
            return None;
        };

        let refresh_token = self.store.load_token().and_then(|r| r.refresh_token);
        let result = self
            .strategy
            .acquire(AcquireRequest::silent(refresh_token))
            .await;
        match result {
            Ok(grant) => match self.persist(grant) {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!(error = %e, "Silent acquisition could not be persisted");
                    None
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "Silent acquisition failed");
                None
            }
        }
    }

    /// Completes a redirect-based sign-in from the URL the browser returned to.
    pub async fn handle_redirect(&self, url: &Url) -> Result<Option<String>, FlowError> {
        match self.strategy.resume(url).await? {
            Some(grant) => self.persist(grant).map(Some),
            None => Ok(None),
        }
    }

    /// Forgets the stored credential after the API rejected it.
    pub fn invalidate(&self) {
        if let Err(e) = self.store.clear_token() {
            tracing::warn!(error = %e, "Failed to clear rejected credential");
        }
    }

    fn persist(&self, grant: TokenGrant) -> Result<String, FlowError> {
        let previous_refresh = self.store.load_token().and_then(|r| r.refresh_token);
        let mut record: CredentialRecord = grant.into_record(self.store.clock().now_secs());
        if record.refresh_token.is_none() {
            record.refresh_token = previous_refresh;
        }
        self.store.save_token(&record).map_err(FlowError::transport)?;
        tracing::info!(expires_at = ?record.expires_at, "Credential stored");
        Ok(record.access_token)
    }
}

#[cfg(test)]
#[path = "tests/broker_tests.rs"]
mod tests;
