//! Persistent record of the current credential and the user configuration.
//!
//! Reads are resilient: a missing key, unreadable file or corrupt blob yields
//! `None` (credential) or defaults (settings) and a warning in the debug log.
//! Every read re-validates expiry against the clock instead of trusting a
//! cached copy.

mod kv;
mod types;

pub use kv::{FileKvStore, KvStore, MemoryKvStore};
pub use types::{
    clamp_interval, parse_interval_input, CredentialRecord, FlowKind, HostMode, MonitorSettings,
    DEFAULT_CLIENT_ID, DEFAULT_DUET_PROJECT, DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_SCOPES,
    EXPIRY_MARGIN_SECS, MAX_REFRESH_INTERVAL_SECS, MIN_REFRESH_INTERVAL_SECS,
};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;

/// Versioned key of the settings blob.
pub const SETTINGS_KEY: &str = "ag_monitor_settings_v1";
/// Versioned key of the credential blob.
pub const TOKEN_KEY: &str = "ag_monitor_token_v1";

#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Loads the stored credential as written, without an expiry check.
    pub fn load_token(&self) -> Option<CredentialRecord> {
        self.read_json(TOKEN_KEY)
    }

    /// Loads the stored credential only if it is still usable.
    pub fn load_valid_token(&self) -> Option<CredentialRecord> {
        let record = self.load_token()?;
        if record.is_usable(self.clock.now_secs()) {
            Some(record)
        } else {
            tracing::debug!(expires_at = ?record.expires_at, "Stored credential is expired");
            None
        }
    }

    /// The stored access token, or `None` if absent or expiring within the margin.
    pub fn stored_access_token(&self) -> Option<String> {
        self.load_valid_token().map(|record| record.access_token)
    }

    pub fn save_token(&self, record: &CredentialRecord) -> Result<()> {
        self.write_json(TOKEN_KEY, record)
            .context("Failed to persist credential")
    }

    pub fn clear_token(&self) -> Result<()> {
        self.kv.remove(TOKEN_KEY).context("Failed to clear credential")
    }

    pub fn load_settings(&self) -> MonitorSettings {
        self.read_json::<MonitorSettings>(SETTINGS_KEY)
            .unwrap_or_default()
            .normalized()
    }

    /// Persists settings. The interval is clamped on every write.
    pub fn save_settings(&self, settings: &MonitorSettings) -> Result<MonitorSettings> {
        let normalized = settings.clone().normalized();
        self.write_json(SETTINGS_KEY, &normalized)
            .context("Failed to persist settings")?;
        Ok(normalized)
    }

    /// Stores a one-time artifact that must survive a redirect round-trip.
    pub fn put_artifact<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.write_json(key, value)
            .with_context(|| format!("Failed to persist {}", key))
    }

    /// Reads and removes a one-time artifact. A second call returns `None`.
    pub fn take_artifact<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.read_json(key);
        if let Err(e) = self.kv.remove(key) {
            tracing::warn!(key, error = %e, "Failed to remove one-time artifact");
        }
        value
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.kv.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read stored blob");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring unparsable stored blob");
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.kv.set(key, &json)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
