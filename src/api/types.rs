use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A failed collaborator call, with enough detail for the refresh cycle to classify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status, or `None` for transport failures.
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(err: impl fmt::Display) -> Self {
        Self {
            status: None,
            message: err.to_string(),
        }
    }

    /// Whether another host might answer where this one did not.
    pub fn is_host_failure(&self) -> bool {
        match self.status {
            None => true,
            Some(status) => status == 429 || status >= 500,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    /// Base URL of the host that answered.
    pub host: String,
    pub tier: String,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelQuota {
    pub display_name: Option<String>,
    pub remaining_fraction: Option<f64>,
    pub reset_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaSnapshot {
    pub host: String,
    pub models: BTreeMap<String, ModelQuota>,
}

/// Host label for display: `https://cloudcode-pa.googleapis.com` becomes `cloudcode-pa.googleapis.com`.
pub fn host_label(base: &str) -> String {
    url::Url::parse(base)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| base.to_string())
}
