use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seconds before the recorded expiry at which a credential is already treated as absent.
pub const EXPIRY_MARGIN_SECS: i64 = 10;

pub const MIN_REFRESH_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;
/// Upper bound on the refresh interval; a deadline past it would overflow timer arithmetic.
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 24 * 60 * 60;

pub const DEFAULT_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const DEFAULT_SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/userinfo.email https://www.googleapis.com/auth/userinfo.profile";
pub const DEFAULT_DUET_PROJECT: &str = "rising-fact-p41fc";

/// The persisted bearer credential.
///
/// Field names match the stored blob layout (`access_token`, `expires_at`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// Epoch seconds; `None` when the provider did not report a lifetime.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub obtained_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl CredentialRecord {
    /// Builds a record from a freshly granted token at `now_secs`.
    pub fn from_grant(
        access_token: String,
        token_type: Option<String>,
        scope: Option<String>,
        expires_in: Option<i64>,
        refresh_token: Option<String>,
        now_secs: i64,
    ) -> Self {
        Self {
            access_token,
            token_type: token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            scope: scope.unwrap_or_default(),
            expires_at: expires_in.map(|secs| now_secs.saturating_add(secs)),
            obtained_at: now_secs,
            refresh_token,
        }
    }

    /// A record is usable when it has a token that will not expire within the safety margin.
    pub fn is_usable(&self, now_secs: i64) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now_secs.saturating_add(EXPIRY_MARGIN_SECS),
            None => true,
        }
    }
}

/// Which Cloud Code host family to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostMode {
    #[default]
    Auto,
    Primary,
    Daily,
}

impl HostMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostMode::Auto => "auto",
            HostMode::Primary => "primary",
            HostMode::Daily => "daily",
        }
    }
}

impl fmt::Display for HostMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HostMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(HostMode::Auto),
            "primary" => Ok(HostMode::Primary),
            "daily" => Ok(HostMode::Daily),
            other => Err(format!("unknown host mode '{}' (auto, primary, daily)", other)),
        }
    }
}

/// The one active acquisition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    #[default]
    Pkce,
    Implicit,
    Popup,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Pkce => "pkce",
            FlowKind::Implicit => "implicit",
            FlowKind::Popup => "popup",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pkce" => Ok(FlowKind::Pkce),
            "implicit" => Ok(FlowKind::Implicit),
            "popup" => Ok(FlowKind::Popup),
            other => Err(format!("unknown flow '{}' (pkce, implicit, popup)", other)),
        }
    }
}

/// User configuration, persisted as a camelCase JSON blob.
///
/// Missing fields fall back to their defaults individually so an older blob
/// keeps working after a field is added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub scopes: String,
    pub duet_project: String,
    pub quota_project: String,
    pub host_mode: HostMode,
    pub refresh_interval_sec: u64,
    pub flow: FlowKind,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            scopes: DEFAULT_SCOPES.to_string(),
            duet_project: DEFAULT_DUET_PROJECT.to_string(),
            quota_project: String::new(),
            host_mode: HostMode::Auto,
            refresh_interval_sec: DEFAULT_REFRESH_INTERVAL_SECS,
            flow: FlowKind::Pkce,
        }
    }
}

impl MonitorSettings {
    /// Restores the invariants every stored settings record must satisfy.
    pub fn normalized(mut self) -> Self {
        if self.client_id.trim().is_empty() {
            self.client_id = DEFAULT_CLIENT_ID.to_string();
        }
        if self.scopes.trim().is_empty() {
            self.scopes = DEFAULT_SCOPES.to_string();
        }
        if self.duet_project.trim().is_empty() {
            self.duet_project = DEFAULT_DUET_PROJECT.to_string();
        }
        self.quota_project = self.quota_project.trim().to_string();
        if self
            .client_secret
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            self.client_secret = None;
        }
        self.refresh_interval_sec = clamp_interval(self.refresh_interval_sec);
        self
    }

    /// Applies a user-typed interval. Unparsable text falls back to the default.
    pub fn with_refresh_interval_input(mut self, input: &str) -> Self {
        self.refresh_interval_sec = parse_interval_input(input);
        self
    }

    /// The configured project override, if any.
    pub fn quota_project_override(&self) -> Option<&str> {
        let trimmed = self.quota_project.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(clamp_interval(self.refresh_interval_sec))
    }
}

pub fn clamp_interval(secs: u64) -> u64 {
    secs.clamp(MIN_REFRESH_INTERVAL_SECS, MAX_REFRESH_INTERVAL_SECS)
}

/// Parses interval text the way the settings form does: empty or non-numeric
/// input means the default, anything else is clamped into the allowed range.
pub fn parse_interval_input(input: &str) -> u64 {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return DEFAULT_REFRESH_INTERVAL_SECS;
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => {
            if value <= MIN_REFRESH_INTERVAL_SECS as f64 {
                MIN_REFRESH_INTERVAL_SECS
            } else {
                // Fractional seconds round down, like the numeric input step.
                clamp_interval(value.floor() as u64)
            }
        }
        _ => DEFAULT_REFRESH_INTERVAL_SECS,
    }
}
