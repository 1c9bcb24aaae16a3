//! Cloud Code and Google user-info client.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::types::{ApiError, ModelQuota, QuotaSnapshot, SubscriptionInfo, UserProfile};
use super::QuotaApi;
use crate::credential_store::{HostMode, MonitorSettings};
use crate::http;

pub const PRIMARY_HOST: &str = "https://cloudcode-pa.googleapis.com";
pub const DAILY_HOST: &str = "https://daily-cloudcode-pa.googleapis.com";
pub const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const LOAD_CODE_ASSIST: &str = "/v1internal:loadCodeAssist";
const FETCH_MODELS: &str = "/v1internal:fetchAvailableModels";

pub fn hosts_for(mode: HostMode) -> &'static [&'static str] {
    match mode {
        HostMode::Auto => &[PRIMARY_HOST, DAILY_HOST],
        HostMode::Primary => &[PRIMARY_HOST],
        HostMode::Daily => &[DAILY_HOST],
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CloudCodeClient;

impl CloudCodeClient {
    pub fn new() -> Self {
        Self
    }

    async fn call(&self, method: &'static str, url: String, token: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let auth = format!("Bearer {}", token);
        let reply = tokio::task::spawn_blocking(move || {
            let agent = http::agent();
            let response = match body {
                Some(body) => agent
                    .post(&url)
                    .header("Authorization", &auth)
                    .header("Content-Type", "application/json")
                    .send(&body.to_string())?,
                None => agent.get(&url).header("Authorization", &auth).call()?,
            };
            http::read_reply(response)
        })
        .await
        .map_err(ApiError::transport)?
        .map_err(ApiError::transport)?;

        if !reply.is_success() {
            let message = http::error_message(&reply.body)
                .unwrap_or_else(|| format!("{} request failed", method));
            return Err(ApiError::http(reply.status, message));
        }
        serde_json::from_str(&reply.body)
            .map_err(|e| ApiError::http(reply.status, format!("Malformed {} response: {}", method, e)))
    }

    /// Posts to each candidate host in turn, moving on only when a host itself failed.
    async fn post_with_fallback(
        &self,
        mode: HostMode,
        path: &'static str,
        token: &str,
        body: Value,
    ) -> Result<(String, Value), ApiError> {
        let mut last_error = None;
        for base in hosts_for(mode) {
            let url = format!("{}{}", base, path);
            match self.call(path, url, token, Some(body.clone())).await {
                Ok(value) => return Ok((base.to_string(), value)),
                Err(e) if e.is_host_failure() => {
                    tracing::warn!(host = base, error = %e, "Cloud Code host failed; trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ApiError::transport("No Cloud Code host configured")))
    }
}

#[async_trait]
impl QuotaApi for CloudCodeClient {
    async fn fetch_subscription(
        &self,
        token: &str,
        settings: &MonitorSettings,
    ) -> Result<SubscriptionInfo, ApiError> {
        let body = json!({
            "metadata": {
                "ideType": "ANTIGRAVITY",
                "platform": "PLATFORM_UNSPECIFIED",
                "pluginType": "GEMINI",
                "duetProject": settings.duet_project,
            }
        });
        let (host, value) = self
            .post_with_fallback(settings.host_mode, LOAD_CODE_ASSIST, token, body)
            .await?;
        Ok(parse_subscription(host, &value))
    }

    async fn fetch_user_info(&self, token: &str) -> Result<UserProfile, ApiError> {
        let value = self
            .call("userinfo", USERINFO_URL.to_string(), token, None)
            .await?;
        Ok(parse_user_info(&value))
    }

    async fn fetch_quota(
        &self,
        token: &str,
        project: Option<&str>,
        settings: &MonitorSettings,
    ) -> Result<QuotaSnapshot, ApiError> {
        let body = match project {
            Some(project) => json!({ "project": project }),
            None => json!({}),
        };
        let (host, value) = self
            .post_with_fallback(settings.host_mode, FETCH_MODELS, token, body)
            .await?;
        parse_models(host, &value)
    }
}

fn tier_name(tier: &Value) -> Option<String> {
    ["name", "id"]
        .iter()
        .filter_map(|key| tier.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn parse_subscription(host: String, value: &Value) -> SubscriptionInfo {
    let tier = value
        .get("paidTier")
        .and_then(tier_name)
        .or_else(|| value.get("currentTier").and_then(tier_name))
        .unwrap_or_else(|| "unknown".to_string());
    let project_id = match value.get("cloudaicompanionProject") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Object(obj)) => obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        _ => None,
    };
    SubscriptionInfo {
        host,
        tier,
        project_id,
    }
}

pub fn parse_user_info(value: &Value) -> UserProfile {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    UserProfile {
        name: text("name").or_else(|| text("given_name")),
        email: text("email"),
        picture: text("picture"),
    }
}

pub fn parse_models(host: String, value: &Value) -> Result<QuotaSnapshot, ApiError> {
    let models = match value.get("models") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(id, data)| (id.clone(), parse_model(data)))
            .collect(),
        Some(_) => {
            return Err(ApiError::http(200, "Malformed models response: expected an object"))
        }
    };
    Ok(QuotaSnapshot { host, models })
}

fn parse_model(data: &Value) -> ModelQuota {
    let quota = data.get("quotaInfo").or_else(|| data.get("quota_info"));
    let field = |camel: &str, snake: &str| {
        quota.and_then(|q| q.get(camel).or_else(|| q.get(snake)))
    };
    ModelQuota {
        display_name: data
            .get("displayName")
            .and_then(Value::as_str)
            .map(str::to_string),
        remaining_fraction: field("remainingFraction", "remaining_fraction").and_then(Value::as_f64),
        reset_time: field("resetTime", "reset_time")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
