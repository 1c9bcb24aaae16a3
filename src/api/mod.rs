//! Quota, subscription and user-info collaborators.
//!
//! Callers get raw results or an [`ApiError`] carrying status and message;
//! deciding whether a failure means re-authentication is left to the
//! session's refresh cycle.

mod cloudcode;
mod types;

pub use cloudcode::{
    hosts_for, parse_models, parse_subscription, parse_user_info, CloudCodeClient, DAILY_HOST,
    PRIMARY_HOST, USERINFO_URL,
};
pub use types::{host_label, ApiError, ModelQuota, QuotaSnapshot, SubscriptionInfo, UserProfile};

use async_trait::async_trait;

use crate::credential_store::MonitorSettings;

#[async_trait]
pub trait QuotaApi: Send + Sync {
    async fn fetch_subscription(
        &self,
        token: &str,
        settings: &MonitorSettings,
    ) -> Result<SubscriptionInfo, ApiError>;

    async fn fetch_user_info(&self, token: &str) -> Result<UserProfile, ApiError>;

    async fn fetch_quota(
        &self,
        token: &str,
        project: Option<&str>,
        settings: &MonitorSettings,
    ) -> Result<QuotaSnapshot, ApiError>;
}
