//! Credential acquisition: the flow strategies and the broker that drives them.

mod broker;
mod endpoints;
mod error;
mod flow;
mod implicit;
mod loopback;
mod pkce;
mod popup;
mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

pub use broker::CredentialBroker;
pub use endpoints::{
    GoogleTokenEndpoint, OAuthClient, TokenEndpoint, AUTHORIZE_URL, CLIENT_SECRET_ENV, TOKEN_URL,
};
pub use error::FlowError;
pub use flow::{AcquireMode, AcquireRequest, FlowStrategy, TokenGrant};
pub use implicit::{parse_token_fragment, FragmentParams, ImplicitStrategy};
pub use loopback::{LoopbackConsentWindow, LoopbackEvent, LoopbackListener, LoopbackUserAgent};
pub use pkce::{challenge_for, generate_pkce, PkceCodes, PkceStrategy};
pub use popup::{
    ConsentPrompt, ConsentRequest, ConsentWindow, PopupStrategy, WindowState,
    INTERACTIVE_TIMEOUT, POPUP_POLL_INTERVAL, SILENT_POPUP_TIMEOUT,
};
pub use user_agent::{scrub_url, UserAgent};

use std::sync::Arc;

use crate::credential_store::{CredentialStore, FlowKind, MonitorSettings};

/// Builds the one strategy selected by the settings, backed by the system browser.
pub fn strategy_for(settings: &MonitorSettings, store: &CredentialStore) -> Arc<dyn FlowStrategy> {
    let client = OAuthClient::from_settings(settings);
    match settings.flow {
        FlowKind::Pkce => Arc::new(PkceStrategy::new(
            client,
            store.clone(),
            Arc::new(LoopbackUserAgent::new()),
            Arc::new(GoogleTokenEndpoint::default()),
            INTERACTIVE_TIMEOUT,
        )),
        FlowKind::Implicit => Arc::new(ImplicitStrategy::new(
            client,
            store.clone(),
            Arc::new(LoopbackUserAgent::new()),
            INTERACTIVE_TIMEOUT,
        )),
        FlowKind::Popup => Arc::new(PopupStrategy::new(Arc::new(LoopbackConsentWindow::new(
            client,
        )))),
    }
}
