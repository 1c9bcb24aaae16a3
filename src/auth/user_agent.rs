use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::error::FlowError;

/// The surface a redirect-based strategy drives: a browser that can be sent to
/// the authorization server and that comes back to a local redirect URI.
#[async_trait]
pub trait UserAgent: Send + Sync {
    /// Where the authorization server should send the user back to.
    async fn redirect_uri(&self) -> Result<String, FlowError>;

    async fn navigate(&self, url: &Url) -> Result<(), FlowError>;

    /// Suspends until the browser returns to the redirect URI.
    async fn wait_for_return(&self, timeout: Duration) -> Result<Url, FlowError>;

    /// Replaces the visible location after a one-time artifact was consumed.
    fn replace_location(&self, url: &Url);
}

/// Strips query and fragment so a consumed code or token cannot be replayed from history.
pub fn scrub_url(url: &Url) -> Url {
    let mut scrubbed = url.clone();
    scrubbed.set_query(None);
    scrubbed.set_fragment(None);
    scrubbed
}

pub(crate) fn random_token(len: usize) -> String {
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
