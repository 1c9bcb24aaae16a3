//! Loopback redirect receiver and the browser-backed user agent and consent window.
//!
//! The listener binds `127.0.0.1` on an ephemeral port the first time a flow
//! needs a redirect URI. Fragments never reach a server, so `/callback`
//! without a query serves a relay page that re-submits `location.hash` as
//! `?fragment=`. A captured return is answered with `303` to `/done` so the
//! code or token does not stay in the address bar.

use async_trait::async_trait;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tokio::sync::{mpsc, OnceCell};
use url::Url;

use super::endpoints::OAuthClient;
use super::error::FlowError;
use super::implicit::parse_token_fragment;
use super::popup::{ConsentRequest, ConsentWindow, WindowState};
use super::user_agent::{random_token, UserAgent};

const CALLBACK_PATH: &str = "/callback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackEvent {
    Returned(Url),
    Cancelled,
}

pub struct LoopbackListener {
    server: Arc<Server>,
    port: u16,
    shutdown: Arc<AtomicBool>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<LoopbackEvent>>,
}

impl LoopbackListener {
    /// Binds the listener and starts serving on a blocking worker.
    pub fn bind() -> std::io::Result<Self> {
        let server = Server::http("127.0.0.1:0").map_err(|err| {
            err.downcast::<std::io::Error>()
                .map(|io_err| *io_err)
                .unwrap_or_else(|other| std::io::Error::other(other.to_string()))
        })?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| std::io::Error::other("Unable to determine the loopback port"))?;
        let server = Arc::new(server);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let redirect_uri = callback_uri(port);
        let server_clone = server.clone();
        let shutdown_clone = shutdown.clone();
        tokio::task::spawn_blocking(move || {
            while !shutdown_clone.load(Ordering::SeqCst) {
                if let Ok(Some(request)) = server_clone.recv_timeout(Duration::from_millis(250)) {
                    let (response, event) = handle_request(&request, &redirect_uri);
                    let _ = request.respond(response);
                    if let Some(event) = event {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::debug!(port, "Loopback listener bound");
        Ok(Self {
            server,
            port,
            shutdown,
            events: tokio::sync::Mutex::new(rx),
        })
    }

    pub fn redirect_uri(&self) -> String {
        callback_uri(self.port)
    }

    pub async fn next_event(&self, timeout: Duration) -> Result<LoopbackEvent, FlowError> {
        let mut events = self.events.lock().await;
        match tokio::time::timeout(timeout, events.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(FlowError::Transport("Loopback listener stopped".to_string())),
            Err(_) => Err(FlowError::Timeout),
        }
    }

    pub fn try_next_event(&self) -> Option<LoopbackEvent> {
        let mut events = self.events.try_lock().ok()?;
        events.try_recv().ok()
    }

    /// Drops returns left over from an abandoned round-trip.
    pub fn drain(&self) {
        while self.try_next_event().is_some() {}
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.server.unblock();
    }
}

fn callback_uri(port: u16) -> String {
    format!("http://127.0.0.1:{}{}", port, CALLBACK_PATH)
}

fn handle_request(
    request: &Request,
    redirect_uri: &str,
) -> (Response<Cursor<Vec<u8>>>, Option<LoopbackEvent>) {
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{}", request.url())) else {
        return (not_found(), None);
    };

    match url.path() {
        CALLBACK_PATH => match returned_url(&url, redirect_uri) {
            Some(returned) => (see_other("/done"), Some(LoopbackEvent::Returned(returned))),
            None => (html(RELAY_PAGE), None),
        },
        "/done" => (html(DONE_PAGE), None),
        "/cancel" => (html(CANCELLED_PAGE), Some(LoopbackEvent::Cancelled)),
        _ => (not_found(), None),
    }
}

/// Rebuilds the URL the authorization server redirected to.
fn returned_url(request_url: &Url, redirect_uri: &str) -> Option<Url> {
    let mut returned = Url::parse(redirect_uri).ok()?;
    let fragment = request_url
        .query_pairs()
        .find(|(key, _)| key == "fragment")
        .map(|(_, value)| value.into_owned());
    if let Some(fragment) = fragment {
        returned.set_fragment(Some(&fragment));
        return Some(returned);
    }
    match request_url.query() {
        Some(query) if !query.is_empty() => {
            returned.set_query(Some(query));
            Some(returned)
        }
        _ => None,
    }
}

fn html(body: &str) -> Response<Cursor<Vec<u8>>> {
    let mut response = Response::from_string(body).with_status_code(StatusCode(200));
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
        response.add_header(header);
    }
    response
}

fn see_other(location: &str) -> Response<Cursor<Vec<u8>>> {
    let mut response = Response::from_string("").with_status_code(StatusCode(303));
    if let Ok(header) = Header::from_bytes(&b"Location"[..], location.as_bytes()) {
        response.add_header(header);
    }
    response
}

fn not_found() -> Response<Cursor<Vec<u8>>> {
    Response::from_string("Not Found").with_status_code(StatusCode(404))
}

const RELAY_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>ag-monitor sign-in</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh">
<p id="msg">Completing sign-in…</p>
<p><a href="/cancel">Cancel sign-in</a></p>
<script>
if (location.hash.length > 1) {
  location.replace("/callback?fragment=" + encodeURIComponent(location.hash.slice(1)));
} else {
  document.getElementById("msg").textContent = "Nothing to complete here.";
}
</script>
</body>
</html>"#;

const DONE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Signed in</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh">
<h1>Signed in</h1>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>"#;

const CANCELLED_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Sign-in cancelled</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh">
<h1>Sign-in cancelled</h1>
<p>You can close this tab.</p>
</body>
</html>"#;

#[derive(Default)]
struct LazyListener {
    cell: OnceCell<LoopbackListener>,
}

impl LazyListener {
    async fn get(&self) -> Result<&LoopbackListener, FlowError> {
        self.cell
            .get_or_try_init(|| async { LoopbackListener::bind().map_err(FlowError::transport) })
            .await
    }
}

async fn open_browser(url: &Url) -> bool {
    let target = url.to_string();
    match tokio::task::spawn_blocking(move || webbrowser::open(&target)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "Unable to open browser");
            false
        }
        Err(err) => {
            tracing::warn!(error = %err, "Browser launch task failed");
            false
        }
    }
}

/// The system browser, returning to the loopback listener.
#[derive(Default)]
pub struct LoopbackUserAgent {
    listener: LazyListener,
}

impl LoopbackUserAgent {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserAgent for LoopbackUserAgent {
    async fn redirect_uri(&self) -> Result<String, FlowError> {
        Ok(self.listener.get().await?.redirect_uri())
    }

    async fn navigate(&self, url: &Url) -> Result<(), FlowError> {
        self.listener.get().await?.drain();
        if !open_browser(url).await {
            eprintln!("Open this URL in your browser to sign in:\n\n{}\n", url);
        }
        Ok(())
    }

    async fn wait_for_return(&self, timeout: Duration) -> Result<Url, FlowError> {
        match self.listener.get().await?.next_event(timeout).await? {
            LoopbackEvent::Returned(url) => Ok(url),
            LoopbackEvent::Cancelled => Err(FlowError::Cancelled),
        }
    }

    fn replace_location(&self, url: &Url) {
        // The listener already answered with a redirect to /done.
        tracing::debug!(location = %url, "Redirect artifact scrubbed");
    }
}

/// A browser tab on an implicit-grant URL, observed through the loopback listener.
pub struct LoopbackConsentWindow {
    client: OAuthClient,
    listener: LazyListener,
    state: Mutex<Option<String>>,
}

impl LoopbackConsentWindow {
    pub fn new(client: OAuthClient) -> Self {
        Self {
            client,
            listener: LazyListener::default(),
            state: Mutex::new(None),
        }
    }

    fn expected_state(&self) -> Option<String> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ConsentWindow for LoopbackConsentWindow {
    async fn open(&self, request: &ConsentRequest) -> Result<(), FlowError> {
        let listener = self.listener.get().await?;
        listener.drain();

        let state = random_token(16);
        let url = self.client.authorize_url(
            "token",
            &listener.redirect_uri(),
            &state,
            &[("prompt", request.prompt.as_param())],
        )?;
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state);

        if open_browser(&url).await {
            Ok(())
        } else {
            Err(FlowError::PopupBlocked)
        }
    }

    async fn poll(&self) -> WindowState {
        let Ok(listener) = self.listener.get().await else {
            return WindowState::Closed;
        };
        let url = match listener.try_next_event() {
            None => return WindowState::Pending,
            Some(LoopbackEvent::Cancelled) => return WindowState::Closed,
            Some(LoopbackEvent::Returned(url)) => url,
        };

        let params = parse_token_fragment(url.fragment().unwrap_or_default());
        if let Some(error) = params.error {
            return WindowState::Failed {
                error,
                description: params.error_description,
            };
        }
        if params.state.is_none() || params.state != self.expected_state() {
            tracing::warn!("Ignoring consent return with unexpected state");
            return WindowState::Pending;
        }
        match params.into_grant() {
            Ok(Some(grant)) => WindowState::Completed(grant),
            _ => WindowState::Pending,
        }
    }

    async fn close(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = None;
        if let Some(listener) = self.listener.cell.get() {
            listener.drain();
        }
    }
}
