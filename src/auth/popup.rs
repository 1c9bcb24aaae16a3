//! Popup-consent flow: a transient consent window delivers the token directly.
//!
//! Window state cannot be observed by events, so it is polled at a fixed
//! interval until it completes, closes, fails or the hard deadline passes.
//! The window is closed on every exit path.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::error::FlowError;
use super::flow::{AcquireRequest, FlowStrategy, TokenGrant};
use crate::credential_store::FlowKind;

pub const POPUP_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const SILENT_POPUP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentPrompt {
    /// Always show the consent screen.
    Consent,
    /// Ask the provider not to prompt; it fails with `interaction_required` instead.
    None,
}

impl ConsentPrompt {
    pub fn as_param(&self) -> &'static str {
        match self {
            ConsentPrompt::Consent => "consent",
            ConsentPrompt::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    pub prompt: ConsentPrompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowState {
    Pending,
    Closed,
    Completed(TokenGrant),
    Failed {
        error: String,
        description: Option<String>,
    },
}

#[async_trait]
pub trait ConsentWindow: Send + Sync {
    /// Opens the window. A window that cannot be opened is `PopupBlocked`.
    async fn open(&self, request: &ConsentRequest) -> Result<(), FlowError>;
    async fn poll(&self) -> WindowState;
    async fn close(&self);
}

pub struct PopupStrategy {
    window: Arc<dyn ConsentWindow>,
    interactive_timeout: Duration,
    silent_timeout: Duration,
    poll_interval: Duration,
}

impl PopupStrategy {
    pub fn new(window: Arc<dyn ConsentWindow>) -> Self {
        Self {
            window,
            interactive_timeout: INTERACTIVE_TIMEOUT,
            silent_timeout: SILENT_POPUP_TIMEOUT,
            poll_interval: POPUP_POLL_INTERVAL,
        }
    }

    async fn wait_for_window(&self) -> Result<TokenGrant, FlowError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.window.poll().await {
                WindowState::Pending => continue,
                WindowState::Closed => return Err(FlowError::Cancelled),
                WindowState::Completed(grant) => return Ok(grant),
                WindowState::Failed { error, description } => {
                    return Err(FlowError::from_provider(&error, description.as_deref()))
                }
            }
        }
    }
}

#[async_trait]
impl FlowStrategy for PopupStrategy {
    fn kind(&self) -> FlowKind {
        FlowKind::Popup
    }

    async fn acquire(&self, request: AcquireRequest) -> Result<TokenGrant, FlowError> {
        let (prompt, timeout) = if request.mode.is_silent() {
            (ConsentPrompt::None, self.silent_timeout)
        } else {
            (ConsentPrompt::Consent, self.interactive_timeout)
        };

        self.window
            .open(&ConsentRequest { prompt })
            .await
            .map_err(|e| match e {
                FlowError::Transport(msg) => {
                    tracing::warn!(error = %msg, "Consent window failed to open");
                    FlowError::PopupBlocked
                }
                other => other,
            })?;

        let outcome = match tokio::time::timeout(timeout, self.wait_for_window()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?timeout, "Consent window timed out");
                Err(FlowError::Timeout)
            }
        };
        self.window.close().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::grant;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct ScriptedWindow {
        states: Mutex<VecDeque<WindowState>>,
        opened: Mutex<Vec<ConsentRequest>>,
        closed: AtomicBool,
        blocked: bool,
    }

    impl ScriptedWindow {
        fn new(states: Vec<WindowState>) -> Arc<Self> {
            Arc::new(Self {
                states: Mutex::new(states.into()),
                opened: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                blocked: false,
            })
        }

        fn blocked() -> Arc<Self> {
            Arc::new(Self {
                states: Mutex::new(VecDeque::new()),
                opened: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                blocked: true,
            })
        }
    }

    #[async_trait]
    impl ConsentWindow for ScriptedWindow {
        async fn open(&self, request: &ConsentRequest) -> Result<(), FlowError> {
            if self.blocked {
                return Err(FlowError::Transport("no browser".to_string()));
            }
            self.opened.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn poll(&self) -> WindowState {
            self.states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(WindowState::Pending)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_after_pending_polls() {
        let window = ScriptedWindow::new(vec![
            WindowState::Pending,
            WindowState::Pending,
            WindowState::Completed(grant("popup-token")),
        ]);
        let strategy = PopupStrategy::new(window.clone());

        let result = strategy.acquire(AcquireRequest::interactive()).await.unwrap();
        assert_eq!(result.access_token, "popup-token");
        assert_eq!(window.opened.lock().unwrap()[0].prompt, ConsentPrompt::Consent);
        assert!(window.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_window_is_cancellation() {
        let window = ScriptedWindow::new(vec![WindowState::Pending, WindowState::Closed]);
        let strategy = PopupStrategy::new(window.clone());

        let err = strategy.acquire(AcquireRequest::interactive()).await.unwrap_err();
        assert_eq!(err, FlowError::Cancelled);
        assert!(window.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_closes_window() {
        let window = ScriptedWindow::new(vec![]);
        let strategy = PopupStrategy::new(window.clone());

        let started = tokio::time::Instant::now();
        let err = strategy.acquire(AcquireRequest::interactive()).await.unwrap_err();

        assert_eq!(err, FlowError::Timeout);
        assert!(started.elapsed() >= INTERACTIVE_TIMEOUT);
        assert!(window.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_fails_fast_on_interaction_required() {
        let window = ScriptedWindow::new(vec![WindowState::Failed {
            error: "interaction_required".to_string(),
            description: None,
        }]);
        let strategy = PopupStrategy::new(window.clone());

        let started = tokio::time::Instant::now();
        let err = strategy.acquire(AcquireRequest::silent(None)).await.unwrap_err();

        assert_eq!(err, FlowError::InteractionRequired);
        assert!(started.elapsed() < SILENT_POPUP_TIMEOUT);
        assert_eq!(window.opened.lock().unwrap()[0].prompt, ConsentPrompt::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_is_bounded_by_short_timeout() {
        let window = ScriptedWindow::new(vec![]);
        let strategy = PopupStrategy::new(window);

        let started = tokio::time::Instant::now();
        let err = strategy.acquire(AcquireRequest::silent(None)).await.unwrap_err();

        assert_eq!(err, FlowError::Timeout);
        assert!(started.elapsed() < INTERACTIVE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_blocked_window() {
        let strategy = PopupStrategy::new(ScriptedWindow::blocked());
        let err = strategy.acquire(AcquireRequest::interactive()).await.unwrap_err();
        assert_eq!(err, FlowError::PopupBlocked);
    }
}
