//! The session state machine.
//!
//! `SessionController` turns user commands and scheduler ticks into refresh
//! cycles. Failures are classified into "sign in again" and "try again later".
//! Snapshots are broadcast on a watch channel after every transition.
//!
//! Overlapping refresh cycles are prevented by an internal guard. Sign-out
//! bumps a session epoch so a cycle suspended across it discards its results.

mod classify;
mod commands;
mod events;
mod snapshot;

pub use classify::{classify, is_auth_failure_message, FailureClass};
pub use commands::SessionCommand;
pub use events::{RefreshReason, SessionEvent};
pub use snapshot::{ErrorKind, SessionError, SessionSnapshot, SessionState};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use crate::api::{host_label, ApiError, QuotaApi};
use crate::auth::{CredentialBroker, FlowError};
use crate::clock::{local_stamp, Clock};
use crate::credential_store::{CredentialStore, MonitorSettings};
use crate::dashboard::{Dashboard, StatusKind};
use crate::quota_view::{normalize_models, tier_badge};
use crate::scheduler::{CountdownSink, RefreshScheduler, SchedulerEvent};
use crate::structured_logger::StructuredLogger;

/// Collaborators the controller is assembled from.
pub struct SessionParts {
    pub broker: Arc<CredentialBroker>,
    pub api: Arc<dyn QuotaApi>,
    pub dashboard: Arc<dyn Dashboard>,
    pub countdown: Arc<dyn CountdownSink>,
    pub logger: Option<Arc<StructuredLogger>>,
    pub show_other: bool,
}

pub struct SessionController {
    broker: Arc<CredentialBroker>,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    api: Arc<dyn QuotaApi>,
    dashboard: Arc<dyn Dashboard>,
    scheduler: RefreshScheduler,
    logger: Option<Arc<StructuredLogger>>,
    settings: Mutex<MonitorSettings>,
    state: Mutex<SessionState>,
    last_error: Mutex<Option<String>>,
    show_other: AtomicBool,
    cycle_guard: tokio::sync::Mutex<()>,
    session_epoch: AtomicU64,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Builds the controller.
    ///
    /// Returns the controller, a receiver for state snapshots, and the receiver
    /// of scheduler ticks that [`SessionController::run`] consumes.
    pub fn new(
        parts: SessionParts,
    ) -> (
        Arc<Self>,
        watch::Receiver<SessionSnapshot>,
        mpsc::UnboundedReceiver<SchedulerEvent>,
    ) {
        let store = parts.broker.store().clone();
        let clock = store.clock().clone();
        let settings = store.load_settings();
        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let scheduler = RefreshScheduler::new(clock.clone(), ticks_tx, parts.countdown);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::initial(parts.show_other));
        parts.dashboard.set_show_other(parts.show_other);

        let controller = Self {
            broker: parts.broker,
            store,
            clock,
            api: parts.api,
            dashboard: parts.dashboard,
            scheduler,
            logger: parts.logger,
            settings: Mutex::new(settings),
            state: Mutex::new(SessionState::SignedOut),
            last_error: Mutex::new(None),
            show_other: AtomicBool::new(parts.show_other),
            cycle_guard: tokio::sync::Mutex::new(()),
            session_epoch: AtomicU64::new(0),
            snapshot_tx,
        };
        (Arc::new(controller), snapshot_rx, ticks_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    /// Consumes commands and ticks until `Quit` or the command channel closes.
    ///
    /// Each command runs on its own task; sign-out never waits behind a slow
    /// fetch or a pending consent prompt.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut ticks: mpsc::UnboundedReceiver<SchedulerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(SessionCommand::Quit) => break,
                    Some(command) => {
                        let this = self.clone();
                        tokio::spawn(async move { this.dispatch(command).await });
                    }
                },
                Some(tick) = ticks.recv() => {
                    let this = self.clone();
                    tokio::spawn(async move { this.on_poll_tick(tick).await });
                }
            }
        }
        self.scheduler.stop();
    }

    pub async fn dispatch(&self, command: SessionCommand) {
        if let Some(logger) = &self.logger {
            logger.log_command(&command);
        }
        let result = match command {
            SessionCommand::Start => self.start().await,
            SessionCommand::SignIn => self.sign_in().await,
            SessionCommand::SignOut => {
                self.sign_out();
                Ok(())
            }
            SessionCommand::ManualRefresh => self.manual_refresh().await,
            SessionCommand::SaveSettings { settings } => match self.save_settings(settings) {
                Ok(_) => Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to save settings");
                    self.dashboard.set_error(Some(&format!("{:#}", e)));
                    Ok(())
                }
            },
            SessionCommand::SetRefreshInterval { input } => {
                let settings = self.settings().with_refresh_interval_input(&input);
                match self.save_settings(settings) {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to save refresh interval");
                        self.dashboard.set_error(Some(&format!("{:#}", e)));
                        Ok(())
                    }
                }
            }
            SessionCommand::ClearToken => {
                self.clear_token();
                Ok(())
            }
            SessionCommand::ToggleOther => {
                self.toggle_other();
                Ok(())
            }
            SessionCommand::Quit => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Session command did not complete");
        }
    }

    /// App start: refresh silently if a credential is stored.
    ///
    /// Returns `SignInRequired` when nothing is stored; the caller decides
    /// whether to prompt.
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.store.load_token().is_none() {
            self.dashboard.set_signed_in(false);
            self.dashboard.set_status("", StatusKind::Idle);
            return Err(SessionError::SignInRequired);
        }
        self.dashboard.set_signed_in(true);
        self.enter_signed_in();
        self.start_timers();
        self.refresh_cycle(RefreshReason::Start).await
    }

    /// Provisional signed-in state until the first cycle names the tier.
    fn enter_signed_in(&self) {
        if !self.state().is_signed_in() {
            self.transition(SessionState::SignedIn {
                tier: "unknown".to_string(),
                host: String::new(),
                last_update: None,
            });
        }
    }

    /// Interactive sign-in followed by a refresh cycle.
    pub async fn sign_in(&self) -> Result<(), SessionError> {
        let epoch = self.session_epoch.load(Ordering::SeqCst);
        self.dashboard.set_error(None);
        self.dashboard.set_status("Opening Google sign-in…", StatusKind::Idle);
        let previous = self.state();
        self.transition(SessionState::Authenticating);

        match self.broker.get_interactive().await {
            Ok(_) => {}
            Err(FlowError::AcquisitionInProgress) => {
                self.transition(previous);
                return Err(SessionError::Flow(FlowError::AcquisitionInProgress));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Interactive sign-in failed");
                self.log_event(SessionEvent::SignInFailed {
                    message: e.to_string(),
                });
                if self.scheduler.is_running() {
                    self.scheduler.stop();
                    self.log_event(SessionEvent::TimersStopped);
                }
                self.dashboard.set_signed_in(false);
                self.dashboard.set_status("Sign in required", StatusKind::Error);
                let error = SessionError::Flow(e);
                self.settle(&error, SessionState::SignedOut);
                return Err(error);
            }
        }

        if self.is_stale(epoch) {
            // Signed out while the consent prompt was open.
            self.broker.invalidate();
            self.log_event(SessionEvent::CycleDiscarded);
            return Ok(());
        }

        if let Some(logger) = &self.logger {
            logger.increment_run_id();
        }
        self.dashboard.set_signed_in(true);
        self.enter_signed_in();
        self.start_timers();
        self.refresh_cycle(RefreshReason::SignIn).await
    }

    /// Stops both timers, then clears the credential and the dashboard.
    pub fn sign_out(&self) {
        self.scheduler.stop();
        self.log_event(SessionEvent::TimersStopped);
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
        self.broker.invalidate();
        self.log_event(SessionEvent::CredentialCleared);

        self.dashboard.clear();
        self.dashboard.set_signed_in(false);
        self.dashboard.set_online(false);
        self.dashboard.set_status("Signed out", StatusKind::Idle);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.transition(SessionState::SignedOut);
    }

    pub async fn manual_refresh(&self) -> Result<(), SessionError> {
        self.refresh_cycle(RefreshReason::Manual).await
    }

    /// Handles a poll tick. Ticks from a stopped timer generation are ignored.
    pub async fn on_poll_tick(&self, tick: SchedulerEvent) {
        if !self.scheduler.is_current(tick.epoch) {
            self.log_event(SessionEvent::StaleTickIgnored { epoch: tick.epoch });
            return;
        }
        if let Err(e) = self.refresh_cycle(RefreshReason::Poll).await {
            tracing::debug!(error = %e, "Poll refresh failed");
        }
    }

    /// The explicit settings-save action. Restarts running timers with the new interval.
    pub fn save_settings(&self, settings: MonitorSettings) -> anyhow::Result<MonitorSettings> {
        let saved = self.store.save_settings(&settings)?;
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = saved.clone();
        self.log_event(SessionEvent::SettingsSaved {
            refresh_interval_sec: saved.refresh_interval_sec,
        });
        if self.scheduler.is_running() {
            self.start_timers();
        }
        self.dashboard.set_status("Settings saved", StatusKind::Ok);
        Ok(saved)
    }

    pub fn clear_token(&self) {
        self.broker.invalidate();
        self.log_event(SessionEvent::CredentialCleared);
        self.dashboard.set_status("Token cleared", StatusKind::Ok);
    }

    pub fn toggle_other(&self) {
        let show = !self.show_other.fetch_xor(true, Ordering::SeqCst);
        self.dashboard.set_show_other(show);
        self.broadcast();
    }

    /// One refresh cycle: token, subscription, profile, quota, render.
    pub async fn refresh_cycle(&self, reason: RefreshReason) -> Result<(), SessionError> {
        let _guard = match reason {
            RefreshReason::Start | RefreshReason::SignIn => self.cycle_guard.lock().await,
            RefreshReason::Manual | RefreshReason::Poll => match self.cycle_guard.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    self.log_event(SessionEvent::CycleSkipped { reason });
                    return match reason {
                        RefreshReason::Poll => Ok(()),
                        _ => Err(SessionError::RefreshInProgress),
                    };
                }
            },
        };
        let epoch = self.session_epoch.load(Ordering::SeqCst);
        self.log_event(SessionEvent::CycleStarted { reason });

        self.dashboard.set_error(None);
        let status = if reason == RefreshReason::Poll {
            "Refreshing…"
        } else {
            "Loading…"
        };
        self.dashboard.set_status(status, StatusKind::Idle);
        self.dashboard.set_online(false);

        let Some(token) = self.broker.get_silent().await else {
            if self.is_stale(epoch) {
                return self.discard();
            }
            tracing::info!("No usable credential; signing out");
            self.scheduler.stop();
            self.dashboard.set_signed_in(false);
            self.dashboard.set_status("Sign in required", StatusKind::Error);
            self.settle(&SessionError::SignInRequired, SessionState::SignedOut);
            return Err(SessionError::SignInRequired);
        };
        if self.is_stale(epoch) {
            // The renewal may already have persisted a credential the user signed out of.
            self.broker.invalidate();
            return self.discard();
        }
        self.dashboard.set_signed_in(true);
        let settings = self.settings();

        let subscription = match self.api.fetch_subscription(&token, &settings).await {
            Ok(subscription) => subscription,
            Err(e) => return self.fail(epoch, e),
        };
        if self.is_stale(epoch) {
            return self.discard();
        }
        self.dashboard.render_host(&host_label(&subscription.host));
        self.dashboard.render_tier(&tier_badge(&subscription.tier));

        match self.api.fetch_user_info(&token).await {
            Ok(profile) if !self.is_stale(epoch) => self.dashboard.render_user(&profile),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Profile fetch failed; continuing without it");
                self.log_event(SessionEvent::ProfileFetchFailed {
                    message: e.to_string(),
                });
            }
        }

        let project = settings
            .quota_project_override()
            .map(str::to_string)
            .or_else(|| subscription.project_id.clone());
        let quota = match self
            .api
            .fetch_quota(&token, project.as_deref(), &settings)
            .await
        {
            Ok(quota) => quota,
            Err(e) => return self.fail(epoch, e),
        };
        if self.is_stale(epoch) {
            return self.discard();
        }

        let host = if quota.host.is_empty() {
            subscription.host.clone()
        } else {
            quota.host.clone()
        };
        self.dashboard.render_host(&host_label(&host));
        self.dashboard.render_quota(&normalize_models(&quota.models));

        let stamp = local_stamp(self.clock.now_ms());
        self.dashboard.set_last_update(&stamp);
        self.dashboard.set_status("Live", StatusKind::Ok);
        self.dashboard.set_online(true);

        if !self.scheduler.is_running() {
            self.start_timers();
        }
        // Measured from completion, not from when the cycle started.
        let next_refresh_at_ms = self.scheduler.reset_countdown(settings.refresh_interval());
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.log_event(SessionEvent::CycleCompleted {
            next_refresh_at_ms,
            models: quota.models.len(),
        });
        self.transition(SessionState::SignedIn {
            tier: subscription.tier,
            host: host_label(&host),
            last_update: Some(stamp),
        });
        Ok(())
    }

    fn fail(&self, epoch: u64, error: ApiError) -> Result<(), SessionError> {
        if self.is_stale(epoch) {
            return self.discard();
        }
        let class = classify(&error);
        tracing::warn!(?class, error = %error, "Refresh cycle failed");
        self.log_event(SessionEvent::FailureClassified {
            class,
            message: error.to_string(),
        });

        match class {
            FailureClass::AuthExpired => {
                self.broker.invalidate();
                self.scheduler.stop();
                self.dashboard.set_signed_in(false);
                self.dashboard.clear();
                self.dashboard.set_status("Auth error: sign in again", StatusKind::Error);
                let error = SessionError::AuthExpired(error);
                self.settle(&error, SessionState::SignedOut);
                Err(error)
            }
            FailureClass::Transient => {
                self.dashboard.set_status("Refresh failed", StatusKind::Error);
                let previous = match self.state() {
                    SessionState::Authenticating | SessionState::Error { .. } => {
                        SessionState::SignedOut
                    }
                    other => other,
                };
                let error = SessionError::Transient(error);
                self.settle(&error, previous);
                Err(error)
            }
        }
    }

    fn discard(&self) -> Result<(), SessionError> {
        tracing::debug!("Discarding results of a cycle that outlived its session");
        self.log_event(SessionEvent::CycleDiscarded);
        Ok(())
    }

    /// Overlays the error, then settles into `next`.
    fn settle(&self, error: &SessionError, next: SessionState) {
        let message = error.to_string();
        self.dashboard.set_error(Some(&message));
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.clone());
        if let Some(kind) = error.kind() {
            self.transition(SessionState::Error { kind, message });
        }
        self.transition(next);
    }

    fn start_timers(&self) {
        let interval = self.settings().refresh_interval();
        self.scheduler.start(interval);
        self.log_event(SessionEvent::TimersStarted {
            interval_secs: interval.as_secs(),
        });
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.session_epoch.load(Ordering::SeqCst) != epoch
    }

    fn transition(&self, next: SessionState) {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, next.clone())
        };
        if from.name() != next.name() {
            tracing::info!(from = from.name(), to = next.name(), "Session state changed");
            self.log_event(SessionEvent::StateChanged {
                from: from.name().to_string(),
                to: next.name().to_string(),
            });
        }
        self.broadcast();
    }

    fn broadcast(&self) {
        let snapshot = SessionSnapshot {
            state: self.state(),
            next_refresh_at_ms: self.scheduler.next_refresh_at_ms(),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            show_other: self.show_other.load(Ordering::SeqCst),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }

    fn log_event(&self, event: SessionEvent) {
        if let Some(logger) = &self.logger {
            logger.log_event(&event);
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
