//! Events emitted by the session controller, for the structured log only.

use serde::Serialize;

use super::classify::FailureClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefreshReason {
    Start,
    SignIn,
    Manual,
    Poll,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    StateChanged { from: String, to: String },
    CycleStarted { reason: RefreshReason },
    CycleCompleted { next_refresh_at_ms: i64, models: usize },
    /// Another cycle was outstanding; this one did not run.
    CycleSkipped { reason: RefreshReason },
    /// The session was signed out while this cycle was suspended.
    CycleDiscarded,
    StaleTickIgnored { epoch: u64 },
    ProfileFetchFailed { message: String },
    FailureClassified { class: FailureClass, message: String },
    SignInFailed { message: String },
    CredentialCleared,
    TimersStarted { interval_secs: u64 },
    TimersStopped,
    SettingsSaved { refresh_interval_sec: u64 },
}
