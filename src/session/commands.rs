use serde::Serialize;

use crate::credential_store::MonitorSettings;

/// User actions delivered to the session controller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionCommand {
    /// App start: refresh silently if a credential is stored.
    Start,
    SignIn,
    SignOut,
    ManualRefresh,
    /// The explicit settings-save action.
    SaveSettings {
        // May carry a client secret.
        #[serde(skip)]
        settings: MonitorSettings,
    },
    /// Saves the current settings with a new interval, typed as entered.
    SetRefreshInterval { input: String },
    /// Forget the stored credential without leaving the session.
    ClearToken,
    ToggleOther,
    Quit,
}
