use clap::{Parser, Subcommand};

use crate::credential_store::{FlowKind, HostMode};

#[derive(Parser, Debug)]
#[command(name = "agmon")]
#[command(about = "Antigravity quota monitor for the terminal")]
#[command(version = env!("AG_MONITOR_GIT_SHA"))]
pub struct Cli {
    /// Show models outside the pinned set
    #[arg(long, global = true)]
    pub all: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Live dashboard with periodic refresh (default)
    Watch,
    /// Sign in interactively and show one refresh
    Login,
    /// Stop refreshing and forget the stored credential
    Logout,
    /// Refresh once with the stored credential
    Refresh,
    /// Show the stored credential and settings without touching the network
    Status,
    /// Complete a redirect sign-in from the URL the browser landed on
    Callback { url: String },
    /// Inspect or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    Show,
    Set(ConfigChanges),
}

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    #[arg(long)]
    pub client_id: Option<String>,

    /// Empty string clears it
    #[arg(long)]
    pub client_secret: Option<String>,

    #[arg(long)]
    pub scopes: Option<String>,

    #[arg(long)]
    pub duet_project: Option<String>,

    /// Project used for quota lookups instead of the one the subscription reports
    #[arg(long)]
    pub quota_project: Option<String>,

    #[arg(long)]
    pub host_mode: Option<HostMode>,

    /// Seconds between refreshes (minimum 10)
    #[arg(long)]
    pub refresh_interval: Option<String>,

    #[arg(long)]
    pub flow: Option<FlowKind>,
}
