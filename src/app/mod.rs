//! Command-line entry points and the wiring between the store, the broker,
//! the API client and the session controller.

pub mod cli;
mod config_cmd;
mod watch;

pub use cli::{Cli, Command, ConfigAction, ConfigChanges};
pub use config_cmd::{apply_changes, redacted};
pub use watch::parse_watch_input;

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch as watch_channel};
use url::Url;

use crate::api::CloudCodeClient;
use crate::auth::{strategy_for, CredentialBroker};
use crate::clock::SystemClock;
use crate::credential_store::{CredentialStore, FileKvStore};
use crate::dashboard::ConsoleDashboard;
use crate::monitor_paths;
use crate::scheduler::SchedulerEvent;
use crate::session::{SessionController, SessionError, SessionParts, SessionSnapshot};
use crate::structured_logger::StructuredLogger;

pub async fn run(cli: Cli) -> Result<()> {
    let store_dir = monitor_paths::store_dir()?;
    let store = CredentialStore::new(
        Arc::new(FileKvStore::new(&store_dir)),
        Arc::new(SystemClock),
    );

    match cli.command.clone().unwrap_or(Command::Watch) {
        Command::Status => config_cmd::print_status(&store, &store_dir),
        Command::Config {
            action: ConfigAction::Show,
        } => config_cmd::show_config(&store),
        Command::Config {
            action: ConfigAction::Set(changes),
        } => config_cmd::set_config(&store, &changes),
        Command::Callback { url } => complete_callback(store, &url).await,
        Command::Watch => Session::open(store, cli.all).watch().await,
        Command::Login => Session::open(store, cli.all).login().await,
        Command::Logout => {
            Session::open(store, cli.all).controller.sign_out();
            println!("Signed out.");
            Ok(())
        }
        Command::Refresh => Session::open(store, cli.all).refresh_once().await,
    }
}

/// A controller assembled for one process run.
struct Session {
    controller: Arc<SessionController>,
    snapshots: watch_channel::Receiver<SessionSnapshot>,
    ticks: mpsc::UnboundedReceiver<SchedulerEvent>,
}

impl Session {
    fn open(store: CredentialStore, show_other: bool) -> Self {
        let settings = store.load_settings();
        let broker = Arc::new(CredentialBroker::new(
            store.clone(),
            strategy_for(&settings, &store),
        ));
        let dashboard = Arc::new(ConsoleDashboard::stdout(show_other));
        let (controller, snapshots, ticks) = SessionController::new(SessionParts {
            broker,
            api: Arc::new(CloudCodeClient::new()),
            dashboard: dashboard.clone(),
            countdown: dashboard,
            logger: open_logger(),
            show_other,
        });
        tracing::info!(flow = %settings.flow, "Session assembled");
        Self {
            controller,
            snapshots,
            ticks,
        }
    }

    async fn watch(self) -> Result<()> {
        watch::run_watch(self.controller, self.snapshots, self.ticks).await;
        Ok(())
    }

    async fn login(self) -> Result<()> {
        let result = self.controller.sign_in().await;
        self.controller.scheduler().stop();
        println!();
        result.context("Sign-in did not complete")
    }

    async fn refresh_once(self) -> Result<()> {
        let result = self.controller.start().await;
        self.controller.scheduler().stop();
        println!();
        match result {
            Err(SessionError::SignInRequired) => bail!("Not signed in. Run `agmon login` first."),
            other => other.context("Refresh failed"),
        }
    }
}

async fn complete_callback(store: CredentialStore, raw_url: &str) -> Result<()> {
    let url = Url::parse(raw_url).with_context(|| format!("Not a URL: {}", raw_url))?;
    let settings = store.load_settings();
    let broker = CredentialBroker::new(store.clone(), strategy_for(&settings, &store));
    match broker.handle_redirect(&url).await? {
        Some(_) => {
            println!("Signed in.");
            Ok(())
        }
        None => bail!("No pending sign-in matches this URL"),
    }
}

fn open_logger() -> Option<Arc<StructuredLogger>> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let opened = monitor_paths::logs_dir()
        .and_then(|dir| StructuredLogger::new(&session_id, &dir));
    match opened {
        Ok(logger) => Some(Arc::new(logger)),
        Err(e) => {
            tracing::warn!(error = %e, "Structured event log unavailable");
            None
        }
    }
}
