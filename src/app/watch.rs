//! The live dashboard: one controller driven by typed commands and timer ticks.

use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::scheduler::SchedulerEvent;
use crate::session::{SessionCommand, SessionController, SessionError, SessionSnapshot, SessionState};

const KEYS_HELP: &str =
    "Commands: r = refresh, login, logout, clear = forget token, all = toggle other models, \
     interval <secs> = save refresh interval, q = quit";

/// Maps a line typed at the dashboard to a command.
pub fn parse_watch_input(line: &str) -> Option<SessionCommand> {
    let line = line.trim();
    if let Some((word, rest)) = line.split_once(char::is_whitespace) {
        if word.eq_ignore_ascii_case("interval") || word.eq_ignore_ascii_case("i") {
            return Some(SessionCommand::SetRefreshInterval {
                input: rest.trim().to_string(),
            });
        }
    }
    match line.to_lowercase().as_str() {
        "r" | "refresh" => Some(SessionCommand::ManualRefresh),
        "l" | "login" => Some(SessionCommand::SignIn),
        "logout" => Some(SessionCommand::SignOut),
        "clear" => Some(SessionCommand::ClearToken),
        "a" | "all" => Some(SessionCommand::ToggleOther),
        "q" | "quit" | "exit" => Some(SessionCommand::Quit),
        _ => None,
    }
}

pub(super) async fn run_watch(
    controller: Arc<SessionController>,
    snapshots: watch::Receiver<SessionSnapshot>,
    ticks: mpsc::UnboundedReceiver<SchedulerEvent>,
) {
    let (commands_tx, commands_rx) = mpsc::channel(16);

    let startup = controller.clone();
    tokio::spawn(async move {
        if let Err(SessionError::SignInRequired) = startup.start().await {
            if let Err(e) = startup.sign_in().await {
                tracing::warn!(error = %e, "Initial sign-in did not complete");
            }
        }
    });

    spawn_input_reader(commands_tx.clone());
    let quit_tx = commands_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(SessionCommand::Quit).await;
        }
    });
    tokio::spawn(announce_sign_out(snapshots));

    eprintln!("{}", KEYS_HELP);
    controller.run(commands_rx, ticks).await;
    println!();
}

// A plain thread: a blocking stdin read must not hold up runtime shutdown.
fn spawn_input_reader(commands: mpsc::Sender<SessionCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_watch_input(&line) {
                Some(command) => {
                    if commands.blocking_send(command).is_err() {
                        return;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("{}", KEYS_HELP),
            }
        }
        let _ = commands.blocking_send(SessionCommand::Quit);
    });
}

/// Tells the user how to recover once the session falls back to signed out with an error.
async fn announce_sign_out(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut was_signed_out = true;
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        let signed_out = snapshot.state == SessionState::SignedOut;
        if signed_out && !was_signed_out {
            if let Some(error) = &snapshot.last_error {
                eprintln!("\n{}. Type `login` to sign in again.", error);
            }
        }
        was_signed_out = signed_out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_input() {
        assert!(matches!(
            parse_watch_input(" R "),
            Some(SessionCommand::ManualRefresh)
        ));
        assert!(matches!(parse_watch_input("login"), Some(SessionCommand::SignIn)));
        assert!(matches!(parse_watch_input("logout"), Some(SessionCommand::SignOut)));
        assert!(matches!(parse_watch_input("clear"), Some(SessionCommand::ClearToken)));
        assert!(matches!(parse_watch_input("all"), Some(SessionCommand::ToggleOther)));
        assert!(matches!(parse_watch_input("q"), Some(SessionCommand::Quit)));
        assert!(matches!(
            parse_watch_input("interval  45 "),
            Some(SessionCommand::SetRefreshInterval { input }) if input == "45"
        ));
        assert!(matches!(
            parse_watch_input("I 5"),
            Some(SessionCommand::SetRefreshInterval { input }) if input == "5"
        ));
        assert!(parse_watch_input("interval").is_none());
        assert!(parse_watch_input("").is_none());
        assert!(parse_watch_input("dance").is_none());
    }
}
