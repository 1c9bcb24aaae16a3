use anyhow::{Context, Result};
use std::path::Path;

use super::cli::ConfigChanges;
use crate::clock::{local_stamp, Clock};
use crate::credential_store::{CredentialRecord, CredentialStore, MonitorSettings};

/// Applies command-line changes on top of the stored settings.
///
/// Values are taken as typed; the store normalizes them on save.
pub fn apply_changes(mut settings: MonitorSettings, changes: &ConfigChanges) -> MonitorSettings {
    if let Some(client_id) = &changes.client_id {
        settings.client_id = client_id.clone();
    }
    if let Some(secret) = &changes.client_secret {
        settings.client_secret = Some(secret.clone());
    }
    if let Some(scopes) = &changes.scopes {
        settings.scopes = scopes.clone();
    }
    if let Some(project) = &changes.duet_project {
        settings.duet_project = project.clone();
    }
    if let Some(project) = &changes.quota_project {
        settings.quota_project = project.clone();
    }
    if let Some(mode) = changes.host_mode {
        settings.host_mode = mode;
    }
    if let Some(flow) = changes.flow {
        settings.flow = flow;
    }
    match &changes.refresh_interval {
        Some(input) => settings.with_refresh_interval_input(input),
        None => settings,
    }
}

/// Settings safe to print.
pub fn redacted(settings: &MonitorSettings) -> MonitorSettings {
    let mut shown = settings.clone();
    if shown.client_secret.is_some() {
        shown.client_secret = Some("<redacted>".to_string());
    }
    shown
}

pub(super) fn show_config(store: &CredentialStore) -> Result<()> {
    let settings = redacted(&store.load_settings());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

pub(super) fn set_config(store: &CredentialStore, changes: &ConfigChanges) -> Result<()> {
    let updated = apply_changes(store.load_settings(), changes);
    let saved = store
        .save_settings(&updated)
        .context("Failed to save settings")?;
    tracing::info!(refresh_interval_sec = saved.refresh_interval_sec, flow = %saved.flow, "Settings saved");
    println!("{}", serde_json::to_string_pretty(&redacted(&saved))?);
    println!("Flow and client changes take effect on the next start.");
    Ok(())
}

/// Human-readable validity of a stored credential at `now_secs`.
fn credential_validity(record: &CredentialRecord, now_secs: i64) -> String {
    match record.expires_at {
        _ if !record.is_usable(now_secs) => "expired".to_string(),
        Some(expires_at) => format!(
            "valid until {}",
            local_stamp(expires_at.saturating_mul(1000))
        ),
        None => "valid (no reported expiry)".to_string(),
    }
}

pub(super) fn print_status(store: &CredentialStore, store_dir: &Path) -> Result<()> {
    let now_secs = store.clock().now_secs();
    match store.load_token() {
        None => println!("Credential: none"),
        Some(record) => {
            let validity = credential_validity(&record, now_secs);
            let renewable = if record.refresh_token.is_some() {
                ", renewable"
            } else {
                ""
            };
            println!("Credential: {}{}", validity, renewable);
        }
    }

    let settings = store.load_settings();
    println!("Flow: {}", settings.flow);
    println!("Host mode: {}", settings.host_mode);
    println!("Refresh interval: {}s", settings.refresh_interval_sec);
    println!(
        "Quota project: {}",
        settings
            .quota_project_override()
            .unwrap_or("(from subscription)")
    );
    println!("Store: {}", store_dir.display());
    Ok(())
}
