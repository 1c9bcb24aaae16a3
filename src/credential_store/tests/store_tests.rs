use super::*;
use crate::clock::ManualClock;
use proptest::prelude::*;
use tempfile::TempDir;
use std::time::Duration;

const NOW_MS: i64 = 1_700_000_000_000;
const NOW_SECS: i64 = NOW_MS / 1000;

fn memory_store() -> (CredentialStore, Arc<MemoryKvStore>) {
    let kv = Arc::new(MemoryKvStore::new());
    let store = CredentialStore::new(kv.clone(), Arc::new(ManualClock::new(NOW_MS)));
    (store, kv)
}

fn record(token: &str, expires_at: Option<i64>) -> CredentialRecord {
    CredentialRecord {
        access_token: token.to_string(),
        token_type: "Bearer".to_string(),
        scope: String::new(),
        expires_at,
        obtained_at: NOW_SECS - 100,
        refresh_token: None,
    }
}

#[test]
fn test_expired_record_is_absent() {
    let (store, _) = memory_store();
    store.save_token(&record("x", Some(NOW_SECS - 1))).unwrap();

    assert_eq!(store.stored_access_token(), None);
    // The raw record is still there; only the validity check hides it.
    assert!(store.load_token().is_some());
}

#[test]
fn test_margin_boundary() {
    let (store, _) = memory_store();

    store.save_token(&record("edge", Some(NOW_SECS + 10))).unwrap();
    assert_eq!(store.stored_access_token(), None);

    store.save_token(&record("fresh", Some(NOW_SECS + 11))).unwrap();
    assert_eq!(store.stored_access_token().as_deref(), Some("fresh"));
}

#[test]
fn test_record_without_expiry_is_usable() {
    let (store, _) = memory_store();
    store.save_token(&record("forever", None)).unwrap();
    assert_eq!(store.stored_access_token().as_deref(), Some("forever"));
}

#[test]
fn test_empty_token_is_absent() {
    let (store, _) = memory_store();
    store.save_token(&record("", Some(NOW_SECS + 3600))).unwrap();
    assert_eq!(store.stored_access_token(), None);
}

#[test]
fn test_corrupt_blobs_fall_back() {
    let (store, kv) = memory_store();
    kv.set(TOKEN_KEY, "{not json").unwrap();
    kv.set(SETTINGS_KEY, "[1, 2, 3]").unwrap();

    assert_eq!(store.load_token(), None);
    assert_eq!(store.load_settings(), MonitorSettings::default());
}

#[test]
fn test_clear_token() {
    let (store, _) = memory_store();
    store.save_token(&record("x", None)).unwrap();
    store.clear_token().unwrap();
    assert_eq!(store.load_token(), None);
    store.clear_token().unwrap();
}

#[test]
fn test_partial_settings_merge_over_defaults() {
    let (store, kv) = memory_store();
    kv.set(
        SETTINGS_KEY,
        r#"{"clientId":"","quotaProject":"my-proj","hostMode":"daily","refreshIntervalSec":3}"#,
    )
    .unwrap();

    let settings = store.load_settings();
    assert_eq!(settings.client_id, DEFAULT_CLIENT_ID);
    assert_eq!(settings.scopes, DEFAULT_SCOPES);
    assert_eq!(settings.quota_project, "my-proj");
    assert_eq!(settings.host_mode, HostMode::Daily);
    assert_eq!(settings.refresh_interval_sec, 10);
    assert_eq!(settings.flow, FlowKind::Pkce);
}

#[test]
fn test_interval_input_is_clamped_on_save() {
    let (store, kv) = memory_store();
    let settings = MonitorSettings::default().with_refresh_interval_input("5");

    let saved = store.save_settings(&settings).unwrap();
    assert_eq!(saved.refresh_interval_sec, 10);

    let raw: serde_json::Value = serde_json::from_str(&kv.get(SETTINGS_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(raw["refreshIntervalSec"], 10);
}

#[test]
fn test_interval_input_parsing() {
    assert_eq!(parse_interval_input("5"), 10);
    assert_eq!(parse_interval_input("45"), 45);
    assert_eq!(parse_interval_input(" 60.9 "), 60);
    assert_eq!(parse_interval_input(""), 30);
    assert_eq!(parse_interval_input("soon"), 30);
    assert_eq!(parse_interval_input("-4"), 10);
}

#[test]
fn test_interval_has_an_upper_bound() {
    assert_eq!(parse_interval_input("1e30"), MAX_REFRESH_INTERVAL_SECS);
    assert_eq!(parse_interval_input("86401"), MAX_REFRESH_INTERVAL_SECS);
    assert_eq!(clamp_interval(u64::MAX), MAX_REFRESH_INTERVAL_SECS);

    let (store, _) = memory_store();
    let saved = store
        .save_settings(&MonitorSettings::default().with_refresh_interval_input("1e30"))
        .unwrap();
    assert_eq!(saved.refresh_interval_sec, MAX_REFRESH_INTERVAL_SECS);

    let hand_edited = MonitorSettings {
        refresh_interval_sec: u64::MAX,
        ..MonitorSettings::default()
    };
    assert_eq!(hand_edited.refresh_interval(), Duration::from_secs(MAX_REFRESH_INTERVAL_SECS));
}

#[test]
fn test_artifact_is_consumed_once() {
    let (store, _) = memory_store();
    store.put_artifact("pending", &"verifier".to_string()).unwrap();

    let first: Option<String> = store.take_artifact("pending");
    let second: Option<String> = store.take_artifact("pending");
    assert_eq!(first.as_deref(), Some("verifier"));
    assert_eq!(second, None);
}

#[test]
fn test_file_backed_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW_MS));

    let first = CredentialStore::new(Arc::new(FileKvStore::new(temp_dir.path())), clock.clone());
    first.save_token(&record("persisted", Some(NOW_SECS + 600))).unwrap();

    let reopened = CredentialStore::new(Arc::new(FileKvStore::new(temp_dir.path())), clock);
    assert_eq!(reopened.stored_access_token().as_deref(), Some("persisted"));
    assert!(temp_dir.path().join("ag_monitor_token_v1.json").exists());
}

#[test]
fn test_from_grant_computes_expiry() {
    let record = CredentialRecord::from_grant(
        "tok".to_string(),
        None,
        Some("scope-a".to_string()),
        Some(3599),
        Some("refresh".to_string()),
        NOW_SECS,
    );
    assert_eq!(record.token_type, "Bearer");
    assert_eq!(record.expires_at, Some(NOW_SECS + 3599));
    assert_eq!(record.obtained_at, NOW_SECS);
    assert_eq!(record.refresh_token.as_deref(), Some("refresh"));
}

proptest! {
    #[test]
    fn prop_records_inside_margin_are_never_returned(offset in -100_000i64..=10) {
        let (store, _) = memory_store();
        store.save_token(&record("tok", Some(NOW_SECS + offset))).unwrap();
        prop_assert_eq!(store.stored_access_token(), None);
    }

    #[test]
    fn prop_records_beyond_margin_are_returned(offset in 11i64..100_000) {
        let (store, _) = memory_store();
        store.save_token(&record("tok", Some(NOW_SECS + offset))).unwrap();
        prop_assert_eq!(store.stored_access_token(), Some("tok".to_string()));
    }
}

#[test]
fn test_mode_names_parse_case_insensitively() {
    assert_eq!("Daily".parse::<HostMode>(), Ok(HostMode::Daily));
    assert_eq!(" popup ".parse::<FlowKind>(), Ok(FlowKind::Popup));
    assert!("sideways".parse::<FlowKind>().is_err());
    assert_eq!(FlowKind::Implicit.to_string().parse::<FlowKind>(), Ok(FlowKind::Implicit));
}
