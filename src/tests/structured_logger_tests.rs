use super::*;
use crate::credential_store::MonitorSettings;
use tempfile::TempDir;

fn create_test_logger() -> (StructuredLogger, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let logger =
        StructuredLogger::new("test-session", temp_dir.path()).expect("Failed to create logger");
    (logger, temp_dir)
}

fn read_entries(temp_dir: &TempDir) -> Vec<LogEntry> {
    std::fs::read_to_string(temp_dir.path().join("events.jsonl"))
        .expect("Failed to read log file")
        .lines()
        .map(|line| serde_json::from_str(line).expect("Failed to parse log entry"))
        .collect()
}

#[test]
fn test_sequence_numbers_monotonic() {
    let (logger, temp_dir) = create_test_logger();

    for i in 0..10 {
        logger.log("Test", serde_json::json!({"iteration": i}));
    }

    let entries = read_entries(&temp_dir);
    assert_eq!(entries.len(), 10);
    let mut prev_seq = 0u64;
    for entry in entries {
        assert_eq!(entry.session_id, "test-session");
        assert!(entry.seq > prev_seq);
        prev_seq = entry.seq;
    }
}

#[test]
fn test_run_id_increments() {
    let (logger, temp_dir) = create_test_logger();

    logger.log("Test", serde_json::json!({"msg": "first"}));
    logger.increment_run_id();
    logger.log("Test", serde_json::json!({"msg": "second"}));

    let entries = read_entries(&temp_dir);
    assert_eq!(entries[0].run_id, 1);
    assert_eq!(entries[1].run_id, 2);
}

#[test]
fn test_timestamp_has_microseconds() {
    let (logger, temp_dir) = create_test_logger();
    logger.log("Test", serde_json::json!({"msg": "test"}));

    let entry = &read_entries(&temp_dir)[0];
    assert!(entry.ts.contains('T'));
    assert!(entry.ts.ends_with('Z'));
    let micros_part = entry.ts.split('.').nth(1).unwrap();
    assert_eq!(micros_part.len(), 7); // 6 digits + 'Z'
}

#[test]
fn test_session_command_and_event_logging() {
    let (logger, temp_dir) = create_test_logger();

    logger.log_command(&SessionCommand::ManualRefresh);
    logger.log_event(&SessionEvent::StateChanged {
        from: "SignedIn".to_string(),
        to: "SignedOut".to_string(),
    });

    let entries = read_entries(&temp_dir);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].component, "Session");
    assert_eq!(entries[0].event["type"], "SessionCommand");
    assert_eq!(entries[0].event["command"]["type"], "ManualRefresh");
    assert_eq!(entries[1].event["type"], "SessionEvent");
    assert_eq!(entries[1].event["event"]["type"], "StateChanged");
    assert_eq!(entries[1].event["event"]["to"], "SignedOut");
}

#[test]
fn test_settings_secret_is_never_logged() {
    let (logger, temp_dir) = create_test_logger();

    let settings = MonitorSettings {
        client_secret: Some("super-secret".to_string()),
        ..MonitorSettings::default()
    };
    logger.log_command(&SessionCommand::SaveSettings { settings });

    let raw = std::fs::read_to_string(logger.path()).unwrap();
    assert!(!raw.contains("super-secret"));
    assert_eq!(read_entries(&temp_dir)[0].event["command"]["type"], "SaveSettings");
}

#[test]
fn test_appends_across_instances() {
    let temp_dir = TempDir::new().unwrap();
    StructuredLogger::new("one", temp_dir.path())
        .unwrap()
        .log("Test", serde_json::json!({}));
    StructuredLogger::new("two", temp_dir.path())
        .unwrap()
        .log("Test", serde_json::json!({}));

    let ids: Vec<String> = read_entries(&temp_dir)
        .into_iter()
        .map(|e| e.session_id)
        .collect();
    assert_eq!(ids, vec!["one".to_string(), "two".to_string()]);
}
