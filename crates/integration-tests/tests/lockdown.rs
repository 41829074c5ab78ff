//! Lockdown triggered by hostile editor input, persisted across restarts.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use campus_market_client::editor::{AbusePolicy, EditorSession};
use campus_market_client::error::AppError;
use campus_market_client::lockdown::{FileLockdownStore, LockdownGuard, LockdownStore};
use campus_market_core::guard::ProductField;
use campus_market_core::DraftKey;
use campus_market_core::lockdown::{DEFAULT_LOCKDOWN_MESSAGE, LOCKDOWN_STORAGE_KEY};
use campus_market_integration_tests::{LOCKDOWN, STORE, seeded_backend, temp_state_path};
use chrono::{SubsecRound, TimeDelta, Utc};

#[tokio::test]
async fn test_hostile_edit_survives_restart() {
    let path = temp_state_path();
    let backend = seeded_backend(&["Stapler", "binder"]);

    let guard = LockdownGuard::open(FileLockdownStore::new(&path), LOCKDOWN).unwrap();
    let mut editor = EditorSession::new(backend.clone(), guard, STORE);
    editor.load().await.unwrap();
    editor.enter_edit().unwrap();
    let key = DraftKey::Persisted(editor.confirmed()[0].id);

    let err = editor
        .edit_field(key, ProductField::Name, "javascript:alert(1)")
        .unwrap_err();
    let AppError::AbuseDetected {
        locked_until: Some(until),
    } = err
    else {
        panic!("expected lockdown, got {err:?}");
    };
    assert!(until > Utc::now());
    assert!(!editor.is_editing());
    drop(editor);

    // A new session reading the same file is still locked
    let guard = LockdownGuard::open(FileLockdownStore::new(&path), LOCKDOWN).unwrap();
    let mut editor = EditorSession::new(backend.clone(), guard, STORE);
    editor.load().await.unwrap();
    assert!(matches!(editor.enter_edit(), Err(AppError::Locked { until: u }) if u == until));
    assert_eq!(editor.locked_until().unwrap(), Some(until));

    let raw = std::fs::read_to_string(&path).unwrap();
    let document: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let entry = &document[LOCKDOWN_STORAGE_KEY];
    assert_eq!(entry["active"], true);
    assert_eq!(entry["message"], DEFAULT_LOCKDOWN_MESSAGE);

    // The store was never written to
    assert!(backend.writes().is_empty());
}

#[test]
fn test_elapsed_lockdown_is_cleared_on_open() {
    let path = temp_state_path();
    let store = FileLockdownStore::new(&path);
    let start = Utc::now().trunc_subsecs(0) - TimeDelta::minutes(10);

    let mut guard = LockdownGuard::open_at(store.clone(), LOCKDOWN, start).unwrap();
    let until = guard.trigger(start, DEFAULT_LOCKDOWN_MESSAGE).unwrap();
    assert_eq!(until, start + LOCKDOWN);
    assert!(store.load().unwrap().is_some());

    let mut guard = LockdownGuard::open(store.clone(), LOCKDOWN).unwrap();
    assert_eq!(guard.locked_until(Utc::now()).unwrap(), None);
    assert!(store.load().unwrap().is_none());
}

#[test]
fn test_lockdown_boundaries() {
    let path = temp_state_path();
    let store = FileLockdownStore::new(&path);
    let t = Utc::now().trunc_subsecs(0);

    let mut guard = LockdownGuard::open_at(store, LOCKDOWN, t).unwrap();
    guard.trigger(t, DEFAULT_LOCKDOWN_MESSAGE).unwrap();

    assert_eq!(guard.locked_until(t).unwrap(), Some(t + LOCKDOWN));
    assert!(
        guard
            .locked_until(t + LOCKDOWN - TimeDelta::milliseconds(1))
            .unwrap()
            .is_some()
    );
    assert_eq!(guard.locked_until(t + LOCKDOWN).unwrap(), None);
}

#[test]
fn test_unreadable_state_file_is_discarded() {
    let path = temp_state_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{not json").unwrap();

    let mut guard = LockdownGuard::open(FileLockdownStore::new(&path), LOCKDOWN).unwrap();
    assert_eq!(guard.locked_until(Utc::now()).unwrap(), None);
}

#[tokio::test]
async fn test_warn_policy_never_persists() {
    let path = temp_state_path();
    let backend = seeded_backend(&["Stapler"]);
    let guard = LockdownGuard::open(FileLockdownStore::new(&path), LOCKDOWN).unwrap();
    let mut editor = EditorSession::new(backend, guard, STORE).with_policy(AbusePolicy::Warn);
    editor.load().await.unwrap();
    editor.enter_edit().unwrap();
    let key = DraftKey::Persisted(editor.confirmed()[0].id);

    let err = editor
        .edit_field(key, ProductField::Brand, "../../etc/passwd")
        .unwrap_err();
    assert!(matches!(err, AppError::AbuseDetected { locked_until: None }));
    assert!(editor.is_editing());
    assert!(!path.exists());
}
