//! Two clients on one store, reconciled through the change feed.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use campus_market_client::backend::ChangeFeed;
use campus_market_client::error::AppError;
use campus_market_core::guard::ProductField;
use campus_market_core::DraftKey;
use campus_market_core::realtime::{ChangeEvent, ChangeKind, MergeOutcome, OldRecord};
use campus_market_integration_tests::{STORE, memory_editor, names, seeded_backend};
use chrono::{TimeDelta, Utc};
use serde_json::json;

#[tokio::test]
async fn test_viewer_follows_editor_saves() {
    let backend = seeded_backend(&["Stapler", "binder"]);
    let (mut writer, _) = memory_editor(&backend).unwrap();
    let (mut viewer, _) = memory_editor(&backend).unwrap();
    writer.load().await.unwrap();
    viewer.load().await.unwrap();
    let mut feed = backend.subscribe(STORE).await.unwrap();

    writer.enter_edit().unwrap();
    let binder = DraftKey::Persisted(writer.confirmed()[0].id);
    writer.delete_record(binder).unwrap();
    let added = writer.add_record().unwrap();
    writer.edit_field(added, ProductField::Name, "Clipboard").unwrap();
    writer.save().await.unwrap();

    for _ in 0..2 {
        let event = feed.recv().await.unwrap();
        assert!(viewer.apply_remote(event).is_some());
    }

    assert_eq!(viewer.confirmed(), writer.confirmed());
    assert_eq!(names(viewer.confirmed()), ["Clipboard", "Stapler"]);
}

#[tokio::test]
async fn test_open_draft_is_not_disturbed_by_pushes() {
    let backend = seeded_backend(&["Stapler"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    editor.load().await.unwrap();
    let mut feed = backend.subscribe(STORE).await.unwrap();
    let id = editor.confirmed()[0].id;

    editor.enter_edit().unwrap();
    editor
        .edit_field(DraftKey::Persisted(id), ProductField::Brand, "Bostitch")
        .unwrap();
    backend.remote_rename(id, "Desk Stapler").unwrap();
    let event = feed.recv().await.unwrap();

    assert_eq!(editor.apply_remote(event), None);
    let record = editor.draft().unwrap().get(DraftKey::Persisted(id)).unwrap();
    assert_eq!(record.name, "Stapler");
    assert_eq!(editor.confirmed()[0].name, "Stapler");

    // Saving sends the draft's name, so the local edit wins
    editor.save().await.unwrap();
    assert_eq!(backend.products(STORE)[0].name, "Stapler");
    assert_eq!(backend.products(STORE)[0].brand.as_deref(), Some("Bostitch"));
}

#[tokio::test]
async fn test_out_of_order_pushes_resolve_by_commit_time() {
    let backend = seeded_backend(&["Stapler"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    editor.load().await.unwrap();
    let mut product = editor.confirmed()[0].clone();
    let now = Utc::now();

    product.name = "Newer".to_string();
    let newer = ChangeEvent {
        event_type: ChangeKind::Update,
        new: Some(product.clone()),
        old: Some(OldRecord { id: product.id }),
        commit_timestamp: Some(now),
    };
    product.name = "Older".to_string();
    let older = ChangeEvent {
        event_type: ChangeKind::Update,
        new: Some(product.clone()),
        old: Some(OldRecord { id: product.id }),
        commit_timestamp: Some(now - TimeDelta::seconds(1)),
    };

    assert_eq!(editor.apply_remote(newer), Some(MergeOutcome::Updated));
    assert_eq!(editor.apply_remote(older), Some(MergeOutcome::Stale));
    assert_eq!(names(editor.confirmed()), ["Newer"]);
}

#[tokio::test]
async fn test_backend_payload_fixture() {
    let backend = seeded_backend(&["Stapler"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    editor.load().await.unwrap();

    let insert: ChangeEvent = serde_json::from_value(json!({
        "eventType": "INSERT",
        "commitTimestamp": "2024-09-01T12:00:00Z",
        "new": {
            "id": 900,
            "store_id": STORE,
            "name": "Glue Stick",
            "price": "1.25",
            "brand": null,
            "status": {"id": 2, "name": "In stock"},
            "datecreated": "2024-09-01T11:59:58Z",
            "archived": false
        }
    }))
    .unwrap();
    assert_eq!(editor.apply_remote(insert), Some(MergeOutcome::Inserted));

    let glue = editor.confirmed().iter().find(|p| p.name == "Glue Stick").unwrap();
    assert_eq!(editor.status_of(glue).unwrap().name, "In stock");

    let delete: ChangeEvent = serde_json::from_value(json!({
        "eventType": "DELETE",
        "commitTimestamp": "2024-09-01T12:00:05Z",
        "old": {"id": 900}
    }))
    .unwrap();
    assert_eq!(editor.apply_remote(delete), Some(MergeOutcome::Removed));
    assert_eq!(names(editor.confirmed()), ["Stapler"]);
}

#[tokio::test]
async fn test_locked_editor_still_receives_pushes() {
    let backend = seeded_backend(&["Stapler"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    editor.load().await.unwrap();
    let mut feed = backend.subscribe(STORE).await.unwrap();
    let id = editor.confirmed()[0].id;

    editor.enter_edit().unwrap();
    let err = editor
        .edit_field(DraftKey::Persisted(id), ProductField::Name, "1 OR 1=1")
        .unwrap_err();
    assert!(matches!(err, AppError::AbuseDetected { locked_until: Some(_) }));

    backend.remote_rename(id, "Long Reach Stapler").unwrap();
    let event = feed.recv().await.unwrap();
    assert_eq!(editor.apply_remote(event), Some(MergeOutcome::Updated));
    assert_eq!(names(editor.confirmed()), ["Long Reach Stapler"]);
}
