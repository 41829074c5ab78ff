//! Editor flows against the in-memory backend.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use campus_market_client::backend::memory::WriteCall;
use campus_market_client::error::AppError;
use campus_market_core::guard::ProductField;
use campus_market_core::{DraftKey, Price};
use campus_market_integration_tests::{STORE, memory_editor, names, seeded_backend};

#[tokio::test]
async fn test_edit_save_round_trip() {
    let backend = seeded_backend(&["Stapler", "binder", "Highlighter"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    editor.load().await.unwrap();
    assert_eq!(names(editor.confirmed()), ["binder", "Highlighter", "Stapler"]);

    editor.enter_edit().unwrap();
    let stapler = DraftKey::Persisted(editor.confirmed()[2].id);
    editor.edit_field(stapler, ProductField::Price, "12.99").unwrap();
    editor.edit_field(stapler, ProductField::Brand, "Swingline").unwrap();
    let added = editor.add_record().unwrap();
    editor.edit_field(added, ProductField::Name, "Index Cards").unwrap();

    let report = editor.save().await.unwrap();
    assert_eq!((report.inserted, report.updated, report.deleted), (1, 1, 0));
    assert!(!editor.is_editing());

    let stored = backend.products(STORE);
    let stapler = stored.iter().find(|p| p.name == "Stapler").unwrap();
    assert_eq!(stapler.price, Some(Price::parse_input("12.99").unwrap().unwrap()));
    assert_eq!(stapler.brand.as_deref(), Some("Swingline"));
    assert_eq!(
        names(editor.confirmed()),
        ["binder", "Highlighter", "Index Cards", "Stapler"]
    );
}

#[tokio::test]
async fn test_fresh_draft_has_nothing_to_save() {
    let backend = seeded_backend(&["Stapler", "binder"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    editor.load().await.unwrap();

    editor.enter_edit().unwrap();
    let plan = editor.draft().unwrap().diff(editor.confirmed());
    assert!(plan.is_empty());

    editor.save().await.unwrap();
    assert!(backend.writes().is_empty());
}

#[tokio::test]
async fn test_deleting_a_new_record_sends_nothing() {
    let backend = seeded_backend(&["Stapler"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    editor.load().await.unwrap();

    editor.enter_edit().unwrap();
    let added = editor.add_record().unwrap();
    editor.edit_field(added, ProductField::Name, "Tape").unwrap();
    editor.delete_record(added).unwrap();

    editor.save().await.unwrap();
    assert!(backend.writes().is_empty());
}

#[tokio::test]
async fn test_partial_save_then_retry() {
    let backend = seeded_backend(&["Stapler", "binder", "Highlighter"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    editor.load().await.unwrap();

    editor.enter_edit().unwrap();
    let binder = DraftKey::Persisted(editor.confirmed()[0].id);
    let stapler = DraftKey::Persisted(editor.confirmed()[2].id);
    editor.delete_record(binder).unwrap();
    editor.edit_field(stapler, ProductField::Name, "Heavy Stapler").unwrap();
    backend.fail_writes_after(1);

    let err = editor.save().await.unwrap_err();
    assert!(matches!(
        err,
        AppError::PartialSave {
            applied: 1,
            planned: 2,
            ..
        }
    ));
    assert_eq!(
        err.user_message(),
        "Some changes were saved, others were not. Review and save again."
    );
    assert!(editor.is_editing());

    backend.fail_writes_after(usize::MAX);
    editor.save().await.unwrap();

    let writes = backend.writes();
    assert_eq!(writes.len(), 2);
    assert!(matches!(writes[0], WriteCall::Delete(_)));
    assert!(matches!(writes[1], WriteCall::Update(_)));
    assert_eq!(names(editor.confirmed()), ["Heavy Stapler", "Highlighter"]);
}

#[tokio::test]
async fn test_backend_read_failure_is_hidden_from_users() {
    let backend = seeded_backend(&["Stapler"]);
    let (mut editor, _) = memory_editor(&backend).unwrap();
    backend.fail_reads(true);

    let err = editor.load().await.unwrap_err();
    assert!(matches!(err, AppError::Backend(_)));
    assert!(!err.user_message().contains("injected"));
    assert!(editor.confirmed().is_empty());
}

#[tokio::test]
async fn test_search_and_pagination() {
    let names_in: Vec<String> = (1..=25).map(|i| format!("Pen {i:02}")).collect();
    let refs: Vec<&str> = names_in.iter().map(String::as_str).collect();
    let backend = seeded_backend(&refs);
    backend.seed_product(STORE, "Notebook");

    let (editor, _) = memory_editor(&backend).unwrap();
    let mut editor = editor.with_page_size(10);
    editor.load().await.unwrap();
    assert_eq!(editor.page_count(), 3);

    editor.set_page(3);
    assert_eq!(editor.confirmed_page().len(), 6);
    editor.set_page(9);
    assert_eq!(editor.pagination().page(), 3);

    editor.search("pen 1").await.unwrap();
    assert_eq!(editor.pagination().page(), 1);
    assert_eq!(editor.confirmed().len(), 10);
    assert_eq!(editor.page_count(), 1);

    editor.search("").await.unwrap();
    assert_eq!(editor.search_term(), None);
    assert_eq!(editor.confirmed().len(), 26);
}

#[tokio::test]
async fn test_draft_pages_follow_visible_records() {
    let backend = seeded_backend(&["a", "b", "c"]);
    let (editor, _) = memory_editor(&backend).unwrap();
    let mut editor = editor.with_page_size(2);
    editor.load().await.unwrap();

    editor.enter_edit().unwrap();
    editor.set_page(2);
    assert_eq!(editor.draft_page().len(), 1);

    let c = editor.draft_page()[0].key;
    editor.delete_record(c).unwrap();
    assert_eq!(editor.pagination().page(), 1);
    assert_eq!(editor.draft_page().len(), 2);
}
