//! Integration tests for Campus Market.
//!
//! Flow tests run the client's editor and auth orchestration against the
//! in-memory backend. Tests marked `#[ignore]` talk to a real backend project
//! and need `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p campus-market-integration-tests
//!
//! # Include the live backend tests
//! cargo test -p campus-market-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `editor_flow` - Load, edit, save, search and pagination
//! - `lockdown` - Hostile input, persisted lockdown and release
//! - `auth_guard` - Sign-up, sign-in and session guard
//! - `realtime_sync` - Change feed reconciliation between clients

use std::path::PathBuf;
use std::sync::Arc;

use campus_market_client::backend::memory::MemoryBackend;
use campus_market_client::editor::EditorSession;
use campus_market_client::lockdown::{LockdownGuard, LockdownStoreError, MemoryLockdownStore};
use campus_market_core::{Product, StoreId};
use chrono::TimeDelta;

/// Store used by most tests.
pub const STORE: StoreId = StoreId::new(7);

/// Lockdown length used by tests.
pub const LOCKDOWN: TimeDelta = TimeDelta::minutes(5);

/// Editor over the in-memory backend and lockdown store.
pub type MemoryEditor = EditorSession<MemoryBackend, Arc<MemoryLockdownStore>>;

/// Backend holding one product per name in [`STORE`].
#[must_use]
pub fn seeded_backend(names: &[&str]) -> MemoryBackend {
    let backend = MemoryBackend::new();
    for name in names {
        backend.seed_product(STORE, name);
    }
    backend
}

/// Editor for [`STORE`] sharing `backend`, plus its lockdown store.
///
/// # Errors
///
/// Returns an error if the lockdown store cannot be opened.
pub fn memory_editor(
    backend: &MemoryBackend,
) -> Result<(MemoryEditor, Arc<MemoryLockdownStore>), LockdownStoreError> {
    let store = Arc::new(MemoryLockdownStore::default());
    let guard = LockdownGuard::open(Arc::clone(&store), LOCKDOWN)?;
    Ok((EditorSession::new(backend.clone(), guard, STORE), store))
}

/// Product names in listing order.
#[must_use]
pub fn names(products: &[Product]) -> Vec<&str> {
    products.iter().map(|p| p.name.as_str()).collect()
}

/// Unique path under the system temp directory. The file is not created.
#[must_use]
pub fn temp_state_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("campus-market-{}", uuid::Uuid::new_v4()))
        .join("session.json")
}
