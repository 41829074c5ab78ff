//! Persisted lockdown.
//!
//! [`LockdownGuard`] drives the core [`Lockdown`] machine with the wall clock
//! and mirrors every transition into a [`LockdownStore`], so a lockdown
//! survives restarts until its absolute end time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use campus_market_core::lockdown::{LOCKDOWN_STORAGE_KEY, Lockdown, LockdownState, Transition};
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Errors reading or writing the persisted lockdown entry.
#[derive(Debug, Error)]
pub enum LockdownStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed session storage: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lockdown store lock poisoned")]
    Poisoned,
}

/// Storage for the single lockdown entry.
pub trait LockdownStore: Send + Sync {
    /// Read the entry, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read or parsed.
    fn load(&self) -> Result<Option<LockdownState>, LockdownStoreError>;

    /// Write the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn save(&self, state: &LockdownState) -> Result<(), LockdownStoreError>;

    /// Remove the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn clear(&self) -> Result<(), LockdownStoreError>;
}

/// Per-profile session storage kept as a JSON object in one file.
///
/// The lockdown entry lives under [`LOCKDOWN_STORAGE_KEY`]; other keys in the
/// document are preserved.
#[derive(Debug, Clone)]
pub struct FileLockdownStore {
    path: PathBuf,
}

type SessionDocument = BTreeMap<String, serde_json::Value>;

impl FileLockdownStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<SessionDocument, LockdownStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(SessionDocument::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionDocument::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(&self, document: &SessionDocument) -> Result<(), LockdownStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(document)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl LockdownStore for FileLockdownStore {
    fn load(&self) -> Result<Option<LockdownState>, LockdownStoreError> {
        let document = self.read_document()?;
        document
            .get(LOCKDOWN_STORAGE_KEY)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Into::into)
    }

    fn save(&self, state: &LockdownState) -> Result<(), LockdownStoreError> {
        let mut document = self.read_document()?;
        document.insert(LOCKDOWN_STORAGE_KEY.to_string(), serde_json::to_value(state)?);
        self.write_document(&document)
    }

    fn clear(&self) -> Result<(), LockdownStoreError> {
        match self.read_document() {
            Ok(mut document) => {
                if document.remove(LOCKDOWN_STORAGE_KEY).is_some() {
                    self.write_document(&document)?;
                }
                Ok(())
            }
            // An unparseable document holds no usable entry
            Err(LockdownStoreError::Json(_)) => self.write_document(&SessionDocument::new()),
            Err(e) => Err(e),
        }
    }
}

/// In-memory store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryLockdownStore {
    state: Mutex<Option<LockdownState>>,
}

impl MemoryLockdownStore {
    #[must_use]
    pub fn new(state: Option<LockdownState>) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl LockdownStore for MemoryLockdownStore {
    fn load(&self) -> Result<Option<LockdownState>, LockdownStoreError> {
        let state = self.state.lock().map_err(|_| LockdownStoreError::Poisoned)?;
        Ok(state.clone())
    }

    fn save(&self, state: &LockdownState) -> Result<(), LockdownStoreError> {
        let mut slot = self.state.lock().map_err(|_| LockdownStoreError::Poisoned)?;
        *slot = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), LockdownStoreError> {
        let mut slot = self.state.lock().map_err(|_| LockdownStoreError::Poisoned)?;
        *slot = None;
        Ok(())
    }
}

impl<S: LockdownStore + ?Sized> LockdownStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<LockdownState>, LockdownStoreError> {
        (**self).load()
    }

    fn save(&self, state: &LockdownState) -> Result<(), LockdownStoreError> {
        (**self).save(state)
    }

    fn clear(&self) -> Result<(), LockdownStoreError> {
        (**self).clear()
    }
}

/// Lockdown machine bound to a store.
#[derive(Debug)]
pub struct LockdownGuard<S> {
    machine: Lockdown,
    store: S,
}

impl<S: LockdownStore> LockdownGuard<S> {
    /// Restore the lockdown from `store` at the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if an elapsed entry cannot be cleared.
    pub fn open(store: S, duration: TimeDelta) -> Result<Self, LockdownStoreError> {
        Self::open_at(store, duration, Utc::now())
    }

    /// Restore the lockdown from `store` as of `now`.
    ///
    /// An unreadable entry is logged and cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if an elapsed or unreadable entry cannot be cleared.
    #[instrument(skip(store), fields(duration_secs = duration.num_seconds()))]
    pub fn open_at(
        store: S,
        duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<Self, LockdownStoreError> {
        let stored = match store.load() {
            Ok(stored) => stored,
            Err(LockdownStoreError::Json(e)) => {
                warn!(error = %e, "Discarding unreadable lockdown entry");
                store.clear()?;
                None
            }
            Err(e) => return Err(e),
        };

        let mut machine = Lockdown::new(duration);
        if machine.restore(stored, now) == Some(Transition::Released) {
            info!("Stored lockdown has elapsed");
            store.clear()?;
        }
        if let Some(state) = machine.state() {
            info!(until = %state.end_timestamp, "Lockdown restored");
        }

        Ok(Self { machine, store })
    }

    /// End of the active lockdown at `now`, releasing it if it has elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if a released entry cannot be cleared.
    pub fn locked_until(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, LockdownStoreError> {
        if self.machine.poll(now) == Some(Transition::Released) {
            info!("Lockdown released");
            self.store.clear()?;
        }
        Ok(self.machine.state().map(|s| s.end_timestamp))
    }

    /// Lock at `now` and return the end time. An active lockdown keeps its
    /// original end time.
    ///
    /// # Errors
    ///
    /// Returns an error if the new entry cannot be persisted.
    pub fn trigger(
        &mut self,
        now: DateTime<Utc>,
        message: &str,
    ) -> Result<DateTime<Utc>, LockdownStoreError> {
        self.locked_until(now)?;
        if let Some(Transition::Locked(state)) = self.machine.trigger(now, message) {
            warn!(until = %state.end_timestamp, "Lockdown triggered");
            self.store.save(&state)?;
        }
        Ok(self
            .machine
            .state()
            .map_or(now + self.machine.duration(), |s| s.end_timestamp))
    }

    /// Message of the active lockdown, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.machine.state().map(|s| s.message.as_str())
    }

    /// Sleep until the active lockdown ends, then release it.
    ///
    /// Returns immediately when not locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the released entry cannot be cleared.
    pub async fn wait_for_release(&mut self) -> Result<(), LockdownStoreError> {
        loop {
            let now = Utc::now();
            let Some(until) = self.locked_until(now)? else {
                return Ok(());
            };
            let wait = (until - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("campus-market-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_trigger_persists_and_survives_reopen() {
        let store = Arc::new(MemoryLockdownStore::default());
        let mut guard = LockdownGuard::open_at(store.clone(), TimeDelta::minutes(5), t0()).unwrap();

        let until = guard.trigger(t0(), "locked").unwrap();
        assert_eq!(until, t0() + TimeDelta::minutes(5));
        assert!(store.load().unwrap().is_some());

        let mut reopened =
            LockdownGuard::open_at(store.clone(), TimeDelta::minutes(5), t0() + TimeDelta::minutes(1))
                .unwrap();
        assert_eq!(
            reopened.locked_until(t0() + TimeDelta::minutes(1)).unwrap(),
            Some(until)
        );
        assert_eq!(reopened.message(), Some("locked"));
    }

    #[test]
    fn test_repeated_trigger_keeps_end_time() {
        let store = MemoryLockdownStore::default();
        let mut guard = LockdownGuard::open_at(store, TimeDelta::minutes(5), t0()).unwrap();

        let first = guard.trigger(t0(), "first").unwrap();
        let second = guard.trigger(t0() + TimeDelta::minutes(3), "second").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_release_clears_store() {
        let store = Arc::new(MemoryLockdownStore::default());
        let mut guard = LockdownGuard::open_at(store.clone(), TimeDelta::minutes(5), t0()).unwrap();
        guard.trigger(t0(), "locked").unwrap();

        assert_eq!(guard.locked_until(t0() + TimeDelta::minutes(5)).unwrap(), None);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_open_clears_elapsed_entry() {
        let state = LockdownState::trigger(t0(), TimeDelta::minutes(5), "old");
        let store = Arc::new(MemoryLockdownStore::new(Some(state)));

        let mut guard =
            LockdownGuard::open_at(store.clone(), TimeDelta::minutes(5), t0() + TimeDelta::hours(1))
                .unwrap();
        assert_eq!(guard.locked_until(t0() + TimeDelta::hours(1)).unwrap(), None);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_round_trip_keeps_other_keys() {
        let path = temp_path("session.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"theme": "dark"}"#).unwrap();

        let store = FileLockdownStore::new(&path);
        let state = LockdownState::trigger(t0(), TimeDelta::minutes(5), "locked");
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("dark"));
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let store = FileLockdownStore::new(temp_path("absent.json"));
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_unreadable_entry_is_discarded() {
        let path = temp_path("session.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let mut guard =
            LockdownGuard::open_at(FileLockdownStore::new(&path), TimeDelta::minutes(5), t0())
                .unwrap();
        assert_eq!(guard.locked_until(t0()).unwrap(), None);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_release() {
        let store = MemoryLockdownStore::default();
        let mut guard = LockdownGuard::open(store, TimeDelta::milliseconds(50)).unwrap();
        guard.trigger(Utc::now(), "locked").unwrap();

        guard.wait_for_release().await.unwrap();
        assert_eq!(guard.locked_until(Utc::now()).unwrap(), None);
    }
}
