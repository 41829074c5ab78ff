//! In-process backend for tests.
//!
//! Implements [`RecordStore`], [`AuthProvider`] and [`ChangeFeed`] over shared
//! in-memory state. Every successful write is pushed to subscribers as a
//! [`ChangeEvent`], and failures can be injected per call kind.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use campus_market_core::realtime::{ChangeEvent, ChangeKind, OldRecord};
use campus_market_core::{
    Credentials, Email, NewProduct, Product, ProductId, ProductPatch, StatusRecord, StoreId,
};
use chrono::{TimeDelta, Utc};
use secrecy::SecretString;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use super::{
    AuthProvider, AuthUser, BackendError, ChangeFeed, OAuthProvider, RecordStore, Session,
    SignUpOutcome,
};

const SESSION_LIFETIME: TimeDelta = TimeDelta::hours(1);

/// A write as seen by the backend, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Insert(String),
    Update(ProductId),
    Delete(ProductId),
}

#[derive(Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    statuses: Vec<StatusRecord>,
    next_id: i64,
    accounts: HashMap<String, (Uuid, String)>,
    subscribers: Vec<(StoreId, mpsc::Sender<ChangeEvent>)>,
    writes: Vec<WriteCall>,
    list_calls: usize,
    /// Writes allowed before every further write fails.
    fail_writes_after: Option<usize>,
    fail_reads: bool,
    require_confirmation: bool,
    reset_requests: Vec<String>,
}

/// Cloneable handle to shared in-memory backend state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a product as if another client had created it, without emitting
    /// an event.
    pub fn seed_product(&self, store_id: StoreId, name: &str) -> Product {
        let mut state = self.lock();
        state.next_id += 1;
        let product = Product {
            id: ProductId::new(state.next_id),
            store_id,
            name: name.to_string(),
            price: None,
            brand: None,
            status: None,
            created_at: Utc::now(),
            archived: false,
        };
        state.products.insert(product.id, product.clone());
        product
    }

    pub fn seed_status(&self, status: StatusRecord) {
        self.lock().statuses.push(status);
    }

    pub fn seed_account(&self, email: &str, password: &str) {
        self.lock()
            .accounts
            .insert(email.to_string(), (Uuid::new_v4(), password.to_string()));
    }

    /// Let `count` more writes succeed, then fail every following write.
    pub fn fail_writes_after(&self, count: usize) {
        self.lock().fail_writes_after = Some(count);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Answer sign-ups with a confirmation request instead of a session.
    pub fn require_confirmation(&self, required: bool) {
        self.lock().require_confirmation = required;
    }

    /// Rows currently stored for a store, sorted by id.
    #[must_use]
    pub fn products(&self, store_id: StoreId) -> Vec<Product> {
        self.lock()
            .products
            .values()
            .filter(|p| p.store_id == store_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn writes(&self) -> Vec<WriteCall> {
        self.lock().writes.clone()
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    #[must_use]
    pub fn reset_requests(&self) -> Vec<String> {
        self.lock().reset_requests.clone()
    }

    /// Update a row as another client would, emitting an event.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] for unknown ids.
    pub fn remote_rename(&self, id: ProductId, name: &str) -> Result<Product, BackendError> {
        let mut state = self.lock();
        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| BackendError::NotFound(format!("product {id}")))?;
        product.name = name.to_string();
        let product = product.clone();
        state.publish(ChangeKind::Update, Some(product.clone()), id, product.store_id);
        Ok(product)
    }

    /// Push an arbitrary event to subscribers of `store_id`.
    pub fn push_event(&self, store_id: StoreId, event: ChangeEvent) {
        self.lock().send(store_id, event);
    }

    fn check_write(state: &mut State) -> Result<(), BackendError> {
        match state.fail_writes_after {
            Some(0) => Err(BackendError::Api {
                status: 503,
                message: "injected write failure".to_string(),
            }),
            Some(ref mut remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_read(state: &State) -> Result<(), BackendError> {
        if state.fail_reads {
            return Err(BackendError::Api {
                status: 503,
                message: "injected read failure".to_string(),
            });
        }
        Ok(())
    }

    fn session_for(user: AuthUser) -> Session {
        Session {
            user,
            access_token: SecretString::from(Uuid::new_v4().to_string()),
            refresh_token: None,
            expires_at: Utc::now() + SESSION_LIFETIME,
        }
    }
}

impl State {
    fn publish(&mut self, kind: ChangeKind, new: Option<Product>, id: ProductId, store_id: StoreId) {
        let event = ChangeEvent {
            event_type: kind,
            new,
            old: (kind != ChangeKind::Insert).then_some(OldRecord { id }),
            commit_timestamp: Some(Utc::now()),
        };
        self.send(store_id, event);
    }

    fn send(&mut self, store_id: StoreId, event: ChangeEvent) {
        self.subscribers.retain(|(_, tx)| !tx.is_closed());
        for (subscribed, tx) in &self.subscribers {
            if *subscribed == store_id {
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

impl RecordStore for MemoryBackend {
    async fn list_products(
        &self,
        store_id: StoreId,
        search: Option<&str>,
    ) -> Result<Vec<Product>, BackendError> {
        let mut state = self.lock();
        state.list_calls += 1;
        Self::check_read(&state)?;

        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        Ok(state
            .products
            .values()
            .filter(|p| p.store_id == store_id)
            .filter(|p| {
                needle
                    .as_ref()
                    .is_none_or(|n| p.name.to_lowercase().contains(n))
            })
            .cloned()
            .collect())
    }

    async fn list_statuses(&self) -> Result<Vec<StatusRecord>, BackendError> {
        let state = self.lock();
        Self::check_read(&state)?;
        Ok(state.statuses.clone())
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<Product, BackendError> {
        let mut state = self.lock();
        Self::check_write(&mut state)?;
        state.writes.push(WriteCall::Insert(product.name.clone()));

        state.next_id += 1;
        let stored = Product {
            id: ProductId::new(state.next_id),
            store_id: product.store_id,
            name: product.name.clone(),
            price: product.price,
            brand: product.brand.clone(),
            status: None,
            created_at: Utc::now(),
            archived: false,
        };
        state.products.insert(stored.id, stored.clone());
        state.publish(ChangeKind::Insert, Some(stored.clone()), stored.id, stored.store_id);
        Ok(stored)
    }

    async fn update_product(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, BackendError> {
        let mut state = self.lock();
        Self::check_write(&mut state)?;
        state.writes.push(WriteCall::Update(id));

        let product = state
            .products
            .get_mut(&id)
            .ok_or_else(|| BackendError::NotFound(format!("product {id}")))?;
        product.name.clone_from(&patch.name);
        product.price = patch.price;
        product.brand.clone_from(&patch.brand);
        let product = product.clone();
        state.publish(ChangeKind::Update, Some(product.clone()), id, product.store_id);
        Ok(product)
    }

    async fn delete_product(&self, id: ProductId) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::check_write(&mut state)?;
        state.writes.push(WriteCall::Delete(id));

        if let Some(product) = state.products.remove(&id) {
            state.publish(ChangeKind::Delete, None, id, product.store_id);
        }
        Ok(())
    }
}

impl AuthProvider for MemoryBackend {
    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome, BackendError> {
        let mut state = self.lock();
        let email = credentials.email.as_str().to_string();
        if state.accounts.contains_key(&email) {
            return Err(BackendError::Api {
                status: 422,
                message: "User already registered".to_string(),
            });
        }

        let id = Uuid::new_v4();
        state.accounts.insert(
            email.clone(),
            (id, credentials.password.expose().to_string()),
        );
        let user = AuthUser {
            id,
            email: Some(email),
        };
        if state.require_confirmation {
            Ok(SignUpOutcome::ConfirmationRequired(user))
        } else {
            Ok(SignUpOutcome::SignedIn(Self::session_for(user)))
        }
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, BackendError> {
        let state = self.lock();
        match state.accounts.get(credentials.email.as_str()) {
            Some((id, password)) if password == credentials.password.expose() => {
                Ok(Self::session_for(AuthUser {
                    id: *id,
                    email: Some(credentials.email.as_str().to_string()),
                }))
            }
            _ => Err(BackendError::InvalidCredentials),
        }
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, BackendError> {
        let mut url = Url::parse("http://localhost:54321/auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    async fn reset_password(&self, email: &Email) -> Result<(), BackendError> {
        self.lock().reset_requests.push(email.as_str().to_string());
        Ok(())
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), BackendError> {
        Ok(())
    }
}

impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, store_id: StoreId) -> Result<mpsc::Receiver<ChangeEvent>, BackendError> {
        let (tx, rx) = mpsc::channel(64);
        self.lock().subscribers.push((store_id, tx));
        Ok(rx)
    }
}
