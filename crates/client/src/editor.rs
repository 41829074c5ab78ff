//! Product editor session for one store.
//!
//! Holds the confirmed products, the optional draft and the lockdown guard,
//! and orchestrates loads, edits, saves and realtime merges. Operations take
//! `&mut self` and are awaited one at a time.
//!
//! # Save
//!
//! A save re-validates the whole draft, then dispatches deletes, inserts and
//! updates as independent per-record calls. The first failure stops the
//! sequence; writes already applied stay applied and are folded back into the
//! draft so the next save sends only the rest. On success the confirmed
//! collection is refetched and edit mode ends.

use std::fmt;
use std::str::FromStr;

use campus_market_core::draft::{AppliedWrite, Draft, DraftError, DraftRecord, FieldChange, SavePlan};
use campus_market_core::guard::{ProductField, ThreatKind, classify};
use campus_market_core::lockdown::DEFAULT_LOCKDOWN_MESSAGE;
use campus_market_core::page::Pagination;
use campus_market_core::realtime::{ChangeEvent, ConfirmedProducts, MergeOutcome};
use campus_market_core::{DraftKey, Product, StatusRecord, StoreId};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{BackendError, RecordStore};
use crate::error::{AppError, add_breadcrumb};
use crate::lockdown::{LockdownGuard, LockdownStore};

/// Reaction to hostile input in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbusePolicy {
    /// Discard the draft and lock the editor.
    #[default]
    Lockdown,
    /// Reject the value and keep editing.
    Warn,
}

impl FromStr for AbusePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lockdown" => Ok(Self::Lockdown),
            "warn" => Ok(Self::Warn),
            other => Err(format!("expected 'lockdown' or 'warn', got '{other}'")),
        }
    }
}

impl fmt::Display for AbusePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lockdown => f.write_str("lockdown"),
            Self::Warn => f.write_str("warn"),
        }
    }
}

/// Generation token taken when a fetch starts.
///
/// A fetch result is only committed while its ticket is current; entering or
/// leaving edit mode, saving and starting another fetch all invalidate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

/// Counts of writes applied by a successful save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub deleted: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl SaveReport {
    fn from_applied(applied: &[AppliedWrite]) -> Self {
        applied.iter().fold(Self::default(), |mut report, write| {
            match write {
                AppliedWrite::Deleted(_) => report.deleted += 1,
                AppliedWrite::Inserted { .. } => report.inserted += 1,
                AppliedWrite::Updated(_) => report.updated += 1,
            }
            report
        })
    }
}

/// Editor for the products of one store.
pub struct EditorSession<B, L> {
    backend: B,
    lockdown: LockdownGuard<L>,
    policy: AbusePolicy,
    store_id: StoreId,
    confirmed: ConfirmedProducts,
    statuses: Vec<StatusRecord>,
    draft: Option<Draft>,
    pagination: Pagination,
    search: Option<String>,
    generation: u64,
}

impl<B, L> fmt::Debug for EditorSession<B, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorSession")
            .field("store_id", &self.store_id)
            .field("policy", &self.policy)
            .field("confirmed", &self.confirmed.len())
            .field("editing", &self.draft.is_some())
            .field("page", &self.pagination.page())
            .finish_non_exhaustive()
    }
}

impl<B: RecordStore, L: LockdownStore> EditorSession<B, L> {
    #[must_use]
    pub fn new(backend: B, lockdown: LockdownGuard<L>, store_id: StoreId) -> Self {
        Self {
            backend,
            lockdown,
            policy: AbusePolicy::default(),
            store_id,
            confirmed: ConfirmedProducts::default(),
            statuses: Vec::new(),
            draft: None,
            pagination: Pagination::default(),
            search: None,
            generation: 0,
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: AbusePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.pagination = Pagination::new(page_size);
        self
    }

    // =========================================================================
    // Views
    // =========================================================================

    #[must_use]
    pub const fn store_id(&self) -> StoreId {
        self.store_id
    }

    #[must_use]
    pub const fn is_editing(&self) -> bool {
        self.draft.is_some()
    }

    /// Confirmed products in display order.
    #[must_use]
    pub fn confirmed(&self) -> &[Product] {
        self.confirmed.as_slice()
    }

    #[must_use]
    pub const fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    #[must_use]
    pub fn statuses(&self) -> &[StatusRecord] {
        &self.statuses
    }

    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref()
    }

    #[must_use]
    pub const fn pagination(&self) -> Pagination {
        self.pagination
    }

    /// Confirmed products on the current page.
    #[must_use]
    pub fn confirmed_page(&self) -> &[Product] {
        self.pagination.slice(self.confirmed.as_slice())
    }

    /// Visible draft records on the current page; empty outside edit mode.
    #[must_use]
    pub fn draft_page(&self) -> Vec<&DraftRecord> {
        let visible: Vec<&DraftRecord> = self
            .draft
            .as_ref()
            .map(|d| d.visible().collect())
            .unwrap_or_default();
        self.pagination.slice(&visible).to_vec()
    }

    /// Number of pages in the current mode.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pagination.page_count(self.row_count())
    }

    pub fn set_page(&mut self, page: usize) {
        let total = self.row_count();
        self.pagination.set_page(page, total);
    }

    /// Full status row of a product, resolving bare ids against the loaded
    /// status list.
    #[must_use]
    pub fn status_of(&self, product: &Product) -> Option<StatusRecord> {
        product.status.as_ref()?.resolve(|id| {
            self.statuses.iter().find(|s| s.id == id).cloned()
        })
    }

    fn row_count(&self) -> usize {
        self.draft
            .as_ref()
            .map_or_else(|| self.confirmed.len(), |d| d.visible().count())
    }

    fn clamp_page(&mut self) {
        self.set_page(self.pagination.page());
    }

    // =========================================================================
    // Lockdown
    // =========================================================================

    /// End of the active lockdown, if any. Releases an elapsed lockdown.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Storage`] if a released entry cannot be cleared.
    pub fn locked_until(&mut self) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self.lockdown.locked_until(Utc::now())?)
    }

    /// Sleep until the active lockdown ends.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Storage`] if the released entry cannot be cleared.
    pub async fn wait_for_release(&mut self) -> Result<(), AppError> {
        Ok(self.lockdown.wait_for_release().await?)
    }

    fn ensure_unlocked(&mut self) -> Result<(), AppError> {
        if let Some(until) = self.lockdown.locked_until(Utc::now())? {
            self.draft = None;
            return Err(AppError::Locked { until });
        }
        Ok(())
    }

    fn handle_abuse(&mut self, field: ProductField, kind: ThreatKind) -> AppError {
        add_breadcrumb(
            "editor",
            "Hostile input rejected",
            Some(&[("field", &field.to_string()), ("kind", &kind.to_string())]),
        );

        match self.policy {
            AbusePolicy::Warn => {
                warn!(%field, %kind, "Hostile input rejected");
                AppError::AbuseDetected { locked_until: None }
            }
            AbusePolicy::Lockdown => {
                self.draft = None;
                self.generation += 1;
                let now = Utc::now();
                match self.lockdown.trigger(now, DEFAULT_LOCKDOWN_MESSAGE) {
                    Ok(until) => {
                        warn!(%field, %kind, %until, "Hostile input, editor locked");
                        AppError::AbuseDetected {
                            locked_until: Some(until),
                        }
                    }
                    Err(e) => {
                        // Still locked in memory; only persistence failed
                        let event_id = sentry::capture_error(&e);
                        error!(
                            error = %e,
                            sentry_event_id = %event_id,
                            "Lockdown could not be persisted"
                        );
                        AppError::AbuseDetected {
                            locked_until: self.lockdown.locked_until(now).ok().flatten(),
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    /// Start a fetch, invalidating every earlier ticket.
    pub const fn begin_fetch(&mut self) -> FetchTicket {
        self.generation += 1;
        FetchTicket(self.generation)
    }

    /// Replace the confirmed collection with a fetch result.
    ///
    /// Returns `false`, leaving the collection untouched, when the ticket is
    /// stale or a draft is open.
    pub fn commit_fetch(&mut self, ticket: FetchTicket, products: Vec<Product>) -> bool {
        if ticket.0 != self.generation || self.draft.is_some() {
            debug!(ticket = ticket.0, current = self.generation, "Dropping stale fetch");
            return false;
        }
        self.confirmed.replace(products);
        self.clamp_page();
        true
    }

    /// Fetch the store's products (and the status list) and commit them.
    ///
    /// Returns whether the result was committed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if either fetch fails.
    #[instrument(skip(self), fields(store_id = %self.store_id))]
    pub async fn load(&mut self) -> Result<bool, AppError> {
        let ticket = self.begin_fetch();
        let products = self
            .backend
            .list_products(self.store_id, self.search.as_deref())
            .await
            .map_err(|e| AppError::from(e).report())?;
        let statuses = self
            .backend
            .list_statuses()
            .await
            .map_err(|e| AppError::from(e).report())?;

        self.statuses = statuses;
        let committed = self.commit_fetch(ticket, products);
        debug!(committed, count = self.confirmed.len(), "Products loaded");
        Ok(committed)
    }

    /// Filter by a name pattern and reload from page 1.
    ///
    /// # Errors
    ///
    /// - [`AppError::AbuseDetected`] for hostile queries (no lockdown)
    /// - [`AppError::Backend`] if the reload fails
    #[instrument(skip(self, query), fields(store_id = %self.store_id))]
    pub async fn search(&mut self, query: &str) -> Result<bool, AppError> {
        if let Some(kind) = classify(query) {
            warn!(%kind, "Hostile search query rejected");
            return Err(AppError::AbuseDetected { locked_until: None });
        }
        let term = query.trim();
        self.search = (!term.is_empty()).then(|| term.to_string());
        self.pagination.reset();
        self.load().await
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Open a draft cloned from the confirmed collection. Does nothing if a
    /// draft is already open.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Locked`] during a lockdown.
    pub fn enter_edit(&mut self) -> Result<(), AppError> {
        self.ensure_unlocked()?;
        if self.draft.is_none() {
            self.generation += 1;
            self.draft = Some(Draft::enter(self.confirmed.as_slice()));
            add_breadcrumb("editor", "Entered edit mode", None);
        }
        Ok(())
    }

    /// Discard the draft. The confirmed collection is not touched.
    pub fn cancel_edit(&mut self) {
        if self.draft.take().is_some() {
            self.generation += 1;
            self.clamp_page();
            add_breadcrumb("editor", "Cancelled edit mode", None);
        }
    }

    /// Apply one field edit to the draft.
    ///
    /// # Errors
    ///
    /// - [`AppError::Locked`] during a lockdown
    /// - [`AppError::NotEditing`] without an open draft
    /// - [`AppError::AbuseDetected`] for hostile input; under
    ///   [`AbusePolicy::Lockdown`] the draft is discarded and the editor locked
    /// - [`AppError::Validation`] for unknown records or unparseable prices
    pub fn edit_field(
        &mut self,
        key: DraftKey,
        field: ProductField,
        value: &str,
    ) -> Result<FieldChange, AppError> {
        self.ensure_unlocked()?;
        let draft = self.draft.as_mut().ok_or(AppError::NotEditing)?;
        match draft.mutate(key, field, value) {
            Ok(change) => Ok(change),
            Err(DraftError::Abuse { field, kind, .. }) => Err(self.handle_abuse(field, kind)),
            Err(e) => Err(AppError::Validation(e.to_string())),
        }
    }

    /// Append an empty record to the draft.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Locked`] or [`AppError::NotEditing`].
    pub fn add_record(&mut self) -> Result<DraftKey, AppError> {
        self.ensure_unlocked()?;
        let store_id = self.store_id;
        let draft = self.draft.as_mut().ok_or(AppError::NotEditing)?;
        Ok(draft.add_record(store_id))
    }

    /// Delete a draft record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Locked`], [`AppError::NotEditing`], or
    /// [`AppError::Validation`] for unknown records.
    pub fn delete_record(&mut self, key: DraftKey) -> Result<(), AppError> {
        self.ensure_unlocked()?;
        let draft = self.draft.as_mut().ok_or(AppError::NotEditing)?;
        draft
            .delete_record(key)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        self.clamp_page();
        Ok(())
    }

    /// Validate and dispatch the draft.
    ///
    /// After the writes succeed the confirmed collection is refetched, the
    /// draft is closed and pagination returns to page 1. If only that refetch
    /// fails, edit mode has already ended and the error is returned.
    ///
    /// # Errors
    ///
    /// - [`AppError::Locked`] / [`AppError::NotEditing`]
    /// - [`AppError::Validation`] or [`AppError::AbuseDetected`] if the
    ///   draft fails re-validation; nothing is sent
    /// - [`AppError::PartialSave`] if a write fails; the draft stays open
    /// - [`AppError::Backend`] if the refetch fails
    #[instrument(skip(self), fields(store_id = %self.store_id))]
    pub async fn save(&mut self) -> Result<SaveReport, AppError> {
        self.ensure_unlocked()?;
        let draft = self.draft.as_ref().ok_or(AppError::NotEditing)?;
        let plan = draft.diff(self.confirmed.as_slice());

        if let Err(e) = plan.validate() {
            return Err(match e {
                DraftError::Abuse { field, kind, .. } => self.handle_abuse(field, kind),
                other => AppError::Validation(other.to_string()),
            });
        }

        self.generation += 1;
        let planned = plan.len();
        let mut applied = Vec::with_capacity(planned);
        let result = dispatch(&self.backend, &plan, &mut applied).await;

        if let Err(source) = result {
            if let Some(draft) = self.draft.as_mut() {
                draft.absorb(&applied);
            }
            return Err(AppError::PartialSave {
                applied: applied.len(),
                planned,
                source,
            }
            .report());
        }

        let report = SaveReport::from_applied(&applied);
        info!(
            deleted = report.deleted,
            inserted = report.inserted,
            updated = report.updated,
            "Draft saved"
        );

        self.draft = None;
        self.pagination.reset();
        self.load().await?;
        Ok(report)
    }

    // =========================================================================
    // Realtime
    // =========================================================================

    /// Merge a pushed change into the confirmed collection.
    ///
    /// Returns `None` without touching anything while a draft is open.
    pub fn apply_remote(&mut self, event: ChangeEvent) -> Option<MergeOutcome> {
        if self.draft.is_some() {
            debug!(kind = ?event.event_type, "Ignoring realtime change while editing");
            return None;
        }
        let outcome = self.confirmed.apply(event);
        self.clamp_page();
        Some(outcome)
    }
}

/// Send the plan's writes in order: deletes, inserts, updates.
///
/// Every write that succeeds is appended to `applied` before the next one is
/// sent.
async fn dispatch<B: RecordStore>(
    backend: &B,
    plan: &SavePlan,
    applied: &mut Vec<AppliedWrite>,
) -> Result<(), BackendError> {
    for id in &plan.to_delete {
        backend.delete_product(*id).await?;
        applied.push(AppliedWrite::Deleted(*id));
    }
    for insert in &plan.to_insert {
        let product = backend.insert_product(&insert.product).await?;
        applied.push(AppliedWrite::Inserted {
            temp_id: insert.temp_id,
            product,
        });
    }
    for update in &plan.to_update {
        let product = backend.update_product(update.id, &update.patch).await?;
        applied.push(AppliedWrite::Updated(product));
    }
    Ok(())
}
