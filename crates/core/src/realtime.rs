//! Realtime change events and the confirmed product collection.
//!
//! The confirmed collection is the backend's view of a store's products. It
//! is replaced wholesale on load and after a save, and otherwise changes only
//! through [`ConfirmedProducts::apply`] while no draft is open. The editor
//! decides whether an event is applied at all; this module only merges.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Product, ProductId};

/// Kind of row change pushed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Primary key of a row before the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldRecord {
    pub id: ProductId,
}

/// A row change pushed over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<Product>,
    #[serde(default)]
    pub old: Option<OldRecord>,
    /// Commit time of the change, when the channel provides it.
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// Id of the affected row.
    #[must_use]
    pub fn record_id(&self) -> Option<ProductId> {
        match self.event_type {
            ChangeKind::Insert | ChangeKind::Update => self
                .new
                .as_ref()
                .map(|p| p.id)
                .or_else(|| self.old.map(|o| o.id)),
            ChangeKind::Delete => self.old.map(|o| o.id).or_else(|| self.new.as_ref().map(|p| p.id)),
        }
    }
}

/// Result of merging one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Removed,
    /// The event referred to nothing that needed changing.
    Unchanged,
    /// An event with a newer commit time was already applied to this row.
    Stale,
    /// The event lacked the row it describes.
    Malformed,
}

/// Confirmed products of one store, kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmedProducts {
    items: Vec<Product>,
    /// Latest commit time applied per row, including deleted rows.
    versions: HashMap<ProductId, DateTime<Utc>>,
}

impl ConfirmedProducts {
    /// Build a collection from fetched rows.
    #[must_use]
    pub fn new(items: Vec<Product>) -> Self {
        let mut confirmed = Self::default();
        confirmed.replace(items);
        confirmed
    }

    /// Replace every row with a fresh fetch.
    pub fn replace(&mut self, items: Vec<Product>) {
        self.items = items;
        self.versions.clear();
        self.sort();
    }

    /// Rows in display order.
    #[must_use]
    pub fn as_slice(&self) -> &[Product] {
        &self.items
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up a row by id.
    #[must_use]
    pub fn get(&self, id: ProductId) -> Option<&Product> {
        self.items.iter().find(|p| p.id == id)
    }

    /// Merge a pushed change.
    ///
    /// When the event carries a commit time older than one already applied to
    /// the same row, it is dropped. Without ordering metadata the last event
    /// received wins.
    pub fn apply(&mut self, event: ChangeEvent) -> MergeOutcome {
        let Some(id) = event.record_id() else {
            return MergeOutcome::Malformed;
        };

        if let (Some(at), Some(last)) = (event.commit_timestamp, self.versions.get(&id))
            && at < *last
        {
            return MergeOutcome::Stale;
        }

        let outcome = match event.event_type {
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(product) = event.new else {
                    return MergeOutcome::Malformed;
                };
                self.upsert(product)
            }
            ChangeKind::Delete => self.remove(id),
        };

        if let Some(at) = event.commit_timestamp {
            self.versions.insert(id, at);
        }
        outcome
    }

    fn upsert(&mut self, product: Product) -> MergeOutcome {
        let outcome = if let Some(existing) = self.items.iter_mut().find(|p| p.id == product.id) {
            if *existing == product {
                return MergeOutcome::Unchanged;
            }
            *existing = product;
            MergeOutcome::Updated
        } else {
            self.items.push(product);
            MergeOutcome::Inserted
        };
        self.sort();
        outcome
    }

    fn remove(&mut self, id: ProductId) -> MergeOutcome {
        let before = self.items.len();
        self.items.retain(|p| p.id != id);
        if self.items.len() == before {
            MergeOutcome::Unchanged
        } else {
            MergeOutcome::Removed
        }
    }

    fn sort(&mut self) {
        self.items.sort_by_cached_key(Product::sort_key);
    }
}
