//! Draft editing model.
//!
//! Entering edit mode clones the confirmed products into a [`Draft`]. Every
//! edit touches only the draft; the confirmed collection stays untouched until
//! a save succeeds and the caller refetches it. [`Draft::diff`] turns the draft
//! into the writes needed to make the backend match it.
//!
//! Invariants:
//! - every persisted record carries the `original` snapshot it was cloned from
//! - a new record that gets deleted is pruned immediately and never reaches
//!   a [`SavePlan`]
//! - `diff` is pure: calling it twice on the same draft yields the same plan

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::guard::field::{
    FieldError, ProductField, check_price, check_text, sanitize_text_input,
};
use crate::guard::injection::{ThreatKind, classify};
use crate::types::{
    DraftKey, NewProduct, Price, Product, ProductId, ProductPatch, ProductStatusRef, StoreId,
    TempId,
};

/// Errors raised while editing or validating a draft.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    /// No editable record has this key.
    #[error("no draft record with key {0}")]
    UnknownRecord(DraftKey),

    /// A field value was rejected.
    #[error("record {key}: {source}")]
    Field {
        key: DraftKey,
        #[source]
        source: FieldError,
    },

    /// A field value matched a hostile pattern.
    #[error("record {key}: hostile {kind} input in {field}")]
    Abuse {
        key: DraftKey,
        field: ProductField,
        kind: ThreatKind,
    },
}

impl DraftError {
    /// Returns `true` if this error must abort the edit session.
    #[must_use]
    pub const fn is_abuse(&self) -> bool {
        matches!(self, Self::Abuse { .. })
    }

    fn from_field(key: DraftKey, source: FieldError) -> Self {
        match source {
            FieldError::Hostile { field, kind } => Self::Abuse { key, field, kind },
            source => Self::Field { key, source },
        }
    }
}

/// Outcome of an accepted [`Draft::mutate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldChange {
    Applied,
    /// The value was cut down to `max` characters.
    Truncated { max: usize },
}

/// Editable copy of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRecord {
    pub key: DraftKey,
    pub store_id: StoreId,
    pub name: String,
    pub price: Option<Price>,
    pub brand: Option<String>,
    pub status: Option<ProductStatusRef>,
    pub created_at: Option<DateTime<Utc>>,
    pub archived: bool,
    pub is_deleted: bool,
    /// Snapshot of the confirmed record this draft was cloned from.
    pub original: Option<Product>,
}

impl DraftRecord {
    fn from_confirmed(product: &Product) -> Self {
        Self {
            key: DraftKey::Persisted(product.id),
            store_id: product.store_id,
            name: product.name.clone(),
            price: product.price,
            brand: product.brand.clone(),
            status: product.status.clone(),
            created_at: Some(product.created_at),
            archived: product.archived,
            is_deleted: false,
            original: Some(product.clone()),
        }
    }

    fn new_temp(store_id: StoreId) -> Self {
        Self {
            key: DraftKey::Temp(TempId::generate()),
            store_id,
            name: String::new(),
            price: None,
            brand: None,
            status: None,
            created_at: None,
            archived: false,
            is_deleted: false,
            original: None,
        }
    }

    /// Whether the record has no backend id yet.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.key.is_temp()
    }

    /// Whether name, brand or price differ from the original snapshot.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.original.as_ref().is_some_and(|original| {
            original.name != self.name
                || original.brand != self.brand
                || original.price != self.price
        })
    }

    fn patch(&self) -> ProductPatch {
        ProductPatch {
            name: self.name.clone(),
            price: self.price,
            brand: self.brand.clone(),
        }
    }

    fn new_product(&self) -> NewProduct {
        NewProduct {
            store_id: self.store_id,
            name: self.name.clone(),
            price: self.price,
            brand: self.brand.clone(),
        }
    }
}

/// An insert waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInsert {
    pub temp_id: TempId,
    pub product: NewProduct,
}

/// An update waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub id: ProductId,
    pub patch: ProductPatch,
}

/// The writes that make the backend match a draft.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavePlan {
    pub to_delete: Vec<ProductId>,
    pub to_insert: Vec<PendingInsert>,
    pub to_update: Vec<PendingUpdate>,
}

impl SavePlan {
    /// Whether the plan contains no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_insert.is_empty() && self.to_update.is_empty()
    }

    /// Total number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_delete.len() + self.to_insert.len() + self.to_update.len()
    }

    /// Re-check every insert and update right before dispatch.
    ///
    /// Keystroke checks can be bypassed by state that changed in between, so
    /// the final values are validated again with the strict rules: names are
    /// required, over-long values are rejected rather than truncated.
    ///
    /// # Errors
    ///
    /// Returns the first violation found; hostile content is reported as
    /// [`DraftError::Abuse`].
    pub fn validate(&self) -> Result<(), DraftError> {
        for insert in &self.to_insert {
            let key = DraftKey::Temp(insert.temp_id);
            check_values(
                key,
                &insert.product.name,
                insert.product.brand.as_deref(),
                insert.product.price.as_ref(),
            )?;
        }
        for update in &self.to_update {
            let key = DraftKey::Persisted(update.id);
            check_values(
                key,
                &update.patch.name,
                update.patch.brand.as_deref(),
                update.patch.price.as_ref(),
            )?;
        }
        Ok(())
    }
}

fn check_values(
    key: DraftKey,
    name: &str,
    brand: Option<&str>,
    price: Option<&Price>,
) -> Result<(), DraftError> {
    check_text(ProductField::Name, name, true).map_err(|e| DraftError::from_field(key, e))?;
    if let Some(brand) = brand {
        check_text(ProductField::Brand, brand, false)
            .map_err(|e| DraftError::from_field(key, e))?;
    }
    check_price(price).map_err(|e| DraftError::from_field(key, e))
}

/// A write that reached the backend, fed back with [`Draft::absorb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedWrite {
    Deleted(ProductId),
    Inserted { temp_id: TempId, product: Product },
    Updated(Product),
}

/// Editable copy of the confirmed product collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    records: Vec<DraftRecord>,
    /// Ids deleted by a partially applied save.
    retired: BTreeSet<ProductId>,
}

impl Draft {
    /// Deep-clone the confirmed collection into a new draft.
    #[must_use]
    pub fn enter(confirmed: &[Product]) -> Self {
        Self {
            records: confirmed.iter().map(DraftRecord::from_confirmed).collect(),
            retired: BTreeSet::new(),
        }
    }

    /// All records, including those marked deleted.
    #[must_use]
    pub fn records(&self) -> &[DraftRecord] {
        &self.records
    }

    /// Records still shown in the editor.
    pub fn visible(&self) -> impl Iterator<Item = &DraftRecord> {
        self.records.iter().filter(|r| !r.is_deleted)
    }

    /// Look up a record by key.
    #[must_use]
    pub fn get(&self, key: DraftKey) -> Option<&DraftRecord> {
        self.records.iter().find(|r| r.key == key)
    }

    fn get_mut_editable(&mut self, key: DraftKey) -> Result<&mut DraftRecord, DraftError> {
        self.records
            .iter_mut()
            .find(|r| r.key == key && !r.is_deleted)
            .ok_or(DraftError::UnknownRecord(key))
    }

    /// Apply a single field edit.
    ///
    /// Text fields over their cap are truncated. Invalid prices leave the
    /// record unchanged.
    ///
    /// # Errors
    ///
    /// - [`DraftError::UnknownRecord`] if the key is missing or deleted
    /// - [`DraftError::Abuse`] if the value matches a hostile pattern
    /// - [`DraftError::Field`] if the price does not parse
    pub fn mutate(
        &mut self,
        key: DraftKey,
        field: ProductField,
        value: &str,
    ) -> Result<FieldChange, DraftError> {
        let record = self.get_mut_editable(key)?;

        match field {
            ProductField::Name | ProductField::Brand => {
                let accepted =
                    sanitize_text_input(field, value).map_err(|e| DraftError::from_field(key, e))?;
                let change = match (accepted.truncated, field.max_chars()) {
                    (true, Some(max)) => FieldChange::Truncated { max },
                    _ => FieldChange::Applied,
                };
                if field == ProductField::Name {
                    record.name = accepted.value;
                } else {
                    record.brand = (!accepted.value.is_empty()).then_some(accepted.value);
                }
                Ok(change)
            }
            ProductField::Price => {
                if let Some(kind) = classify(value) {
                    return Err(DraftError::Abuse { key, field, kind });
                }
                record.price = Price::parse_input(value)
                    .map_err(|e| DraftError::from_field(key, FieldError::Price(e)))?;
                Ok(FieldChange::Applied)
            }
        }
    }

    /// Append an empty record with a temporary id.
    pub fn add_record(&mut self, store_id: StoreId) -> DraftKey {
        let record = DraftRecord::new_temp(store_id);
        let key = record.key;
        self.records.push(record);
        key
    }

    /// Delete a record: new records are removed, persisted ones are marked.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::UnknownRecord`] if the key is missing or already
    /// deleted.
    pub fn delete_record(&mut self, key: DraftKey) -> Result<(), DraftError> {
        let record = self.get_mut_editable(key)?;
        if record.is_new() {
            self.records.retain(|r| r.key != key);
        } else {
            record.is_deleted = true;
        }
        Ok(())
    }

    /// Compute the writes that make the backend match this draft.
    ///
    /// - deletes: confirmed ids absent from the draft or marked deleted, plus
    ///   persisted draft records marked deleted
    /// - inserts: new records not marked deleted
    /// - updates: persisted records whose name, brand or price changed
    #[must_use]
    pub fn diff(&self, confirmed: &[Product]) -> SavePlan {
        let live: HashSet<ProductId> = self
            .records
            .iter()
            .filter(|r| !r.is_deleted)
            .filter_map(|r| r.key.product_id())
            .collect();

        let mut to_delete: BTreeSet<ProductId> = confirmed
            .iter()
            .map(|p| p.id)
            .filter(|id| !live.contains(id))
            .collect();
        to_delete.extend(
            self.records
                .iter()
                .filter(|r| r.is_deleted)
                .filter_map(|r| r.key.product_id()),
        );
        for id in &self.retired {
            to_delete.remove(id);
        }

        let to_insert = self
            .records
            .iter()
            .filter(|r| !r.is_deleted)
            .filter_map(|r| match r.key {
                DraftKey::Temp(temp_id) => Some(PendingInsert {
                    temp_id,
                    product: r.new_product(),
                }),
                DraftKey::Persisted(_) => None,
            })
            .collect();

        let to_update = self
            .records
            .iter()
            .filter(|r| !r.is_deleted && r.is_changed())
            .filter_map(|r| {
                r.key.product_id().map(|id| PendingUpdate {
                    id,
                    patch: r.patch(),
                })
            })
            .collect();

        SavePlan {
            to_delete: to_delete.into_iter().collect(),
            to_insert,
            to_update,
        }
    }

    /// Fold writes that already reached the backend back into the draft, so a
    /// retried save dispatches only what is still missing.
    pub fn absorb(&mut self, applied: &[AppliedWrite]) {
        for write in applied {
            match write {
                AppliedWrite::Deleted(id) => {
                    self.records.retain(|r| r.key != DraftKey::Persisted(*id));
                    self.retired.insert(*id);
                }
                AppliedWrite::Inserted { temp_id, product } => {
                    if let Some(record) = self
                        .records
                        .iter_mut()
                        .find(|r| r.key == DraftKey::Temp(*temp_id))
                    {
                        record.key = DraftKey::Persisted(product.id);
                        record.created_at = Some(product.created_at);
                        record.original = Some(product.clone());
                    }
                }
                AppliedWrite::Updated(product) => {
                    if let Some(record) = self
                        .records
                        .iter_mut()
                        .find(|r| r.key == DraftKey::Persisted(product.id))
                    {
                        record.original = Some(product.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn product(id: i64, name: &str) -> Product {
        Product {
            id: ProductId::new(id),
            store_id: StoreId::new(1),
            name: name.to_string(),
            price: Price::parse_input("1.00").unwrap(),
            brand: Some("Campus".to_string()),
            status: None,
            created_at: Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap(),
            archived: false,
        }
    }

    fn confirmed() -> Vec<Product> {
        vec![product(1, "Eraser"), product(2, "Notebook"), product(3, "Pencil")]
    }

    fn key(id: i64) -> DraftKey {
        DraftKey::Persisted(ProductId::new(id))
    }

    #[test]
    fn test_enter_snapshots_originals() {
        let draft = Draft::enter(&confirmed());
        assert_eq!(draft.records().len(), 3);
        for (record, product) in draft.records().iter().zip(confirmed()) {
            assert_eq!(record.original.as_ref(), Some(&product));
            assert!(!record.is_new());
            assert!(!record.is_changed());
        }
    }

    #[test]
    fn test_unchanged_draft_diff_is_empty_and_idempotent() {
        let confirmed = confirmed();
        let draft = Draft::enter(&confirmed);
        let first = draft.diff(&confirmed);
        let second = draft.diff(&confirmed);
        assert!(first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_edited_draft_diff_is_idempotent() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        draft.mutate(key(1), ProductField::Name, "Big Eraser").unwrap();
        draft.delete_record(key(2)).unwrap();
        let new_key = draft.add_record(StoreId::new(1));
        draft.mutate(new_key, ProductField::Name, "Ruler").unwrap();

        assert_eq!(draft.diff(&confirmed), draft.diff(&confirmed));
    }

    #[test]
    fn test_mutate_truncates_long_name() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        let change = draft
            .mutate(key(1), ProductField::Name, &"A".repeat(31))
            .unwrap();
        assert_eq!(change, FieldChange::Truncated { max: 30 });
        assert_eq!(draft.get(key(1)).unwrap().name, "A".repeat(30));
    }

    #[test]
    fn test_mutate_hostile_is_abuse() {
        let mut draft = Draft::enter(&confirmed());
        let err = draft
            .mutate(key(1), ProductField::Brand, "<script>x</script>")
            .unwrap_err();
        assert!(err.is_abuse());
        assert_eq!(draft.get(key(1)).unwrap().brand.as_deref(), Some("Campus"));

        let err = draft
            .mutate(key(1), ProductField::Price, "1; DROP TABLE products")
            .unwrap_err();
        assert!(err.is_abuse());
    }

    #[test]
    fn test_mutate_price() {
        let mut draft = Draft::enter(&confirmed());
        draft.mutate(key(2), ProductField::Price, "3.75").unwrap();
        assert_eq!(
            draft.get(key(2)).unwrap().price,
            Price::parse_input("3.75").unwrap()
        );

        draft.mutate(key(2), ProductField::Price, "").unwrap();
        assert_eq!(draft.get(key(2)).unwrap().price, None);

        let err = draft.mutate(key(2), ProductField::Price, "-2").unwrap_err();
        assert!(matches!(err, DraftError::Field { .. }));
        assert_eq!(draft.get(key(2)).unwrap().price, None);
    }

    #[test]
    fn test_mutate_empty_brand_clears_it() {
        let mut draft = Draft::enter(&confirmed());
        draft.mutate(key(3), ProductField::Brand, "").unwrap();
        assert_eq!(draft.get(key(3)).unwrap().brand, None);
    }

    #[test]
    fn test_mutate_unknown_or_deleted_record() {
        let mut draft = Draft::enter(&confirmed());
        assert_eq!(
            draft.mutate(key(99), ProductField::Name, "x"),
            Err(DraftError::UnknownRecord(key(99)))
        );
        draft.delete_record(key(1)).unwrap();
        assert_eq!(
            draft.mutate(key(1), ProductField::Name, "x"),
            Err(DraftError::UnknownRecord(key(1)))
        );
    }

    #[test]
    fn test_new_then_deleted_record_is_pruned() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        let new_key = draft.add_record(StoreId::new(1));
        assert!(draft.get(new_key).unwrap().is_new());

        draft.delete_record(new_key).unwrap();
        assert!(draft.get(new_key).is_none());
        assert!(draft.diff(&confirmed).is_empty());
    }

    #[test]
    fn test_deleted_persisted_record_is_kept_for_diff() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        draft.delete_record(key(2)).unwrap();

        assert!(draft.get(key(2)).unwrap().is_deleted);
        assert_eq!(draft.visible().count(), 2);
        assert_eq!(draft.diff(&confirmed).to_delete, vec![ProductId::new(2)]);
    }

    #[test]
    fn test_diff_buckets() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        draft.mutate(key(1), ProductField::Name, "Pink Eraser").unwrap();
        draft.delete_record(key(3)).unwrap();
        let new_key = draft.add_record(StoreId::new(1));
        draft.mutate(new_key, ProductField::Name, "Stapler").unwrap();
        draft.mutate(new_key, ProductField::Price, "6").unwrap();

        let plan = draft.diff(&confirmed);
        assert_eq!(plan.to_delete, vec![ProductId::new(3)]);
        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.to_insert[0].product.name, "Stapler");
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].id, ProductId::new(1));
        assert_eq!(plan.to_update[0].patch.name, "Pink Eraser");
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_edit_back_to_original_is_not_an_update() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        draft.mutate(key(1), ProductField::Name, "Other").unwrap();
        draft.mutate(key(1), ProductField::Name, "Eraser").unwrap();
        assert!(draft.diff(&confirmed).is_empty());
    }

    #[test]
    fn test_record_missing_from_draft_is_deleted() {
        let confirmed = confirmed();
        let draft = Draft::enter(&confirmed[..2]);
        assert_eq!(draft.diff(&confirmed).to_delete, vec![ProductId::new(3)]);
    }

    #[test]
    fn test_validate_rejects_long_or_empty_names() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        draft.records[0].name = "A".repeat(31);
        let err = draft.diff(&confirmed).validate().unwrap_err();
        assert!(matches!(
            err,
            DraftError::Field {
                source: FieldError::TooLong { max: 30, .. },
                ..
            }
        ));

        let mut draft = Draft::enter(&confirmed);
        draft.add_record(StoreId::new(1));
        let err = draft.diff(&confirmed).validate().unwrap_err();
        assert!(matches!(
            err,
            DraftError::Field {
                source: FieldError::Required { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_validate_flags_hostile_state() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        draft.records[1].brand = Some("' OR '".to_string());
        assert!(draft.diff(&confirmed).validate().unwrap_err().is_abuse());
    }

    #[test]
    fn test_absorb_partial_save() {
        let confirmed = confirmed();
        let mut draft = Draft::enter(&confirmed);
        draft.delete_record(key(1)).unwrap();
        draft.mutate(key(2), ProductField::Name, "Notepad").unwrap();
        let new_key = draft.add_record(StoreId::new(1));
        draft.mutate(new_key, ProductField::Name, "Glue").unwrap();
        let DraftKey::Temp(temp_id) = new_key else {
            panic!("expected temp key");
        };

        let mut inserted = product(10, "Glue");
        inserted.price = None;
        inserted.brand = None;
        draft.absorb(&[
            AppliedWrite::Deleted(ProductId::new(1)),
            AppliedWrite::Inserted {
                temp_id,
                product: inserted,
            },
        ]);

        let plan = draft.diff(&confirmed);
        assert!(plan.to_delete.is_empty());
        assert!(plan.to_insert.is_empty());
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].id, ProductId::new(2));
        assert!(draft.get(key(10)).is_some());
    }
}
