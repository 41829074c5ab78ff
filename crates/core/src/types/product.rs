//! Store product records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ProductId, StoreId};
use super::price::Price;
use super::status::ProductStatusRef;

/// A product row as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub store_id: StoreId,
    pub name: String,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub status: Option<ProductStatusRef>,
    #[serde(rename = "datecreated")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
}

impl Product {
    /// Sort key used for every product listing: case-insensitive name, then id.
    #[must_use]
    pub fn sort_key(&self) -> (String, ProductId) {
        (self.name.to_lowercase(), self.id)
    }
}

/// Insert payload for a product that has no backend id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub store_id: StoreId,
    pub name: String,
    pub price: Option<Price>,
    pub brand: Option<String>,
}

/// Update payload carrying the user-editable columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub name: String,
    pub price: Option<Price>,
    pub brand: Option<String>,
}
