//! Product status references.
//!
//! Backend rows carry a product's status either as a bare foreign key or, when
//! the query embeds the related row, as the full status object. Both shapes
//! deserialize into [`ProductStatusRef`] and are narrowed explicitly.

use serde::{Deserialize, Serialize};

use super::id::StatusId;

/// A row of the `product_statuses` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: StatusId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Reference from a product to its status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductStatusRef {
    /// Foreign key only.
    Id(StatusId),
    /// Embedded status row.
    Inline(StatusRecord),
}

impl ProductStatusRef {
    /// The referenced status id, whichever shape the reference has.
    #[must_use]
    pub const fn id(&self) -> StatusId {
        match self {
            Self::Id(id) => *id,
            Self::Inline(record) => record.id,
        }
    }

    /// The embedded status row, if present.
    #[must_use]
    pub const fn as_inline(&self) -> Option<&StatusRecord> {
        match self {
            Self::Id(_) => None,
            Self::Inline(record) => Some(record),
        }
    }

    /// Narrow to a full status row, looking up bare ids with `lookup`.
    pub fn resolve<F>(&self, lookup: F) -> Option<StatusRecord>
    where
        F: FnOnce(StatusId) -> Option<StatusRecord>,
    {
        match self {
            Self::Id(id) => lookup(*id),
            Self::Inline(record) => Some(record.clone()),
        }
    }
}

impl From<StatusId> for ProductStatusRef {
    fn from(id: StatusId) -> Self {
        Self::Id(id)
    }
}

impl From<StatusRecord> for ProductStatusRef {
    fn from(record: StatusRecord) -> Self {
        Self::Inline(record)
    }
}
