//! Per-field validation for editable product columns.

use std::fmt;

use super::injection::{ThreatKind, classify};
use crate::types::{Price, PriceError};

/// Maximum length of a product name, in characters.
pub const NAME_MAX_CHARS: usize = 30;

/// Maximum length of a product brand, in characters.
pub const BRAND_MAX_CHARS: usize = 30;

/// User-editable product column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductField {
    Name,
    Brand,
    Price,
}

impl ProductField {
    /// Character cap for text fields; `None` for price.
    #[must_use]
    pub const fn max_chars(self) -> Option<usize> {
        match self {
            Self::Name => Some(NAME_MAX_CHARS),
            Self::Brand => Some(BRAND_MAX_CHARS),
            Self::Price => None,
        }
    }
}

impl fmt::Display for ProductField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Name => "name",
            Self::Brand => "brand",
            Self::Price => "price",
        };
        f.write_str(name)
    }
}

/// Validation failure for a single field.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// A required field is empty.
    #[error("{field} is required")]
    Required { field: ProductField },

    /// A text field exceeds its character cap.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: ProductField, max: usize },

    /// A text field matched a hostile pattern.
    #[error("{field} contains disallowed content")]
    Hostile { field: ProductField, kind: ThreatKind },

    /// The price field does not hold a non-negative number.
    #[error("invalid price: {0}")]
    Price(#[from] PriceError),
}

impl FieldError {
    /// Returns `true` for errors that count as abuse rather than a typo.
    #[must_use]
    pub const fn is_hostile(&self) -> bool {
        matches!(self, Self::Hostile { .. })
    }
}

/// A text value accepted by [`sanitize_text_input`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInput {
    pub value: String,
    /// Whether the value was cut down to the field's cap.
    pub truncated: bool,
}

/// Check a keystroke-level text edit.
///
/// The whole input is scanned for hostile content first; an accepted value is
/// then truncated to the field's cap instead of rejected. The stored value is
/// scanned again, since cutting a word can leave a blocklisted token (e.g.
/// "selection" becoming "select"); trailing words are dropped until it passes
/// the same check applied at save.
///
/// # Errors
///
/// Returns [`FieldError::Hostile`] if the input matches a hostile pattern, or
/// [`FieldError::TooLong`] if no clean prefix fits the cap.
pub fn sanitize_text_input(field: ProductField, input: &str) -> Result<TextInput, FieldError> {
    if let Some(kind) = classify(input) {
        return Err(FieldError::Hostile { field, kind });
    }

    let Some(max) = field.max_chars() else {
        return Ok(TextInput {
            value: input.to_owned(),
            truncated: false,
        });
    };

    let (value, truncated) = truncate_chars(input, max);
    if !truncated {
        return Ok(TextInput { value, truncated });
    }

    let mut value = value.as_str();
    while classify(value).is_some() {
        value = match value.trim_end().rfind(char::is_whitespace) {
            Some(idx) => value.get(..idx).unwrap_or_default().trim_end(),
            None => return Err(FieldError::TooLong { field, max }),
        };
    }

    Ok(TextInput {
        value: value.to_owned(),
        truncated,
    })
}

/// Check a text value immediately before it is written.
///
/// Unlike [`sanitize_text_input`], over-long values are rejected.
///
/// # Errors
///
/// Returns the first rule the value breaks.
pub fn check_text(field: ProductField, value: &str, required: bool) -> Result<(), FieldError> {
    if required && value.trim().is_empty() {
        return Err(FieldError::Required { field });
    }

    if let Some(max) = field.max_chars()
        && value.chars().count() > max
    {
        return Err(FieldError::TooLong { field, max });
    }

    if let Some(kind) = classify(value) {
        return Err(FieldError::Hostile { field, kind });
    }

    Ok(())
}

/// Check a product name before it is written. Names are required.
///
/// # Errors
///
/// See [`check_text`].
pub fn validate_name(value: &str) -> Result<(), FieldError> {
    check_text(ProductField::Name, value, true)
}

/// Check a product brand before it is written. Brands may be empty.
///
/// # Errors
///
/// See [`check_text`].
pub fn validate_brand(value: &str) -> Result<(), FieldError> {
    check_text(ProductField::Brand, value, false)
}

/// Check a price value immediately before it is written.
///
/// # Errors
///
/// Returns [`FieldError::Price`] for negative amounts.
pub fn check_price(price: Option<&Price>) -> Result<(), FieldError> {
    match price {
        Some(price) if price.amount().is_sign_negative() && !price.amount().is_zero() => {
            Err(FieldError::Price(PriceError::Negative))
        }
        _ => Ok(()),
    }
}

fn truncate_chars(input: &str, max: usize) -> (String, bool) {
    match input.char_indices().nth(max) {
        Some((byte_idx, _)) => (input.get(..byte_idx).unwrap_or(input).to_owned(), true),
        None => (input.to_owned(), false),
    }
}
