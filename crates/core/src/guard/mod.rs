//! Input guards for user-editable text.
//!
//! Two layers:
//! - [`injection`] - heuristic blocklists for SQL and markup/script payloads
//! - [`field`] - per-field rules for product names, brands and prices
//!
//! These checks run in the client and are a deterrent only. The backend
//! validates every write on its own.

pub mod field;
pub mod injection;

pub use field::{
    FieldError, ProductField, TextInput, check_price, check_text, sanitize_text_input,
    validate_brand, validate_name,
};
pub use injection::{ThreatKind, check_for_malicious_input, classify, detect_injection};
