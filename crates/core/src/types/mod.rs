//! Core types for Campus Market.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod credential;
pub mod email;
pub mod id;
pub mod price;
pub mod product;
pub mod status;

pub use credential::{Credentials, CredentialsError, Password, PasswordError};
pub use email::{Email, EmailError, is_valid_email};
pub use id::*;
pub use price::{Price, PriceError};
pub use product::{NewProduct, Product, ProductPatch};
pub use status::{ProductStatusRef, StatusRecord};
