//! Backend-as-a-service collaborators.
//!
//! # Architecture
//!
//! - [`RecordStore`] - product and status rows (`PostgREST`)
//! - [`AuthProvider`] - email/password and OAuth sign-in (`GoTrue`)
//! - [`ChangeFeed`] - pushed row changes (Phoenix realtime channel)
//!
//! [`SupabaseClient`] implements the first two over `reqwest`, [`RealtimeFeed`]
//! the third over `tokio-tungstenite`. With the `test-util` feature,
//! `MemoryBackend` implements all three in-process.
//!
//! No call is retried. Failures surface to the caller as [`BackendError`].

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod realtime;
pub mod rest;

use std::fmt;
use std::future::Future;

use campus_market_core::realtime::ChangeEvent;
use campus_market_core::{
    Credentials, Email, NewProduct, Product, ProductId, ProductPatch, StatusRecord, StoreId,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

pub use realtime::RealtimeFeed;
pub use rest::SupabaseClient;

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("Backend returned {status}: {message}")]
    Api { status: u16, message: String },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A row expected in the response is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Sign-in was refused.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The call needs a signed-in user.
    #[error("No active session")]
    NoSession,

    /// Realtime socket failure.
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// The configured base URL cannot be joined with an endpoint path.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<tokio_tungstenite::tungstenite::Error> for BackendError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Realtime(err.to_string())
    }
}

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session.
///
/// Implements `Debug` manually to redact tokens.
#[derive(Clone)]
pub struct Session {
    pub user: AuthUser,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the access token has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a sign-up call.
#[derive(Debug, Clone)]
pub enum SignUpOutcome {
    /// The account is active and signed in.
    SignedIn(Session),
    /// The account must be confirmed by email before signing in.
    ConfirmationRequired(AuthUser),
}

/// Third-party sign-in providers enabled for the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Github,
    Azure,
}

impl OAuthProvider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
            Self::Azure => "azure",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product and status rows.
pub trait RecordStore: Send + Sync {
    /// Products of a store, optionally filtered by a case-insensitive name
    /// pattern.
    fn list_products(
        &self,
        store_id: StoreId,
        search: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Product>, BackendError>> + Send;

    /// Every product status.
    fn list_statuses(&self) -> impl Future<Output = Result<Vec<StatusRecord>, BackendError>> + Send;

    /// Insert a product and return the stored row.
    fn insert_product(
        &self,
        product: &NewProduct,
    ) -> impl Future<Output = Result<Product, BackendError>> + Send;

    /// Update the editable columns of a product and return the stored row.
    fn update_product(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> impl Future<Output = Result<Product, BackendError>> + Send;

    /// Delete a product.
    fn delete_product(&self, id: ProductId)
    -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Account and session calls.
pub trait AuthProvider: Send + Sync {
    fn sign_up(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<SignUpOutcome, BackendError>> + Send;

    fn sign_in(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Session, BackendError>> + Send;

    /// URL the user is sent to for a third-party sign-in.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Url`] if the URL cannot be built.
    fn authorize_url(&self, provider: OAuthProvider, redirect_to: &Url)
    -> Result<Url, BackendError>;

    /// Send a password reset email.
    fn reset_password(&self, email: &Email)
    -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Revoke a session.
    fn sign_out(&self, session: &Session) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Pushed row changes.
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to product changes of one store. The receiver closes when the
    /// channel drops.
    fn subscribe(
        &self,
        store_id: StoreId,
    ) -> impl Future<Output = Result<mpsc::Receiver<ChangeEvent>, BackendError>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = Session {
            user: AuthUser {
                id: Uuid::nil(),
                email: Some("student@gmail.com".to_string()),
            },
            access_token: SecretString::from("eyJhbGciOiJIUzI1NiJ9.access"),
            refresh_token: Some(SecretString::from("refresh-token-value")),
            expires_at: Utc::now(),
        };

        let debug_output = format!("{session:?}");
        assert!(debug_output.contains("student@gmail.com"));
        assert!(!debug_output.contains("eyJhbGciOiJIUzI1NiJ9"));
        assert!(!debug_output.contains("refresh-token-value"));
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(OAuthProvider::Google.to_string(), "google");
        assert_eq!(OAuthProvider::Azure.as_str(), "azure");
    }
}
