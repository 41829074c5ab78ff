//! Unified error handling with Sentry integration.
//!
//! Every public operation of the client returns `Result<T, AppError>`. Backend
//! and storage failures are captured to Sentry through [`AppError::report`];
//! [`AppError::user_message`] is the only text meant for end users.

use campus_market_core::guard::FieldError;
use campus_market_core::{CredentialsError, EmailError, PasswordError, PriceError};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::lockdown::LockdownStoreError;

/// Application-level error type for the client.
#[derive(Debug, Error)]
pub enum AppError {
    /// Input failed validation; the user can correct it and retry.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Input matched a hostile pattern.
    ///
    /// `locked_until` is set when the input also put the editor in lockdown.
    #[error("Suspicious input rejected")]
    AbuseDetected { locked_until: Option<DateTime<Utc>> },

    /// The editor is locked.
    #[error("Editing is locked until {until}")]
    Locked { until: DateTime<Utc> },

    /// A draft operation was called outside edit mode.
    #[error("Not in edit mode")]
    NotEditing,

    /// The operation needs a signed-in user.
    #[error("Not signed in")]
    Unauthenticated,

    /// Backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A save stopped part-way. Writes already applied are kept.
    #[error("Save stopped after {applied} of {planned} writes: {source}")]
    PartialSave {
        applied: usize,
        planned: usize,
        #[source]
        source: BackendError,
    },

    /// Lockdown state could not be read or written.
    #[error("Lockdown storage error: {0}")]
    Storage(#[from] LockdownStoreError),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AppError {
    /// Log the error and capture failures of external systems to Sentry.
    ///
    /// Returns `self` so it can be used inside `map_err`.
    #[must_use]
    pub fn report(self) -> Self {
        if matches!(
            self,
            Self::Backend(_) | Self::PartialSave { .. } | Self::Storage(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Operation failed"
            );
        }
        self
    }

    /// Message safe to show to the user.
    ///
    /// Backend details are never exposed.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::AbuseDetected {
                locked_until: Some(until),
            } => format!(
                "Suspicious input detected. Editing is disabled until {}.",
                until.format("%H:%M:%S UTC")
            ),
            Self::AbuseDetected { locked_until: None } => {
                "That input is not allowed.".to_string()
            }
            Self::Locked { until } => format!(
                "Editing is disabled until {}.",
                until.format("%H:%M:%S UTC")
            ),
            Self::NotEditing => "Start editing first.".to_string(),
            Self::Unauthenticated => "Please sign in.".to_string(),
            Self::Backend(BackendError::InvalidCredentials) => {
                "Invalid email or password".to_string()
            }
            Self::Backend(_) => "The store service is unavailable. Please try again.".to_string(),
            Self::PartialSave { .. } => {
                "Some changes were saved, others were not. Review and save again.".to_string()
            }
            Self::Storage(_) | Self::Config(_) => "Internal error".to_string(),
        }
    }

    /// Whether the error was caused by hostile input or an active lockdown.
    #[must_use]
    pub const fn is_abuse(&self) -> bool {
        matches!(self, Self::AbuseDetected { .. } | Self::Locked { .. })
    }
}

impl From<FieldError> for AppError {
    fn from(err: FieldError) -> Self {
        if err.is_hostile() {
            Self::AbuseDetected { locked_until: None }
        } else {
            Self::Validation(err.to_string())
        }
    }
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<CredentialsError> for AppError {
    fn from(err: CredentialsError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<PriceError> for AppError {
    fn from(err: PriceError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context.
///
/// Call this after a successful sign-in to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
