//! Sign-in credential types.
//!
//! Credentials are transient: they exist only for the duration of a single
//! auth call and are never serialized or logged.

use core::fmt;

use super::email::{Email, EmailError};

/// Errors that can occur when validating a [`Password`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    /// The password is shorter than the minimum length.
    #[error("password must be at least {min} characters")]
    TooShort {
        /// Minimum allowed length.
        min: usize,
    },
    /// The password is longer than the maximum length.
    #[error("password must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The confirmation field does not match.
    #[error("passwords do not match")]
    Mismatch,
}

/// A password whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// Minimum password length accepted by the auth provider.
    pub const MIN_LENGTH: usize = 6;
    /// Maximum password length (bcrypt input limit).
    pub const MAX_LENGTH: usize = 72;

    /// Validate a password.
    ///
    /// # Errors
    ///
    /// Returns an error if the password is outside the accepted length range.
    pub fn parse(s: &str) -> Result<Self, PasswordError> {
        let len = s.chars().count();
        if len < Self::MIN_LENGTH {
            return Err(PasswordError::TooShort {
                min: Self::MIN_LENGTH,
            });
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(PasswordError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self(s.to_owned()))
    }

    /// Validate a password together with its confirmation field.
    ///
    /// # Errors
    ///
    /// Returns [`PasswordError::Mismatch`] if the fields differ, otherwise the
    /// errors of [`Password::parse`].
    pub fn parse_confirmed(password: &str, confirm: &str) -> Result<Self, PasswordError> {
        if password != confirm {
            return Err(PasswordError::Mismatch);
        }
        Self::parse(password)
    }

    /// Expose the raw password for the auth call.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// Validated email/password pair for a sign-up or sign-in call.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: Email,
    pub password: Password,
}

impl Credentials {
    /// Create credentials from already validated parts.
    #[must_use]
    pub const fn new(email: Email, password: Password) -> Self {
        Self { email, password }
    }

    /// Parse raw form input, checking the email before the password.
    ///
    /// # Errors
    ///
    /// Returns the first field error encountered.
    pub fn parse(email: &str, password: &str) -> Result<Self, CredentialsError> {
        let email = Email::parse(email)?;
        let password = Password::parse(password)?;
        Ok(Self { email, password })
    }
}

/// Field-level error for [`Credentials::parse`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    #[error(transparent)]
    Email(#[from] EmailError),
    #[error(transparent)]
    Password(#[from] PasswordError),
}
