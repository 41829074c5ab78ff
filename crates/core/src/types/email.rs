//! Email address type.

use core::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Well-known mail providers accepted regardless of the generic domain rule.
const ALLOWED_PROVIDERS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "icloud.com",
    "me.com",
    "aol.com",
    "protonmail.com",
    "proton.me",
];

static SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@(?:[a-z0-9-]+\.)+[a-z]{2,}$").expect("Invalid regex")
});

// Single label followed by one of a small set of generic TLDs.
static GENERIC_DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+\.(com|org|net|io|co|us)$").expect("Invalid regex"));

/// Errors that can occur when parsing an [`Email`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    /// The input string is empty.
    #[error("email cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("email must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input does not contain an @ symbol.
    #[error("email must contain an @ symbol")]
    MissingAtSymbol,
    /// The local part (before @) is empty.
    #[error("email local part cannot be empty")]
    EmptyLocalPart,
    /// The domain part (after @) is empty.
    #[error("email domain cannot be empty")]
    EmptyDomain,
    /// The input is not shaped like `local@domain.tld`.
    #[error("email is not a valid address")]
    InvalidFormat,
    /// The domain is neither a known provider, a `.edu` domain, nor a
    /// generic `name.tld` domain.
    #[error("email domain {0} is not accepted")]
    UnsupportedDomain(String),
}

/// An email address.
///
/// ## Constraints
///
/// - Length: 1-254 characters (RFC 5321 limit), surrounding whitespace ignored
/// - Shaped like `local@domain.tld`
/// - Domain is a known provider, ends in `.edu`, or is a single-label
///   `name.tld` with a common TLD
///
/// The domain rule rejects some legitimate addresses (e.g. corporate
/// subdomains); that tradeoff is accepted in exchange for filtering throwaway
/// and malformed addresses.
///
/// ## Examples
///
/// ```
/// use campus_market_core::Email;
///
/// assert!(Email::parse("user@gmail.com").is_ok());
/// assert!(Email::parse("student@cs.state.edu").is_ok());
/// assert!(Email::parse("owner@bookshop.org").is_ok());
///
/// assert!(Email::parse("").is_err());
/// assert!(Email::parse("no-at-symbol").is_err());
/// assert!(Email::parse("user@mail.corp.example").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    /// Maximum length of an email address (RFC 5321).
    pub const MAX_LENGTH: usize = 254;

    /// Parse an `Email` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input:
    /// - Is empty
    /// - Is longer than 254 characters
    /// - Does not contain an @ symbol, or has an empty local part or domain
    /// - Is not shaped like `local@domain.tld`
    /// - Uses a domain outside the accepted set
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        let s = s.trim();

        if s.is_empty() {
            return Err(EmailError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        let (local, domain) = s.split_once('@').ok_or(EmailError::MissingAtSymbol)?;

        if local.is_empty() {
            return Err(EmailError::EmptyLocalPart);
        }

        if domain.is_empty() {
            return Err(EmailError::EmptyDomain);
        }

        let lowered = s.to_lowercase();
        if !SHAPE_RE.is_match(&lowered) {
            return Err(EmailError::InvalidFormat);
        }

        let domain = domain.to_lowercase();
        if !is_accepted_domain(&domain) {
            return Err(EmailError::UnsupportedDomain(domain));
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the email address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `Email` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns the local part of the email (before the @).
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or("")
    }

    /// Returns the domain part of the email (after the @).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split('@').nth(1).unwrap_or("")
    }
}

/// Returns `true` if `input` parses as an accepted [`Email`].
#[must_use]
pub fn is_valid_email(input: &str) -> bool {
    Email::parse(input).is_ok()
}

fn is_accepted_domain(domain: &str) -> bool {
    ALLOWED_PROVIDERS.contains(&domain)
        || domain.ends_with(".edu")
        || GENERIC_DOMAIN_RE.is_match(domain)
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Email {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
