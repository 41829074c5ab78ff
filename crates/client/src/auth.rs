//! Sign-up, sign-in and session guard.
//!
//! Form input is screened for hostile patterns before it is parsed. A hostile
//! email rejects only that request; the editor lockdown is not involved.

use campus_market_core::guard::classify;
use campus_market_core::{Credentials, Email, Password};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use url::Url;

use crate::backend::{AuthProvider, OAuthProvider, Session, SignUpOutcome};
use crate::error::{AppError, add_breadcrumb, clear_sentry_user, set_sentry_user};

/// Auth flow over an [`AuthProvider`], holding the current session.
#[derive(Debug)]
pub struct AuthGuard<A> {
    provider: A,
    session: Option<Session>,
}

fn screen_email(raw: &str) -> Result<Email, AppError> {
    if let Some(kind) = classify(raw) {
        warn!(%kind, "Hostile email rejected");
        return Err(AppError::AbuseDetected { locked_until: None });
    }
    Ok(Email::parse(raw)?)
}

impl<A: AuthProvider> AuthGuard<A> {
    #[must_use]
    pub const fn new(provider: A) -> Self {
        Self {
            provider,
            session: None,
        }
    }

    #[must_use]
    pub const fn provider(&self) -> &A {
        &self.provider
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn remember(&mut self, session: Session) -> &Session {
        set_sentry_user(&session.user.id, session.user.email.as_deref());
        add_breadcrumb("auth", "Signed in", None);
        self.session.insert(session)
    }

    /// Create an account.
    ///
    /// Returns `None` when the backend wants the address confirmed first.
    ///
    /// # Errors
    ///
    /// - [`AppError::AbuseDetected`] for a hostile email
    /// - [`AppError::Validation`] for a malformed or unaccepted email, a weak
    ///   password or a mismatched confirmation
    /// - [`AppError::Backend`] if the provider call fails
    #[instrument(skip_all)]
    pub async fn sign_up(
        &mut self,
        email: &str,
        password: &str,
        confirm: &str,
    ) -> Result<Option<&Session>, AppError> {
        let email = screen_email(email)?;
        let password = Password::parse_confirmed(password, confirm)?;
        let credentials = Credentials::new(email, password);

        match self.provider.sign_up(&credentials).await.map_err(AppError::from)? {
            SignUpOutcome::SignedIn(session) => {
                info!(user_id = %session.user.id, "Account created");
                Ok(Some(self.remember(session)))
            }
            SignUpOutcome::ConfirmationRequired(user) => {
                info!(user_id = %user.id, "Account awaiting confirmation");
                Ok(None)
            }
        }
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// - [`AppError::AbuseDetected`] for a hostile email
    /// - [`AppError::Validation`] for malformed input
    /// - [`AppError::Backend`] with [`crate::backend::BackendError::InvalidCredentials`]
    ///   for a wrong email or password
    #[instrument(skip_all)]
    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<&Session, AppError> {
        let email = screen_email(email)?;
        let password = Password::parse(password)?;
        let credentials = Credentials::new(email, password);

        let session = self
            .provider
            .sign_in(&credentials)
            .await
            .map_err(AppError::from)?;
        info!(user_id = %session.user.id, "Signed in");
        Ok(self.remember(session))
    }

    /// URL that starts an OAuth sign-in with `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the URL cannot be built.
    pub fn oauth_url(&self, provider: OAuthProvider, redirect_to: &Url) -> Result<Url, AppError> {
        Ok(self.provider.authorize_url(provider, redirect_to)?)
    }

    /// Ask the provider to send a password reset email.
    ///
    /// # Errors
    ///
    /// - [`AppError::AbuseDetected`] for a hostile email
    /// - [`AppError::Validation`] for a malformed email
    /// - [`AppError::Backend`] if the provider call fails
    #[instrument(skip_all)]
    pub async fn reset_password(&self, email: &str) -> Result<(), AppError> {
        let email = screen_email(email)?;
        self.provider
            .reset_password(&email)
            .await
            .map_err(|e| AppError::from(e).report())?;
        info!("Password reset requested");
        Ok(())
    }

    /// End the current session. Does nothing when signed out.
    ///
    /// The local session is dropped even if the provider call fails.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the provider call fails.
    #[instrument(skip_all)]
    pub async fn sign_out(&mut self) -> Result<(), AppError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        clear_sentry_user();
        add_breadcrumb("auth", "Signed out", None);
        self.provider
            .sign_out(&session)
            .await
            .map_err(|e| AppError::from(e).report())
    }

    /// The session, if one exists and has not expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthenticated`] otherwise.
    pub fn require_session(&self, now: DateTime<Utc>) -> Result<&Session, AppError> {
        self.session
            .as_ref()
            .filter(|s| !s.is_expired(now))
            .ok_or(AppError::Unauthenticated)
    }
}
