//! `PostgREST` record store and `GoTrue` auth over HTTP.
//!
//! Uses `reqwest` 0.13. The product status list is cached with `moka`
//! (5-minute TTL); product rows are never cached.

use std::sync::Arc;
use std::time::Duration;

use campus_market_core::{
    Credentials, Email, NewProduct, Product, ProductId, ProductPatch, StatusRecord, StoreId,
};
use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, error, instrument};
use url::Url;

use super::{AuthProvider, AuthUser, BackendError, OAuthProvider, RecordStore, Session, SignUpOutcome};
use crate::config::SupabaseConfig;

const PRODUCTS_PATH: &str = "rest/v1/products";
const STATUSES_PATH: &str = "rest/v1/product_statuses";
const SIGNUP_PATH: &str = "auth/v1/signup";
const TOKEN_PATH: &str = "auth/v1/token";
const AUTHORIZE_PATH: &str = "auth/v1/authorize";
const RECOVER_PATH: &str = "auth/v1/recover";
const LOGOUT_PATH: &str = "auth/v1/logout";

const PRODUCT_COLUMNS: &str = "id,store_id,name,price,brand,status,datecreated,archived";
const STATUS_CACHE_KEY: &str = "product_statuses";
const ERROR_BODY_LIMIT: usize = 200;

/// Client for the project's REST and auth endpoints.
///
/// Requests carry the anon key, plus the session's access token once
/// [`SupabaseClient::set_session`] has been called.
#[derive(Clone)]
pub struct SupabaseClient {
    inner: Arc<SupabaseClientInner>,
}

struct SupabaseClientInner {
    client: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    access_token: RwLock<Option<SecretString>>,
    status_cache: Cache<String, Vec<StatusRecord>>,
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("anon_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Token grant returned by the auth endpoints.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(|| now + TimeDelta::seconds(self.expires_in));
        Session {
            user: self.user,
            access_token: SecretString::from(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::from),
            expires_at,
        }
    }
}

#[derive(serde::Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

impl<'a> PasswordGrant<'a> {
    fn from_credentials(credentials: &'a Credentials) -> Self {
        Self {
            email: credentials.email.as_str(),
            password: credentials.password.expose(),
        }
    }
}

impl SupabaseClient {
    /// Create a new client.
    #[must_use]
    pub fn new(config: &SupabaseConfig) -> Self {
        let status_cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Self {
            inner: Arc::new(SupabaseClientInner {
                client: reqwest::Client::new(),
                base_url: with_trailing_slash(&config.url),
                anon_key: config.anon_key.clone(),
                access_token: RwLock::new(None),
                status_cache,
            }),
        }
    }

    /// Use the session's access token for subsequent requests, or fall back
    /// to the anon key with `None`.
    pub async fn set_session(&self, session: Option<&Session>) {
        *self.inner.access_token.write().await = session.map(|s| s.access_token.clone());
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.inner.base_url.join(path)?)
    }

    async fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = self
            .inner
            .access_token
            .read()
            .await
            .as_ref()
            .map_or_else(
                || self.inner.anon_key.expose_secret().to_string(),
                |token| token.expose_secret().to_string(),
            );

        self.inner
            .client
            .request(method, url)
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(bearer)
    }

    /// Send a request and parse a JSON response body.
    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, BackendError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(
                error = %e,
                body = %truncate(&body, 500),
                "Failed to parse backend response"
            );
            BackendError::Parse(e)
        })
    }

    /// Send a request whose response body is ignored.
    async fn execute_empty(&self, builder: RequestBuilder) -> Result<(), BackendError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status, &body))
    }
}

impl RecordStore for SupabaseClient {
    #[instrument(skip(self))]
    async fn list_products(
        &self,
        store_id: StoreId,
        search: Option<&str>,
    ) -> Result<Vec<Product>, BackendError> {
        let mut query = vec![
            ("select", PRODUCT_COLUMNS.to_string()),
            ("store_id", format!("eq.{store_id}")),
            ("order", "name.asc".to_string()),
        ];
        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            query.push(("name", format!("ilike.*{}*", escape_pattern(term))));
        }

        let url = self.endpoint(PRODUCTS_PATH)?;
        let products: Vec<Product> = self
            .execute(self.request(Method::GET, url).await.query(&query))
            .await?;

        debug!(count = products.len(), "Products fetched");
        Ok(products)
    }

    #[instrument(skip(self))]
    async fn list_statuses(&self) -> Result<Vec<StatusRecord>, BackendError> {
        if let Some(cached) = self.inner.status_cache.get(STATUS_CACHE_KEY).await {
            debug!(count = cached.len(), "Statuses served from cache");
            return Ok(cached);
        }

        let url = self.endpoint(STATUSES_PATH)?;
        let statuses: Vec<StatusRecord> = self
            .execute(
                self.request(Method::GET, url)
                    .await
                    .query(&[("select", "id,name,color"), ("order", "id.asc")]),
            )
            .await?;

        self.inner
            .status_cache
            .insert(STATUS_CACHE_KEY.to_string(), statuses.clone())
            .await;
        Ok(statuses)
    }

    #[instrument(skip(self, product), fields(store_id = %product.store_id))]
    async fn insert_product(&self, product: &NewProduct) -> Result<Product, BackendError> {
        let url = self.endpoint(PRODUCTS_PATH)?;
        let rows: Vec<Product> = self
            .execute(
                self.request(Method::POST, url)
                    .await
                    .query(&[("select", PRODUCT_COLUMNS)])
                    .header("Prefer", "return=representation")
                    .json(product),
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound("inserted product".to_string()))
    }

    #[instrument(skip(self, patch))]
    async fn update_product(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, BackendError> {
        let url = self.endpoint(PRODUCTS_PATH)?;
        let rows: Vec<Product> = self
            .execute(
                self.request(Method::PATCH, url)
                    .await
                    .query(&[("id", format!("eq.{id}")), ("select", PRODUCT_COLUMNS.to_string())])
                    .header("Prefer", "return=representation")
                    .json(patch),
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("product {id}")))
    }

    #[instrument(skip(self))]
    async fn delete_product(&self, id: ProductId) -> Result<(), BackendError> {
        let url = self.endpoint(PRODUCTS_PATH)?;
        self.execute_empty(
            self.request(Method::DELETE, url)
                .await
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", "return=minimal"),
        )
        .await
    }
}

impl AuthProvider for SupabaseClient {
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpOutcome, BackendError> {
        let url = self.endpoint(SIGNUP_PATH)?;
        let body: serde_json::Value = self
            .execute(
                self.request(Method::POST, url)
                    .await
                    .json(&PasswordGrant::from_credentials(credentials)),
            )
            .await?;

        parse_sign_up(body, Utc::now())
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, BackendError> {
        let url = self.endpoint(TOKEN_PATH)?;
        let result: Result<TokenResponse, BackendError> = self
            .execute(
                self.request(Method::POST, url)
                    .await
                    .query(&[("grant_type", "password")])
                    .json(&PasswordGrant::from_credentials(credentials)),
            )
            .await;

        match result {
            Ok(token) => Ok(token.into_session(Utc::now())),
            Err(BackendError::Api { status: 400 | 401, .. }) => Err(BackendError::InvalidCredentials),
            Err(e) => Err(e),
        }
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &Url,
    ) -> Result<Url, BackendError> {
        let mut url = self.endpoint(AUTHORIZE_PATH)?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    #[instrument(skip(self))]
    async fn reset_password(&self, email: &Email) -> Result<(), BackendError> {
        let url = self.endpoint(RECOVER_PATH)?;
        self.execute_empty(
            self.request(Method::POST, url)
                .await
                .json(&serde_json::json!({ "email": email.as_str() })),
        )
        .await
    }

    #[instrument(skip(self, session), fields(user_id = %session.user.id))]
    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        let url = self.endpoint(LOGOUT_PATH)?;
        let result = self
            .execute_empty(
                self.inner
                    .client
                    .post(url)
                    .header("apikey", self.inner.anon_key.expose_secret())
                    .bearer_auth(session.access_token.expose_secret()),
            )
            .await;
        self.set_session(None).await;
        result
    }
}

/// Sign-up answers with a token grant when the account is active right away,
/// and with the bare user when email confirmation is required.
fn parse_sign_up(body: serde_json::Value, now: DateTime<Utc>) -> Result<SignUpOutcome, BackendError> {
    if body.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(body)?;
        return Ok(SignUpOutcome::SignedIn(token.into_session(now)));
    }

    let user = match body.get("user") {
        Some(user) => serde_json::from_value(user.clone())?,
        None => serde_json::from_value(body)?,
    };
    Ok(SignUpOutcome::ConfirmationRequired(user))
}

/// Build an [`BackendError::Api`] from an error response, preferring the
/// backend's own message field.
fn api_error(status: StatusCode, body: &str) -> BackendError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        msg: Option<String>,
        error_description: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|e| e.message.or(e.msg).or(e.error_description))
        .unwrap_or_else(|| truncate(body, ERROR_BODY_LIMIT));

    error!(
        status = %status,
        body = %truncate(body, 500),
        "Backend returned non-success status"
    );

    BackendError::Api {
        status: status.as_u16(),
        message,
    }
}

/// `PostgREST` uses `*` as the `ilike` wildcard; literal wildcards in the
/// search term are dropped.
fn escape_pattern(term: &str) -> String {
    term.chars().filter(|c| !matches!(c, '*' | '%')).collect()
}

/// `Url::join` replaces the last path segment unless the base ends in `/`.
fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn truncate(body: &str, limit: usize) -> String {
    body.chars().take(limit).collect()
}
