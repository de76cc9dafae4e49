//! Hosted backend client: auth and row endpoints over HTTP.
//!
//! DESIGN
//! ======
//! One `reqwest::Client` serves both collaborators. Auth calls go to
//! `/auth/v1/*`; row calls go to `/rest/v1/{table}` with filters encoded as
//! `column=eq.value` and ordering as `order=column.desc`. Every request
//! carries the project key in `apikey` and a bearer token: the signed-in
//! user's access token when a session exists, the project key otherwise.
//!
//! URL and payload handling lives in free functions so it can be tested
//! without a server.

#[cfg(test)]
#[path = "rest_test.rs"]
mod rest_test;

use std::sync::RwLock;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::session::{AuthChange, AuthEvent, RedirectResponse, SessionProvider};
use super::store::{Direction, Filter, Query, RecordStore, StoreError, Table, check_identifier};
use crate::config::BackendConfig;
use crate::model::{Session, User};
use crate::services::auth::AuthError;

const EVENT_CAPACITY: usize = 16;

// =============================================================================
// CLIENT
// =============================================================================

pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl RestBackend {
    /// Build a client for the backend at `config.url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_owned(),
            anon_key: config.anon_key.clone(),
            session: RwLock::new(None),
            events,
        })
    }

    fn token(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    fn bearer(&self) -> String {
        self.token().unwrap_or_else(|| self.anon_key.clone())
    }

    fn set_session(&self, session: Option<Session>, event: AuthEvent) {
        *self
            .session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = session.clone();
        let _ = self.events.send(AuthChange { event, session });
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    async fn send_auth(&self, request: reqwest::RequestBuilder) -> Result<Value, AuthError> {
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(auth_failure(status, &text));
        }
        parse_body(&text).map_err(|e| AuthError::Request(format!("unexpected response: {e}")))
    }

    async fn send_store(&self, table: Table, request: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(store_failure(table, status, &text));
        }
        parse_body(&text).map_err(|e| StoreError::Decode(format!("{table}: {e}")))
    }
}

// =============================================================================
// SESSION PROVIDER
// =============================================================================

#[async_trait::async_trait]
impl SessionProvider for RestBackend {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self
            .session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    async fn current_user(&self) -> Result<Option<User>, AuthError> {
        if self.token().is_none() {
            return Ok(None);
        }
        let request = self.request(reqwest::Method::GET, &self.auth_url("user"));
        match self.send_auth(request).await {
            Ok(payload) => serde_json::from_value(payload)
                .map(Some)
                .map_err(|e| AuthError::Request(format!("unexpected user payload: {e}"))),
            Err(AuthError::Provider { status: Some(401 | 403), .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Value, AuthError> {
        let request = self
            .request(reqwest::Method::POST, &self.auth_url("token?grant_type=password"))
            .json(&json!({ "email": email, "password": password }));
        let payload = self.send_auth(request).await?;
        if let Some(session) = parse_session(&payload) {
            info!(user_id = %session.user.id, "password sign-in accepted");
            self.set_session(Some(session), AuthEvent::SignedIn);
        }
        Ok(payload)
    }

    async fn sign_up(&self, email: &str, password: &str, profile_data: Option<&Value>) -> Result<Value, AuthError> {
        let data = profile_data.cloned().unwrap_or_else(|| json!({}));
        let request = self
            .request(reqwest::Method::POST, &self.auth_url("signup"))
            .json(&json!({ "email": email, "password": password, "data": data }));
        let payload = self.send_auth(request).await?;
        // Projects requiring email confirmation return a user without a session.
        if let Some(session) = parse_session(&payload) {
            self.set_session(Some(session), AuthEvent::SignedIn);
        }
        Ok(payload)
    }

    async fn sign_in_with_redirect(&self, provider: &str, redirect_url: &str) -> Result<RedirectResponse, AuthError> {
        let url = authorize_url(&self.base_url, provider, redirect_url)?;
        debug!(%provider, "redirect sign-in prepared");
        Ok(RedirectResponse { provider: provider.to_owned(), url })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.token().is_some() {
            let request = self.request(reqwest::Method::POST, &self.auth_url("logout"));
            self.send_auth(request).await?;
        }
        self.set_session(None, AuthEvent::SignedOut);
        Ok(())
    }
}

// =============================================================================
// RECORD STORE
// =============================================================================

#[async_trait::async_trait]
impl RecordStore for RestBackend {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        let params = select_params(query)?;
        let request = self
            .request(reqwest::Method::GET, &self.table_url(table))
            .query(&params);
        match self.send_store(table, request).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(StoreError::Decode(format!("{table}: expected array, got {other}"))),
        }
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError> {
        let request = self
            .request(reqwest::Method::POST, &self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        match self.send_store(table, request).await? {
            Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
            Value::Object(fields) => Ok(Value::Object(fields)),
            _ => Err(StoreError::Decode(format!("{table}: insert returned no row"))),
        }
    }

    async fn update(&self, table: Table, filters: &[Filter], patch: Value) -> Result<(), StoreError> {
        let params = filter_params(filters)?;
        let request = self
            .request(reqwest::Method::PATCH, &self.table_url(table))
            .query(&params)
            .header("Prefer", "return=minimal")
            .json(&patch);
        self.send_store(table, request).await?;
        Ok(())
    }
}

// =============================================================================
// WIRE HELPERS
// =============================================================================

fn parse_body(text: &str) -> Result<Value, serde_json::Error> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text)
}

/// `column=eq.value` pairs for each filter.
pub(crate) fn filter_params(filters: &[Filter]) -> Result<Vec<(String, String)>, StoreError> {
    filters
        .iter()
        .map(|f| {
            check_identifier(&f.column)?;
            Ok((f.column.clone(), format!("eq.{}", f.value)))
        })
        .collect()
}

/// Full query string for a select: projection, filters, order, limit.
pub(crate) fn select_params(query: &Query) -> Result<Vec<(String, String)>, StoreError> {
    let mut params = vec![("select".to_owned(), "*".to_owned())];
    params.extend(filter_params(&query.filters)?);
    if let Some(order) = &query.order {
        check_identifier(&order.column)?;
        let dir = match order.direction {
            Direction::Ascending => "asc",
            Direction::Descending => "desc",
        };
        params.push(("order".to_owned(), format!("{}.{dir}", order.column)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_owned(), limit.to_string()));
    }
    Ok(params)
}

/// Extract a session from a token-grant or sign-up payload.
pub(crate) fn parse_session(payload: &Value) -> Option<Session> {
    let access_token = payload.get("access_token")?.as_str()?.to_owned();
    let user: User = serde_json::from_value(payload.get("user")?.clone()).ok()?;
    Some(Session { access_token, user })
}

/// Human-readable message from an error body, trying the keys the auth and
/// row endpoints use.
fn error_message(payload: &Value, fallback: &str) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .map_or_else(|| fallback.to_owned(), str::to_owned)
}

pub(crate) fn auth_failure(status: u16, body: &str) -> AuthError {
    let payload = serde_json::from_str::<Value>(body).unwrap_or_else(|_| json!({ "message": body }));
    let message = error_message(&payload, &format!("status {status}"));
    AuthError::Provider { status: Some(status), message, payload }
}

pub(crate) fn store_failure(table: Table, status: u16, body: &str) -> StoreError {
    let payload = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
    let message = error_message(&payload, if body.is_empty() { "empty response" } else { body });
    StoreError::Rejected { table: table.name(), status: Some(status), message }
}

pub(crate) fn authorize_url(base_url: &str, provider: &str, redirect_url: &str) -> Result<String, AuthError> {
    reqwest::Url::parse_with_params(
        &format!("{}/auth/v1/authorize", base_url.trim_end_matches('/')),
        &[("provider", provider), ("redirect_to", redirect_url)],
    )
    .map(String::from)
    .map_err(|e| AuthError::Request(format!("invalid authorize url: {e}")))
}
