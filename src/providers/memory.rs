//! In-process backends: a record store and a session provider that keep
//! everything in memory.
//!
//! DESIGN
//! ======
//! Used by the test suite and by the binary's `memory` store mode. The
//! store applies the same column defaults as the SQL schema so rows read
//! back identically to the hosted backends, keeps a log of every applied
//! operation, and accepts one-shot injected failures so callers can
//! exercise partial-write paths.

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::session::{AuthChange, AuthEvent, RedirectResponse, SessionProvider};
use super::store::{Direction, Filter, Query, RecordStore, StoreError, Table};
use crate::model::{Session, User};
use crate::services::auth::AuthError;

const EVENT_CAPACITY: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

// =============================================================================
// RECORD STORE
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
}

/// One applied store call. `payload` is the inserted row, the update patch,
/// or `null` for selects.
#[derive(Clone, Debug, PartialEq)]
pub struct OpRecord {
    pub op: Operation,
    pub table: Table,
    pub payload: Value,
}

struct InjectedFailure {
    op: Operation,
    table: Table,
    message: String,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    log: Mutex<Vec<OpRecord>>,
    failures: Mutex<Vec<InjectedFailure>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place rows directly into a table, bypassing defaults and the log.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Value>) {
        lock(&self.tables).entry(table).or_default().extend(rows);
    }

    /// Current contents of `table` in insertion order.
    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Value> {
        lock(&self.tables).get(&table).cloned().unwrap_or_default()
    }

    /// Every applied operation, oldest first.
    #[must_use]
    pub fn operations(&self) -> Vec<OpRecord> {
        lock(&self.log).clone()
    }

    /// Applied operations of one kind against one table.
    #[must_use]
    pub fn operations_on(&self, op: Operation, table: Table) -> Vec<OpRecord> {
        lock(&self.log)
            .iter()
            .filter(|r| r.op == op && r.table == table)
            .cloned()
            .collect()
    }

    /// Make the next `op` against `table` fail with `message`.
    pub fn fail_next(&self, op: Operation, table: Table, message: impl Into<String>) {
        lock(&self.failures).push(InjectedFailure { op, table, message: message.into() });
    }

    pub fn clear(&self) {
        lock(&self.tables).clear();
        lock(&self.log).clear();
        lock(&self.failures).clear();
    }

    fn take_failure(&self, op: Operation, table: Table) -> Result<(), StoreError> {
        let mut failures = lock(&self.failures);
        if let Some(pos) = failures.iter().position(|f| f.op == op && f.table == table) {
            let failure = failures.remove(pos);
            return Err(StoreError::Rejected { table: table.name(), status: None, message: failure.message });
        }
        Ok(())
    }

    fn record(&self, op: Operation, table: Table, payload: Value) {
        lock(&self.log).push(OpRecord { op, table, payload });
    }
}

/// Column defaults mirroring the SQL schema.
fn apply_defaults(table: Table, row: &mut Map<String, Value>) {
    let now = now_rfc3339();
    let mut fill = |key: &str, value: Value| {
        row.entry(key.to_owned()).or_insert(value);
    };
    match table {
        Table::Challenges => {
            fill("id", json!(Uuid::new_v4()));
            fill("stake_type", json!("money"));
            fill("status", json!("active"));
            fill("created_at", json!(now));
            fill("completed_at", Value::Null);
            fill("metadata", json!({}));
        }
        Table::Transactions => {
            fill("id", json!(Uuid::new_v4()));
            fill("status", json!("pending"));
            fill("created_at", json!(now));
        }
        Table::UserProfiles => {
            fill("display_name", Value::Null);
            fill("total_staked", json!(0));
            fill("total_completed", json!(0));
            fill("total_failed", json!(0));
            fill("created_at", json!(now.clone()));
            fill("updated_at", json!(now));
        }
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches_filters(row: &Value, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|f| row.get(&f.column).is_some_and(|v| text_of(v) == f.value))
}

/// Orders nulls first, then numbers, then strings. Strings that parse as
/// RFC 3339 timestamps compare chronologically.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (OffsetDateTime::parse(x, &Rfc3339), OffsetDateTime::parse(y, &Rfc3339)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => text_of(x).cmp(&text_of(y)),
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.take_failure(Operation::Select, table)?;

        let mut rows: Vec<Value> = lock(&self.tables)
            .get(&table)
            .map(|rows| rows.iter().filter(|r| matches_filters(r, &query.filters)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        self.record(Operation::Select, table, Value::Null);
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError> {
        self.take_failure(Operation::Insert, table)?;

        let Value::Object(mut fields) = row.clone() else {
            return Err(StoreError::Rejected {
                table: table.name(),
                status: None,
                message: "row must be a JSON object".into(),
            });
        };
        apply_defaults(table, &mut fields);
        let stored = Value::Object(fields);

        lock(&self.tables).entry(table).or_default().push(stored.clone());
        self.record(Operation::Insert, table, row);
        Ok(stored)
    }

    async fn update(&self, table: Table, filters: &[Filter], patch: Value) -> Result<(), StoreError> {
        self.take_failure(Operation::Update, table)?;

        let Value::Object(changes) = &patch else {
            return Err(StoreError::Rejected {
                table: table.name(),
                status: None,
                message: "patch must be a JSON object".into(),
            });
        };

        if let Some(rows) = lock(&self.tables).get_mut(&table) {
            for row in rows.iter_mut().filter(|r| matches_filters(r, filters)) {
                if let Value::Object(fields) = row {
                    for (key, value) in changes {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        self.record(Operation::Update, table, patch);
        Ok(())
    }
}

// =============================================================================
// SESSION PROVIDER
// =============================================================================

struct Account {
    password: String,
    user: User,
}

/// Password accounts held in memory. Sign-in issues a random bearer token
/// and broadcasts the change to subscribers.
pub struct MemorySessionProvider {
    accounts: Mutex<HashMap<String, Account>>,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl Default for MemorySessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionProvider {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { accounts: Mutex::new(HashMap::new()), session: Mutex::new(None), events }
    }

    /// Register an account without signing in. Returns the issued user.
    pub fn register(&self, email: &str, password: &str) -> User {
        let user = User { id: Uuid::new_v4(), email: Some(email.to_owned()) };
        lock(&self.accounts).insert(email.to_owned(), Account { password: password.to_owned(), user: user.clone() });
        user
    }

    /// Install a session for `user` directly, broadcasting `SignedIn`.
    pub fn start_session(&self, user: User) -> Session {
        let session = Session { access_token: Uuid::new_v4().simple().to_string(), user };
        *lock(&self.session) = Some(session.clone());
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        session
    }

    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(AuthChange { event, session });
    }

    fn session_payload(session: &Session) -> Value {
        json!({
            "access_token": session.access_token,
            "token_type": "bearer",
            "user": session.user,
        })
    }
}

fn rejected(status: u16, code: &str, message: &str) -> AuthError {
    AuthError::Provider {
        status: Some(status),
        message: message.to_owned(),
        payload: json!({ "error": code, "error_description": message }),
    }
}

#[async_trait::async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(lock(&self.session).clone())
    }

    async fn current_user(&self) -> Result<Option<User>, AuthError> {
        Ok(lock(&self.session).as_ref().map(|s| s.user.clone()))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Value, AuthError> {
        let user = {
            let accounts = lock(&self.accounts);
            match accounts.get(email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(rejected(400, "invalid_grant", "Invalid login credentials")),
            }
        };
        let session = self.start_session(user);
        Ok(Self::session_payload(&session))
    }

    async fn sign_up(&self, email: &str, password: &str, profile_data: Option<&Value>) -> Result<Value, AuthError> {
        if lock(&self.accounts).contains_key(email) {
            return Err(rejected(422, "user_already_exists", "User already registered"));
        }
        let user = self.register(email, password);
        let session = self.start_session(user);
        let mut payload = Self::session_payload(&session);
        if let Some(data) = profile_data {
            payload["user_metadata"] = data.clone();
        }
        Ok(payload)
    }

    async fn sign_in_with_redirect(&self, provider: &str, redirect_url: &str) -> Result<RedirectResponse, AuthError> {
        Ok(RedirectResponse {
            provider: provider.to_owned(),
            url: format!("memory://authorize?provider={provider}&redirect_to={redirect_url}"),
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        lock(&self.session).take();
        self.emit(AuthEvent::SignedOut, None);
        Ok(())
    }
}
