//! Record store contract: table-scoped select/insert/update.
//!
//! DESIGN
//! ======
//! The hosted store is a query-builder-style collaborator: rows travel as
//! JSON objects and every call is scoped to one of the three known tables.
//! Backends implement the untyped [`RecordStore`] trait; services go through
//! the typed helpers at the bottom of this module so decode failures surface
//! as [`StoreError::Decode`] in one place.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ErrorCode;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store answered but refused the request.
    #[error("store rejected request on {table}: {message}")]
    Rejected { table: &'static str, status: Option<u16>, message: String },

    /// The request never produced an answer (transport failure).
    #[error("store request failed: {0}")]
    Request(String),

    /// A row could not be converted to or from its typed form.
    #[error("row decode failed: {0}")]
    Decode(String),

    /// A column name is not a plain SQL identifier.
    #[error("invalid column name: {0}")]
    InvalidColumn(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "E_STORE_REJECTED",
            Self::Request(_) => "E_STORE_REQUEST",
            Self::Decode(_) => "E_STORE_DECODE",
            Self::InvalidColumn(_) => "E_INVALID_COLUMN",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Rejected { status: Some(429 | 500..=599), .. })
    }
}

// =============================================================================
// QUERY SHAPE
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Challenges,
    Transactions,
    UserProfiles,
}

impl Table {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Challenges => "challenges",
            Self::Transactions => "transactions",
            Self::UserProfiles => "user_profiles",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Equality filter. Values are compared in their textual form, which is
/// how both the REST dialect and the Postgres backend see them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: impl std::fmt::Display) -> Self {
        Self { column: column.to_owned(), value: value.to_string() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Filters, ordering and row limit for a `select`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some(Order { column: column.to_owned(), direction });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// True for lowercase SQL identifiers (`[a-z_][a-z0-9_]*`).
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub(crate) fn check_identifier(name: &str) -> Result<(), StoreError> {
    if is_identifier(name) { Ok(()) } else { Err(StoreError::InvalidColumn(name.to_owned())) }
}

// =============================================================================
// CONTRACT
// =============================================================================

#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows matching `query`, in the requested order.
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Insert one row and return it as stored (with defaults applied).
    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError>;

    /// Apply `patch` to every row matching all `filters`.
    async fn update(&self, table: Table, filters: &[Filter], patch: Value) -> Result<(), StoreError>;
}

// =============================================================================
// TYPED HELPERS
// =============================================================================

/// Select and decode rows.
///
/// # Errors
///
/// Returns the backend's error, or `Decode` if a row does not fit `T`.
pub async fn select_rows<T: DeserializeOwned>(
    store: &dyn RecordStore,
    table: Table,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    store
        .select(table, query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| StoreError::Decode(format!("{table}: {e}"))))
        .collect()
}

/// Encode, insert and decode the stored row.
///
/// # Errors
///
/// Returns the backend's error, or `Decode` if either conversion fails.
pub async fn insert_row<T: Serialize + ?Sized, R: DeserializeOwned>(
    store: &dyn RecordStore,
    table: Table,
    row: &T,
) -> Result<R, StoreError> {
    let value = serde_json::to_value(row).map_err(|e| StoreError::Decode(format!("{table}: {e}")))?;
    let stored = store.insert(table, value).await?;
    serde_json::from_value(stored).map_err(|e| StoreError::Decode(format!("{table}: {e}")))
}

/// Encode and apply a patch.
///
/// # Errors
///
/// Returns the backend's error, or `Decode` if the patch cannot be encoded.
pub async fn update_rows<T: Serialize + ?Sized>(
    store: &dyn RecordStore,
    table: Table,
    filters: &[Filter],
    patch: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(patch).map_err(|e| StoreError::Decode(format!("{table}: {e}")))?;
    store.update(table, filters, value).await
}
