//! Direct PostgreSQL record store.
//!
//! DESIGN
//! ======
//! Rows cross the boundary as JSON, matching the REST backend: selects
//! return `to_jsonb(t)` and writes decode the incoming object with
//! `jsonb_populate_record`, so column types are coerced by Postgres rather
//! than by hand-written binds. Insert and update only touch the columns
//! present in the payload, which leaves schema defaults in force.
//!
//! Table names come from [`Table`]; column names are checked with
//! [`is_identifier`](super::store::is_identifier) before being spliced
//! into SQL. Filter values are always bound.

#[cfg(test)]
#[path = "postgres_test.rs"]
mod postgres_test;

use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::store::{Direction, Filter, Query, RecordStore, StoreError, Table, check_identifier};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn object_columns(table: Table, row: &Value) -> Result<Vec<String>, StoreError> {
    let Value::Object(fields) = row else {
        return Err(StoreError::Rejected { table: table.name(), status: None, message: "row must be a JSON object".into() });
    };
    columns_of(fields)
}

fn columns_of(fields: &Map<String, Value>) -> Result<Vec<String>, StoreError> {
    fields
        .keys()
        .map(|k| check_identifier(k).map(|()| k.clone()))
        .collect()
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) -> Result<(), StoreError> {
    for (i, filter) in filters.iter().enumerate() {
        check_identifier(&filter.column)?;
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        builder.push(format!("t.{}::text = ", filter.column));
        builder.push_bind(filter.value.clone());
    }
    Ok(())
}

pub(crate) fn build_select(table: Table, query: &Query) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let mut builder = QueryBuilder::new(format!("SELECT to_jsonb(t) AS row FROM {} AS t", table.name()));
    push_filters(&mut builder, &query.filters)?;
    if let Some(order) = &query.order {
        check_identifier(&order.column)?;
        let dir = match order.direction {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        };
        builder.push(format!(" ORDER BY t.{} {dir}", order.column));
    }
    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    Ok(builder)
}

pub(crate) fn build_insert(table: Table, row: Value) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let columns = object_columns(table, &row)?;
    let name = table.name();
    if columns.is_empty() {
        return Ok(QueryBuilder::new(format!("INSERT INTO {name} AS t DEFAULT VALUES RETURNING to_jsonb(t) AS row")));
    }
    let column_list = columns.join(", ");
    let source_list = columns
        .iter()
        .map(|c| format!("p.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {name} AS t ({column_list}) SELECT {source_list} FROM jsonb_populate_record(NULL::{name}, "
    ));
    builder.push_bind(row);
    builder.push(") AS p RETURNING to_jsonb(t) AS row");
    Ok(builder)
}

pub(crate) fn build_update(
    table: Table,
    filters: &[Filter],
    patch: Value,
) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let columns = object_columns(table, &patch)?;
    if columns.is_empty() {
        return Err(StoreError::Rejected { table: table.name(), status: None, message: "empty patch".into() });
    }
    let name = table.name();
    let assignments = columns
        .iter()
        .map(|c| format!("{c} = p.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!("UPDATE {name} AS t SET {assignments} FROM jsonb_populate_record(NULL::{name}, "));
    builder.push_bind(patch);
    builder.push(") AS p");
    push_filters(&mut builder, filters)?;
    Ok(builder)
}

#[async_trait::async_trait]
impl RecordStore for PgStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        let mut builder = build_select(table, query)?;
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<Value, _>("row").map_err(StoreError::from))
            .collect()
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, StoreError> {
        let mut builder = build_insert(table, row)?;
        let stored = builder.build().fetch_one(&self.pool).await?;
        Ok(stored.try_get::<Value, _>("row")?)
    }

    async fn update(&self, table: Table, filters: &[Filter], patch: Value) -> Result<(), StoreError> {
        let mut builder = build_update(table, filters, patch)?;
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
