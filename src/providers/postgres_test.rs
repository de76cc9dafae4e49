use super::*;
use serde_json::json;

// =============================================================================
// SQL shape
// =============================================================================

#[test]
fn select_orders_newest_first() {
    let query = Query::new().order_by("created_at", Direction::Descending);
    let builder = build_select(Table::Challenges, &query).unwrap();
    assert_eq!(builder.sql(), "SELECT to_jsonb(t) AS row FROM challenges AS t ORDER BY t.created_at DESC");
}

#[test]
fn select_binds_filter_values() {
    let query = Query::new().eq("id", "abc").limit(1);
    let builder = build_select(Table::UserProfiles, &query).unwrap();
    assert_eq!(
        builder.sql(),
        "SELECT to_jsonb(t) AS row FROM user_profiles AS t WHERE t.id::text = $1 LIMIT $2"
    );
}

#[test]
fn select_joins_multiple_filters_with_and() {
    let query = Query::new().eq("user_id", "u1").eq("status", "active");
    let builder = build_select(Table::Challenges, &query).unwrap();
    assert!(builder.sql().contains("WHERE t.user_id::text = $1 AND t.status::text = $2"));
}

#[test]
fn insert_only_names_present_columns() {
    let row = json!({ "title": "Run 5k", "stake_amount": 20 });
    let builder = build_insert(Table::Challenges, row).unwrap();
    let sql = builder.sql();
    assert!(sql.starts_with("INSERT INTO challenges AS t ("));
    assert!(sql.contains("jsonb_populate_record(NULL::challenges, $1)"));
    assert!(sql.ends_with("RETURNING to_jsonb(t) AS row"));
    assert!(sql.contains("title"));
    assert!(!sql.contains("status"));
}

#[test]
fn insert_without_columns_uses_defaults() {
    let builder = build_insert(Table::UserProfiles, json!({})).unwrap();
    assert_eq!(builder.sql(), "INSERT INTO user_profiles AS t DEFAULT VALUES RETURNING to_jsonb(t) AS row");
}

#[test]
fn insert_rejects_non_object() {
    let Err(err) = build_insert(Table::Transactions, json!([1, 2])) else {
        panic!("expected non-object row to be rejected");
    };
    assert!(matches!(err, StoreError::Rejected { table: "transactions", .. }));
}

#[test]
fn insert_rejects_unsafe_column() {
    let Err(err) = build_insert(Table::Challenges, json!({ "title); DROP TABLE x; --": 1 })) else {
        panic!("expected unsafe column to be rejected");
    };
    assert!(matches!(err, StoreError::InvalidColumn(_)));
}

#[test]
fn update_assigns_from_populated_record() {
    let patch = json!({ "status": "completed" });
    let builder = build_update(Table::Challenges, &[Filter::eq("id", "c1")], patch).unwrap();
    assert_eq!(
        builder.sql(),
        "UPDATE challenges AS t SET status = p.status FROM jsonb_populate_record(NULL::challenges, $1) AS p WHERE t.id::text = $2"
    );
}

#[test]
fn update_rejects_empty_patch() {
    let Err(err) = build_update(Table::Challenges, &[], json!({})) else {
        panic!("expected empty patch to be rejected");
    };
    assert!(err.to_string().contains("empty patch"));
}

// =============================================================================
// Live database (opt-in)
// =============================================================================

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_insert_applies_schema_defaults() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for live-db-tests");
    let pool = crate::db::init_pool(&url, 2).await.unwrap();
    let store = PgStore::new(pool);

    let user_id = uuid::Uuid::new_v4();
    let row = store
        .insert(
            Table::Challenges,
            json!({ "user_id": user_id, "title": "live", "stake_amount": 5, "deadline": "2030-01-01" }),
        )
        .await
        .unwrap();
    assert_eq!(row["status"], "active");
    assert_eq!(row["stake_type"], "money");

    let rows = store
        .select(Table::Challenges, &Query::new().eq("user_id", user_id))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}
