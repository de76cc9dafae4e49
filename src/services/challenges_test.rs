use super::*;
use serde_json::json;

use crate::providers::memory::{MemorySessionProvider, MemoryStore, Operation};
use crate::test_helpers::{challenge_row, signed_in_provider};

fn registry(session: Arc<MemorySessionProvider>, store: &Arc<MemoryStore>) -> ChallengeRegistry {
    ChallengeRegistry::new(session, Arc::clone(store) as Arc<dyn RecordStore>)
}

fn transactions(store: &MemoryStore) -> Vec<serde_json::Value> {
    store.rows(Table::Transactions)
}

// =============================================================================
// fetch_all / views
// =============================================================================

#[tokio::test]
async fn empty_store_gives_empty_views() {
    let (session, _) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    let registry = registry(session, &store);

    registry.fetch_all().await.unwrap();
    assert!(registry.challenges().is_empty());
    assert!(registry.active().is_empty());
    assert!(registry.completed().is_empty());
    assert!(registry.failed().is_empty());
    assert!(!registry.loading());
}

#[tokio::test]
async fn fetch_all_orders_newest_first() {
    let (session, user) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    store.seed(
        Table::Challenges,
        [
            challenge_row(user.id, "middle", 10.0, "active", "2024-01-02T00:00:00Z"),
            challenge_row(user.id, "oldest", 10.0, "active", "2024-01-01T00:00:00Z"),
            challenge_row(user.id, "newest", 10.0, "active", "2024-01-03T00:00:00.5+00:00"),
        ],
    );
    let registry = registry(session, &store);

    registry.fetch_all().await.unwrap();
    let titles: Vec<String> = registry.challenges().into_iter().map(|c| c.title).collect();
    assert_eq!(titles, ["newest", "middle", "oldest"]);
}

#[tokio::test]
async fn views_filter_by_status_preserving_order() {
    let (session, user) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    store.seed(
        Table::Challenges,
        [
            challenge_row(user.id, "a", 1.0, "active", "2024-01-05T00:00:00Z"),
            challenge_row(user.id, "b", 1.0, "completed", "2024-01-04T00:00:00Z"),
            challenge_row(user.id, "c", 1.0, "active", "2024-01-03T00:00:00Z"),
            challenge_row(user.id, "d", 1.0, "failed", "2024-01-02T00:00:00Z"),
            challenge_row(user.id, "e", 1.0, "withdrawn", "2024-01-01T00:00:00Z"),
        ],
    );
    let registry = registry(session, &store);
    registry.fetch_all().await.unwrap();

    let titles = |list: Vec<Challenge>| list.into_iter().map(|c| c.title).collect::<Vec<_>>();
    assert_eq!(titles(registry.active()), ["a", "c"]);
    assert_eq!(titles(registry.completed()), ["b"]);
    assert_eq!(titles(registry.failed()), ["d"]);
    assert_eq!(titles(registry.with_status(ChallengeStatus::Withdrawn)), ["e"]);
}

#[tokio::test]
async fn fetch_failure_keeps_cache_and_clears_loading() {
    let (session, user) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    store.seed(Table::Challenges, [challenge_row(user.id, "kept", 1.0, "active", "2024-01-01T00:00:00Z")]);
    let registry = registry(session, &store);
    registry.fetch_all().await.unwrap();

    store.fail_next(Operation::Select, Table::Challenges, "connection reset");
    let err = registry.fetch_all().await.unwrap_err();
    assert!(err.to_string().contains("connection reset"));
    assert_eq!(registry.challenges().len(), 1);
    assert!(!registry.loading());
}

#[tokio::test]
async fn fetch_all_rejects_malformed_rows() {
    let (session, _) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    store.seed(Table::Challenges, [json!({ "id": "not-a-uuid" })]);
    let registry = registry(session, &store);

    let err = registry.fetch_all().await.unwrap_err();
    assert_eq!(err.error_code(), "E_STORE_DECODE");
}

// =============================================================================
// create
// =============================================================================

#[tokio::test]
async fn create_unauthenticated_fails_without_writes() {
    let session = Arc::new(MemorySessionProvider::new());
    let store = Arc::new(MemoryStore::new());
    let registry = registry(session, &store);

    let err = registry
        .create(&NewChallenge::new("Run 5k", 20.0, "2024-01-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChallengeError::Auth(AuthError::NotAuthenticated)));
    assert!(store.operations().is_empty());
}

#[tokio::test]
async fn create_records_stake_then_refreshes() {
    let (session, user) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    let registry = registry(session, &store);

    let created = registry
        .create(&NewChallenge::new("Run 5k", 20.0, "2024-01-01"))
        .await
        .unwrap();

    assert_eq!(created.user_id, user.id);
    assert_eq!(created.status, ChallengeStatus::Active);
    assert_eq!(created.stake_type, "money");

    let ops: Vec<(Operation, Table)> = store.operations().into_iter().map(|r| (r.op, r.table)).collect();
    assert_eq!(
        ops,
        [
            (Operation::Insert, Table::Challenges),
            (Operation::Insert, Table::Transactions),
            (Operation::Select, Table::Challenges),
        ]
    );

    let ledger = transactions(&store);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0]["type"], "stake");
    assert_eq!(ledger[0]["amount"], 20.0);
    assert_eq!(ledger[0]["status"], "completed");
    assert_eq!(ledger[0]["challenge_id"], json!(created.id));
    assert_eq!(ledger[0]["user_id"], json!(user.id));

    assert_eq!(registry.challenges(), vec![created]);
}

#[tokio::test]
async fn create_insert_payload_stamps_owner() {
    let (session, user) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    let registry = registry(session, &store);

    registry
        .create(&NewChallenge::new("Read", 5.0, "2024-02-01").with_stake_type("pushups"))
        .await
        .unwrap();

    let inserts = store.operations_on(Operation::Insert, Table::Challenges);
    assert_eq!(inserts.len(), 1);
    let payload = &inserts[0].payload;
    assert_eq!(payload["user_id"], json!(user.id));
    assert_eq!(payload["stake_type"], "pushups");
    assert!(payload.get("status").is_none());
}

#[tokio::test]
async fn create_leaves_challenge_when_ledger_insert_fails() {
    let (session, _) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    let registry = registry(session, &store);
    store.fail_next(Operation::Insert, Table::Transactions, "ledger offline");

    let err = registry
        .create(&NewChallenge::new("Run 5k", 20.0, "2024-01-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChallengeError::Store(StoreError::Rejected { table: "transactions", .. })));
    assert_eq!(store.rows(Table::Challenges).len(), 1);
    assert!(transactions(&store).is_empty());
    // No refresh on the failure path.
    assert!(registry.challenges().is_empty());
}

#[tokio::test]
async fn create_challenge_insert_failure_writes_nothing_else() {
    let (session, _) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    let registry = registry(session, &store);
    store.fail_next(Operation::Insert, Table::Challenges, "check constraint");

    let err = registry
        .create(&NewChallenge::new("Run 5k", -1.0, "2024-01-01"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E_STORE_REJECTED");
    assert!(store.operations().is_empty());
}

// =============================================================================
// transition_status
// =============================================================================

async fn registry_with_cached(status: &str) -> (ChallengeRegistry, Arc<MemoryStore>, Uuid) {
    let (session, user) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    let row = challenge_row(user.id, "Run 5k", 20.0, status, "2024-01-01T00:00:00Z");
    let id: Uuid = serde_json::from_value(row["id"].clone()).unwrap();
    store.seed(Table::Challenges, [row]);
    let registry = registry(session, &store);
    registry.fetch_all().await.unwrap();
    (registry, store, id)
}

#[tokio::test]
async fn completing_records_refund() {
    let (registry, store, id) = registry_with_cached("active").await;

    registry.transition_status(id, TerminalStatus::Completed).await.unwrap();

    let ledger = transactions(&store);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0]["type"], "refund");
    assert_eq!(ledger[0]["amount"], 20.0);
    assert_eq!(ledger[0]["status"], "completed");

    let cached = registry.challenges();
    assert_eq!(cached[0].status, ChallengeStatus::Completed);
    assert!(cached[0].completed_at.is_some());
    assert_eq!(registry.completed().len(), 1);
    assert!(registry.active().is_empty());
}

#[tokio::test]
async fn failing_records_loss() {
    let (registry, store, id) = registry_with_cached("active").await;

    registry.transition_status(id, TerminalStatus::Failed).await.unwrap();

    let ledger = transactions(&store);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0]["type"], "loss");
    assert_eq!(registry.failed().len(), 1);
    assert!(registry.failed()[0].completed_at.is_some());
}

#[tokio::test]
async fn uncached_challenge_is_updated_without_ledger_entry() {
    let (session, user) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    let row = challenge_row(user.id, "Run 5k", 20.0, "active", "2024-01-01T00:00:00Z");
    let id: Uuid = serde_json::from_value(row["id"].clone()).unwrap();
    store.seed(Table::Challenges, [row]);
    // Cache never populated.
    let registry = registry(session, &store);

    registry.transition_status(id, TerminalStatus::Completed).await.unwrap();

    assert_eq!(store.operations_on(Operation::Update, Table::Challenges).len(), 1);
    assert!(transactions(&store).is_empty());
    assert_eq!(store.rows(Table::Challenges)[0]["status"], "completed");
    assert_eq!(registry.completed().len(), 1);
}

#[tokio::test]
async fn stale_cache_amount_is_used_for_ledger() {
    let (registry, store, id) = registry_with_cached("active").await;
    // Store changes behind the cache's back.
    store
        .update(Table::Challenges, &[Filter::eq("id", id)], json!({ "stake_amount": 99.0 }))
        .await
        .unwrap();

    registry.transition_status(id, TerminalStatus::Completed).await.unwrap();
    assert_eq!(transactions(&store)[0]["amount"], 20.0);
}

#[tokio::test]
async fn transition_update_failure_records_nothing() {
    let (registry, store, id) = registry_with_cached("active").await;
    store.fail_next(Operation::Update, Table::Challenges, "row locked");

    let err = registry
        .transition_status(id, TerminalStatus::Failed)
        .await
        .unwrap_err();
    assert!(matches!(err, ChallengeError::Store(_)));
    assert!(transactions(&store).is_empty());
    assert_eq!(registry.active().len(), 1);
}

#[tokio::test]
async fn transition_ledger_requires_session() {
    let (registry, store, id) = registry_with_cached("active").await;
    registry.session.sign_out().await.unwrap();

    let err = registry
        .transition_status(id, TerminalStatus::Completed)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "E_NOT_AUTHENTICATED");
    // The status update already landed.
    assert_eq!(store.rows(Table::Challenges)[0]["status"], "completed");
    assert!(transactions(&store).is_empty());
}

#[tokio::test]
async fn reset_clears_cache() {
    let (registry, _store, _id) = registry_with_cached("active").await;
    assert_eq!(registry.challenges().len(), 1);
    registry.reset();
    assert!(registry.challenges().is_empty());
}

#[tokio::test]
async fn watchers_see_refreshed_list() {
    let (session, _) = signed_in_provider();
    let store = Arc::new(MemoryStore::new());
    let registry = registry(session, &store);
    let mut rx = registry.watch();

    registry
        .create(&NewChallenge::new("Run 5k", 20.0, "2024-01-01"))
        .await
        .unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().len(), 1);
}
