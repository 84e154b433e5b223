//! Black-box batch-application scenarios, driven against the in-memory
//! `MockStore` fake rather than a live SurrealDB instance (§8 of the
//! design notes in `DESIGN.md`). Each test mirrors one of the spec's
//! literal scenarios end to end: define the table, apply one or more
//! batch rows through the write-path functions, then assert on the
//! stored state.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use surreal_fivetran_destination::csv_pipeline::{Cell, Row};
use surreal_fivetran_destination::pk;
use surreal_fivetran_destination::schema;
use surreal_fivetran_destination::store::mock::MockStore;
use surreal_fivetran_destination::store::RecordStore;
use surreal_fivetran_destination::types::{column_type_map, LogicalColumn, LogicalTable, LogicalType, Value};
use surreal_fivetran_destination::write::{history, live};

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Cell::Value(v.to_string())))
        .collect()
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

async fn fetch(
    store: &MockStore,
    table: &LogicalTable,
    key: &[Value],
) -> HashMap<String, Value> {
    let column_types = column_type_map(table);
    let pk_names = pk::key_column_names(table);
    store
        .select_one(&table.name, key, &column_types, &pk_names)
        .await
        .unwrap()
        .unwrap()
}

// S1: live-mode replace with a composite PK.
#[tokio::test]
async fn s1_live_replace_with_composite_pk() {
    let store = MockStore::new();
    let table = LogicalTable::new(
        "transactions",
        vec![
            LogicalColumn::new("user_id", LogicalType::String).primary_key(),
            LogicalColumn::new("transaction_id", LogicalType::String).primary_key(),
            LogicalColumn::new("amount", LogicalType::Float),
        ],
    );
    schema::define_table(&store, &table).await.unwrap();

    for (user, txn, amount) in [
        ("user1", "txn1", "100.50"),
        ("user1", "txn2", "200.75"),
        ("user2", "txn1", "150.25"),
    ] {
        live::apply_replace(
            &store,
            &table,
            row(&[("user_id", user), ("transaction_id", txn), ("amount", amount)]),
        )
        .await
        .unwrap();
    }

    assert_eq!(store.row_count("transactions"), 3);
    let stored = fetch(
        &store,
        &table,
        &[Value::String("user1".into()), Value::String("txn1".into())],
    )
    .await;
    assert_eq!(stored.get("amount"), Some(&Value::Float(100.50)));
}

// S2: unmodified sentinel in a live update.
#[tokio::test]
async fn s2_live_update_with_unmodified_sentinel() {
    let store = MockStore::new();
    let table = LogicalTable::new(
        "users",
        vec![
            LogicalColumn::new("user_id", LogicalType::String).primary_key(),
            LogicalColumn::new("name", LogicalType::String),
            LogicalColumn::new("age", LogicalType::Int),
            LogicalColumn::new("active", LogicalType::Bool),
        ],
    );
    schema::define_table(&store, &table).await.unwrap();

    live::apply_replace(
        &store,
        &table,
        row(&[
            ("user_id", "user1"),
            ("name", "Alice"),
            ("age", "25"),
            ("active", "true"),
        ]),
    )
    .await
    .unwrap();

    let update_row: Row = vec![
        ("user_id".to_string(), Cell::Value("user1".to_string())),
        ("name".to_string(), Cell::Unmodified),
        ("age".to_string(), Cell::Value("26".to_string())),
        ("active".to_string(), Cell::Unmodified),
    ];
    live::apply_update(&store, &table, update_row).await.unwrap();

    let stored = fetch(&store, &table, &[Value::String("user1".into())]).await;
    assert_eq!(stored.get("name"), Some(&Value::String("Alice".into())));
    assert_eq!(stored.get("age"), Some(&Value::Int(26)));
    assert_eq!(stored.get("active"), Some(&Value::Bool(true)));
}

fn history_table() -> LogicalTable {
    LogicalTable::new(
        "users_history",
        vec![
            LogicalColumn::new("user_id", LogicalType::String).primary_key(),
            LogicalColumn::new("name", LogicalType::String),
            LogicalColumn::new("age", LogicalType::Int),
            LogicalColumn::new("active", LogicalType::Bool),
            LogicalColumn::new("_fivetran_start", LogicalType::UtcDateTime),
            LogicalColumn::new("_fivetran_end", LogicalType::UtcDateTime),
            LogicalColumn::new("_fivetran_active", LogicalType::Bool),
        ],
    )
}

// S3: history update back-fills unchanged columns and closes the
// previous version exactly one millisecond before the new one opens.
#[tokio::test]
async fn s3_history_update_backfill() {
    let store = MockStore::new();
    let table = history_table();
    schema::define_table(&store, &table).await.unwrap();

    let t1 = ts("2024-01-01T12:00:00Z");
    let t2 = ts("2024-01-02T12:00:00Z");

    history::apply_replace(
        &store,
        &table,
        row(&[
            ("user_id", "user1"),
            ("name", "Alice"),
            ("age", "25"),
            ("active", "true"),
        ]),
        t1,
    )
    .await
    .unwrap();

    let update_row: Row = vec![
        ("user_id".to_string(), Cell::Value("user1".to_string())),
        ("name".to_string(), Cell::Value("Alice Updated".to_string())),
        ("age".to_string(), Cell::Unmodified),
        ("active".to_string(), Cell::Value("false".to_string())),
    ];
    history::apply_update(&store, &table, update_row, t2).await.unwrap();

    assert_eq!(store.row_count("users_history"), 2);

    let v1 = fetch(&store, &table, &[Value::String("user1".into()), Value::DateTime(t1)]).await;
    assert_eq!(v1.get("_fivetran_active"), Some(&Value::Bool(false)));
    assert_eq!(
        v1.get("_fivetran_end"),
        Some(&Value::DateTime(t2 - chrono::Duration::milliseconds(1)))
    );
    assert_eq!(v1.get("name"), Some(&Value::String("Alice".into())));
    assert_eq!(v1.get("age"), Some(&Value::Int(25)));

    let v2 = fetch(&store, &table, &[Value::String("user1".into()), Value::DateTime(t2)]).await;
    assert_eq!(v2.get("_fivetran_active"), Some(&Value::Bool(true)));
    assert_eq!(v2.get("name"), Some(&Value::String("Alice Updated".into())));
    assert_eq!(v2.get("age"), Some(&Value::Int(25)));
    assert_eq!(v2.get("active"), Some(&Value::Bool(false)));
}

// S4: history delete without an explicit start time closes whatever the
// current active version is.
#[tokio::test]
async fn s4_history_delete_without_start_time() {
    let store = MockStore::new();
    let table = history_table();
    schema::define_table(&store, &table).await.unwrap();

    let t1 = ts("2024-01-01T12:00:00Z");
    let t3 = ts("2024-01-03T12:00:00Z");

    history::apply_replace(
        &store,
        &table,
        row(&[
            ("user_id", "user1"),
            ("name", "Alice"),
            ("age", "25"),
            ("active", "true"),
        ]),
        t1,
    )
    .await
    .unwrap();

    history::apply_delete(&store, &table, row(&[("user_id", "user1")]), t3)
        .await
        .unwrap();

    assert_eq!(store.row_count("users_history"), 1);
    let v1 = fetch(&store, &table, &[Value::String("user1".into()), Value::DateTime(t1)]).await;
    assert_eq!(v1.get("_fivetran_active"), Some(&Value::Bool(false)));
    assert_eq!(v1.get("_fivetran_end"), Some(&Value::DateTime(t3)));
}

// S5: earliest-start truncation deletes every version at or after the
// cutoff and reopens whatever survives as the new closed tail.
#[tokio::test]
async fn s5_earliest_start_truncation() {
    let store = MockStore::new();
    let table = history_table();
    schema::define_table(&store, &table).await.unwrap();

    let t1 = ts("2024-01-01T00:00:00Z");
    let t2 = ts("2024-01-02T00:00:00Z");
    let t3 = ts("2024-01-03T00:00:00Z");

    for (start, age) in [(t1, "25"), (t2, "26"), (t3, "27")] {
        history::apply_replace(
            &store,
            &table,
            row(&[("user_id", "user1"), ("name", "Alice"), ("age", age), ("active", "true")]),
            start,
        )
        .await
        .unwrap();
    }
    assert_eq!(store.row_count("users_history"), 3);

    history::apply_earliest_start(&store, &table, row(&[("user_id", "user1")]), t2)
        .await
        .unwrap();

    assert_eq!(store.row_count("users_history"), 1);
    let survivor = fetch(&store, &table, &[Value::String("user1".into()), Value::DateTime(t1)]).await;
    assert_eq!(survivor.get("_fivetran_active"), Some(&Value::Bool(false)));
    assert_eq!(
        survivor.get("_fivetran_end"),
        Some(&Value::DateTime(t2 - chrono::Duration::milliseconds(1)))
    );
}

// S6: a single-PK `id` column still produces a composite (array-shaped)
// record id, never a bare scalar key.
#[tokio::test]
async fn s6_single_pk_named_id_is_still_composite() {
    let store = MockStore::new();
    let table = LogicalTable::new(
        "products",
        vec![
            LogicalColumn::new("id", LogicalType::Int).primary_key(),
            LogicalColumn::new("name", LogicalType::String),
            LogicalColumn::new("price", LogicalType::Float),
        ],
    );
    schema::define_table(&store, &table).await.unwrap();

    for (id, name, price) in [(1, "widget", "9.99"), (2, "gadget", "19.99"), (3, "gizmo", "29.99")] {
        live::apply_replace(
            &store,
            &table,
            row(&[("id", &id.to_string()), ("name", name), ("price", price)]),
        )
        .await
        .unwrap();
    }

    assert_eq!(store.row_count("products"), 3);
    let stored = fetch(&store, &table, &[Value::Int(2)]).await;
    assert_eq!(stored.get("name"), Some(&Value::String("gadget".into())));

    // The PK assembler always wraps the key in an array, even for a
    // single logical PK column (§3 composite record id invariant).
    let key = pk::assemble(
        &table,
        &[("id".to_string(), Value::Int(1))].into_iter().collect(),
    )
    .unwrap();
    assert_eq!(key, vec![Value::Int(1)]);
}

// Idempotent replay: applying the same live-mode replace batch twice
// yields the same stored state (§8 universal invariant 5).
#[tokio::test]
async fn idempotent_replay_of_a_live_replace_batch() {
    let store = MockStore::new();
    let table = LogicalTable::new(
        "users",
        vec![
            LogicalColumn::new("user_id", LogicalType::Int).primary_key(),
            LogicalColumn::new("name", LogicalType::String),
        ],
    );
    schema::define_table(&store, &table).await.unwrap();

    let apply_batch = || async {
        live::apply_replace(&store, &table, row(&[("user_id", "1"), ("name", "alice")]))
            .await
            .unwrap();
    };
    apply_batch().await;
    apply_batch().await;

    assert_eq!(store.row_count("users"), 1);
    let stored = fetch(&store, &table, &[Value::Int(1)]).await;
    assert_eq!(stored.get("name"), Some(&Value::String("alice".into())));
}
