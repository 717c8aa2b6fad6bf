/// Structural validation tests for the PostgreSQL migration file.
///
/// These tests validate the SQL migration schema by checking that all
/// required tables, columns, and constraints are present, without needing a
/// live Postgres container.
const MIGRATION_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/0001_init.sql");

fn read_migration() -> String {
    std::fs::read_to_string(MIGRATION_PATH).expect("migration file should exist")
}

#[test]
fn migration_file_exists_and_is_nonempty() {
    let sql = read_migration();
    assert!(!sql.trim().is_empty());
}

#[test]
fn all_required_tables_defined() {
    let sql = read_migration();
    let required_tables = [
        "broadcast_messages",
        "user_broadcast_messages",
        "broadcast_user_targets",
        "broadcast_statistics",
        "outbox_events",
        "dlt_messages",
        "device_tokens",
        "shedlock",
    ];
    for table in required_tables {
        assert!(sql.contains(&format!("CREATE TABLE {table}")), "migration must define {table}");
    }
}

#[test]
fn broadcast_messages_has_lifecycle_columns() {
    let sql = read_migration();
    for column in ["scheduled_at", "expires_at", "fire_and_forget", "status", "target_kind", "target_ids"] {
        assert!(sql.contains(column), "broadcast_messages must have {column}");
    }
}

#[test]
fn broadcast_messages_has_status_scheduled_index() {
    let sql = read_migration();
    assert!(sql.contains("idx_broadcast_messages_status_scheduled"));
}

#[test]
fn user_broadcast_messages_has_composite_pk_and_fk() {
    let sql = read_migration();
    assert!(sql.contains("PRIMARY KEY (broadcast_id, user_id)"));
    assert!(sql.contains("REFERENCES broadcast_messages (id)"));
}

#[test]
fn outbox_events_has_uuid_pk_and_topic() {
    let sql = read_migration();
    assert!(sql.contains("id           UUID PRIMARY KEY") || sql.contains("id UUID PRIMARY KEY"));
    assert!(sql.contains("topic"));
}

#[test]
fn device_tokens_has_principal_columns() {
    let sql = read_migration();
    assert!(sql.contains("principal_type"));
    assert!(sql.contains("principal_id"));
    assert!(sql.contains("token_hash") && sql.contains("BYTEA"));
    assert!(sql.contains("revoked_at"));
}

#[test]
fn shedlock_has_lease_columns() {
    let sql = read_migration();
    assert!(sql.contains("locked_by"));
    assert!(sql.contains("locked_until"));
}
