use bcast_protocol::OutboxRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// Insert an outbox row in the same transaction as the domain write that
/// produced it, so the event is durable iff the write committed.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: &str,
    event_type: &str,
    topic: &str,
    payload: &serde_json::Value,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO outbox_events (id, aggregate_id, event_type, topic, payload)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(id)
    .bind(aggregate_id)
    .bind(event_type)
    .bind(topic)
    .bind(payload)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Oldest-first page of unpublished rows; the relay polls this on a tight
/// loop and deletes each row once the publish to the bus succeeds.
pub async fn fetch_batch(pool: &PgPool, limit: i64) -> Result<Vec<OutboxRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, aggregate_id, event_type, topic, payload, created_at
           FROM outbox_events ORDER BY created_at ASC LIMIT $1"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| OutboxRow {
            id: r.get("id"),
            aggregate_id: r.get("aggregate_id"),
            event_type: r.get("event_type"),
            topic: r.get("topic"),
            payload: r.get("payload"),
            created_at: r.get("created_at"),
        })
        .collect())
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM outbox_events WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
