use bcast_protocol::DltEntry;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct NewDltEntry {
    pub original_topic: String,
    pub original_partition: i32,
    pub original_offset: i64,
    pub original_key: Option<String>,
    pub payload: serde_json::Value,
    pub failure_summary: String,
    pub failure_detail: Option<String>,
}

pub async fn insert(pool: &PgPool, entry: NewDltEntry) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO dlt_messages
               (id, original_topic, original_partition, original_offset, original_key,
                payload, failure_summary, failure_detail)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
    )
    .bind(id)
    .bind(&entry.original_topic)
    .bind(entry.original_partition)
    .bind(entry.original_offset)
    .bind(&entry.original_key)
    .bind(&entry.payload)
    .bind(&entry.failure_summary)
    .bind(&entry.failure_detail)
    .execute(pool)
    .await?;
    Ok(id)
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> DltEntry {
    DltEntry {
        id: row.get("id"),
        original_topic: row.get("original_topic"),
        original_partition: row.get("original_partition"),
        original_offset: row.get("original_offset"),
        original_key: row.get("original_key"),
        payload: row.get("payload"),
        failure_summary: row.get("failure_summary"),
        failure_detail: row.get("failure_detail"),
        failed_at: row.get("failed_at"),
    }
}

pub async fn list(pool: &PgPool, origin_topic: Option<&str>) -> Result<Vec<DltEntry>, sqlx::Error> {
    let rows = match origin_topic {
        Some(topic) => {
            sqlx::query(
                r#"SELECT id, original_topic, original_partition, original_offset, original_key,
                          payload, failure_summary, failure_detail, failed_at
                   FROM dlt_messages WHERE original_topic = $1 ORDER BY failed_at ASC"#,
            )
            .bind(topic)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"SELECT id, original_topic, original_partition, original_offset, original_key,
                          payload, failure_summary, failure_detail, failed_at
                   FROM dlt_messages ORDER BY failed_at ASC"#,
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.iter().map(row_to_entry).collect())
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<DltEntry>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, original_topic, original_partition, original_offset, original_key,
                  payload, failure_summary, failure_detail, failed_at
           FROM dlt_messages WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_entry))
}

pub async fn purge(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM dlt_messages WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn purge_all(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM dlt_messages").execute(pool).await?;
    Ok(result.rows_affected())
}
