use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct TokenRow {
    pub token_id: Uuid,
    pub principal_type: String,
    pub principal_id: String,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}

pub async fn list(pool: &PgPool) -> Result<Vec<TokenRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT token_id, principal_type, principal_id, created_at, (revoked_at IS NOT NULL) AS revoked
           FROM device_tokens ORDER BY created_at ASC"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| TokenRow {
            token_id: r.get("token_id"),
            principal_type: r.get("principal_type"),
            principal_id: r.get("principal_id"),
            created_at: r.get("created_at"),
            revoked: r.get("revoked"),
        })
        .collect())
}

pub async fn insert(
    pool: &PgPool,
    token_hash: &[u8],
    principal_type: &str,
    principal_id: &str,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO device_tokens (token_hash, principal_type, principal_id)
           VALUES ($1, $2, $3) RETURNING token_id"#,
    )
    .bind(token_hash)
    .bind(principal_type)
    .bind(principal_id)
    .fetch_one(pool)
    .await?;
    Ok(row.get("token_id"))
}

pub async fn revoke(pool: &PgPool, token_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE device_tokens SET revoked_at = now() WHERE token_id = $1 AND revoked_at IS NULL",
    )
    .bind(token_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
