use chrono::{Duration, Utc};
use sqlx::PgPool;

/// Attempt to take (or renew) the named lock for `holder`. Succeeds if the
/// row doesn't exist yet, is already held by `holder`, or its lease has
/// expired. Every other pod's attempt during a live lease affects zero
/// rows and returns `false`.
pub async fn try_acquire(
    pool: &PgPool,
    name: &str,
    holder: &str,
    lease: Duration,
) -> Result<bool, sqlx::Error> {
    let locked_until = Utc::now() + lease;
    let result = sqlx::query(
        r#"INSERT INTO shedlock (name, locked_by, locked_until) VALUES ($1, $2, $3)
           ON CONFLICT (name) DO UPDATE
               SET locked_by = EXCLUDED.locked_by, locked_until = EXCLUDED.locked_until
               WHERE shedlock.locked_by = EXCLUDED.locked_by OR shedlock.locked_until < now()"#,
    )
    .bind(name)
    .bind(holder)
    .bind(locked_until)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Give up the lock early, e.g. on graceful shutdown, so the next pod
/// doesn't have to wait out the full lease.
pub async fn release(pool: &PgPool, name: &str, holder: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM shedlock WHERE name = $1 AND locked_by = $2")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}
