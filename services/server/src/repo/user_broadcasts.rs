use bcast_protocol::{DeliveryStatus, ReadStatus, UserBroadcastRow};
use sqlx::{PgPool, Row};

/// Matches the expansion batch size in `bcast-targeting`: a single fan-out
/// insert never sends more than this many rows in one statement.
pub const INSERT_BATCH_SIZE: usize = 1000;

fn delivery_status_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "PENDING",
        DeliveryStatus::Delivered => "DELIVERED",
        DeliveryStatus::Failed => "FAILED",
        DeliveryStatus::Superseded => "SUPERSEDED",
    }
}

fn parse_delivery_status(raw: &str) -> DeliveryStatus {
    match raw {
        "PENDING" => DeliveryStatus::Pending,
        "DELIVERED" => DeliveryStatus::Delivered,
        "FAILED" => DeliveryStatus::Failed,
        "SUPERSEDED" => DeliveryStatus::Superseded,
        other => unreachable!("unknown delivery status in database: {other}"),
    }
}

fn read_status_str(status: ReadStatus) -> &'static str {
    match status {
        ReadStatus::Unread => "UNREAD",
        ReadStatus::Read => "READ",
    }
}

fn parse_read_status(raw: &str) -> ReadStatus {
    match raw {
        "UNREAD" => ReadStatus::Unread,
        "READ" => ReadStatus::Read,
        other => unreachable!("unknown read status in database: {other}"),
    }
}

fn row_to_user_broadcast(row: &sqlx::postgres::PgRow) -> UserBroadcastRow {
    UserBroadcastRow {
        broadcast_id: row.get("broadcast_id"),
        user_id: row.get("user_id"),
        delivery_status: parse_delivery_status(row.get::<String, _>("delivery_status").as_str()),
        read_status: parse_read_status(row.get::<String, _>("read_status").as_str()),
        delivered_at: row.get("delivered_at"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Insert one `PENDING`/`UNREAD` row per targeted user, `INSERT_BATCH_SIZE`
/// rows per statement. Mirrors `repo::races::replace_participants`'s
/// one-transaction-per-bulk-load shape, but as `INSERT ... ON CONFLICT DO
/// NOTHING` rather than delete-then-reinsert, since fan-out is additive.
pub async fn insert_targets(pool: &PgPool, broadcast_id: i64, user_ids: &[String]) -> Result<u64, sqlx::Error> {
    let mut inserted = 0u64;
    let mut tx = pool.begin().await?;

    for chunk in user_ids.chunks(INSERT_BATCH_SIZE) {
        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO user_broadcast_messages (broadcast_id, user_id, delivery_status, read_status) ",
        );
        query_builder.push_values(chunk, |mut b, user_id| {
            b.push_bind(broadcast_id)
                .push_bind(user_id)
                .push_bind("PENDING")
                .push_bind("UNREAD");
        });
        query_builder.push(" ON CONFLICT (broadcast_id, user_id) DO NOTHING");

        let result = query_builder.build().execute(&mut *tx).await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn mark_delivered(pool: &PgPool, broadcast_id: i64, user_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE user_broadcast_messages SET delivery_status = 'DELIVERED', delivered_at = now(), updated_at = now()
           WHERE broadcast_id = $1 AND user_id = $2 AND delivery_status = 'PENDING'"#,
    )
    .bind(broadcast_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_read(pool: &PgPool, broadcast_id: i64, user_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE user_broadcast_messages SET read_status = 'READ', read_at = now(), updated_at = now()
           WHERE broadcast_id = $1 AND user_id = $2 AND read_status = 'UNREAD'"#,
    )
    .bind(broadcast_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark a row `FAILED` when its delivery event is dead-lettered. Idempotent:
/// a row already `FAILED` is matched and re-written with the same status.
pub async fn mark_failed(pool: &PgPool, broadcast_id: i64, user_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE user_broadcast_messages SET delivery_status = 'FAILED', updated_at = now()
           WHERE broadcast_id = $1 AND user_id = $2 AND delivery_status != 'SUPERSEDED'"#,
    )
    .bind(broadcast_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Reset a `FAILED` row back to `PENDING` ahead of a DLQ redrive republish.
pub async fn reset_to_pending(pool: &PgPool, broadcast_id: i64, user_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE user_broadcast_messages SET delivery_status = 'PENDING', delivered_at = NULL, updated_at = now()
           WHERE broadcast_id = $1 AND user_id = $2 AND delivery_status = 'FAILED'"#,
    )
    .bind(broadcast_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark still-pending rows `SUPERSEDED` when a broadcast is cancelled or
/// expires before delivery; delivered rows are left alone so read history
/// survives the transition.
pub async fn supersede_pending(pool: &PgPool, broadcast_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE user_broadcast_messages SET delivery_status = 'SUPERSEDED', updated_at = now()
           WHERE broadcast_id = $1 AND delivery_status = 'PENDING'"#,
    )
    .bind(broadcast_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// `include_read`: `false` (the default, spec-mandated) excludes `READ` rows;
/// `true` is the opt-in "everything, including already-read" listing.
pub async fn list_for_user(pool: &PgPool, user_id: &str, include_read: bool) -> Result<Vec<UserBroadcastRow>, sqlx::Error> {
    let rows = if include_read {
        sqlx::query(
            r#"SELECT broadcast_id, user_id, delivery_status, read_status, delivered_at, read_at, created_at, updated_at
               FROM user_broadcast_messages WHERE user_id = $1 ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query(
            r#"SELECT broadcast_id, user_id, delivery_status, read_status, delivered_at, read_at, created_at, updated_at
               FROM user_broadcast_messages WHERE user_id = $1 AND read_status != 'READ' ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?
    };
    Ok(rows.iter().map(row_to_user_broadcast).collect())
}

pub async fn list_for_broadcast(pool: &PgPool, broadcast_id: i64) -> Result<Vec<UserBroadcastRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT broadcast_id, user_id, delivery_status, read_status, delivered_at, read_at, created_at, updated_at
           FROM user_broadcast_messages WHERE broadcast_id = $1 ORDER BY user_id ASC"#,
    )
    .bind(broadcast_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_user_broadcast).collect())
}

pub async fn recompute_statistics(pool: &PgPool, broadcast_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE broadcast_statistics SET
               total_delivered = (SELECT COUNT(*) FROM user_broadcast_messages WHERE broadcast_id = $1 AND delivery_status = 'DELIVERED'),
               total_read = (SELECT COUNT(*) FROM user_broadcast_messages WHERE broadcast_id = $1 AND read_status = 'READ')
           WHERE broadcast_id = $1"#,
    )
    .bind(broadcast_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_users_for_broadcast(pool: &PgPool, broadcast_id: i64) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT user_id FROM user_broadcast_messages WHERE broadcast_id = $1")
        .bind(broadcast_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("user_id")).collect())
}

/// Every user with at least one `PENDING` row, regardless of broadcast —
/// used by the scheduler's stale-connection GC to decide whose pending
/// buffer still needs a redelivery attempt.
pub async fn users_with_pending(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT DISTINCT user_id FROM user_broadcast_messages WHERE delivery_status = 'PENDING'")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("user_id")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_round_trips() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
            DeliveryStatus::Superseded,
        ] {
            assert_eq!(parse_delivery_status(delivery_status_str(status)), status);
        }
    }

    #[test]
    fn read_status_round_trips() {
        for status in [ReadStatus::Unread, ReadStatus::Read] {
            assert_eq!(parse_read_status(read_status_str(status)), status);
        }
    }
}
