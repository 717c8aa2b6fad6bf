use bcast_protocol::{Broadcast, BroadcastStats, BroadcastStatus, BroadcastSummary, Priority, TargetKind, TargetSpec};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

fn status_str(status: BroadcastStatus) -> &'static str {
    match status {
        BroadcastStatus::Scheduled => "SCHEDULED",
        BroadcastStatus::Ready => "READY",
        BroadcastStatus::Active => "ACTIVE",
        BroadcastStatus::Expired => "EXPIRED",
        BroadcastStatus::Cancelled => "CANCELLED",
    }
}

fn parse_status(raw: &str) -> BroadcastStatus {
    match raw {
        "SCHEDULED" => BroadcastStatus::Scheduled,
        "READY" => BroadcastStatus::Ready,
        "ACTIVE" => BroadcastStatus::Active,
        "EXPIRED" => BroadcastStatus::Expired,
        "CANCELLED" => BroadcastStatus::Cancelled,
        other => unreachable!("unknown broadcast status in database: {other}"),
    }
}

fn priority_str(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "LOW",
        Priority::Normal => "NORMAL",
        Priority::High => "HIGH",
        Priority::Urgent => "URGENT",
    }
}

fn parse_priority(raw: &str) -> Priority {
    match raw {
        "LOW" => Priority::Low,
        "NORMAL" => Priority::Normal,
        "HIGH" => Priority::High,
        "URGENT" => Priority::Urgent,
        other => unreachable!("unknown priority in database: {other}"),
    }
}

fn target_kind_str(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::All => "ALL",
        TargetKind::Selected => "SELECTED",
        TargetKind::Role => "ROLE",
        TargetKind::Product => "PRODUCT",
    }
}

fn parse_target_kind(raw: &str) -> TargetKind {
    match raw {
        "ALL" => TargetKind::All,
        "SELECTED" => TargetKind::Selected,
        "ROLE" => TargetKind::Role,
        "PRODUCT" => TargetKind::Product,
        other => unreachable!("unknown target kind in database: {other}"),
    }
}

fn row_to_broadcast(row: &sqlx::postgres::PgRow) -> Broadcast {
    let target_ids: serde_json::Value = row.get("target_ids");
    let ids: Vec<String> = serde_json::from_value(target_ids).unwrap_or_default();
    Broadcast {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        sender_name: row.get("sender_name"),
        content: row.get("content"),
        target: TargetSpec {
            kind: parse_target_kind(row.get::<String, _>("target_kind").as_str()),
            ids,
        },
        priority: parse_priority(row.get::<String, _>("priority").as_str()),
        category: row.get("category"),
        scheduled_at: row.get("scheduled_at"),
        expires_at: row.get("expires_at"),
        fire_and_forget: row.get("fire_and_forget"),
        status: parse_status(row.get::<String, _>("status").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct NewBroadcast {
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub target: TargetSpec,
    pub priority: Priority,
    pub category: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub fire_and_forget: bool,
}

/// Insert a broadcast row. `status` is `SCHEDULED` when `scheduled_at` is in
/// the future, `READY` otherwise (the lifecycle scheduler promotes `READY`
/// rows to `ACTIVE` on its next tick rather than racing the insert).
pub async fn create_broadcast(pool: &PgPool, new: NewBroadcast) -> Result<Broadcast, sqlx::Error> {
    let status = match new.scheduled_at {
        Some(at) if at > Utc::now() => BroadcastStatus::Scheduled,
        _ => BroadcastStatus::Ready,
    };
    let target_ids = serde_json::to_value(&new.target.ids).unwrap_or(serde_json::json!([]));

    let row = sqlx::query(
        r#"INSERT INTO broadcast_messages
               (sender_id, sender_name, content, target_kind, target_ids, priority,
                category, scheduled_at, expires_at, fire_and_forget, status)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
           RETURNING id, sender_id, sender_name, content, target_kind, target_ids,
                     priority, category, scheduled_at, expires_at, fire_and_forget,
                     status, created_at, updated_at"#,
    )
    .bind(&new.sender_id)
    .bind(&new.sender_name)
    .bind(&new.content)
    .bind(target_kind_str(new.target.kind))
    .bind(target_ids)
    .bind(priority_str(new.priority))
    .bind(&new.category)
    .bind(new.scheduled_at)
    .bind(new.expires_at)
    .bind(new.fire_and_forget)
    .bind(status_str(status))
    .fetch_one(pool)
    .await?;

    Ok(row_to_broadcast(&row))
}

pub async fn get_broadcast(pool: &PgPool, id: i64) -> Result<Option<Broadcast>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, sender_id, sender_name, content, target_kind, target_ids, priority,
                  category, scheduled_at, expires_at, fire_and_forget, status, created_at, updated_at
           FROM broadcast_messages WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_broadcast))
}

fn row_to_broadcast_summary(row: &sqlx::postgres::PgRow) -> BroadcastSummary {
    let stats = row.try_get::<i64, _>("total_targeted").ok().map(|total_targeted| BroadcastStats {
        broadcast_id: row.get("id"),
        total_targeted,
        total_delivered: row.get("total_delivered"),
        total_read: row.get("total_read"),
    });
    BroadcastSummary { broadcast: row_to_broadcast(row), stats }
}

/// `status`: `None` lists every broadcast (`filter=all`); `Some` restricts to
/// that single status (`filter=active` / `filter=scheduled`). Denormalized
/// stats are attached via a left join so a broadcast with no fan-out yet
/// (no `broadcast_statistics` row) still lists with `stats: null`.
pub async fn list_broadcast_summaries(
    pool: &PgPool,
    status: Option<BroadcastStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<BroadcastSummary>, sqlx::Error> {
    let status_str = status.map(status_str);
    let rows = sqlx::query(
        r#"SELECT bm.id, bm.sender_id, bm.sender_name, bm.content, bm.target_kind, bm.target_ids,
                  bm.priority, bm.category, bm.scheduled_at, bm.expires_at, bm.fire_and_forget,
                  bm.status, bm.created_at, bm.updated_at,
                  bs.total_targeted, bs.total_delivered, bs.total_read
           FROM broadcast_messages bm
           LEFT JOIN broadcast_statistics bs ON bs.broadcast_id = bm.id
           WHERE $1::text IS NULL OR bm.status = $1
           ORDER BY bm.created_at DESC LIMIT $2 OFFSET $3"#,
    )
    .bind(status_str)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_broadcast_summary).collect())
}

/// Transition a broadcast's status, provided it is currently one of
/// `from`. Returns `false` (no rows touched) if the broadcast was already
/// moved on by a racing scheduler tick or admin cancel.
async fn transition(
    pool: &PgPool,
    id: i64,
    from: &[BroadcastStatus],
    to: BroadcastStatus,
) -> Result<bool, sqlx::Error> {
    let from_strs: Vec<&'static str> = from.iter().copied().map(status_str).collect();
    let result = sqlx::query(
        r#"UPDATE broadcast_messages SET status = $1, updated_at = now()
           WHERE id = $2 AND status = ANY($3)"#,
    )
    .bind(status_str(to))
    .bind(id)
    .bind(&from_strs)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn activate(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    transition(pool, id, &[BroadcastStatus::Ready, BroadcastStatus::Scheduled], BroadcastStatus::Active).await
}

pub async fn expire(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    transition(pool, id, &[BroadcastStatus::Active], BroadcastStatus::Expired).await
}

pub async fn cancel(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    transition(
        pool,
        id,
        &[BroadcastStatus::Scheduled, BroadcastStatus::Ready, BroadcastStatus::Active],
        BroadcastStatus::Cancelled,
    )
    .await
}

/// Scheduled broadcasts whose `scheduled_at` has passed; the lifecycle
/// scheduler promotes these to `READY` so the fan-out orchestrator picks
/// them up on its next poll. Capped at `limit` per tick so one activator
/// pass can't monopolize the shedlock lease on a backlog.
pub async fn due_scheduled(pool: &PgPool, now: DateTime<Utc>, limit: i64) -> Result<Vec<i64>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id FROM broadcast_messages WHERE status = 'SCHEDULED' AND scheduled_at <= $1 ORDER BY scheduled_at ASC LIMIT $2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

pub async fn mark_ready(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    transition(pool, id, &[BroadcastStatus::Scheduled], BroadcastStatus::Ready).await
}

/// Used only by the create-broadcast handler for a broadcast whose
/// `expires_at` is already in the past at creation time: recorded for the
/// audit trail, never activated or fanned out.
pub async fn expire_immediately(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    transition(
        pool,
        id,
        &[BroadcastStatus::Ready, BroadcastStatus::Scheduled],
        BroadcastStatus::Expired,
    )
    .await
}

/// `READY` broadcasts the fan-out orchestrator has not yet expanded.
pub async fn ready_for_fanout(pool: &PgPool) -> Result<Vec<Broadcast>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, sender_id, sender_name, content, target_kind, target_ids, priority,
                  category, scheduled_at, expires_at, fire_and_forget, status, created_at, updated_at
           FROM broadcast_messages WHERE status = 'READY' ORDER BY created_at ASC"#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_broadcast).collect())
}

/// Broadcasts whose `expires_at` has passed and are still `ACTIVE`.
pub async fn due_expiry(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id FROM broadcast_messages WHERE status = 'ACTIVE' AND expires_at IS NOT NULL AND expires_at <= $1",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

/// `ACTIVE` broadcasts created with `fire_and_forget`, candidates for the
/// stale-GC's abandoned-broadcast sweep.
pub async fn active_fire_and_forget(pool: &PgPool) -> Result<Vec<i64>, sqlx::Error> {
    let rows = sqlx::query("SELECT id FROM broadcast_messages WHERE status = 'ACTIVE' AND fire_and_forget = TRUE")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

/// `ACTIVE` `fire_and_forget` broadcasts activated before `cutoff`, i.e. due
/// for the TTL half of the auto-expire rule regardless of whether any
/// targeted recipient is still connected. `updated_at` is the activation
/// timestamp since `transition` bumps it on every status change.
pub async fn fire_and_forget_due_by_ttl(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id FROM broadcast_messages WHERE status = 'ACTIVE' AND fire_and_forget = TRUE AND updated_at <= $1",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

pub async fn upsert_statistics(pool: &PgPool, broadcast_id: i64, targeted: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO broadcast_statistics (broadcast_id, total_targeted) VALUES ($1, $2)
           ON CONFLICT (broadcast_id) DO UPDATE SET total_targeted = EXCLUDED.total_targeted"#,
    )
    .bind(broadcast_id)
    .bind(targeted)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_statistics(pool: &PgPool, broadcast_id: i64) -> Result<Option<bcast_protocol::BroadcastStats>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT broadcast_id, total_targeted, total_delivered, total_read FROM broadcast_statistics WHERE broadcast_id = $1",
    )
    .bind(broadcast_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| bcast_protocol::BroadcastStats {
        broadcast_id: r.get("broadcast_id"),
        total_targeted: r.get("total_targeted"),
        total_delivered: r.get("total_delivered"),
        total_read: r.get("total_read"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_sql_strings() {
        for status in [
            BroadcastStatus::Scheduled,
            BroadcastStatus::Ready,
            BroadcastStatus::Active,
            BroadcastStatus::Expired,
            BroadcastStatus::Cancelled,
        ] {
            assert_eq!(parse_status(status_str(status)), status);
        }
    }

    #[test]
    fn priority_round_trips_through_sql_strings() {
        for priority in [Priority::Low, Priority::Normal, Priority::High, Priority::Urgent] {
            assert_eq!(parse_priority(priority_str(priority)), priority);
        }
    }
}
