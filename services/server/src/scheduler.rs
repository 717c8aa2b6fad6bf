use std::time::Duration;

use bcast_eventbus::ORCHESTRATION_TOPIC;
use bcast_protocol::OrchestrationEvent;
use chrono::Duration as ChronoDuration;
use tracing::{error, info, warn};

use crate::repo;
use crate::state::AppState;

const ACTIVATOR_INTERVAL: Duration = Duration::from_secs(60);
const EXPIRER_INTERVAL: Duration = Duration::from_secs(60);
const STALE_GC_INTERVAL: Duration = Duration::from_secs(10);
const FIRE_AND_FORGET_TTL_INTERVAL: Duration = Duration::from_secs(60);
const STALE_THRESHOLD: ChronoDuration = ChronoDuration::seconds(90);
const LOCK_LEASE: ChronoDuration = ChronoDuration::seconds(120);
const ACTIVATOR_BATCH: i64 = 100;

/// A `fire_and_forget` broadcast auto-expires once every targeted recipient
/// has disconnected (see `expire_abandoned_fire_and_forget`), or after this
/// TTL elapses since activation, whichever comes first.
const FIRE_AND_FORGET_TTL: ChronoDuration = ChronoDuration::minutes(15);

pub async fn run(state: AppState, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut activator_tick = tokio::time::interval(ACTIVATOR_INTERVAL);
    let mut expirer_tick = tokio::time::interval(EXPIRER_INTERVAL);
    let mut stale_gc_tick = tokio::time::interval(STALE_GC_INTERVAL);
    let mut fnf_ttl_tick = tokio::time::interval(FIRE_AND_FORGET_TTL_INTERVAL);

    loop {
        tokio::select! {
            _ = activator_tick.tick() => run_activator(&state).await,
            _ = expirer_tick.tick() => run_expirer(&state).await,
            _ = stale_gc_tick.tick() => run_stale_gc(&state).await,
            _ = fnf_ttl_tick.tick() => run_fire_and_forget_ttl_sweep(&state).await,
            _ = shutdown.changed() => {
                info!("lifecycle scheduler shutting down");
                break;
            }
        }
    }
}

async fn with_lock(state: &AppState, name: &str, work: impl std::future::Future<Output = ()>) {
    match repo::shedlock::try_acquire(&state.pool, name, &state.pod_id, LOCK_LEASE).await {
        Ok(true) => work.await,
        Ok(false) => {}
        Err(err) => warn!(lock = name, error = %err, "failed to check leader lock"),
    }
}

/// Exposed `pub` (rather than `pub(crate)`) so integration tests can drive a
/// single sweep directly against a `FixedClock`-backed `AppState` instead of
/// waiting on `run`'s real-time ticks.
pub async fn run_activator(state: &AppState) {
    with_lock(state, "scheduler-activator", async {
        let due = match repo::broadcasts::due_scheduled(&state.pool, state.clock.now(), ACTIVATOR_BATCH).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "activator: failed to query due broadcasts");
                return;
            }
        };
        for broadcast_id in due {
            if let Err(err) = promote_and_publish(state, broadcast_id).await {
                error!(broadcast_id, error = %err, "activator: failed to promote broadcast");
            }
        }
    })
    .await;
}

async fn promote_and_publish(state: &AppState, broadcast_id: i64) -> Result<(), sqlx::Error> {
    let promoted = repo::broadcasts::mark_ready(&state.pool, broadcast_id).await?;
    if !promoted {
        return Ok(());
    }
    let mut tx = state.pool.begin().await?;
    let payload = serde_json::to_value(OrchestrationEvent::Activate { broadcast_id }).unwrap();
    repo::outbox::insert(&mut tx, &broadcast_id.to_string(), "Activate", ORCHESTRATION_TOPIC, &payload).await?;
    tx.commit().await?;
    info!(broadcast_id, "activator: published activation event");
    Ok(())
}

pub async fn run_expirer(state: &AppState) {
    with_lock(state, "scheduler-expirer", async {
        let due = match repo::broadcasts::due_expiry(&state.pool, state.clock.now()).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "expirer: failed to query due broadcasts");
                return;
            }
        };
        for broadcast_id in due {
            if let Err(err) = expire_and_publish(state, broadcast_id).await {
                error!(broadcast_id, error = %err, "expirer: failed to expire broadcast");
            }
        }
    })
    .await;
}

async fn expire_and_publish(state: &AppState, broadcast_id: i64) -> Result<(), sqlx::Error> {
    let expired = repo::broadcasts::expire(&state.pool, broadcast_id).await?;
    if !expired {
        return Ok(());
    }
    repo::user_broadcasts::supersede_pending(&state.pool, broadcast_id).await?;

    let mut tx = state.pool.begin().await?;
    let payload = serde_json::to_value(OrchestrationEvent::Expire { broadcast_id }).unwrap();
    repo::outbox::insert(&mut tx, &broadcast_id.to_string(), "Expire", ORCHESTRATION_TOPIC, &payload).await?;
    tx.commit().await?;
    info!(broadcast_id, "expirer: published expiry event");
    Ok(())
}

pub async fn run_stale_gc(state: &AppState) {
    with_lock(state, "scheduler-stale-gc", async {
        let cutoff = state.clock.now() - STALE_THRESHOLD;
        let stale = match state.registry.stale_before(cutoff).await {
            Ok(stale) => stale,
            Err(err) => {
                error!(error = %err, "stale gc: failed to scan registry");
                return;
            }
        };
        if stale.is_empty() {
            return;
        }
        if let Err(err) = state.registry.remove(&stale).await {
            error!(error = %err, "stale gc: failed to remove stale connections");
            return;
        }
        info!(count = stale.len(), "stale gc: removed stale connections");

        if let Err(err) = expire_abandoned_fire_and_forget(state).await {
            error!(error = %err, "stale gc: failed to sweep fire-and-forget broadcasts");
        }
    })
    .await;
}

pub async fn run_fire_and_forget_ttl_sweep(state: &AppState) {
    with_lock(state, "scheduler-fnf-ttl", async {
        let cutoff = state.clock.now() - FIRE_AND_FORGET_TTL;
        let due = match repo::broadcasts::fire_and_forget_due_by_ttl(&state.pool, cutoff).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "fnf ttl sweep: failed to query due broadcasts");
                return;
            }
        };
        for broadcast_id in due {
            if let Err(err) = expire_and_publish(state, broadcast_id).await {
                error!(broadcast_id, error = %err, "fnf ttl sweep: failed to expire broadcast");
            }
        }
    })
    .await;
}

/// A `fire_and_forget` broadcast only needs delivering to whoever is online
/// at send time; once every one of its targeted users has disconnected
/// without ever coming back, it is expired rather than left ACTIVE forever.
/// The companion TTL sweep (`run_fire_and_forget_ttl_sweep`) covers the other
/// half of the rule: expiry after a fixed duration even while recipients
/// stay connected.
pub async fn expire_abandoned_fire_and_forget(state: &AppState) -> Result<(), sqlx::Error> {
    let candidates = repo::broadcasts::active_fire_and_forget(&state.pool).await?;
    for broadcast_id in candidates {
        let user_ids = repo::user_broadcasts::list_users_for_broadcast(&state.pool, broadcast_id).await?;
        let mut any_online = false;
        for user_id in &user_ids {
            match state.registry.locate(user_id).await {
                Ok(conns) if !conns.is_empty() => {
                    any_online = true;
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(broadcast_id, user_id, error = %err, "registry lookup failed during fire-and-forget sweep");
                    any_online = true; // treat lookup failure as "don't expire yet"
                    break;
                }
            }
        }
        if !any_online {
            expire_and_publish(state, broadcast_id).await?;
        }
    }
    Ok(())
}
