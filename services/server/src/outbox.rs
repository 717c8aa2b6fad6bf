use std::time::Duration;

use bcast_eventbus::EventBus;
use chrono::Duration as ChronoDuration;
use tracing::{error, info, warn};

use crate::repo;
use crate::state::AppState;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const BATCH_SIZE: i64 = 500;
const LOCK_NAME: &str = "outbox-relay";
const LOCK_LEASE: ChronoDuration = ChronoDuration::seconds(10);

/// Single-leader polling loop publishing unprocessed `outbox_events` rows to
/// the bus, oldest first. A row is deleted only once the publish is
/// acknowledged; on publish failure it is left in place for the next tick,
/// so the relay never discards an event without operator visibility.
pub async fn run(state: AppState, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !acquire_lock(&state).await {
                    continue;
                }
                if let Err(err) = relay_batch(&state).await {
                    error!(error = %err, "outbox relay batch failed");
                }
            }
            _ = shutdown.changed() => {
                info!("outbox relay shutting down");
                break;
            }
        }
    }
}

async fn acquire_lock(state: &AppState) -> bool {
    match repo::shedlock::try_acquire(&state.pool, LOCK_NAME, &state.pod_id, LOCK_LEASE).await {
        Ok(acquired) => acquired,
        Err(err) => {
            warn!(error = %err, "outbox relay failed to check leader lock");
            false
        }
    }
}

async fn relay_batch(state: &AppState) -> Result<(), sqlx::Error> {
    let batch = repo::outbox::fetch_batch(&state.pool, BATCH_SIZE).await?;
    for row in batch {
        match state.event_bus.publish(&row.topic, &row.aggregate_id, &row.payload).await {
            Ok(()) => {
                repo::outbox::delete(&state.pool, row.id).await?;
            }
            Err(err) => {
                warn!(event_id = %row.id, topic = %row.topic, error = %err, "failed to publish outbox row, will retry");
            }
        }
    }
    Ok(())
}
