use std::sync::Arc;

use bcast_eventbus::{InMemoryEventBus, KafkaConfig, KafkaEventBus};
use bcast_registry::{InMemoryConnectionRegistry, RedisConnectionRegistry};
use bcast_targeting::{HttpDirectoryConfig, HttpDirectoryTargeting};
use server::config::{AppConfig, RegistryBackend};
use server::event_bus::AnyEventBus;
use server::{db, delivery, dlq, fanout, outbox, scheduler, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = AppConfig::from_env();

    info!(pod_id = %config.pod_id, "connecting to database...");
    let pool = db::create_pool(&config.database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let event_bus = match &config.kafka_bootstrap_servers {
        Some(_) => {
            let kafka = KafkaEventBus::new(KafkaConfig::from_env()).expect("failed to build kafka event bus");
            AnyEventBus::Kafka(Arc::new(kafka))
        }
        None => {
            info!("KAFKA_BOOTSTRAP_SERVERS not set, using in-memory event bus");
            AnyEventBus::Memory(Arc::new(InMemoryEventBus::new()))
        }
    };

    let registry: Arc<dyn bcast_registry::ConnectionRegistry> = match config.registry_backend {
        RegistryBackend::Redis => {
            let redis_url = config.redis_url.clone().expect("REDIS_URL must be set when REGISTRY_BACKEND=redis");
            let backend = RedisConnectionRegistry::connect(&redis_url, config.pending_buffer_capacity)
                .await
                .expect("failed to connect to redis");
            Arc::new(backend)
        }
        RegistryBackend::Memory => Arc::new(InMemoryConnectionRegistry::new(config.pending_buffer_capacity)),
    };

    let targeting = Arc::new(HttpDirectoryTargeting::new(HttpDirectoryConfig::from_env()));

    let state = AppState::new(pool, event_bus, registry, targeting, &config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(outbox::run(state.clone(), shutdown_rx.clone()));
    tokio::spawn(scheduler::run(state.clone(), shutdown_rx.clone()));
    tokio::spawn(fanout::run(state.clone()));
    tokio::spawn(delivery::run(state.clone()));
    tokio::spawn(dlq::run(state.clone()));

    let router = server::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.expect("failed to bind");
    info!(addr = %config.bind_addr, "server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .expect("server error");
    info!("server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C, then flips the shared shutdown watch before
/// returning so the outbox relay and lifecycle scheduler stop polling at the
/// same time axum stops accepting new connections.
async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); }
        _ = terminate => { info!("received SIGTERM, shutting down"); }
    }
    let _ = shutdown_tx.send(true);
}
