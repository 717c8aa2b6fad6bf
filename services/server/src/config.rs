/// Process-wide configuration, read once at startup the way `main.rs` reads
/// `DATABASE_URL`/`BIND_ADDR` today: required vars panic via `.expect`,
/// everything else falls back to a documented default.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pod_id: String,
    pub cluster_id: String,
    pub database_url: String,
    pub bind_addr: String,
    pub registry_backend: RegistryBackend,
    pub redis_url: Option<String>,
    pub kafka_bootstrap_servers: Option<String>,
    pub targeting_directory_url: String,
    pub pending_buffer_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryBackend {
    Memory,
    Redis,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let registry_backend = match std::env::var("REGISTRY_BACKEND").as_deref() {
            Ok("redis") => RegistryBackend::Redis,
            _ => RegistryBackend::Memory,
        };
        Self {
            pod_id: std::env::var("POD_NAME").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            cluster_id: std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "default".to_owned()),
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            registry_backend,
            redis_url: std::env::var("REDIS_URL").ok(),
            kafka_bootstrap_servers: std::env::var("KAFKA_BOOTSTRAP_SERVERS").ok(),
            targeting_directory_url: std::env::var("TARGETING_DIRECTORY_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_owned()),
            pending_buffer_capacity: std::env::var("PENDING_BUFFER_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(bcast_protocol::DEFAULT_PENDING_BUFFER_CAPACITY),
        }
    }
}
