use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::{ExpansionResult, TargetingError, TargetingService};

#[derive(Debug, Clone)]
pub struct HttpDirectoryConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_open_duration: Duration,
}

impl HttpDirectoryConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("TARGETING_DIRECTORY_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_owned()),
            timeout_ms: 2000,
            circuit_failure_threshold: 3,
            circuit_open_duration: Duration::from_secs(30),
        }
    }
}

/// Directory client for the ALL target expansion. Wraps every call in a
/// circuit breaker; on an open circuit it falls back to the last good
/// snapshot (`ExpansionResult::degraded = true`) rather than failing the
/// whole broadcast-creation request.
pub struct HttpDirectoryTargeting {
    client: reqwest::Client,
    config: HttpDirectoryConfig,
    breaker: CircuitBreaker,
    cache: Mutex<Option<Vec<String>>>,
}

impl HttpDirectoryTargeting {
    pub fn new(config: HttpDirectoryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("reqwest client builds with static config");
        let breaker = CircuitBreaker::new(config.circuit_failure_threshold, config.circuit_open_duration);
        Self {
            client,
            config,
            breaker,
            cache: Mutex::new(None),
        }
    }

    async fn fetch_all_user_ids(&self) -> Result<Vec<String>, TargetingError> {
        let url = format!("{}/directory/users", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TargetingError::Directory(e.to_string()))?
            .error_for_status()
            .map_err(|e| TargetingError::Directory(e.to_string()))?;
        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| TargetingError::Directory(e.to_string()))
    }
}

#[async_trait]
impl TargetingService for HttpDirectoryTargeting {
    async fn expand_all(&self) -> Result<ExpansionResult, TargetingError> {
        if self.breaker.state().await == CircuitState::Open {
            let cache = self.cache.lock().await;
            return cache
                .clone()
                .map(|user_ids| ExpansionResult {
                    user_ids,
                    degraded: true,
                })
                .ok_or(TargetingError::NoCacheAvailable);
        }

        match self.fetch_all_user_ids().await {
            Ok(user_ids) => {
                self.breaker.on_success().await;
                *self.cache.lock().await = Some(user_ids.clone());
                Ok(ExpansionResult {
                    user_ids,
                    degraded: false,
                })
            }
            Err(e) => {
                self.breaker.on_failure().await;
                warn!(error = %e, "directory expansion failed, falling back to cache");
                let cache = self.cache.lock().await;
                cache
                    .clone()
                    .map(|user_ids| ExpansionResult {
                        user_ids,
                        degraded: true,
                    })
                    .ok_or(e)
            }
        }
    }
}
