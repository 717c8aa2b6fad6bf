// bcast-targeting: expands a broadcast's target spec into a concrete set of
// user ids, sourced from an external user directory service.
//
// ALL and SELECTED are handled locally (SELECTED is the literal id list; ALL
// streams the full directory). ROLE and PRODUCT are left as a pluggable
// capability per DESIGN.md's Open Question resolution: the default trait
// method returns `TargetingError::Unsupported` unless a concrete directory
// client opts in.

pub mod circuit_breaker;
pub mod error;
pub mod http_directory;

pub use circuit_breaker::CircuitBreaker;
pub use error::TargetingError;
pub use http_directory::{HttpDirectoryConfig, HttpDirectoryTargeting};

use async_trait::async_trait;
use bcast_protocol::{TargetKind, TargetSpec};

/// Default batch size for streaming a large directory expansion (e.g. ALL)
/// into per-user-row writes; matches the store's bulk-insert batch size.
pub const EXPANSION_BATCH_SIZE: usize = 1000;

#[async_trait]
pub trait TargetingService: Send + Sync {
    /// Expand `spec` into the concrete set of targeted user ids. On a
    /// directory outage, implementations should fall back to a cached
    /// snapshot rather than failing outright; callers are told via
    /// `ExpansionResult::degraded`.
    async fn expand(&self, spec: &TargetSpec) -> Result<ExpansionResult, TargetingError> {
        match spec.kind {
            TargetKind::Selected => Ok(ExpansionResult {
                user_ids: spec.ids.clone(),
                degraded: false,
            }),
            TargetKind::All => self.expand_all().await,
            TargetKind::Role | TargetKind::Product => Err(TargetingError::Unsupported(spec.kind)),
        }
    }

    async fn expand_all(&self) -> Result<ExpansionResult, TargetingError>;
}

#[derive(Debug, Clone)]
pub struct ExpansionResult {
    pub user_ids: Vec<String>,
    /// True when the result came from a stale cache because the directory
    /// was unreachable (circuit open).
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SelectedOnly;

    #[async_trait]
    impl TargetingService for SelectedOnly {
        async fn expand_all(&self) -> Result<ExpansionResult, TargetingError> {
            Ok(ExpansionResult {
                user_ids: vec!["u1".to_owned(), "u2".to_owned()],
                degraded: false,
            })
        }
    }

    #[tokio::test]
    async fn selected_target_returns_literal_ids_without_touching_directory() {
        let svc = SelectedOnly;
        let spec = TargetSpec {
            kind: TargetKind::Selected,
            ids: vec!["u9".to_owned()],
        };
        let result = svc.expand(&spec).await.unwrap();
        assert_eq!(result.user_ids, vec!["u9".to_owned()]);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn role_target_is_unsupported_by_default() {
        let svc = SelectedOnly;
        let spec = TargetSpec {
            kind: TargetKind::Role,
            ids: vec![],
        };
        let err = svc.expand(&spec).await.unwrap_err();
        assert!(matches!(err, TargetingError::Unsupported(TargetKind::Role)));
    }
}
