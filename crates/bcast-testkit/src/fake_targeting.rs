use async_trait::async_trait;
use bcast_targeting::{ExpansionResult, TargetingError, TargetingService};
use tokio::sync::RwLock;

/// Pre-seeded `TargetingService` for tests: `expand_all` returns whatever
/// the test configured, no network calls.
pub struct FakeTargetingService {
    all_users: RwLock<Vec<String>>,
}

impl FakeTargetingService {
    pub fn new(all_users: Vec<String>) -> Self {
        Self {
            all_users: RwLock::new(all_users),
        }
    }

    pub async fn set_all_users(&self, users: Vec<String>) {
        *self.all_users.write().await = users;
    }
}

#[async_trait]
impl TargetingService for FakeTargetingService {
    async fn expand_all(&self) -> Result<ExpansionResult, TargetingError> {
        Ok(ExpansionResult {
            user_ids: self.all_users.read().await.clone(),
            degraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcast_protocol::{TargetKind, TargetSpec};

    #[tokio::test]
    async fn expands_all_to_the_seeded_user_list() {
        let svc = FakeTargetingService::new(vec!["u1".to_owned(), "u2".to_owned()]);
        let result = svc
            .expand(&TargetSpec {
                kind: TargetKind::All,
                ids: vec![],
            })
            .await
            .unwrap();
        assert_eq!(result.user_ids, vec!["u1".to_owned(), "u2".to_owned()]);
    }
}
