use rc_types::models::{CommandKind, LastOutput};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Per-user-id cache of the most recently finalized command output, used by
/// the operator console's `save` command.
#[derive(Default)]
pub struct LastOutputCache {
    inner: RwLock<HashMap<String, LastOutput>>,
}

impl LastOutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, id: &str, content: String, kind: CommandKind) {
        self.inner.write().await.insert(
            id.to_string(),
            LastOutput {
                content,
                kind,
                timestamp: chrono::Utc::now(),
            },
        );
    }

    pub async fn get(&self, id: &str) -> Option<LastOutput> {
        self.inner.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_retrieves_last_output() {
        let cache = LastOutputCache::new();
        assert!(cache.get("alice").await.is_none());
        cache.set("alice", "hi".to_string(), CommandKind::Cmd).await;
        let entry = cache.get("alice").await.unwrap();
        assert_eq!(entry.content, "hi");
    }
}
