// src/engine/user_context.rs
// Per-user rolling statistics, locked per user

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::types::{Action, Platform, UserContext};

/// Map of user id to that user's context. The outer lock is held only to
/// find or insert an entry; updates lock just the one user.
#[derive(Default)]
pub struct UserContextStore {
    users: Mutex<HashMap<String, Arc<AsyncMutex<UserContext>>>>,
}

impl UserContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: &str) -> Arc<AsyncMutex<UserContext>> {
        match self.users.lock() {
            Ok(mut users) => users
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(UserContext::default())))
                .clone(),
            // poisoned: hand out a detached context so decisions keep flowing
            Err(_) => Arc::new(AsyncMutex::new(UserContext::default())),
        }
    }

    /// Copy of the user's current context (default for new users)
    pub async fn snapshot(&self, user_id: &str) -> UserContext {
        self.entry(user_id).lock().await.clone()
    }

    /// Fold a decided action into the user's averages
    pub async fn observe(&self, user_id: &str, action: Action, platform: Platform, alpha: f64) {
        let entry = self.entry(user_id);
        entry.lock().await.observe(action, platform, alpha);
    }

    pub fn len(&self) -> usize {
        self.users.lock().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = UserContextStore::new();
        store.observe("a", Action::SaveMemory, Platform::Cli, 0.1).await;
        store.observe("a", Action::SaveMemory, Platform::Cli, 0.1).await;
        store.observe("b", Action::SearchMemory, Platform::Cursor, 0.1).await;

        let a = store.snapshot("a").await;
        let b = store.snapshot("b").await;
        assert_eq!(a.total_interactions, 2);
        assert!(a.save_frequency > 0.0);
        assert_eq!(b.save_frequency, 0.0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(UserContextStore::new());
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.observe("shared", Action::SearchMemory, Platform::Api, 0.1).await;
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(store.snapshot("shared").await.total_interactions, 50);
    }
}
