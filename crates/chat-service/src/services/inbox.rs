//! Offline inbox: message ids kept for users who were unreachable.
//!
//! Only appends happen here; draining on reconnect belongs to the catch-up
//! service. A message id is queued at most once per user, so re-processing
//! a delivery does not duplicate it.

use std::sync::Arc;

use chat_core::constants::keys;
use chat_core::{StateStore, StoreBatch, StoreGuard, UserId};

use super::error::ServiceResult;

#[derive(Clone)]
pub struct OfflineInbox {
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for OfflineInbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineInbox").finish_non_exhaustive()
    }
}

impl OfflineInbox {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Queue a message id; returns false when it was already pending
    pub async fn append(&self, user_id: &UserId, message_id: &str) -> ServiceResult<bool> {
        let key = keys::offline_inbox(user_id);
        let appended = self
            .store
            .apply_if(
                StoreGuard::not_in_list(key.clone(), message_id),
                StoreBatch::new().rpush(key, message_id),
            )
            .await?;
        Ok(appended)
    }

    /// Pending message ids, oldest first
    pub async fn pending(&self, user_id: &UserId) -> ServiceResult<Vec<String>> {
        Ok(self.store.lrange(&keys::offline_inbox(user_id), 0, -1).await?)
    }
}
