use async_trait::async_trait;

use super::CacheKey;
use crate::error::{AppError, AppResult};

/// Key-value store with expiring keys.
///
/// Backs the hot recommendation tier, the vote ledger and the generation
/// markers. Implemented by the Redis [`super::Cache`] and by
/// [`super::memory::InMemoryStore`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<String>>;

    async fn set_ex(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<()>;

    /// Sets the key only if it is absent. Returns whether this call created it.
    async fn set_nx_ex(&self, key: &CacheKey, value: String, ttl_secs: u64) -> AppResult<bool>;

    async fn exists(&self, key: &CacheKey) -> AppResult<bool>;

    async fn delete(&self, key: &CacheKey) -> AppResult<()>;

    /// Increments a fixed-window counter, starting the window on first use.
    ///
    /// Counter creation and expiry happen atomically so a counter can never be
    /// left without a TTL.
    async fn incr_window(&self, key: &CacheKey, window_secs: u64) -> AppResult<u64>;

    /// Takes one back from a live window counter, leaving its expiry alone.
    /// A missing counter or one already at zero is left untouched.
    async fn decr_window(&self, key: &CacheKey) -> AppResult<()>;

    /// Fire-and-forget write; errors are logged, never returned
    fn set_in_background(&self, key: &CacheKey, value: String, ttl_secs: u64);
}

impl dyn KeyValueStore {
    /// Retrieves and deserializes a JSON value
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        match self.get(key).await? {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Serializes `value` and stores it without waiting for the write
    pub fn set_json_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        match serde_json::to_string(value) {
            Ok(json) => self.set_in_background(key, json, ttl),
            Err(e) => tracing::error!(error = %e, "Cache serialization error"),
        }
    }
}
