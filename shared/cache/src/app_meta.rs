//! Application metadata lookup by producer UID

use std::collections::BTreeMap;

use deadpool_redis::{Config, Pool, Runtime};
use moka::future::Cache as MokaCache;
use redis::AsyncCommands;
use tracing::warn;
use wes_config::AppMetaCacheConfig;

use crate::errors::{CacheError, CacheResult};

/// Metadata registered for one application, flat string pairs.
pub type AppMeta = BTreeMap<String, String>;

/// Read-through cache over the app-metadata store.
///
/// Lookups are bounded by the configured timeout; a lookup that times out is
/// reported as a miss so a slow store degrades to rejected deliveries rather
/// than stalling consumption indefinitely.
pub struct AppMetaCache {
    pool: Pool,
    memo: MokaCache<String, AppMeta>,
    config: AppMetaCacheConfig,
}

impl AppMetaCache {
    /// Create a cache backed by the configured store.
    pub fn connect(config: AppMetaCacheConfig) -> CacheResult<Self> {
        let pool = Config::from_url(config.url())
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        let memo = MokaCache::builder().max_capacity(config.memo_capacity).build();

        Ok(Self { pool, memo, config })
    }

    /// Key under which an application's metadata is registered.
    pub fn key_for(uid: &str) -> String {
        format!("app-meta.{uid}")
    }

    /// Look up metadata for a producer UID.
    ///
    /// `Ok(None)` is a miss, including lookups that exceed the configured
    /// timeout. Misses are not memoized; the producer may register later.
    pub async fn get(&self, uid: &str) -> CacheResult<Option<AppMeta>> {
        if let Some(meta) = self.memo.get(uid).await {
            return Ok(Some(meta));
        }

        let fetched = match tokio::time::timeout(self.config.lookup_timeout(), self.fetch(uid)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(uid = %uid, timeout_ms = self.config.lookup_timeout_ms, "app meta lookup timed out");
                return Ok(None);
            }
        };

        if let Some(meta) = &fetched {
            self.memo.insert(uid.to_string(), meta.clone()).await;
        }

        Ok(fetched)
    }

    async fn fetch(&self, uid: &str) -> CacheResult<Option<AppMeta>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let raw: Option<String> = conn.get(Self::key_for(uid)).await?;

        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(
            AppMetaCache::key_for("9a28e690-ad5d-4027-90b3-1da2b41cf4d1"),
            "app-meta.9a28e690-ad5d-4027-90b3-1da2b41cf4d1"
        );
    }

    #[test]
    fn test_value_format() {
        let raw = r#"{"job":"sage","task":"testing","plugin":"ns/p:1.2.3"}"#;
        let meta: AppMeta = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.get("job").map(String::as_str), Some("sage"));
        assert_eq!(meta.get("plugin").map(String::as_str), Some("ns/p:1.2.3"));
    }

    #[tokio::test]
    async fn test_memo_capacity_is_bounded() {
        let memo: MokaCache<String, AppMeta> = MokaCache::builder().max_capacity(128).build();
        for i in 0..256 {
            memo.insert(format!("uid-{i}"), AppMeta::new()).await;
        }
        memo.run_pending_tasks().await;
        assert!(memo.entry_count() <= 128);
    }
}
