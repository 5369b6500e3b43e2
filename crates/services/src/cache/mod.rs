//! Subtitle translation cache: the per-(subtitle, language) cache
//! that lets every listener's first request for a language compute
//! the translation once, and every other request for the same pair
//! either read the cached result or wait a bounded amount of time on
//! the in-flight computation rather than triggering a second call to
//! the translation provider.

pub mod in_process;
pub mod redis_cache;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use in_process::InProcessCache;
pub use redis_cache::RedisCache;

pub const TRANSLATION_TTL: Duration = Duration::from_secs(3600);
pub const PENDING_TTL: Duration = Duration::from_secs(60);
pub const MAX_WAIT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait SubtitleCache: Send + Sync + 'static {
    /// Stores the `original:{id}` entry as `(text, lang)`, matching
    /// the key scheme in spec.md §4.4.
    async fn store_original(&self, subtitle_id: &str, text: &str, lang: &str) -> CacheResult<()>;

    async fn get_original(&self, subtitle_id: &str) -> CacheResult<Option<(String, String)>>;

    /// Attempts to claim the right to compute `(subtitle_id, lang)`.
    /// Returns `true` if the caller now owns the computation (no one
    /// else had claimed it), `false` if another caller already has.
    async fn mark_pending(&self, subtitle_id: &str, lang: &str) -> CacheResult<bool>;

    /// Stores the finished translation and clears the pending marker,
    /// releasing anyone polling in [`Self::get_translation`].
    async fn store_translation(&self, subtitle_id: &str, lang: &str, text: &str) -> CacheResult<()>;

    /// Looks up a cached translation. If absent and `wait` is true and
    /// a pending marker exists, polls up to [`MAX_WAIT`] for another
    /// caller's in-flight computation to finish before giving up.
    async fn get_translation(&self, subtitle_id: &str, lang: &str, wait: bool) -> CacheResult<Option<String>> {
        if let Some(text) = self.get_translation_raw(subtitle_id, lang).await? {
            return Ok(Some(text));
        }
        if !wait {
            return Ok(None);
        }
        if !self.is_pending(subtitle_id, lang).await? {
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now() + MAX_WAIT;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Some(text) = self.get_translation_raw(subtitle_id, lang).await? {
                return Ok(Some(text));
            }
            if !self.is_pending(subtitle_id, lang).await? {
                // The pending marker expired or was cleared without a
                // translation landing — the computation failed upstream.
                return Ok(None);
            }
        }
        Ok(None)
    }

    async fn get_translation_raw(&self, subtitle_id: &str, lang: &str) -> CacheResult<Option<String>>;

    async fn is_pending(&self, subtitle_id: &str, lang: &str) -> CacheResult<bool>;
}
