use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheResult, SubtitleCache, PENDING_TTL, TRANSLATION_TTL};

struct Entry {
    value: String,
    expires_at: Instant,
}

struct OriginalEntry {
    text: String,
    lang: String,
    expires_at: Instant,
}

/// Default cache backend: a single process owns every room's state,
/// so a `dashmap`-backed store needs no network round-trip and is
/// strictly faster than Redis for the common single-node deployment.
/// [`RedisCache`](super::RedisCache) exists behind the same trait for
/// when a deployment needs multiple coordinator processes sharing one
/// cache.
pub struct InProcessCache {
    originals: DashMap<String, OriginalEntry>,
    translations: DashMap<(String, String), Entry>,
    pending: DashMap<(String, String), Instant>,
}

impl InProcessCache {
    pub fn new() -> Self {
        Self {
            originals: DashMap::new(),
            translations: DashMap::new(),
            pending: DashMap::new(),
        }
    }
}

impl Default for InProcessCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubtitleCache for InProcessCache {
    async fn store_original(&self, subtitle_id: &str, text: &str, lang: &str) -> CacheResult<()> {
        self.originals.insert(
            subtitle_id.to_string(),
            OriginalEntry {
                text: text.to_string(),
                lang: lang.to_string(),
                expires_at: Instant::now() + TRANSLATION_TTL,
            },
        );
        Ok(())
    }

    async fn get_original(&self, subtitle_id: &str) -> CacheResult<Option<(String, String)>> {
        Ok(self.originals.get(subtitle_id).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some((e.text.clone(), e.lang.clone()))
            } else {
                None
            }
        }))
    }

    async fn mark_pending(&self, subtitle_id: &str, lang: &str) -> CacheResult<bool> {
        let key = (subtitle_id.to_string(), lang.to_string());
        let now = Instant::now();
        // spec §4.4: claiming requires both no content key and no
        // existing marker — a translation that already landed must
        // never be reclaimed for recomputation.
        if self.get_translation_raw(subtitle_id, lang).await?.is_some() {
            return Ok(false);
        }
        // Single-flight NX semantics: only the first caller to see an
        // absent/expired marker gets `true`.
        let mut claimed = false;
        self.pending
            .entry(key)
            .and_modify(|expires_at| {
                if *expires_at <= now {
                    *expires_at = now + PENDING_TTL;
                    claimed = true;
                }
            })
            .or_insert_with(|| {
                claimed = true;
                now + PENDING_TTL
            });
        Ok(claimed)
    }

    async fn store_translation(&self, subtitle_id: &str, lang: &str, text: &str) -> CacheResult<()> {
        let key = (subtitle_id.to_string(), lang.to_string());
        self.translations.insert(
            key.clone(),
            Entry {
                value: text.to_string(),
                expires_at: Instant::now() + TRANSLATION_TTL,
            },
        );
        self.pending.remove(&key);
        Ok(())
    }

    async fn get_translation_raw(&self, subtitle_id: &str, lang: &str) -> CacheResult<Option<String>> {
        let key = (subtitle_id.to_string(), lang.to_string());
        Ok(self.translations.get(&key).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value.clone())
            } else {
                None
            }
        }))
    }

    async fn is_pending(&self, subtitle_id: &str, lang: &str) -> CacheResult<bool> {
        let key = (subtitle_id.to_string(), lang.to_string());
        Ok(self
            .pending
            .get(&key)
            .map(|expires_at| *expires_at > Instant::now())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_pending_is_single_flight() {
        let cache = InProcessCache::new();
        assert!(cache.mark_pending("sub1", "en").await.unwrap());
        assert!(!cache.mark_pending("sub1", "en").await.unwrap());
    }

    #[tokio::test]
    async fn mark_pending_refuses_to_reclaim_an_existing_translation() {
        let cache = InProcessCache::new();
        cache.store_translation("sub1", "en", "hello").await.unwrap();
        assert!(!cache.mark_pending("sub1", "en").await.unwrap());
    }

    #[tokio::test]
    async fn store_translation_clears_pending() {
        let cache = InProcessCache::new();
        cache.mark_pending("sub1", "en").await.unwrap();
        cache.store_translation("sub1", "en", "hello").await.unwrap();
        assert!(!cache.is_pending("sub1", "en").await.unwrap());
        assert_eq!(
            cache.get_translation_raw("sub1", "en").await.unwrap(),
            Some("hello".to_string())
        );
    }

    #[tokio::test]
    async fn get_translation_returns_cached_without_waiting() {
        let cache = InProcessCache::new();
        cache.store_translation("sub1", "en", "hello").await.unwrap();
        let result = cache.get_translation("sub1", "en", true).await.unwrap();
        assert_eq!(result, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn get_translation_without_wait_returns_none_immediately() {
        let cache = InProcessCache::new();
        cache.mark_pending("sub1", "en").await.unwrap();
        let result = cache.get_translation("sub1", "en", false).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn get_translation_waits_for_concurrent_writer() {
        use std::sync::Arc;
        let cache = Arc::new(InProcessCache::new());
        cache.mark_pending("sub1", "en").await.unwrap();

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                cache.store_translation("sub1", "en", "hello").await.unwrap();
            })
        };

        let result = cache.get_translation("sub1", "en", true).await.unwrap();
        writer.await.unwrap();
        assert_eq!(result, Some("hello".to_string()));
    }
}
