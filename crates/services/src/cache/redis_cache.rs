use async_trait::async_trait;
use redis::AsyncCommands;

use super::{CacheError, CacheResult, SubtitleCache, PENDING_TTL, TRANSLATION_TTL};

fn original_key(subtitle_id: &str) -> String {
    format!("subtitle_original:{subtitle_id}")
}

fn translation_key(subtitle_id: &str, lang: &str) -> String {
    format!("subtitle_trans:{subtitle_id}:{lang}")
}

fn pending_key(subtitle_id: &str, lang: &str) -> String {
    format!("subtitle_trans_pending:{subtitle_id}:{lang}")
}

/// Redis-backed cache for multi-process deployments, using the exact
/// key scheme and TTLs the single-process prototype of this system
/// used, so a fleet upgrade from one coordinator process to several
/// doesn't need a cache migration.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(redis_url: &str) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    async fn conn(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

#[async_trait]
impl SubtitleCache for RedisCache {
    async fn store_original(&self, subtitle_id: &str, text: &str, lang: &str) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let value = format!("{lang}\u{1}{text}");
        conn.set_ex::<_, _, ()>(original_key(subtitle_id), value, TRANSLATION_TTL.as_secs())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn get_original(&self, subtitle_id: &str) -> CacheResult<Option<(String, String)>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .get(original_key(subtitle_id))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(raw.and_then(|v| v.split_once('\u{1}').map(|(lang, text)| (text.to_string(), lang.to_string()))))
    }

    async fn mark_pending(&self, subtitle_id: &str, lang: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        // spec §4.4: a translation that already landed must never be
        // reclaimed for recomputation, even if its pending marker
        // already expired.
        let exists: bool = conn
            .exists(translation_key(subtitle_id, lang))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        if exists {
            return Ok(false);
        }
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(PENDING_TTL.as_secs()));
        let result: Option<String> = conn
            .set_options(pending_key(subtitle_id, lang), "1", opts)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn store_translation(&self, subtitle_id: &str, lang: &str, text: &str) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(translation_key(subtitle_id, lang), text, TRANSLATION_TTL.as_secs())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let _: () = conn
            .del(pending_key(subtitle_id, lang))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_translation_raw(&self, subtitle_id: &str, lang: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(translation_key(subtitle_id, lang))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn is_pending(&self, subtitle_id: &str, lang: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn
            .exists(pending_key(subtitle_id, lang))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(exists)
    }
}
