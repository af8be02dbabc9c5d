use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::Instant;

const RESULT_KEY_PREFIX: &str = "photo_check:result";
const HISTORY_KEY_PREFIX: &str = "photo_check:history";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Key-value store with TTL expiry and per-key lists, shared by the result
/// cache and the per-user submission history.
///
/// List indices follow Redis semantics: `end` is inclusive and negative
/// indices count from the tail.
#[async_trait]
pub trait CheckCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn list_prepend(&self, key: &str, value: &str) -> Result<(), CacheError>;

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, CacheError>;

    async fn list_trim(&self, key: &str, start: isize, end: isize) -> Result<(), CacheError>;
}

/// Content-addressed key over the leading `prefix_bytes` of the photo and the
/// task description.
pub fn result_key(photo: &[u8], task_description: &str, prefix_bytes: usize) -> String {
    let prefix = &photo[..photo.len().min(prefix_bytes)];
    let mut hasher = Sha256::new();
    hasher.update(prefix);
    hasher.update([0u8]);
    hasher.update(task_description.as_bytes());
    format!("{RESULT_KEY_PREFIX}:{}", hex::encode(hasher.finalize()))
}

/// Reads a JSON value. An unreadable payload is a `Serialization` error, not
/// a miss, so callers can log it.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CheckCache,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn CheckCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let payload = serde_json::to_string(value)?;
    cache.set(key, &payload, ttl).await
}

pub fn history_key(user_id: &str) -> String {
    format!("{HISTORY_KEY_PREFIX}:{user_id}")
}

#[derive(Default)]
pub struct InMemoryCache {
    values: Mutex<HashMap<String, (String, Instant)>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        match values.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn list_prepend(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut lists = self.lists.lock().map_err(|_| poisoned())?;
        lists.entry(key.to_string()).or_default().push_front(value.to_string());
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, CacheError> {
        let lists = self.lists.lock().map_err(|_| poisoned())?;
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };

        Ok(match resolve_range(list.len(), start, end) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn list_trim(&self, key: &str, start: isize, end: isize) -> Result<(), CacheError> {
        let mut lists = self.lists.lock().map_err(|_| poisoned())?;
        let Some(list) = lists.get_mut(key) else {
            return Ok(());
        };

        match resolve_range(list.len(), start, end) {
            Some((from, to)) => {
                list.truncate(to + 1);
                list.drain(..from);
            }
            None => list.clear(),
        }

        if list.is_empty() {
            lists.remove(key);
        }
        Ok(())
    }
}

fn poisoned() -> CacheError {
    CacheError::Backend("in-memory cache lock poisoned".to_string())
}

fn resolve_range(len: usize, start: isize, end: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }

    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };

    if start > end || start >= len || end < 0 {
        return None;
    }

    Some((start as usize, end as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_key_is_content_addressed() {
        let photo = vec![7u8; 4096];
        let first = result_key(&photo, "Solve x^2 - 5x + 6 = 0", 1024);
        let second = result_key(&photo, "Solve x^2 - 5x + 6 = 0", 1024);
        let other_task = result_key(&photo, "Describe photosynthesis", 1024);

        assert_eq!(first, second);
        assert_ne!(first, other_task);
        assert!(first.starts_with("photo_check:result:"));
    }

    #[test]
    fn result_key_ignores_bytes_past_prefix() {
        let mut photo = vec![1u8; 2048];
        let before = result_key(&photo, "task", 1024);
        photo[1500] = 9;
        assert_eq!(before, result_key(&photo, "task", 1024));
        photo[10] = 9;
        assert_ne!(before, result_key(&photo, "task", 1024));
    }

    #[test]
    fn resolve_range_follows_redis_indices() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, 0, 9), Some((0, 4)));
        assert_eq!(resolve_range(5, 1, 2), Some((1, 2)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, 3, 1), None);
        assert_eq!(resolve_range(0, 0, -1), None);
    }

    #[tokio::test]
    async fn json_helpers_round_trip_and_flag_garbage() {
        let cache = InMemoryCache::new();
        set_json(&cache, "k", &vec![1, 2, 3], Duration::from_secs(60)).await.expect("set");

        let stored: Option<Vec<u32>> = get_json(&cache, "k").await.expect("get");
        assert_eq!(stored, Some(vec![1, 2, 3]));

        cache.set("bad", "{not json", Duration::from_secs(60)).await.expect("set");
        let err = get_json::<Vec<u32>>(&cache, "bad").await.expect_err("garbage payload");
        assert!(matches!(err, CacheError::Serialization(_)));
        assert!(get_json::<Vec<u32>>(&cache, "missing").await.expect("get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn in_memory_values_expire_after_ttl() {
        let cache = InMemoryCache::new();
        cache.set("key", "value", Duration::from_secs(60)).await.expect("set");
        assert_eq!(cache.get("key").await.expect("get").as_deref(), Some("value"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("key").await.expect("get"), None);
    }

    #[tokio::test]
    async fn in_memory_lists_prepend_and_trim() {
        let cache = InMemoryCache::new();
        for value in ["a", "b", "c", "d"] {
            cache.list_prepend("history", value).await.expect("prepend");
        }

        let all = cache.list_range("history", 0, -1).await.expect("range");
        assert_eq!(all, vec!["d", "c", "b", "a"]);

        cache.list_trim("history", 0, 1).await.expect("trim");
        let trimmed = cache.list_range("history", 0, -1).await.expect("range");
        assert_eq!(trimmed, vec!["d", "c"]);

        assert!(cache.list_range("missing", 0, -1).await.expect("range").is_empty());
    }
}
