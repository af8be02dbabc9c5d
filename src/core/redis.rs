use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

use crate::services::cache::{CacheError, CheckCache};

/// Shared Redis connection. A handle that never connected, or was
/// disconnected, behaves as an empty cache that drops writes.
#[derive(Clone)]
pub struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub async fn health(&self) -> RedisHealth {
        let Some(mut manager) = self.manager().await else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    async fn manager(&self) -> Option<ConnectionManager> {
        self.manager.read().await.clone()
    }
}

#[async_trait]
impl CheckCache for RedisHandle {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let Some(mut manager) = self.manager().await else {
            return Ok(None);
        };

        let value = cmd("GET").arg(key).query_async::<_, Option<String>>(&mut manager).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let Some(mut manager) = self.manager().await else {
            return Ok(());
        };

        cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut manager)
            .await?;
        Ok(())
    }

    async fn list_prepend(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let Some(mut manager) = self.manager().await else {
            return Ok(());
        };

        cmd("LPUSH").arg(key).arg(value).query_async::<_, i64>(&mut manager).await?;
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, CacheError> {
        let Some(mut manager) = self.manager().await else {
            return Ok(Vec::new());
        };

        let values = cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(end)
            .query_async::<_, Vec<String>>(&mut manager)
            .await?;
        Ok(values)
    }

    async fn list_trim(&self, key: &str, start: isize, end: isize) -> Result<(), CacheError> {
        let Some(mut manager) = self.manager().await else {
            return Ok(());
        };

        cmd("LTRIM").arg(key).arg(start).arg(end).query_async::<_, ()>(&mut manager).await?;
        Ok(())
    }
}
