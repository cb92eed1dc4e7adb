// src/redis_store.rs
// Redis-backed remote tier for the response cache (optional, feature-gated).

use crate::response_cache::RemoteQuoteStore;
use anyhow::Result;
#[cfg(feature = "redis")]
use anyhow::Context;
use async_trait::async_trait;
#[cfg(feature = "redis")]
use log::info;
#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;
#[cfg(feature = "redis")]
use redis::{AsyncCommands, Client};
use std::time::Duration;

#[cfg(feature = "redis")]
pub struct RedisQuoteStore {
    conn: ConnectionManager,
}

#[cfg(not(feature = "redis"))]
pub struct RedisQuoteStore {
    _phantom: std::marker::PhantomData<()>,
}

impl RedisQuoteStore {
    #[cfg(feature = "redis")]
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;
        info!("response cache remote tier connected to {url}");
        Ok(Self { conn })
    }

    #[cfg(not(feature = "redis"))]
    pub async fn connect(_url: &str) -> Result<Self> {
        Err(anyhow::anyhow!(
            "Redis feature not enabled. Enable with 'redis' feature flag."
        ))
    }

    /// Test the connection end to end.
    #[cfg(feature = "redis")]
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        if pong == "PONG" {
            Ok(())
        } else {
            anyhow::bail!("unexpected Redis response: {pong}")
        }
    }

    #[cfg(not(feature = "redis"))]
    pub async fn health_check(&self) -> Result<()> {
        Err(anyhow::anyhow!("Redis feature not enabled"))
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl RemoteQuoteStore for RedisQuoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn
            .get(key)
            .await
            .context("failed to get quote from Redis")?;
        Ok(bytes)
    }

    async fn set(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, bytes, ttl.as_secs().max(1))
            .await
            .context("failed to store quote in Redis")?;
        Ok(())
    }
}

#[cfg(not(feature = "redis"))]
#[async_trait]
impl RemoteQuoteStore for RedisQuoteStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(anyhow::anyhow!("Redis feature not enabled"))
    }

    async fn set(&self, _key: &str, _bytes: &[u8], _ttl: Duration) -> Result<()> {
        Err(anyhow::anyhow!("Redis feature not enabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[cfg(feature = "redis")]
    async fn roundtrip_against_live_redis() {
        let store = RedisQuoteStore::connect("redis://localhost:6379")
            .await
            .unwrap();
        store.health_check().await.unwrap();
        store
            .set("quote:test:roundtrip", b"payload", Duration::from_secs(5))
            .await
            .unwrap();
        let bytes = store.get("quote:test:roundtrip").await.unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"payload"[..]));
    }
}
