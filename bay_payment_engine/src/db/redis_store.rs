//! Redis implementation of the [`FastStore`] trait.
//!
//! One multiplexed connection behind a [`ConnectionManager`], which reconnects by itself. Every
//! command clones the manager handle, so the store is freely cloneable across workers.
use log::info;
use redis::{aio::ConnectionManager, AsyncCommands, Client, ExistenceCheck, RedisError, SetExpiry, SetOptions, Value};

use crate::traits::{FastStore, FastStoreError};

#[derive(Clone)]
pub struct RedisStore {
    url: String,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, FastStoreError> {
        let client = Client::open(url).map_err(FastStoreError::from)?;
        let manager = ConnectionManager::new(client).await?;
        info!("🗃️ Connected to fast store at {url}");
        Ok(Self { url: url.to_string(), manager })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl From<RedisError> for FastStoreError {
    fn from(e: RedisError) -> Self {
        if e.is_io_error() || e.is_timeout() || e.is_connection_refusal() || e.is_connection_dropped() {
            FastStoreError::Unavailable(e.to_string())
        } else {
            FastStoreError::Protocol(e.to_string())
        }
    }
}

impl FastStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, FastStoreError> {
        let mut conn = self.manager.clone();
        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(ttl_secs as usize));
        let result: Value = conn.set_options(key, value, opts).await?;
        Ok(matches!(result, Value::Okay))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), FastStoreError> {
        let mut conn = self.manager.clone();
        let opts = SetOptions::default().with_expiration(SetExpiry::EX(ttl_secs as usize));
        let _: Value = conn.set_options(key, value, opts).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FastStoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), FastStoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn increment_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64, FastStoreError> {
        let mut conn = self.manager.clone();
        let count: i64 = conn.incr(key, 1).await?;
        // The TTL goes on at creation so an idle counter ages out on its own.
        if count == 1 {
            let _: () = conn.expire(key, ttl_secs as i64).await?;
        }
        Ok(count)
    }

    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), FastStoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.rpush(queue, payload).await?;
        Ok(())
    }

    async fn queue_pop(&self, queue: &str) -> Result<Option<String>, FastStoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.lpop(queue, None).await?;
        Ok(value)
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, FastStoreError> {
        let mut conn = self.manager.clone();
        let len: u64 = conn.llen(queue).await?;
        Ok(len)
    }
}
