use std::future::Future;

use thiserror::Error;

/// The shared low-latency store (Redis in production).
///
/// It carries four kinds of state: the order-number commit fences, the webhook dedup keys, the
/// notification circuit breaker, and the settlement queue. All of it is advisory or rebuildable;
/// the durable truth lives in the relational store. Callers therefore treat
/// [`FastStoreError::Unavailable`] as a degraded mode with a documented fallback, never as a
/// reason to fail a payment.
pub trait FastStore: Clone {
    /// `SET key value NX EX ttl`. Returns true when this call created the key.
    fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> impl Future<Output = Result<bool, FastStoreError>> + Send;

    fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> impl Future<Output = Result<(), FastStoreError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, FastStoreError>> + Send;

    fn delete(&self, keys: &[&str]) -> impl Future<Output = Result<(), FastStoreError>> + Send;

    /// Increments a counter, setting `ttl_secs` when the key is created. Returns the new value.
    fn increment_with_ttl(&self, key: &str, ttl_secs: u64) -> impl Future<Output = Result<i64, FastStoreError>> + Send;

    /// Appends a payload to the tail of a FIFO queue.
    fn queue_push(&self, queue: &str, payload: &str) -> impl Future<Output = Result<(), FastStoreError>> + Send;

    /// Pops the head of a FIFO queue, or `None` when it is empty.
    fn queue_pop(&self, queue: &str) -> impl Future<Output = Result<Option<String>, FastStoreError>> + Send;

    fn queue_len(&self, queue: &str) -> impl Future<Output = Result<u64, FastStoreError>> + Send;
}

#[derive(Debug, Clone, Error)]
pub enum FastStoreError {
    #[error("The fast store is unreachable. {0}")]
    Unavailable(String),
    #[error("Fast store protocol error. {0}")]
    Protocol(String),
}
