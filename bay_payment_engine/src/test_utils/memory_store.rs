use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
    },
    time::{Duration, Instant},
};

use crate::traits::{FastStore, FastStoreError};

/// An in-process [`FastStore`] with real TTL behaviour.
///
/// Clones share state, so a test can hand one clone to an API instance and keep another to poke
/// at keys. [`MemoryFastStore::go_offline`] simulates a Redis outage for the degraded-mode paths.
#[derive(Clone, Default)]
pub struct MemoryFastStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    values: Mutex<HashMap<String, Entry>>,
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    offline: AtomicBool,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

impl MemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with [`FastStoreError::Unavailable`] until [`MemoryFastStore::come_online`].
    pub fn go_offline(&self) {
        self.inner.offline.store(true, Ordering::SeqCst);
    }

    pub fn come_online(&self) {
        self.inner.offline.store(false, Ordering::SeqCst);
    }

    /// Drops a key as if its TTL had elapsed.
    pub fn expire_now(&self, key: &str) {
        self.inner.values.lock().unwrap().remove(key);
    }

    pub fn queue_snapshot(&self, queue: &str) -> Vec<String> {
        self.inner.queues.lock().unwrap().get(queue).map(|q| q.iter().cloned().collect()).unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), FastStoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(FastStoreError::Unavailable("the test store is offline".to_string()));
        }
        Ok(())
    }

    fn deadline(ttl_secs: u64) -> Option<Instant> {
        (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs))
    }
}

impl FastStore for MemoryFastStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, FastStoreError> {
        self.check_online()?;
        let mut values = self.inner.values.lock().unwrap();
        if values.get(key).map(Entry::live).unwrap_or(false) {
            return Ok(false);
        }
        values.insert(key.to_string(), Entry { value: value.to_string(), expires_at: Self::deadline(ttl_secs) });
        Ok(true)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), FastStoreError> {
        self.check_online()?;
        let mut values = self.inner.values.lock().unwrap();
        values.insert(key.to_string(), Entry { value: value.to_string(), expires_at: Self::deadline(ttl_secs) });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FastStoreError> {
        self.check_online()?;
        let values = self.inner.values.lock().unwrap();
        Ok(values.get(key).filter(|e| e.live()).map(|e| e.value.clone()))
    }

    async fn delete(&self, keys: &[&str]) -> Result<(), FastStoreError> {
        self.check_online()?;
        let mut values = self.inner.values.lock().unwrap();
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }

    async fn increment_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64, FastStoreError> {
        self.check_online()?;
        let mut values = self.inner.values.lock().unwrap();
        let (next, expires_at) = match values.get(key).filter(|e| e.live()) {
            Some(e) => {
                let n = e.value.parse::<i64>().map_err(|e| FastStoreError::Protocol(e.to_string()))?;
                (n + 1, e.expires_at)
            },
            None => (1, Self::deadline(ttl_secs)),
        };
        values.insert(key.to_string(), Entry { value: next.to_string(), expires_at });
        Ok(next)
    }

    async fn queue_push(&self, queue: &str, payload: &str) -> Result<(), FastStoreError> {
        self.check_online()?;
        let mut queues = self.inner.queues.lock().unwrap();
        queues.entry(queue.to_string()).or_default().push_back(payload.to_string());
        Ok(())
    }

    async fn queue_pop(&self, queue: &str) -> Result<Option<String>, FastStoreError> {
        self.check_online()?;
        let mut queues = self.inner.queues.lock().unwrap();
        Ok(queues.get_mut(queue).and_then(VecDeque::pop_front))
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, FastStoreError> {
        self.check_online()?;
        let queues = self.inner.queues.lock().unwrap();
        Ok(queues.get(queue).map(|q| q.len() as u64).unwrap_or(0))
    }
}
