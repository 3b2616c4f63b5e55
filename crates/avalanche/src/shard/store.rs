//! Key-value store clients.
//!
//! The uploader only needs one operation: write a batch of keys and learn which
//! of them did not land. `RedisStore` needs every shard to speak the Redis
//! protocol, including those at the default ports 33013-33016 which older
//! deployments ran memcached on. `MemoryStore` keeps everything in process and
//! can be told to fail, which is how retry behaviour is exercised.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use redis::aio::ConnectionManager;
use snafu::ResultExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use super::ShardAddress;
use crate::error::{ConnectSnafu, StoreError, WriteSnafu};

/// A batched upsert target.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write every item, overwriting existing values.
    ///
    /// `Ok` carries the keys that were not written; an empty set means the
    /// whole batch landed. `Err` means no key is known to be written.
    async fn upsert_many(&self, items: &IndexMap<String, Bytes>)
    -> Result<HashSet<String>, StoreError>;
}

/// Store reached over the Redis protocol at `host:port`.
///
/// The connection is opened on first use and reused afterwards.
pub struct RedisStore {
    address: ShardAddress,
    client: redis::Client,
    connection: AsyncMutex<Option<ConnectionManager>>,
}

impl RedisStore {
    pub fn new(address: ShardAddress) -> Result<Self, StoreError> {
        let client = redis::Client::open(format!("redis://{address}")).context(ConnectSnafu {
            address: address.to_string(),
        })?;
        Ok(Self {
            address,
            client,
            connection: AsyncMutex::new(None),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_connection_manager()
            .await
            .context(ConnectSnafu {
                address: self.address.to_string(),
            })?;
        debug!(address = %self.address, "Connected to shard");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn upsert_many(
        &self,
        items: &IndexMap<String, Bytes>,
    ) -> Result<HashSet<String>, StoreError> {
        if items.is_empty() {
            return Ok(HashSet::new());
        }

        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for (key, payload) in items {
            pipe.set(key, payload.as_ref()).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await.context(WriteSnafu {
            address: self.address.to_string(),
        })?;
        Ok(HashSet::new())
    }
}

/// In-process store with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Bytes>>,
    /// Refused keys with the number of calls left to refuse them (`None`: always).
    rejected: Mutex<HashMap<String, Option<usize>>>,
    /// Number of upcoming calls that fail outright.
    failing_calls: AtomicUsize,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before touching the map.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `calls` upserts as a whole.
    pub fn fail_next(&self, calls: usize) {
        self.failing_calls.store(calls, Ordering::SeqCst);
    }

    /// Refuse `key` on the next `calls` upserts, or forever when `calls` is 0.
    pub fn reject_key(&self, key: impl Into<String>, calls: usize) {
        let remaining = (calls > 0).then_some(calls);
        self.lock_rejected().insert(key.into(), remaining);
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.lock_entries().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `upsert_many` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_rejected(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<usize>>> {
        self.rejected.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn upsert_many(
        &self,
        items: &IndexMap<String, Bytes>,
    ) -> Result<HashSet<String>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if Self::take_one(&self.failing_calls) {
            return Err(StoreError::Unavailable {
                address: "memory".to_string(),
            });
        }

        let mut rejected = self.lock_rejected();
        let mut entries = self.lock_entries();
        let mut failed = HashSet::new();
        for (key, payload) in items {
            let refuse = match rejected.get_mut(key) {
                Some(None) => true,
                Some(Some(remaining)) => {
                    *remaining -= 1;
                    true
                }
                None => false,
            };
            if rejected.get(key) == Some(&Some(0)) {
                rejected.remove(key);
            }
            if refuse {
                failed.insert(key.clone());
            } else {
                entries.insert(key.clone(), payload.clone());
            }
        }
        Ok(failed)
    }
}
