//! Per-shard batching uploader.
//!
//! # Lifecycle
//!
//! One uploader is spawned per shard address for each input file. Chunk workers
//! push pairs through cloned [`ShardSender`]s; the worker task accumulates them
//! and flushes whenever the batch is full.
//!
//! Shutdown is channel driven, never token driven:
//! 1. Chunk workers finish and drop their senders
//! 2. The loader calls `finish()`, which sends `Drain`
//! 3. The worker flushes the partial batch and returns its tally
//! 4. `finish()` joins the task and hands the tally back
//!
//! An uploader that was interrupted still drains, so nothing already queued is
//! lost.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use indexmap::IndexMap;
use indexmap::map::Entry;
use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use avalanche_core::emit;
use avalanche_core::metrics::events::{KeysFailed, KeysUploaded, UpsertDuration, UpsertRetried};

use super::{KeyValueStore, ShardAddress};
use crate::config::UploadConfig;
use crate::error::{LoaderError, StoreError, TaskJoinSnafu};
use crate::pipeline::Tally;
use crate::record::KeyValue;

/// Queue element. `Drain` flushes the partial batch and stops the worker.
#[derive(Debug)]
pub enum ShardMessage {
    Item(KeyValue),
    Drain,
}

/// Where flushed batches go.
#[derive(Clone)]
pub enum UploadTarget {
    /// Log instead of writing; every key counts as processed.
    DryRun,
    Store(Arc<dyn KeyValueStore>),
}

/// Cloneable handle for pushing pairs into one shard's queue.
#[derive(Debug, Clone)]
pub struct ShardSender {
    tx: mpsc::Sender<ShardMessage>,
}

impl ShardSender {
    /// Queue a pair, waiting for capacity. Fails only if the worker has
    /// already stopped.
    pub async fn enqueue(&self, pair: KeyValue) -> Result<(), SendError<ShardMessage>> {
        self.tx.send(ShardMessage::Item(pair)).await
    }

    /// Blocking variant for chunk workers running on blocking threads.
    /// Must not be called from async context.
    pub fn blocking_enqueue(&self, pair: KeyValue) -> Result<(), SendError<ShardMessage>> {
        self.tx.blocking_send(ShardMessage::Item(pair))
    }
}

/// Senders for every uploader of the current file, keyed by address.
#[derive(Debug, Clone, Default)]
pub struct ShardQueues {
    senders: HashMap<ShardAddress, ShardSender>,
}

impl ShardQueues {
    pub fn new(uploaders: &[ShardUploader]) -> Self {
        let senders = uploaders
            .iter()
            .map(|uploader| (uploader.address.clone(), uploader.sender()))
            .collect();
        Self { senders }
    }

    pub fn get(&self, address: &ShardAddress) -> Option<&ShardSender> {
        self.senders.get(address)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Handle to one shard's background worker.
pub struct ShardUploader {
    address: ShardAddress,
    tx: mpsc::Sender<ShardMessage>,
    handle: JoinHandle<Tally>,
}

impl ShardUploader {
    pub fn spawn(address: ShardAddress, target: UploadTarget, config: Arc<UploadConfig>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let handle = tokio::spawn(run(address.clone(), rx, target, config));
        Self {
            address,
            tx,
            handle,
        }
    }

    pub fn sender(&self) -> ShardSender {
        ShardSender {
            tx: self.tx.clone(),
        }
    }

    /// Drain the queue, flush the partial batch and return the shard's tally.
    pub async fn finish(self) -> Result<Tally, LoaderError> {
        // A worker that already exited on a closed queue has flushed on its own.
        if self.tx.send(ShardMessage::Drain).await.is_err() {
            debug!(shard = %self.address, "Uploader already stopped");
        }
        drop(self.tx);
        self.handle.await.context(TaskJoinSnafu)
    }
}

/// Pending pairs for one flush. Repeated keys collapse to the latest payload but
/// still count once per record toward the tally.
#[derive(Default)]
struct Batch {
    items: IndexMap<String, Bytes>,
    repeats: HashMap<String, u64>,
    records: usize,
}

impl Batch {
    fn push(&mut self, pair: KeyValue) {
        self.records += 1;
        match self.items.entry(pair.key) {
            Entry::Occupied(mut entry) => {
                *self.repeats.entry(entry.key().clone()).or_default() += 1;
                entry.insert(pair.payload);
            }
            Entry::Vacant(entry) => {
                entry.insert(pair.payload);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.records == 0
    }
}

async fn run(
    address: ShardAddress,
    mut rx: mpsc::Receiver<ShardMessage>,
    target: UploadTarget,
    config: Arc<UploadConfig>,
) -> Tally {
    let mut batch = Batch::default();
    let mut tally = Tally::default();

    loop {
        match rx.recv().await {
            Some(ShardMessage::Item(pair)) => {
                batch.push(pair);
                if batch.records >= config.batch_size {
                    tally += flush(&address, std::mem::take(&mut batch), &target, &config).await;
                }
            }
            Some(ShardMessage::Drain) => break,
            None => {
                debug!(shard = %address, "Queue closed without drain");
                break;
            }
        }
    }

    if !batch.is_empty() {
        tally += flush(&address, batch, &target, &config).await;
    }

    debug!(
        shard = %address,
        processed = tally.processed,
        errors = tally.errors,
        "Uploader drained"
    );
    tally
}

/// Write one batch, retrying only the keys that failed.
async fn flush(
    address: &ShardAddress,
    batch: Batch,
    target: &UploadTarget,
    config: &UploadConfig,
) -> Tally {
    let records = batch.records as u64;
    let shard = address.to_string();

    let store = match target {
        UploadTarget::DryRun => {
            for (key, payload) in &batch.items {
                debug!(shard = %address, key = %key, bytes = payload.len(), "Dry run upsert");
            }
            emit!(KeysUploaded {
                count: records,
                shard,
            });
            return Tally::processed(records);
        }
        UploadTarget::Store(store) => store,
    };

    let Batch {
        items: mut pending,
        repeats,
        ..
    } = batch;
    let mut attempt: u32 = 0;

    loop {
        let start = Instant::now();
        let failed = upsert(address, store.as_ref(), &pending, config).await;
        emit!(UpsertDuration {
            duration: start.elapsed(),
            shard: shard.clone(),
        });

        pending.retain(|key, _| failed.contains(key));
        if pending.is_empty() || attempt >= config.retries {
            break;
        }

        attempt += 1;
        emit!(UpsertRetried {
            keys: pending.len() as u64,
            shard: shard.clone(),
        });
        let delay = config.backoff(attempt);
        debug!(
            shard = %address,
            attempt,
            keys = pending.len(),
            delay_ms = delay.as_millis(),
            "Retrying failed keys"
        );
        tokio::time::sleep(delay).await;
    }

    let errors: u64 = pending
        .keys()
        .map(|key| 1 + repeats.get(key).copied().unwrap_or(0))
        .sum();
    let processed = records - errors;

    emit!(KeysUploaded {
        count: processed,
        shard: shard.clone(),
    });
    if errors > 0 {
        emit!(KeysFailed {
            count: errors,
            shard,
        });
        warn!(
            shard = %address,
            failed = errors,
            attempts = attempt + 1,
            "Keys not written after retries"
        );
    }

    Tally { processed, errors }
}

/// One bounded upsert call. Returns the keys that did not land; a store error
/// or timeout fails every key.
async fn upsert(
    address: &ShardAddress,
    store: &dyn KeyValueStore,
    items: &IndexMap<String, Bytes>,
    config: &UploadConfig,
) -> HashSet<String> {
    let result = match tokio::time::timeout(config.timeout(), store.upsert_many(items)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            address: address.to_string(),
            timeout_ms: config.timeout_ms,
        }),
    };

    match result {
        Ok(failed) => failed,
        Err(e) => {
            warn!(shard = %address, keys = items.len(), error = %e, "Upsert failed");
            items.keys().cloned().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::MemoryStore;
    use std::time::Duration;

    fn config(batch_size: usize, retries: u32) -> Arc<UploadConfig> {
        Arc::new(UploadConfig {
            batch_size,
            queue_capacity: 16,
            retries,
            backoff_base_ms: 1,
            timeout_ms: 200,
            dry_run: false,
        })
    }

    fn pair(key: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            payload: Bytes::from(format!("payload-{key}")),
        }
    }

    fn store_uploader(store: &Arc<MemoryStore>, config: Arc<UploadConfig>) -> ShardUploader {
        ShardUploader::spawn(
            ShardAddress::new("127.0.0.1:33013"),
            UploadTarget::Store(store.clone()),
            config,
        )
    }

    #[tokio::test]
    async fn test_dry_run_counts_everything_processed() {
        let uploader = ShardUploader::spawn(
            ShardAddress::new("127.0.0.1:33013"),
            UploadTarget::DryRun,
            config(2, 3),
        );
        let sender = uploader.sender();
        for i in 0..5 {
            sender.enqueue(pair(&format!("idfa:{i}"))).await.unwrap();
        }
        drop(sender);

        let tally = uploader.finish().await.unwrap();
        assert_eq!(tally, Tally { processed: 5, errors: 0 });
    }

    #[tokio::test]
    async fn test_dry_run_is_repeatable() {
        for _ in 0..2 {
            let uploader = ShardUploader::spawn(
                ShardAddress::new("127.0.0.1:33013"),
                UploadTarget::DryRun,
                config(10, 3),
            );
            uploader.sender().enqueue(pair("idfa:1")).await.unwrap();
            assert_eq!(uploader.finish().await.unwrap().processed, 1);
        }
    }

    #[tokio::test]
    async fn test_flushes_at_batch_size_and_on_drain() {
        let store = Arc::new(MemoryStore::new());
        let uploader = store_uploader(&store, config(3, 0));
        let sender = uploader.sender();
        for i in 0..7 {
            sender.enqueue(pair(&format!("k{i}"))).await.unwrap();
        }
        drop(sender);

        let tally = uploader.finish().await.unwrap();
        assert_eq!(tally, Tally { processed: 7, errors: 0 });
        assert_eq!(store.len(), 7);
        assert_eq!(store.calls(), 3, "two full batches plus the partial one");
    }

    #[tokio::test]
    async fn test_transient_failures_recovered_within_retries() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(2);
        let uploader = store_uploader(&store, config(10, 3));
        uploader.sender().enqueue(pair("a")).await.unwrap();
        uploader.sender().enqueue(pair("b")).await.unwrap();

        let tally = uploader.finish().await.unwrap();
        assert_eq!(tally, Tally { processed: 2, errors: 0 });
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_bounded_by_retries() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(usize::MAX);
        let uploader = store_uploader(&store, config(10, 3));
        for key in ["a", "b", "c"] {
            uploader.sender().enqueue(pair(key)).await.unwrap();
        }

        let tally = uploader.finish().await.unwrap();
        assert_eq!(tally, Tally { processed: 0, errors: 3 });
        assert_eq!(store.calls(), 4, "initial attempt plus three retries");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_only_failed_keys_are_retried() {
        let store = Arc::new(MemoryStore::new());
        store.reject_key("b", 0);
        let uploader = store_uploader(&store, config(10, 2));
        for key in ["a", "b", "c"] {
            uploader.sender().enqueue(pair(key)).await.unwrap();
        }

        let tally = uploader.finish().await.unwrap();
        assert_eq!(tally, Tally { processed: 2, errors: 1 });
        assert_eq!(store.calls(), 3);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_keys_counted_per_record() {
        let store = Arc::new(MemoryStore::new());
        store.reject_key("dup", 0);
        let uploader = store_uploader(&store, config(10, 0));
        let sender = uploader.sender();
        sender.enqueue(pair("dup")).await.unwrap();
        sender.enqueue(pair("dup")).await.unwrap();
        sender.enqueue(pair("other")).await.unwrap();
        drop(sender);

        let tally = uploader.finish().await.unwrap();
        assert_eq!(tally, Tally { processed: 1, errors: 2 });
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(500)));
        let config = Arc::new(UploadConfig {
            timeout_ms: 20,
            ..(*config(10, 1)).clone()
        });
        let uploader = store_uploader(&store, config);
        uploader.sender().enqueue(pair("a")).await.unwrap();

        let tally = uploader.finish().await.unwrap();
        assert_eq!(tally, Tally { processed: 0, errors: 1 });
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_blocking_enqueue_from_blocking_thread() {
        let store = Arc::new(MemoryStore::new());
        let uploader = store_uploader(&store, config(100, 0));
        let sender = uploader.sender();

        tokio::task::spawn_blocking(move || {
            for i in 0..20 {
                sender.blocking_enqueue(pair(&format!("k{i}"))).unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(uploader.finish().await.unwrap().processed, 20);
        assert_eq!(store.len(), 20);
    }

    #[tokio::test]
    async fn test_empty_uploader_finishes_with_zero_tally() {
        let store = Arc::new(MemoryStore::new());
        let uploader = store_uploader(&store, config(10, 3));
        assert_eq!(uploader.finish().await.unwrap(), Tally::default());
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_queues_route_by_address() {
        let uploaders = vec![
            ShardUploader::spawn(ShardAddress::new("a:1"), UploadTarget::DryRun, config(10, 0)),
            ShardUploader::spawn(ShardAddress::new("b:2"), UploadTarget::DryRun, config(10, 0)),
        ];
        let queues = ShardQueues::new(&uploaders);
        assert_eq!(queues.len(), 2);
        assert!(queues.get(&ShardAddress::new("c:3")).is_none());

        let sender = queues.get(&ShardAddress::new("b:2")).unwrap().clone();
        sender.enqueue(pair("x")).await.unwrap();
        drop(sender);
        drop(queues);

        let mut processed = Vec::new();
        for uploader in uploaders {
            processed.push(uploader.finish().await.unwrap().processed);
        }
        assert_eq!(processed, vec![0, 1]);
    }
}
