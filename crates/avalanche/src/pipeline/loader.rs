//! File loader: drives one input file at a time through read, parse, upload
//! and completion.
//!
//! # Per-file flow
//!
//! ```text
//! Discovered -> Reading -> Draining -> Completed
//! ```
//!
//! - Reading: a blocking reader streams chunks through a channel bounded by the
//!   worker count; up to `workers` chunks are parsed at once on blocking
//!   threads, pushing pairs into per-shard queues while the uploaders write
//!   concurrently.
//! - Draining: every uploader flushes its partial batch and is joined.
//! - Completed: the file tally decides between loaded and rejected, and the
//!   file is renamed with a leading `.` according to policy.
//!
//! Uploaders are always drained, even when reading fails or a shutdown is
//! requested, so pairs already queued are written before the error surfaces.
//! A file that did not complete is never renamed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use avalanche_core::emit;
use avalanche_core::metrics::events::{ChunksInFlight, FileErrorRate, FileProcessed, FileStatus};

use super::chunk::{ChunkOutcome, process_chunk};
use super::Tally;
use crate::config::{Config, UploadConfig};
use crate::error::{LoaderError, MarkDoneSnafu, StoreError};
use crate::shard::{
    KeyValueStore, RedisStore, ShardAddress, ShardQueues, ShardTable, ShardUploader, UploadTarget,
};
use crate::source::{list_input_files, mark_done, spawn_chunk_reader};

/// Where a file is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Discovered,
    Reading,
    Draining,
    Completed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileState::Discovered => "discovered",
            FileState::Reading => "reading",
            FileState::Draining => "draining",
            FileState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Verdict for a completed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Error rate under the threshold.
    Loaded,
    /// Error rate at or over the threshold.
    Rejected,
    /// Nothing was processed.
    Empty,
}

impl FileOutcome {
    fn status(self) -> FileStatus {
        match self {
            FileOutcome::Loaded => FileStatus::Loaded,
            FileOutcome::Rejected => FileStatus::Rejected,
            FileOutcome::Empty => FileStatus::Empty,
        }
    }
}

/// Result of loading one file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub tally: Tally,
    pub error_rate: f64,
    pub outcome: FileOutcome,
    /// New path when the file was marked done.
    pub marked_done: Option<PathBuf>,
    pub duration: Duration,
}

/// Result of a whole run.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub files: Vec<FileReport>,
    /// The run stopped early on a shutdown request.
    pub interrupted: bool,
}

impl LoadSummary {
    pub fn tally(&self) -> Tally {
        self.files.iter().map(|report| report.tally).sum()
    }

    pub fn count(&self, outcome: FileOutcome) -> usize {
        self.files.iter().filter(|report| report.outcome == outcome).count()
    }
}

/// Loads matching input files into their shards, one file at a time.
pub struct FileLoader {
    config: Config,
    upload: Arc<UploadConfig>,
    table: Arc<ShardTable>,
    targets: Vec<(ShardAddress, UploadTarget)>,
    shutdown: CancellationToken,
}

impl FileLoader {
    /// Build a loader writing to a network store per shard address. Dry-run
    /// configurations never open a connection.
    pub fn connect(config: Config, shutdown: CancellationToken) -> Result<Self, LoaderError> {
        let table = ShardTable::from_config(&config.shards);
        let targets = table
            .addresses()
            .into_iter()
            .map(|address| -> Result<_, StoreError> {
                let target = if config.upload.dry_run {
                    UploadTarget::DryRun
                } else {
                    UploadTarget::Store(Arc::new(RedisStore::new(address.clone())?))
                };
                Ok((address, target))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(config, table, targets, shutdown))
    }

    /// Build a loader sending every shard to `store`.
    pub fn with_store(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let table = ShardTable::from_config(&config.shards);
        let targets = table
            .addresses()
            .into_iter()
            .map(|address| {
                let target = if config.upload.dry_run {
                    UploadTarget::DryRun
                } else {
                    UploadTarget::Store(store.clone())
                };
                (address, target)
            })
            .collect();
        Self::new(config, table, targets, shutdown)
    }

    fn new(
        config: Config,
        table: ShardTable,
        targets: Vec<(ShardAddress, UploadTarget)>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            upload: Arc::new(config.upload.clone()),
            table: Arc::new(table),
            config,
            targets,
            shutdown,
        }
    }

    /// Load every file matching the configured pattern, in sorted order.
    ///
    /// Stops after the current file when shutdown is requested. Read failures
    /// are fatal and returned after the file's uploaders have drained.
    pub async fn run(&self) -> Result<LoadSummary, LoaderError> {
        let files = list_input_files(&self.config.source.pattern)?;
        info!(
            pattern = %self.config.source.pattern,
            files = files.len(),
            shards = self.targets.len(),
            categories = ?self.table.categories().collect::<Vec<_>>(),
            workers = self.config.source.workers,
            dry_run = self.config.upload.dry_run,
            "Starting load"
        );

        let mut summary = LoadSummary::default();
        for path in files {
            if self.shutdown.is_cancelled() {
                info!("Shutdown requested, skipping remaining files");
                summary.interrupted = true;
                break;
            }

            let start = Instant::now();
            match self.process_file(&path).await {
                Ok(report) => summary.files.push(report),
                Err(e) if e.is_interrupted() => {
                    warn!(path = %path.display(), "Load interrupted; file left in place");
                    emit!(FileProcessed {
                        status: FileStatus::Failed,
                        duration: start.elapsed(),
                    });
                    summary.interrupted = true;
                    break;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to load file");
                    emit!(FileProcessed {
                        status: FileStatus::Failed,
                        duration: start.elapsed(),
                    });
                    return Err(e);
                }
            }
        }

        let tally = summary.tally();
        info!(
            files = summary.files.len(),
            loaded = summary.count(FileOutcome::Loaded),
            rejected = summary.count(FileOutcome::Rejected),
            empty = summary.count(FileOutcome::Empty),
            processed = tally.processed,
            errors = tally.errors,
            "Load finished"
        );
        Ok(summary)
    }

    /// Load one file and apply the completion policy.
    pub async fn process_file(&self, path: &Path) -> Result<FileReport, LoaderError> {
        let start = Instant::now();
        let mut state = FileState::Discovered;
        info!(path = %path.display(), "Processing file");

        self.transition(path, &mut state, FileState::Reading);
        let uploaders: Vec<ShardUploader> = self
            .targets
            .iter()
            .map(|(address, target)| {
                ShardUploader::spawn(address.clone(), target.clone(), self.upload.clone())
            })
            .collect();
        let queues = Arc::new(ShardQueues::new(&uploaders));

        let dispatched = self.dispatch(path, &queues).await;
        drop(queues);

        self.transition(path, &mut state, FileState::Draining);
        let mut shard_tally = Tally::default();
        let mut join_error = None;
        for uploader in uploaders {
            match uploader.finish().await {
                Ok(tally) => shard_tally += tally,
                Err(e) => {
                    join_error.get_or_insert(e);
                }
            }
        }

        let parse_tally = dispatched?;
        if let Some(e) = join_error {
            return Err(e);
        }

        let tally = parse_tally + shard_tally;
        let error_rate = tally.error_rate();
        let outcome = if tally.processed == 0 {
            FileOutcome::Empty
        } else if error_rate < self.config.completion.max_error_rate {
            FileOutcome::Loaded
        } else {
            FileOutcome::Rejected
        };
        self.transition(path, &mut state, FileState::Completed);

        match outcome {
            FileOutcome::Loaded => info!(
                path = %path.display(),
                processed = tally.processed,
                errors = tally.errors,
                error_rate,
                "Acceptable error rate, file loaded"
            ),
            FileOutcome::Rejected => error!(
                path = %path.display(),
                processed = tally.processed,
                errors = tally.errors,
                error_rate,
                max_error_rate = self.config.completion.max_error_rate,
                "High error rate, file rejected"
            ),
            FileOutcome::Empty => warn!(
                path = %path.display(),
                errors = tally.errors,
                "No records processed"
            ),
        }

        let mark = outcome != FileOutcome::Rejected || self.config.completion.mark_failed_done;
        let marked_done = if mark {
            let target = mark_done(path).await.context(MarkDoneSnafu { path })?;
            debug!(path = %path.display(), to = %target.display(), "Marked done");
            Some(target)
        } else {
            info!(path = %path.display(), "Rejected file left in place");
            None
        };

        let duration = start.elapsed();
        emit!(FileErrorRate { rate: error_rate });
        emit!(FileProcessed {
            status: outcome.status(),
            duration,
        });

        Ok(FileReport {
            path: path.to_path_buf(),
            tally,
            error_rate,
            outcome,
            marked_done,
            duration,
        })
    }

    /// Feed chunks to the worker pool until the file is exhausted, a read
    /// fails, or shutdown is requested. Returns parse and routing errors.
    async fn dispatch(&self, path: &Path, queues: &Arc<ShardQueues>) -> Result<Tally, LoaderError> {
        let workers = self.config.source.workers;
        let (mut chunk_rx, reader) = spawn_chunk_reader(
            path.to_path_buf(),
            self.config.source.compression,
            self.config.source.chunk_lines,
            workers,
        );

        let mut in_flight: FuturesUnordered<JoinHandle<ChunkOutcome>> = FuturesUnordered::new();
        let mut tally = Tally::default();
        let mut failure: Option<LoaderError> = None;
        let mut exhausted = false;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled(), if failure.is_none() && !exhausted => {
                    warn!(
                        path = %path.display(),
                        in_flight = in_flight.len(),
                        "Shutdown requested, finishing in-flight chunks"
                    );
                    failure = Some(LoaderError::Interrupted { path: path.to_path_buf() });
                }

                Some(joined) = in_flight.next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok(outcome) => tally += outcome.tally,
                        Err(source) => {
                            error!(path = %path.display(), error = %source, "Chunk worker failed");
                            failure.get_or_insert(LoaderError::TaskJoin { source });
                        }
                    }
                    emit!(ChunksInFlight { count: in_flight.len() });
                }

                received = chunk_rx.recv(), if !exhausted && failure.is_none() && in_flight.len() < workers => {
                    match received {
                        Some(Ok(chunk)) => {
                            let table = self.table.clone();
                            let queues = queues.clone();
                            in_flight.push(tokio::task::spawn_blocking(move || {
                                process_chunk(chunk, &table, &queues)
                            }));
                            emit!(ChunksInFlight { count: in_flight.len() });
                        }
                        Some(Err(e)) => {
                            error!(path = %path.display(), error = %e, "Failed to read input");
                            failure = Some(e.into());
                        }
                        None => exhausted = true,
                    }
                }

                else => break,
            }

            if (exhausted || failure.is_some()) && in_flight.is_empty() {
                break;
            }
        }

        // Unblocks a reader waiting on a full channel.
        drop(chunk_rx);
        if let Err(source) = reader.await {
            failure.get_or_insert(LoaderError::TaskJoin { source });
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(tally),
        }
    }

    fn transition(&self, path: &Path, state: &mut FileState, next: FileState) {
        debug!(path = %path.display(), from = %state, to = %next, "File state");
        *state = next;
    }
}
