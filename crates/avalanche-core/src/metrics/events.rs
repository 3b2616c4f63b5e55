//! Internal events for avalanche metrics emission.
//!
//! Each struct is one measurable occurrence in the loader. Shard-level events
//! carry a `shard` label holding the shard address.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Non-blank lines read from input files.
pub struct LinesRead {
    pub count: u64,
}

impl InternalEvent for LinesRead {
    fn emit(self) {
        trace!(count = self.count, "Lines read");
        counter!("avalanche_lines_read_total").increment(self.count);
    }
}

/// Why a line never reached a shard queue.
#[derive(Debug, Clone, Copy)]
pub enum RejectReason {
    Malformed,
    UnknownCategory,
    QueueClosed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Malformed => "malformed",
            RejectReason::UnknownCategory => "unknown_category",
            RejectReason::QueueClosed => "queue_closed",
        }
    }
}

/// Lines rejected before upload.
pub struct RecordsRejected {
    pub count: u64,
    pub reason: RejectReason,
}

impl InternalEvent for RecordsRejected {
    fn emit(self) {
        trace!(count = self.count, reason = self.reason.as_str(), "Records rejected");
        counter!("avalanche_records_rejected_total", "reason" => self.reason.as_str())
            .increment(self.count);
    }
}

/// Records parsed with defaulted or dropped optional fields.
pub struct RecordsDegraded {
    pub count: u64,
}

impl InternalEvent for RecordsDegraded {
    fn emit(self) {
        trace!(count = self.count, "Records degraded");
        counter!("avalanche_records_degraded_total").increment(self.count);
    }
}

/// Keys confirmed written by a shard.
pub struct KeysUploaded {
    pub count: u64,
    pub shard: String,
}

impl InternalEvent for KeysUploaded {
    fn emit(self) {
        trace!(count = self.count, shard = %self.shard, "Keys uploaded");
        counter!("avalanche_keys_uploaded_total", "shard" => self.shard).increment(self.count);
    }
}

/// Keys still failing after all retries.
pub struct KeysFailed {
    pub count: u64,
    pub shard: String,
}

impl InternalEvent for KeysFailed {
    fn emit(self) {
        trace!(count = self.count, shard = %self.shard, "Keys failed");
        counter!("avalanche_keys_failed_total", "shard" => self.shard).increment(self.count);
    }
}

/// A retry of a partially failed upsert.
pub struct UpsertRetried {
    pub keys: u64,
    pub shard: String,
}

impl InternalEvent for UpsertRetried {
    fn emit(self) {
        trace!(keys = self.keys, shard = %self.shard, "Upsert retried");
        counter!("avalanche_upsert_retries_total", "shard" => self.shard).increment(1);
    }
}

/// Wall time of one upsert call.
pub struct UpsertDuration {
    pub duration: Duration,
    pub shard: String,
}

impl InternalEvent for UpsertDuration {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), shard = %self.shard, "Upsert duration");
        histogram!("avalanche_upsert_duration_seconds", "shard" => self.shard)
            .record(self.duration.as_secs_f64());
    }
}

/// Chunks currently being parsed.
pub struct ChunksInFlight {
    pub count: usize,
}

impl InternalEvent for ChunksInFlight {
    fn emit(self) {
        gauge!("avalanche_chunks_in_flight").set(self.count as f64);
    }
}

/// Final status of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Loaded,
    Rejected,
    Empty,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Loaded => "loaded",
            FileStatus::Rejected => "rejected",
            FileStatus::Empty => "empty",
            FileStatus::Failed => "failed",
        }
    }
}

/// An input file finished (or was abandoned).
pub struct FileProcessed {
    pub status: FileStatus,
    pub duration: Duration,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "File processed");
        counter!("avalanche_files_processed_total", "status" => self.status.as_str()).increment(1);
        histogram!("avalanche_file_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Error rate of the last completed file.
pub struct FileErrorRate {
    pub rate: f64,
}

impl InternalEvent for FileErrorRate {
    fn emit(self) {
        gauge!("avalanche_file_error_rate").set(self.rate);
    }
}
