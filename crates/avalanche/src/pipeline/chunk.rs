//! Per-chunk parse, route and enqueue.
//!
//! Runs on a blocking thread; lines within a chunk are handled sequentially.
//! Pairs handed to a shard queue are not counted here: the uploader decides
//! whether they were processed or failed.

use std::collections::HashMap;

use tracing::{debug, warn};

use avalanche_core::emit;
use avalanche_core::metrics::events::{LinesRead, RecordsDegraded, RecordsRejected, RejectReason};

use super::Tally;
use crate::record::{ParseOutcome, parse_line};
use crate::shard::{ShardQueues, ShardTable};
use crate::source::Chunk;

/// What a chunk contributed before upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Parse and routing errors only; `processed` is always 0.
    pub tally: Tally,
    /// Pairs accepted by a shard queue.
    pub routed: u64,
    /// Non-blank lines seen.
    pub lines: u64,
    /// Records kept with defaulted or dropped fields.
    pub degraded: u64,
}

/// Parse every line of `chunk` and push the resulting pairs to their shards.
///
/// Blocks while a shard queue is full. Must not be called from async context.
pub fn process_chunk(chunk: Chunk, table: &ShardTable, queues: &ShardQueues) -> ChunkOutcome {
    let mut outcome = ChunkOutcome::default();
    let mut malformed = 0u64;
    let mut unknown: HashMap<String, u64> = HashMap::new();
    let mut closed = 0u64;

    for line in &chunk.lines {
        if line.trim().is_empty() {
            continue;
        }
        outcome.lines += 1;

        let record = match parse_line(line) {
            ParseOutcome::Valid(record) => record,
            ParseOutcome::Degraded(record, degradations) => {
                outcome.degraded += 1;
                debug!(
                    chunk = chunk.index,
                    key = %record.key(),
                    ?degradations,
                    "Record kept with defaults"
                );
                record
            }
            ParseOutcome::Malformed(reason) => {
                malformed += 1;
                debug!(chunk = chunk.index, %reason, line = %line, "Malformed line");
                continue;
            }
        };

        let Some(sender) = table.route(&record.category).and_then(|a| queues.get(a)) else {
            *unknown.entry(record.category).or_default() += 1;
            continue;
        };

        if sender.blocking_enqueue(record.to_key_value()).is_err() {
            closed += 1;
            continue;
        }
        outcome.routed += 1;
    }

    let unknown_total: u64 = unknown.values().sum();
    for (category, count) in &unknown {
        warn!(chunk = chunk.index, category = %category, count, "Unknown device type");
    }
    if closed > 0 {
        warn!(chunk = chunk.index, count = closed, "Shard queue closed, records dropped");
    }

    outcome.tally = Tally::errors(malformed + unknown_total + closed);

    emit!(LinesRead {
        count: outcome.lines
    });
    if malformed > 0 {
        emit!(RecordsRejected {
            count: malformed,
            reason: RejectReason::Malformed,
        });
    }
    if unknown_total > 0 {
        emit!(RecordsRejected {
            count: unknown_total,
            reason: RejectReason::UnknownCategory,
        });
    }
    if closed > 0 {
        emit!(RecordsRejected {
            count: closed,
            reason: RejectReason::QueueClosed,
        });
    }
    if outcome.degraded > 0 {
        emit!(RecordsDegraded {
            count: outcome.degraded
        });
    }

    outcome
}
