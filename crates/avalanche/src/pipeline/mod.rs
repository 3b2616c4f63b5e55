//! Loading pipeline: chunk processing, per-file orchestration and tallies.

mod chunk;
mod loader;
mod tally;

pub use chunk::{ChunkOutcome, process_chunk};
pub use loader::{FileLoader, FileOutcome, FileReport, FileState, LoadSummary};
pub use tally::Tally;
