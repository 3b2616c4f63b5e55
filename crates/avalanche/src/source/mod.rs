//! Input side: discovering files, decompressing them and cutting them into
//! chunks of lines.

mod compression;
mod listing;
mod reader;

pub use compression::{CompressionCodec, CompressionFormat, GzipCodec, NoopCodec};
pub use listing::{DONE_MARKER, done_path, list_input_files, mark_done};
pub use reader::{Chunk, ChunkReader, open_input, spawn_chunk_reader};
