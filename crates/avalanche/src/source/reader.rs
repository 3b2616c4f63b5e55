//! Chunked line reader.
//!
//! Splits a decoded input stream into fixed-size chunks of lines. The reader is
//! lazy and finite: it yields chunks until the stream ends or a read fails, and
//! the last chunk may be shorter than the rest.

use std::fs::File;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::CompressionFormat;
use crate::error::{OpenSnafu, ReadSnafu, ReaderError};

/// Consecutive lines from one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position of this chunk in the file.
    pub index: usize,
    pub lines: Vec<String>,
}

/// Open `path` and wrap it in the decoder for `format`.
pub fn open_input(path: &Path, format: CompressionFormat) -> Result<Box<dyn BufRead + Send>, ReaderError> {
    let file = File::open(path).context(OpenSnafu { path })?;
    Ok(format.codec().wrap(Box::new(file)))
}

/// Iterator of [`Chunk`]s over a buffered reader.
///
/// Lines are split on `\n` with a trailing `\r` removed. Invalid UTF-8 is
/// replaced rather than treated as a read failure.
pub struct ChunkReader<R> {
    reader: R,
    path: PathBuf,
    chunk_lines: usize,
    next_index: usize,
    lines_read: u64,
    done: bool,
}

impl<R: BufRead> ChunkReader<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>, chunk_lines: usize) -> Self {
        Self {
            reader,
            path: path.into(),
            chunk_lines: chunk_lines.max(1),
            next_index: 0,
            lines_read: 0,
            done: false,
        }
    }

    /// Lines read so far, blank lines included.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }
}

impl<R: BufRead> Iterator for ChunkReader<R> {
    type Item = Result<Chunk, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut lines = Vec::with_capacity(self.chunk_lines);
        let mut buf = Vec::new();
        while lines.len() < self.chunk_lines {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                    }
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                    lines.push(String::from_utf8_lossy(&buf).into_owned());
                    self.lines_read += 1;
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(source).context(ReadSnafu {
                        path: self.path.clone(),
                        lines: self.lines_read,
                    }));
                }
            }
        }

        if lines.is_empty() {
            return None;
        }

        let chunk = Chunk {
            index: self.next_index,
            lines,
        };
        self.next_index += 1;
        Some(Ok(chunk))
    }
}

/// Spawn a blocking task that opens `path` and streams its chunks.
///
/// The channel is bounded by `capacity`, so reading stays at most that many
/// chunks ahead of processing. A read error is sent as the final item. The task
/// stops early if the receiver is dropped.
pub fn spawn_chunk_reader(
    path: PathBuf,
    format: CompressionFormat,
    chunk_lines: usize,
    capacity: usize,
) -> (mpsc::Receiver<Result<Chunk, ReaderError>>, JoinHandle<()>) {
    let (chunk_tx, chunk_rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::task::spawn_blocking(move || {
        let input = match open_input(&path, format) {
            Ok(input) => input,
            Err(e) => {
                let _ = chunk_tx.blocking_send(Err(e));
                return;
            }
        };

        let mut reader = ChunkReader::new(input, &path, chunk_lines);
        for chunk in reader.by_ref() {
            if chunk_tx.blocking_send(chunk).is_err() {
                debug!(path = %path.display(), "Chunk receiver dropped, stopping reader");
                return;
            }
        }
        debug!(
            path = %path.display(),
            lines = reader.lines_read(),
            codec = format.codec().name(),
            "Finished reading"
        );
    });

    (chunk_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn chunks(data: &[u8], chunk_lines: usize) -> Vec<Chunk> {
        ChunkReader::new(Cursor::new(data.to_vec()), "test", chunk_lines)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_chunks_of_fixed_size_with_short_tail() {
        let data = b"a\nb\nc\nd\ne\n";
        let chunks = chunks(data, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].lines, vec!["a", "b"]);
        assert_eq!(chunks[2].lines, vec!["e"]);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        assert_eq!(chunks(b"a\nb\nc\nd\n", 2).len(), 2);
    }

    #[test]
    fn test_missing_final_newline_and_crlf() {
        let chunks = chunks(b"a\r\nb", 10);
        assert_eq!(chunks[0].lines, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let chunks = chunks(b"ok\n\xff\xfe\n", 10);
        assert_eq!(chunks[0].lines.len(), 2);
        assert!(chunks[0].lines[1].contains('\u{fffd}'));
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert!(chunks(b"", 10).is_empty());
    }

    #[test]
    fn test_blank_lines_are_kept() {
        let mut reader = ChunkReader::new(Cursor::new(b"a\n\nb\n".to_vec()), "test", 10);
        let chunk = reader.next().unwrap().unwrap();
        assert_eq!(chunk.lines, vec!["a", "", "b"]);
        assert_eq!(reader.lines_read(), 3);
        assert!(reader.next().is_none());
    }

    #[tokio::test]
    async fn test_spawned_reader_streams_gzip_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.tsv.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        for i in 0..25 {
            writeln!(encoder, "idfa\t{i}\t1.0\t2.0\t1,2").unwrap();
        }
        encoder.finish().unwrap();

        let (mut rx, handle) = spawn_chunk_reader(path, CompressionFormat::Gzip, 10, 2);
        let mut sizes = Vec::new();
        while let Some(chunk) = rx.recv().await {
            sizes.push(chunk.unwrap().lines.len());
        }
        handle.await.unwrap();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn test_spawned_reader_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let (mut rx, handle) =
            spawn_chunk_reader(dir.path().join("missing.gz"), CompressionFormat::Gzip, 10, 2);
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(ReaderError::Open { .. })));
        assert!(rx.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_spawned_reader_reports_corrupt_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.tsv.gz");
        std::fs::write(&path, b"not gzip at all\n").unwrap();

        let (mut rx, handle) = spawn_chunk_reader(path, CompressionFormat::Gzip, 10, 2);
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(ReaderError::Read { .. })));
        handle.await.unwrap();
    }
}
