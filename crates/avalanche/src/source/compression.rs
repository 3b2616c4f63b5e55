//! Compression codec abstraction for input files.
//!
//! Codecs wrap a raw byte stream in a streaming decoder so a file is never held
//! in memory as a whole.

use std::io::{BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

/// Trait for codecs that decode an input stream on the fly.
pub trait CompressionCodec: Send + Sync {
    /// Wrap `input` in a buffered, decompressing reader.
    fn wrap(&self, input: Box<dyn Read + Send>) -> Box<dyn BufRead + Send>;

    /// Human-readable name of this codec (for logging).
    fn name(&self) -> &'static str;
}

/// Gzip codec. Concatenated gzip members are read as one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn wrap(&self, input: Box<dyn Read + Send>) -> Box<dyn BufRead + Send> {
        Box::new(BufReader::new(MultiGzDecoder::new(input)))
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Pass-through codec for plain-text inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl CompressionCodec for NoopCodec {
    fn wrap(&self, input: Box<dyn Read + Send>) -> Box<dyn BufRead + Send> {
        Box::new(BufReader::new(input))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Configured input compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    Gzip,
    None,
}

impl CompressionFormat {
    pub fn codec(&self) -> &'static dyn CompressionCodec {
        match self {
            CompressionFormat::Gzip => &GzipCodec,
            CompressionFormat::None => &NoopCodec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const TEST_DATA: &[u8] = b"idfa\t1\t1.0\t2.0\t3\ngaid\t2\t1.0\t2.0\t4\n";

    fn make_gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_all(codec: &dyn CompressionCodec, data: Vec<u8>) -> Vec<u8> {
        let mut reader = codec.wrap(Box::new(Cursor::new(data)));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_gzip_codec_streaming() {
        assert_eq!(read_all(&GzipCodec, make_gzip(TEST_DATA)), TEST_DATA);
    }

    #[test]
    fn test_gzip_codec_reads_concatenated_members() {
        let mut data = make_gzip(b"first\n");
        data.extend(make_gzip(b"second\n"));
        assert_eq!(read_all(&GzipCodec, data), b"first\nsecond\n");
    }

    #[test]
    fn test_gzip_codec_rejects_plain_text() {
        let mut reader = GzipCodec.wrap(Box::new(Cursor::new(TEST_DATA.to_vec())));
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_noop_codec() {
        assert_eq!(read_all(&NoopCodec, TEST_DATA.to_vec()), TEST_DATA);
    }

    #[test]
    fn test_format_codec_names() {
        assert_eq!(CompressionFormat::Gzip.codec().name(), "gzip");
        assert_eq!(CompressionFormat::None.codec().name(), "none");
        assert_eq!(CompressionFormat::default(), CompressionFormat::Gzip);
    }

    #[test]
    fn test_format_from_yaml() {
        let format: CompressionFormat = serde_yaml::from_str("none").unwrap();
        assert_eq!(format, CompressionFormat::None);
        assert!(serde_yaml::from_str::<CompressionFormat>("zstd").is_err());
    }
}
