//! Install records: parsing input lines and encoding store payloads.

mod encoding;
mod parser;

pub use encoding::UserApps;
pub use parser::{Degradation, MalformedReason, ParseOutcome, parse_line};

use bytes::Bytes;

/// One device's installed applications, as read from an input line.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Device type (`idfa`, `gaid`, ...). Selects the shard.
    pub category: String,
    /// Device identifier, unique within a category.
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub app_ids: Vec<u32>,
}

/// A store key and its encoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub payload: Bytes,
}

impl Record {
    /// Store key: `category:id`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.category, self.id)
    }

    /// Build the key/payload pair written to the shard.
    pub fn to_key_value(&self) -> KeyValue {
        KeyValue {
            key: self.key(),
            payload: encoding::encode(self),
        }
    }
}
