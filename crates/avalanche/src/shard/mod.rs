//! Shard routing and per-shard upload.
//!
//! Every device category maps to exactly one store address. Records whose
//! category has no mapping are never uploaded.

mod store;
mod uploader;

pub use store::{KeyValueStore, MemoryStore, RedisStore};
pub use uploader::{ShardMessage, ShardQueues, ShardSender, ShardUploader, UploadTarget};

use std::fmt;

use indexmap::IndexMap;

/// A store endpoint in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardAddress(String);

impl ShardAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable category to address table, shared read-only by all workers.
#[derive(Debug, Clone, Default)]
pub struct ShardTable {
    routes: IndexMap<String, ShardAddress>,
}

impl ShardTable {
    /// Build from a validated `category -> host:port` mapping.
    pub fn from_config(shards: &IndexMap<String, String>) -> Self {
        let routes = shards
            .iter()
            .map(|(category, address)| (category.clone(), ShardAddress::new(address.as_str())))
            .collect();
        Self { routes }
    }

    /// Address for `category`, or `None` when the category is unknown.
    pub fn route(&self, category: &str) -> Option<&ShardAddress> {
        self.routes.get(category)
    }

    /// Distinct addresses in configuration order. Several categories may share
    /// one address; each address gets a single uploader.
    pub fn addresses(&self) -> Vec<ShardAddress> {
        let mut seen: Vec<ShardAddress> = Vec::with_capacity(self.routes.len());
        for address in self.routes.values() {
            if !seen.contains(address) {
                seen.push(address.clone());
            }
        }
        seen
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
