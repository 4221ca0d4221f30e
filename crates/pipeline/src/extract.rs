//! The extraction seam invoked by workers

use crate::error::ExtractError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

/// Whatever an extractor learned about a file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
    /// Extractor-specific key/value pairs
    pub attributes: BTreeMap<String, String>,
}

impl Metadata {
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Pluggable, possibly slow, per-file processing step.
///
/// Shared by every worker, so implementations must tolerate concurrent calls.
pub trait Extractor: Send + Sync {
    /// Read `path` and produce its metadata
    fn extract(&self, path: &Path) -> Result<Metadata, ExtractError>;

    /// Forget everything known about `path`
    fn remove(&self, path: &Path) -> Result<(), ExtractError>;
}
