//! Content-hashing extractor used by `settle watch`

use dashmap::DashMap;
use pipeline::{ExtractError, Extractor, Metadata};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Files above this size are hashed through a memory map
const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Records size, mtime and BLAKE3 hash of every processed file
#[derive(Default)]
pub struct HashExtractor {
    index: DashMap<PathBuf, Metadata>,
}

impl HashExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Metadata> {
        self.index.get(path).map(|entry| entry.value().clone())
    }

    /// Sum of recorded file sizes
    pub fn total_bytes(&self) -> u64 {
        self.index.iter().map(|entry| entry.value().size_bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Extractor for HashExtractor {
    fn extract(&self, path: &Path) -> Result<Metadata, ExtractError> {
        let before = std::fs::metadata(path)?;
        if !before.is_file() {
            return Err(ExtractError::Failed("not a regular file".to_string()));
        }

        let hash = hash_file(path, before.len())?;

        // Double-stat: a write racing the read means the hash is already stale
        let after = std::fs::metadata(path)?;
        if after.len() != before.len() || after.modified().ok() != before.modified().ok() {
            return Err(ExtractError::Failed("file changed while hashing".to_string()));
        }

        let metadata = Metadata {
            size_bytes: after.len(),
            modified: after.modified().ok(),
            ..Default::default()
        }
        .with_attribute("blake3", hash.to_hex().to_string());

        self.index.insert(path.to_path_buf(), metadata.clone());
        Ok(metadata)
    }

    fn remove(&self, path: &Path) -> Result<(), ExtractError> {
        if self.index.remove(path).is_none() {
            // Directory removal: drop everything underneath
            self.index.retain(|indexed, _| !indexed.starts_with(path));
        }
        Ok(())
    }
}

fn hash_file(path: &Path, size: u64) -> Result<blake3::Hash, ExtractError> {
    let mut hasher = blake3::Hasher::new();

    if size > MMAP_THRESHOLD {
        hasher.update_mmap_rayon(path)?;
        return Ok(hasher.finalize());
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher.finalize())
}
