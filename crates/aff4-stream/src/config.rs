//! Reader configuration
//!
//! Replaces a process-wide cache-size setting with a value that is passed to
//! each container and, through it, to every image stream it creates.

use serde::{Deserialize, Serialize};

/// Smallest accepted chunk-cache budget (1 MiB).
pub const MIN_CHUNK_CACHE_BYTES: u64 = 1024 * 1024;

/// Default chunk-cache budget (32 MiB).
pub const DEFAULT_CHUNK_CACHE_BYTES: u64 = 32 * 1024 * 1024;

/// Default number of bevvy indices cached per image stream.
pub const DEFAULT_BEVVY_CACHE_ENTRIES: usize = 16;

/// Configuration for stream readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Byte budget for each image stream's decompressed chunk cache
    chunk_cache_bytes: u64,

    /// Number of bevvy indices cached per image stream
    bevvy_cache_entries: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_cache_bytes: DEFAULT_CHUNK_CACHE_BYTES,
            bevvy_cache_entries: DEFAULT_BEVVY_CACHE_ENTRIES,
        }
    }
}

impl ReaderConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk-cache byte budget
    pub const fn chunk_cache_bytes(&self) -> u64 {
        self.chunk_cache_bytes
    }

    /// Bevvy-index cache capacity
    pub const fn bevvy_cache_entries(&self) -> usize {
        self.bevvy_cache_entries
    }

    /// Change the chunk-cache byte budget.
    ///
    /// Only powers of two of at least [`MIN_CHUNK_CACHE_BYTES`] are accepted;
    /// anything else leaves the budget unchanged. Returns the previous budget
    /// either way.
    pub fn set_chunk_cache_bytes(&mut self, bytes: u64) -> u64 {
        let previous = self.chunk_cache_bytes;
        if bytes >= MIN_CHUNK_CACHE_BYTES && bytes.is_power_of_two() {
            self.chunk_cache_bytes = bytes;
        }
        previous
    }

    /// Set the chunk-cache byte budget (same validation as
    /// [`set_chunk_cache_bytes`](Self::set_chunk_cache_bytes))
    #[must_use]
    pub fn with_chunk_cache_bytes(mut self, bytes: u64) -> Self {
        self.set_chunk_cache_bytes(bytes);
        self
    }

    /// Set the bevvy-index cache capacity (at least one entry)
    #[must_use]
    pub fn with_bevvy_cache_entries(mut self, entries: usize) -> Self {
        self.bevvy_cache_entries = entries.max(1);
        self
    }

    /// Number of chunks of `chunk_size` bytes that fit the budget, at least one
    pub fn chunk_cache_capacity(&self, chunk_size: u32) -> usize {
        if chunk_size == 0 {
            return 1;
        }
        let chunks = self.chunk_cache_bytes / u64::from(chunk_size);
        usize::try_from(chunks).unwrap_or(usize::MAX).max(1)
    }
}
