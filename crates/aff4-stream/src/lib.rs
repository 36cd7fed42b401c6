//! Random-access streams over AFF4 forensic containers.
//!
//! An AFF4 container stores a disk or memory image as fixed-size chunks,
//! compressed independently and grouped into "bevvy" segments with companion
//! index tables. Sparse images are described by maps that stitch ranges of
//! several backing streams, including synthetic ones, into one logical
//! address space. This crate turns all of that back into plain byte streams:
//!
//! - [`ImageStream`](stream::ImageStream): chunked, compressed image data
//!   with an LRU chunk cache
//! - [`MapStream`](stream::MapStream): sparse composition of backing streams
//! - [`SymbolicStream`](stream::SymbolicStream) and
//!   [`RepeatedStream`](stream::RepeatedStream): synthetic content for zero,
//!   byte-fill and unknown/unreadable regions
//! - [`SegmentStream`](stream::SegmentStream): one raw archive segment
//!
//! Streams are obtained from a [`ZipContainer`], which combines an opened
//! archive with a [`Metadata`] source describing the streams inside it.
//!
//! # Example
//!
//! ```rust,no_run
//! use aff4_stream::{Catalog, ReaderConfig, Stream, ZipContainer, metadata::MapProperties};
//! use std::sync::Arc;
//!
//! # fn example() -> aff4_stream::Result<()> {
//! let catalog = Catalog::new().with_map(
//!     "aff4://fcbfdce7-4488-4677-abf6-08bc931e195b",
//!     MapProperties::new(268_435_456),
//! );
//! let container = ZipContainer::open("disk.aff4", Arc::new(catalog), ReaderConfig::default())?;
//!
//! if let Some(map) = container.map("aff4://fcbfdce7-4488-4677-abf6-08bc931e195b") {
//!     let stream = map.stream();
//!     let mut sector = vec![0u8; 512];
//!     stream.read(&mut sector, 0)?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use thiserror::Error;

pub mod bevvy;
pub mod cache;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod container;
pub mod lexicon;
pub mod map;
pub mod metadata;
pub mod stream;
pub mod zip_container;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::ReaderConfig;
pub use container::{Container, Resolver, Resource};
pub use map::Map;
pub use metadata::{Catalog, Metadata};
pub use stream::Stream;
pub use zip_container::ZipContainer;

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while reading streams.
#[derive(Debug, Error)]
pub enum StreamError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive structure error.
    #[error("Archive error: {0}")]
    Zip(#[from] aff4_zip::ZipError),

    /// Stream was closed.
    #[error("Stream closed: {0}")]
    Closed(String),

    /// Segment uses a compression method that cannot be read.
    #[error("Unsupported compression method {method} for segment {name}")]
    UnsupportedCompression {
        /// Segment name
        name: String,
        /// Raw ZIP compression method
        method: u16,
    },

    /// Deflated segment exceeds the in-memory inflate limit.
    #[error("Segment {name} too large to inflate ({size} bytes)")]
    SegmentTooLarge {
        /// Segment name
        name: String,
        /// Uncompressed size in bytes
        size: u64,
    },

    /// A chunk could not be located or decompressed.
    #[error("Chunk unavailable in {stream} at offset {offset}")]
    ChunkUnavailable {
        /// Stream resource id
        stream: String,
        /// Chunk-aligned logical offset
        offset: u64,
    },

    /// Chunk decompression failed.
    #[error("Decompression failed: {0}")]
    Decompression(String),

    /// A backing stream of a map returned no data.
    #[error("Backing stream {stream} returned no data at offset {offset}")]
    BackingRead {
        /// Backing stream resource id
        stream: String,
        /// Offset in the backing stream
        offset: u64,
    },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Not an AFF4 container.
    #[error("Not an AFF4 container: {0}")]
    NotAContainer(String),
}
