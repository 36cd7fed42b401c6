//! ZIP and ZIP64 archive reader for AFF4 forensic containers.
//!
//! AFF4 containers are ordinary ZIP archives whose segments carry chunked
//! image data, index tables and metadata. This crate parses the structural
//! records of such archives and gives positioned, cursor-free access to the
//! bytes behind each segment:
//!
//! - End-of-central-directory discovery with trailing comments
//! - ZIP64 locator, end record and extra field handling
//! - Global offset correction for archives appended to other data
//! - Fast container identification through `container.description`
//!
//! # Example
//!
//! ```rust,no_run
//! use aff4_zip::ZipArchive;
//!
//! # fn example() -> aff4_zip::Result<()> {
//! let archive = ZipArchive::open("evidence.aff4")?;
//! for entry in archive.entries() {
//!     println!("{} ({} bytes)", entry.name, entry.uncompressed_size);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use thiserror::Error;

pub mod archive;
pub mod constants;
pub mod description;
pub mod entry;
pub mod records;
mod source;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use archive::ZipArchive;
pub use description::{is_aff4_container, read_resource_id};
pub use entry::{ArchiveEntry, CompressionMethod};

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ZipError>;

/// Errors that can occur while reading an archive.
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary record could not be decoded.
    #[error("Binary format error: {0}")]
    BinRead(#[from] binrw::Error),

    /// No end-of-central-directory record in the archive tail.
    #[error("End of central directory not found")]
    EndOfCentralDirectoryNotFound,

    /// ZIP64 locator or end record is missing or inconsistent.
    #[error("Invalid ZIP64 record: {0}")]
    InvalidZip64(String),

    /// A structural record points outside the archive or is truncated.
    #[error("Truncated archive: {0}")]
    Truncated(String),

    /// Structural record is malformed.
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// Named entry does not exist.
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Entry uses a compression method this reader cannot decode.
    #[error("Unsupported compression method {method} for {name}")]
    UnsupportedCompression {
        /// Entry name
        name: String,
        /// Raw ZIP compression method
        method: u16,
    },

    /// Entry is too large to inflate in memory.
    #[error("Entry {name} too large to inflate ({size} bytes)")]
    EntryTooLarge {
        /// Entry name
        name: String,
        /// Uncompressed size in bytes
        size: u64,
    },

    /// Not an AFF4 container.
    #[error("Not an AFF4 container: {0}")]
    NotAContainer(String),
}
