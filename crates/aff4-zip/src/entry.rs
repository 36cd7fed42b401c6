//! Parsed archive entries.

use std::fmt;

/// Compression applied to a ZIP entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Method 0, raw bytes.
    Stored,
    /// Method 8, raw deflate stream.
    Deflate,
    /// Any other method; entries using it cannot be read.
    Other(u16),
}

impl CompressionMethod {
    /// Map a raw ZIP method number.
    pub const fn from_raw(method: u16) -> Self {
        match method {
            0 => Self::Stored,
            8 => Self::Deflate,
            other => Self::Other(other),
        }
    }

    /// Raw ZIP method number.
    pub const fn as_raw(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored => write!(f, "stored"),
            Self::Deflate => write!(f, "deflate"),
            Self::Other(method) => write!(f, "method {method}"),
        }
    }
}

/// One segment of an archive, resolved to absolute file offsets.
///
/// Offsets already include the global correction for archives that were
/// appended to other data, so they can be used for positioned reads as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Segment name as stored in the central directory
    pub name: String,
    /// Absolute offset of the local file header
    pub header_offset: u64,
    /// Absolute offset of the first data byte
    pub data_offset: u64,
    /// Size of the stored payload
    pub compressed_size: u64,
    /// Size after decompression
    pub uncompressed_size: u64,
    /// Compression applied to the payload
    pub compression: CompressionMethod,
}

impl ArchiveEntry {
    /// Offset one past the last payload byte.
    pub fn data_end(&self) -> u64 {
        self.data_offset.saturating_add(self.compressed_size)
    }

    /// Whether the payload is stored without compression.
    pub fn is_stored(&self) -> bool {
        self.compression == CompressionMethod::Stored
    }
}
