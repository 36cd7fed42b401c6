//! AFF4 vocabulary used by the stream layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base URI of the AFF4 schema.
pub const AFF4_BASE_URI: &str = "http://aff4.org/Schema#";

/// Prefix of container and stream resource ids.
pub const AFF4_URN_PREFIX: &str = "aff4://";

/// Segment-name encoding of [`AFF4_URN_PREFIX`].
pub const AFF4_URN_PREFIX_ENCODED: &str = "aff4%3A%2F%2F";

/// Symbolic stream of zero bytes.
pub const IMAGESTREAM_ZERO: &str = "http://aff4.org/Schema#Zero";

/// Symbolic stream of 0xFF bytes.
pub const IMAGESTREAM_FF: &str = "http://aff4.org/Schema#FFDevice";

/// Placeholder for data that was never acquired.
pub const IMAGESTREAM_UNKNOWN: &str = "http://aff4.org/Schema#UnknownData";

/// Placeholder for data that could not be read from the source.
pub const IMAGESTREAM_UNREADABLE: &str = "http://aff4.org/Schema#UnreadableData";

/// Prefix of byte-fill streams; two hex digits give the byte.
pub const IMAGESTREAM_SYMBOLIC_PREFIX: &str = "http://aff4.org/Schema#SymbolicStream";

/// Fill text of unknown-data placeholders.
pub const UNKNOWN_PATTERN: &str = "UNKNOWN";

/// Fill text of unreadable-data placeholders.
pub const UNREADABLE_PATTERN: &str = "UNREADABLEDATA";

/// Property: container holding a resource.
pub const AFF4_STORED: &str = "http://aff4.org/Schema#stored";

/// Property: logical size.
pub const AFF4_SIZE: &str = "http://aff4.org/Schema#size";

/// Property: chunk size of an image stream.
pub const AFF4_CHUNK_SIZE: &str = "http://aff4.org/Schema#chunkSize";

/// Property: chunks per bevvy segment.
pub const AFF4_CHUNKS_IN_SEGMENT: &str = "http://aff4.org/Schema#chunksInSegment";

/// Property: compression codec of an image stream.
pub const AFF4_COMPRESSION_METHOD: &str = "http://aff4.org/Schema#compressionMethod";

/// Property: stream filling map gaps.
pub const AFF4_MAP_GAP_STREAM: &str = "http://aff4.org/Schema#mapGapDefaultStream";

/// Property: backing streams of a map.
pub const AFF4_DEPENDENT_STREAM: &str = "http://aff4.org/Schema#dependentStream";

/// Chunk codec of an image stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionMethod {
    /// Chunks stored as-is.
    Stored,
    /// Raw deflate (RFC 1951).
    Deflate,
    /// Zlib-wrapped deflate (RFC 1950), written by older tools.
    Zlib,
    /// Snappy raw format.
    Snappy,
    /// LZ4 block format.
    Lz4,
}

impl CompressionMethod {
    /// URI for [`CompressionMethod::Stored`].
    pub const STORED_URI: &'static str = "http://aff4.org/Schema#NullCompressor";
    /// URI for [`CompressionMethod::Deflate`].
    pub const DEFLATE_URI: &'static str = "https://tools.ietf.org/html/rfc1951";
    /// URI for [`CompressionMethod::Zlib`].
    pub const ZLIB_URI: &'static str = "https://www.ietf.org/rfc/rfc1950.txt";
    /// URI for [`CompressionMethod::Snappy`].
    pub const SNAPPY_URI: &'static str = "http://code.google.com/p/snappy/";
    /// Alternate URI for [`CompressionMethod::Snappy`].
    pub const SNAPPY_ALT_URI: &'static str = "https://github.com/google/snappy";
    /// URI for [`CompressionMethod::Lz4`].
    pub const LZ4_URI: &'static str = "https://code.google.com/p/lz4/";

    /// Resolve a codec URI. Unknown URIs yield `None`.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            Self::STORED_URI => Some(Self::Stored),
            Self::DEFLATE_URI => Some(Self::Deflate),
            Self::ZLIB_URI => Some(Self::Zlib),
            Self::SNAPPY_URI | Self::SNAPPY_ALT_URI => Some(Self::Snappy),
            Self::LZ4_URI => Some(Self::Lz4),
            _ => None,
        }
    }

    /// Canonical URI of this codec.
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Stored => Self::STORED_URI,
            Self::Deflate => Self::DEFLATE_URI,
            Self::Zlib => Self::ZLIB_URI,
            Self::Snappy => Self::SNAPPY_URI,
            Self::Lz4 => Self::LZ4_URI,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

/// Whether a resource id names a synthetic stream rather than stored data.
pub fn is_symbolic(resource: &str) -> bool {
    matches!(
        resource,
        IMAGESTREAM_ZERO | IMAGESTREAM_FF | IMAGESTREAM_UNKNOWN | IMAGESTREAM_UNREADABLE
    ) || resource.starts_with(IMAGESTREAM_SYMBOLIC_PREFIX)
}

/// Encode a leading `aff4://` the way segment names spell it.
pub fn encode_urn(name: &str) -> String {
    match name.strip_prefix(AFF4_URN_PREFIX) {
        Some(rest) => format!("{AFF4_URN_PREFIX_ENCODED}{rest}"),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_uris() {
        for method in [
            CompressionMethod::Stored,
            CompressionMethod::Deflate,
            CompressionMethod::Zlib,
            CompressionMethod::Snappy,
            CompressionMethod::Lz4,
        ] {
            assert_eq!(CompressionMethod::from_uri(method.uri()), Some(method));
        }
        assert_eq!(
            CompressionMethod::from_uri("https://github.com/google/snappy"),
            Some(CompressionMethod::Snappy)
        );
        assert_eq!(CompressionMethod::from_uri("https://example.com/zstd"), None);
    }

    #[test]
    fn test_symbolic_ids() {
        assert!(is_symbolic(IMAGESTREAM_ZERO));
        assert!(is_symbolic("http://aff4.org/Schema#SymbolicStream7F"));
        assert!(is_symbolic(IMAGESTREAM_UNREADABLE));
        assert!(!is_symbolic("aff4://fcbfdce7-4488-4677-abf6-08bc931e195b"));
    }

    #[test]
    fn test_encode_urn() {
        assert_eq!(
            encode_urn("aff4://fcbfdce7-4488-4677-abf6-08bc931e195b/map"),
            "aff4%3A%2F%2Ffcbfdce7-4488-4677-abf6-08bc931e195b/map"
        );
        assert_eq!(encode_urn("information.turtle"), "information.turtle");
    }
}
