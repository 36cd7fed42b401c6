//! Synthetic streams with deterministic content.
//!
//! Symbolic streams stand in for data that is not stored: zero-filled
//! regions, byte-fill regions and placeholders for unknown or unreadable
//! source data. They have no natural end and report `u64::MAX` as their size;
//! maps only ever read a bounded extent of them.

use std::sync::Arc;

use super::Stream;
use crate::Result;
use crate::lexicon::{
    IMAGESTREAM_FF, IMAGESTREAM_SYMBOLIC_PREFIX, IMAGESTREAM_UNKNOWN, IMAGESTREAM_UNREADABLE,
    IMAGESTREAM_ZERO, UNKNOWN_PATTERN, UNREADABLE_PATTERN,
};

/// Period of a [`RepeatedStream`] tile (1 MiB).
pub const REPEAT_PERIOD: usize = 1024 * 1024;

/// Stream where every byte is the same value.
#[derive(Debug, Clone)]
pub struct SymbolicStream {
    resource: String,
    symbol: u8,
}

impl SymbolicStream {
    /// Create a stream filled with `symbol`.
    pub fn new(resource: impl Into<String>, symbol: u8) -> Self {
        Self {
            resource: resource.into(),
            symbol,
        }
    }

    /// Create a stream from a `SymbolicStreamXX` resource id.
    ///
    /// The byte comes from the two hex digits after the prefix; a missing or
    /// malformed suffix yields zero.
    pub fn from_resource(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        let symbol = resource
            .strip_prefix(IMAGESTREAM_SYMBOLIC_PREFIX)
            .and_then(|suffix| suffix.get(..2))
            .and_then(|digits| u8::from_str_radix(digits, 16).ok())
            .unwrap_or(0);
        Self { resource, symbol }
    }

    /// Fill byte.
    pub const fn symbol(&self) -> u8 {
        self.symbol
    }
}

impl Stream for SymbolicStream {
    fn resource_id(&self) -> &str {
        &self.resource
    }

    fn size(&self) -> u64 {
        u64::MAX
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let count = super::clip(offset, buf.len(), self.size());
        buf[..count].fill(self.symbol);
        Ok(count)
    }

    fn close(&self) {}
}

/// Stream repeating a short text pattern.
///
/// One 1 MiB tile of the pattern is built up front; reads copy out of it,
/// wrapping at the tile boundary. Patterns whose length does not divide
/// 1 MiB therefore restart at every tile.
pub struct RepeatedStream {
    resource: String,
    pattern: Vec<u8>,
    tile: Box<[u8]>,
}

impl RepeatedStream {
    /// Create a stream tiling `pattern`. An empty pattern reads as zeros.
    pub fn new(resource: impl Into<String>, pattern: &[u8]) -> Self {
        let tile: Box<[u8]> = if pattern.is_empty() {
            vec![0u8; REPEAT_PERIOD].into_boxed_slice()
        } else {
            pattern
                .iter()
                .copied()
                .cycle()
                .take(REPEAT_PERIOD)
                .collect()
        };
        Self {
            resource: resource.into(),
            pattern: pattern.to_vec(),
            tile,
        }
    }

    /// Repeated pattern.
    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }
}

impl Stream for RepeatedStream {
    fn resource_id(&self) -> &str {
        &self.resource
    }

    fn size(&self) -> u64 {
        u64::MAX
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let count = super::clip(offset, buf.len(), self.size());
        // Offsets wrap at the period, which is a power of two.
        let mut position = (offset & (REPEAT_PERIOD as u64 - 1)) as usize;
        let mut written = 0;
        while written < count {
            let take = (REPEAT_PERIOD - position).min(count - written);
            buf[written..written + take].copy_from_slice(&self.tile[position..position + take]);
            written += take;
            position = 0;
        }
        Ok(count)
    }

    fn close(&self) {}
}

impl std::fmt::Debug for RepeatedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatedStream")
            .field("resource", &self.resource)
            .field("pattern", &String::from_utf8_lossy(&self.pattern))
            .finish_non_exhaustive()
    }
}

/// Zero-filled stream.
pub fn zero_stream() -> Arc<dyn Stream> {
    Arc::new(SymbolicStream::new(IMAGESTREAM_ZERO, 0x00))
}

/// 0xFF-filled stream.
pub fn ff_stream() -> Arc<dyn Stream> {
    Arc::new(SymbolicStream::new(IMAGESTREAM_FF, 0xFF))
}

/// Placeholder for unknown data.
pub fn unknown_stream() -> Arc<dyn Stream> {
    unknown_stream_for(IMAGESTREAM_UNKNOWN)
}

/// Placeholder for unknown data standing in for `resource`.
pub fn unknown_stream_for(resource: &str) -> Arc<dyn Stream> {
    Arc::new(RepeatedStream::new(resource, UNKNOWN_PATTERN.as_bytes()))
}

/// Placeholder for unreadable data.
pub fn unreadable_stream() -> Arc<dyn Stream> {
    Arc::new(RepeatedStream::new(
        IMAGESTREAM_UNREADABLE,
        UNREADABLE_PATTERN.as_bytes(),
    ))
}

/// Byte-fill stream for a `SymbolicStreamXX` resource id.
pub fn symbolic_stream(resource: &str) -> Arc<dyn Stream> {
    Arc::new(SymbolicStream::from_resource(resource))
}

/// Byte-fill stream for `symbol`, named `SymbolicStreamXX`.
pub fn symbolic_stream_for(symbol: u8) -> Arc<dyn Stream> {
    Arc::new(SymbolicStream::new(
        format!("{IMAGESTREAM_SYMBOLIC_PREFIX}{symbol:02X}"),
        symbol,
    ))
}

/// Synthetic stream for a symbolic resource id, or `None` for stored data.
pub fn symbolic_for_resource(resource: &str) -> Option<Arc<dyn Stream>> {
    match resource {
        IMAGESTREAM_ZERO => Some(zero_stream()),
        IMAGESTREAM_FF => Some(ff_stream()),
        IMAGESTREAM_UNKNOWN => Some(unknown_stream()),
        IMAGESTREAM_UNREADABLE => Some(unreadable_stream()),
        _ if resource.starts_with(IMAGESTREAM_SYMBOLIC_PREFIX) => Some(symbolic_stream(resource)),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_stream_any_offset() {
        let stream = zero_stream();
        assert_eq!(stream.size(), u64::MAX);
        for offset in [0, 1, 4095, 1 << 40, u64::MAX - 8192] {
            let mut buf = vec![0xAAu8; 4096];
            assert_eq!(stream.read(&mut buf, offset).expect("Test operation should succeed"), 4096);
            assert!(buf.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_symbolic_suffix() {
        assert_eq!(SymbolicStream::from_resource(format!("{IMAGESTREAM_SYMBOLIC_PREFIX}7F")).symbol(), 0x7F);
        assert_eq!(SymbolicStream::from_resource(format!("{IMAGESTREAM_SYMBOLIC_PREFIX}ab")).symbol(), 0xAB);
        assert_eq!(SymbolicStream::from_resource(format!("{IMAGESTREAM_SYMBOLIC_PREFIX}zz")).symbol(), 0);
        assert_eq!(SymbolicStream::from_resource(IMAGESTREAM_SYMBOLIC_PREFIX).symbol(), 0);

        let stream = symbolic_stream_for(0x5A);
        assert_eq!(stream.resource_id(), format!("{IMAGESTREAM_SYMBOLIC_PREFIX}5A"));
        let mut buf = [0u8; 3];
        stream.read(&mut buf, 99).expect("Test operation should succeed");
        assert_eq!(buf, [0x5A; 3]);
    }

    #[test]
    fn test_resource_lookup() {
        let ff = symbolic_for_resource(IMAGESTREAM_FF).expect("Test operation should succeed");
        let mut buf = [0u8; 2];
        ff.read(&mut buf, 0).expect("Test operation should succeed");
        assert_eq!(buf, [0xFF, 0xFF]);

        let unreadable =
            symbolic_for_resource(IMAGESTREAM_UNREADABLE).expect("Test operation should succeed");
        let mut text = [0u8; 14];
        unreadable.read(&mut text, 0).expect("Test operation should succeed");
        assert_eq!(&text, b"UNREADABLEDATA");

        assert!(symbolic_for_resource("aff4://c215ae85-3b7e-4bb7-8b68-5b2a3a5a9c4e").is_none());
    }

    #[test]
    fn test_pattern_wraps_at_period() {
        let stream = unknown_stream();
        let mut buf = [0u8; 8];
        let offset = REPEAT_PERIOD as u64 - 4;
        stream.read(&mut buf, offset).expect("Test operation should succeed");
        // 1 MiB is not a multiple of 7, so the tile restarts at the boundary.
        let tail = (REPEAT_PERIOD - 4) % UNKNOWN_PATTERN.len();
        let pattern = UNKNOWN_PATTERN.as_bytes();
        for (i, &byte) in buf[..4].iter().enumerate() {
            assert_eq!(byte, pattern[(tail + i) % pattern.len()]);
        }
        assert_eq!(&buf[4..], b"UNKN");
    }

    proptest! {
        #[test]
        fn prop_pattern_position(offset in 0u64..(4 * REPEAT_PERIOD as u64), len in 1usize..5000) {
            let pattern = b"UNKNOWN";
            let stream = RepeatedStream::new("test", pattern);
            let mut buf = vec![0u8; len];
            prop_assert_eq!(stream.read(&mut buf, offset).expect("Test operation should succeed"), len);
            for (i, &byte) in buf.iter().enumerate() {
                let position = ((offset + i as u64) % REPEAT_PERIOD as u64) as usize;
                prop_assert_eq!(byte, pattern[position % pattern.len()]);
            }
        }
    }
}
