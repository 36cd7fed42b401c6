//! Stream kinds and the capability they share.
//!
//! Every stream exposes the same random-access interface: a logical size,
//! positioned reads and an idempotent close. Reads never move a cursor, so
//! one stream can serve concurrent readers.

pub mod image;
pub mod map;
pub mod segment;
pub mod symbolic;

pub use image::ImageStream;
pub use map::{MapEntryPoint, MapStream};
pub use segment::SegmentStream;
pub use symbolic::{RepeatedStream, SymbolicStream};

use crate::Result;

/// Random-access byte stream.
pub trait Stream: Send + Sync {
    /// Resource id of this stream.
    fn resource_id(&self) -> &str;

    /// Logical size in bytes.
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Reads are clipped to the logical size; a read starting at or past the
    /// end returns `Ok(0)`. When a read fails part-way, bytes already copied
    /// stay in `buf`.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Release resources. Further reads fail; calling again has no effect.
    fn close(&self);
}

/// Number of bytes a read of `requested` bytes at `offset` may return.
pub(crate) fn clip(offset: u64, requested: usize, size: u64) -> usize {
    if offset >= size {
        return 0;
    }
    usize::try_from(size - offset).map_or(requested, |left| left.min(requested))
}

/// Largest buffer [`read_all`] grows by in one step.
const READ_STEP: usize = 32 * 1024 * 1024;

/// Read a whole stream into memory.
///
/// The buffer grows with the bytes the stream actually returns, so a
/// declared size larger than the real payload costs at most one step.
/// Not for unbounded streams such as the symbolic ones.
pub fn read_all(stream: &dyn Stream) -> Result<Vec<u8>> {
    let size = stream.size();
    let mut data = Vec::new();
    let mut offset = 0u64;
    while offset < size {
        let step = usize::try_from(size - offset).map_or(READ_STEP, |left| left.min(READ_STEP));
        let start = data.len();
        data.resize(start + step, 0);
        let read = stream.read(&mut data[start..], offset)?;
        data.truncate(start + read);
        if read == 0 {
            break;
        }
        offset += read as u64;
    }
    Ok(data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Claims far more bytes than it holds.
    struct Oversized(&'static [u8]);

    impl Stream for Oversized {
        fn resource_id(&self) -> &str {
            "aff4://oversized"
        }

        fn size(&self) -> u64 {
            u64::MAX - 1
        }

        fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.0.len());
            let count = (self.0.len() - start).min(buf.len());
            buf[..count].copy_from_slice(&self.0[start..start + count]);
            Ok(count)
        }

        fn close(&self) {}
    }

    #[test]
    fn test_read_all_stops_at_real_payload() {
        let data = read_all(&Oversized(b"aff4://image\n")).expect("Test operation should succeed");
        assert_eq!(data, b"aff4://image\n");
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip(0, 10, 100), 10);
        assert_eq!(clip(95, 10, 100), 5);
        assert_eq!(clip(100, 10, 100), 0);
        assert_eq!(clip(200, 10, 100), 0);
        assert_eq!(clip(u64::MAX - 4, 10, u64::MAX), 4);
    }
}
