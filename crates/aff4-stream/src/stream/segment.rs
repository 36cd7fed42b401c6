//! One archive segment exposed as a stream.

use aff4_zip::constants::MAX_INFLATE_SIZE;
use aff4_zip::{ArchiveEntry, CompressionMethod, ZipArchive};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

use super::{Stream, clip};
use crate::{Result, StreamError};

/// Stream over a single stored or deflated archive entry.
///
/// Deflate has no random access, so every read of a deflated segment inflates
/// the payload from the start and copies out the requested slice. Segments
/// above 32 MiB uncompressed are not inflated.
pub struct SegmentStream {
    entry: ArchiveEntry,
    archive: Arc<ZipArchive>,
    closed: AtomicBool,
}

impl SegmentStream {
    /// Wrap an entry of `archive`.
    pub fn new(entry: ArchiveEntry, archive: Arc<ZipArchive>) -> Self {
        Self {
            entry,
            archive,
            closed: AtomicBool::new(false),
        }
    }

    /// Archive entry behind this stream.
    pub fn entry(&self) -> &ArchiveEntry {
        &self.entry
    }
}

impl Stream for SegmentStream {
    fn resource_id(&self) -> &str {
        &self.entry.name
    }

    fn size(&self) -> u64 {
        self.entry.uncompressed_size
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed(self.entry.name.clone()));
        }
        let count = clip(offset, buf.len(), self.size());
        if count == 0 {
            return Ok(0);
        }

        match self.entry.compression {
            CompressionMethod::Stored => {
                Ok(self.archive.file_read(&mut buf[..count], self.entry.data_offset + offset)?)
            }
            CompressionMethod::Deflate => {
                if self.entry.uncompressed_size > MAX_INFLATE_SIZE {
                    return Err(StreamError::SegmentTooLarge {
                        name: self.entry.name.clone(),
                        size: self.entry.uncompressed_size,
                    });
                }
                trace!("Inflating segment {} for read at {}", self.entry.name, offset);
                let inflated = self.archive.read_entry_data(&self.entry)?;
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(inflated.len());
                let available = (inflated.len() - start).min(count);
                buf[..available].copy_from_slice(&inflated[start..start + available]);
                Ok(available)
            }
            CompressionMethod::Other(method) => Err(StreamError::UnsupportedCompression {
                name: self.entry.name.clone(),
                method,
            }),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
