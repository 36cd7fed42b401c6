//! Chunk resolution and decompression.

use std::sync::Arc;
use tracing::{trace, warn};

use crate::bevvy::BevvyIndex;
use crate::cache::LoadingCache;
use crate::codec::Codec;
use crate::container::Container;

/// One decompressed chunk.
///
/// A chunk with `len == 0` marks a load failure. Failures are cached like
/// any other chunk, so callers must check [`Chunk::is_available`].
#[derive(Debug, Clone)]
pub struct Chunk {
    data: Arc<[u8]>,
    len: usize,
}

impl Chunk {
    /// Chunk holding `len` valid bytes of `data`.
    pub fn new(data: Arc<[u8]>, len: usize) -> Self {
        let len = len.min(data.len());
        Self { data, len }
    }

    /// Failure marker.
    pub fn unavailable() -> Self {
        Self {
            data: Arc::from(Vec::new()),
            len: 0,
        }
    }

    /// Whether the chunk loaded.
    pub fn is_available(&self) -> bool {
        self.len > 0
    }

    /// Valid bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes are valid.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Loads chunks of one image stream.
pub struct ChunkLoader {
    stream_id: String,
    container: Arc<dyn Container>,
    bevvies: Arc<LoadingCache<u32, Arc<BevvyIndex>>>,
    chunk_size: u32,
    chunks_per_segment: u32,
    codec: Arc<dyn Codec>,
}

impl ChunkLoader {
    /// Create a loader.
    ///
    /// `chunk_size` and `chunks_per_segment` must be non-zero.
    pub fn new(
        stream_id: impl Into<String>,
        container: Arc<dyn Container>,
        bevvies: Arc<LoadingCache<u32, Arc<BevvyIndex>>>,
        chunks_per_segment: u32,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            container,
            bevvies,
            chunk_size: codec.chunk_size().max(1),
            chunks_per_segment: chunks_per_segment.max(1),
            codec,
        }
    }

    /// Bevvy number and index within it of the chunk holding `offset`.
    pub fn locate(&self, offset: u64) -> (u32, u32) {
        let chunk = offset / u64::from(self.chunk_size);
        let per_segment = u64::from(self.chunks_per_segment);
        let bevvy = u32::try_from(chunk / per_segment).unwrap_or(u32::MAX);
        // Remainder of a u32 divisor always fits.
        let index = (chunk % per_segment) as u32;
        (bevvy, index)
    }

    /// Load the chunk starting at chunk-aligned `offset`.
    pub fn load(&self, offset: u64) -> Chunk {
        let (bevvy_id, index) = self.locate(offset);
        let bevvy = self.bevvies.get(&bevvy_id);
        let point = bevvy.point(index);
        if point.length == 0 {
            warn!(
                "No chunk {} in bevvy {} of {} (offset {})",
                index, bevvy_id, self.stream_id, offset
            );
            return Chunk::unavailable();
        }
        if !bevvy.holds(point) {
            warn!(
                "Chunk {} of bevvy {} in {} runs past the bevvy ({} + {} > {})",
                index,
                bevvy_id,
                self.stream_id,
                point.offset,
                point.length,
                bevvy.data_size()
            );
            return Chunk::unavailable();
        }

        let mut raw = vec![0u8; point.length as usize];
        let position = bevvy.data_offset() + point.offset;
        match self.container.file_read(&mut raw, position) {
            Ok(read) if read == raw.len() => {}
            Ok(read) => {
                warn!(
                    "Short read of chunk at {} in {}: {} of {} bytes",
                    offset,
                    self.stream_id,
                    read,
                    raw.len()
                );
                return Chunk::unavailable();
            }
            Err(e) => {
                warn!("Failed to read chunk at {} in {}: {}", offset, self.stream_id, e);
                return Chunk::unavailable();
            }
        }

        // A full-size chunk was stored without compression.
        if point.length == self.chunk_size {
            trace!("Chunk at {} of {} stored raw", offset, self.stream_id);
            let len = raw.len();
            return Chunk::new(Arc::from(raw), len);
        }

        let mut decompressed = vec![0u8; self.chunk_size as usize];
        match self.codec.decompress(&raw, &mut decompressed) {
            Ok(0) => {
                warn!("Chunk at {} in {} decompressed to nothing", offset, self.stream_id);
                Chunk::unavailable()
            }
            Ok(produced) => {
                trace!(
                    "Decompressed chunk at {} of {}: {} -> {} bytes",
                    offset, self.stream_id, point.length, produced
                );
                Chunk::new(Arc::from(decompressed), produced)
            }
            Err(e) => {
                warn!("Failed to decompress chunk at {} in {}: {}", offset, self.stream_id, e);
                Chunk::unavailable()
            }
        }
    }
}

impl std::fmt::Debug for ChunkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkLoader")
            .field("stream_id", &self.stream_id)
            .field("chunk_size", &self.chunk_size)
            .field("chunks_per_segment", &self.chunks_per_segment)
            .field("codec", &self.codec.method())
            .finish_non_exhaustive()
    }
}
