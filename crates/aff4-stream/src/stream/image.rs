//! Chunked, compressed image streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

use super::{Stream, clip};
use crate::bevvy::{BevvyIndex, BevvyIndexLoader};
use crate::cache::LoadingCache;
use crate::chunk::{Chunk, ChunkLoader};
use crate::codec::{Codec, codec_for_uri};
use crate::config::ReaderConfig;
use crate::container::Container;
use crate::metadata::ImageStreamProperties;
use crate::{Result, StreamError};

/// Logical stream reassembled from compressed chunks.
///
/// Chunks are loaded through a per-stream LRU cache sized from
/// [`ReaderConfig::chunk_cache_bytes`]. Chunk buffers are shared, so data
/// handed out by the cache stays valid after the stream is closed.
pub struct ImageStream {
    resource: String,
    size: u64,
    chunk_size: u32,
    chunks_per_segment: u32,
    codec: Option<Arc<dyn Codec>>,
    chunks: Option<LoadingCache<u64, Chunk>>,
    closed: AtomicBool,
}

impl ImageStream {
    /// Create an image stream stored in `container`.
    ///
    /// Without a usable codec or chunk geometry the stream is empty and
    /// already closed.
    pub fn new(
        resource: impl Into<String>,
        container: Arc<dyn Container>,
        props: &ImageStreamProperties,
        config: &ReaderConfig,
    ) -> Self {
        let resource = resource.into();
        let codec = codec_for_uri(&props.compression, props.chunk_size);

        let codec = match codec {
            Some(codec) if props.chunk_size > 0 && props.chunks_per_segment > 0 => codec,
            Some(_) => {
                warn!(
                    "Image stream {} has invalid chunking ({} bytes, {} per segment)",
                    resource, props.chunk_size, props.chunks_per_segment
                );
                return Self::degraded(resource, props);
            }
            None => {
                warn!(
                    "Image stream {} uses unknown compression {}",
                    resource, props.compression
                );
                return Self::degraded(resource, props);
            }
        };

        let bevvy_loader = BevvyIndexLoader::new(resource.clone(), Arc::clone(&container));
        let bevvies: Arc<LoadingCache<u32, Arc<BevvyIndex>>> = Arc::new(LoadingCache::new(
            config.bevvy_cache_entries(),
            move |id: &u32| bevvy_loader.load(*id),
        ));
        let chunk_loader = ChunkLoader::new(
            resource.clone(),
            container,
            bevvies,
            props.chunks_per_segment,
            Arc::clone(&codec),
        );
        let capacity = config.chunk_cache_capacity(props.chunk_size);
        let chunks = LoadingCache::new(capacity, move |offset: &u64| chunk_loader.load(*offset));

        debug!(
            "Opened image stream {} ({} bytes, {} byte chunks, {} cached, codec {})",
            resource,
            props.size,
            props.chunk_size,
            capacity,
            codec.method()
        );
        Self {
            resource,
            size: props.size,
            chunk_size: props.chunk_size,
            chunks_per_segment: props.chunks_per_segment,
            codec: Some(codec),
            chunks: Some(chunks),
            closed: AtomicBool::new(false),
        }
    }

    fn degraded(resource: String, props: &ImageStreamProperties) -> Self {
        Self {
            resource,
            size: 0,
            chunk_size: props.chunk_size,
            chunks_per_segment: props.chunks_per_segment,
            codec: None,
            chunks: None,
            closed: AtomicBool::new(true),
        }
    }

    /// Decompressed chunk size.
    pub const fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Chunks per bevvy.
    pub const fn chunks_per_segment(&self) -> u32 {
        self.chunks_per_segment
    }

    /// Codec, or `None` for a degraded stream.
    pub fn codec(&self) -> Option<&Arc<dyn Codec>> {
        self.codec.as_ref()
    }

    /// Number of chunks currently cached.
    pub fn cached_chunks(&self) -> usize {
        self.chunks.as_ref().map_or(0, LoadingCache::size)
    }

    /// Drop the cached chunk holding `offset` so the next read reloads it.
    pub fn invalidate_chunk(&self, offset: u64) {
        if let Some(chunks) = &self.chunks {
            let chunk_size = u64::from(self.chunk_size);
            chunks.invalidate(&(offset / chunk_size * chunk_size));
        }
    }
}

impl Stream for ImageStream {
    fn resource_id(&self) -> &str {
        &self.resource
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed(self.resource.clone()));
        }
        let Some(chunks) = &self.chunks else {
            return Err(StreamError::Closed(self.resource.clone()));
        };
        let count = clip(offset, buf.len(), self.size);
        trace!("Reading {} bytes at {} from {}", count, offset, self.resource);

        let chunk_size = u64::from(self.chunk_size);
        let mut copied = 0;
        while copied < count {
            let position = offset + copied as u64;
            let chunk_start = position / chunk_size * chunk_size;
            let chunk = chunks.get(&chunk_start);
            let delta = (position - chunk_start) as usize;
            if !chunk.is_available() || chunk.len() <= delta {
                // Bytes already copied stay in the caller's buffer.
                return Err(StreamError::ChunkUnavailable {
                    stream: self.resource.clone(),
                    offset: chunk_start,
                });
            }
            let take = (chunk.len() - delta).min(count - copied);
            buf[copied..copied + take].copy_from_slice(&chunk.bytes()[delta..delta + take]);
            copied += take;
        }
        Ok(copied)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for ImageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStream")
            .field("resource", &self.resource)
            .field("size", &self.size)
            .field("chunk_size", &self.chunk_size)
            .field("chunks_per_segment", &self.chunks_per_segment)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lexicon::CompressionMethod;
    use crate::metadata::Catalog;
    use crate::test_utils::{
        CountingContainer, IMAGE_ID, ImageWriter, container_archive, open_container,
    };

    const CHUNK: u32 = 2048;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8 ^ (i >> 11) as u8).collect()
    }

    #[test]
    fn test_reads_across_chunks() {
        let data = sample(10 * CHUNK as usize + 300);
        let writer = ImageWriter::new(IMAGE_ID, CompressionMethod::Snappy)
            .with_chunk_size(CHUNK)
            .with_chunks_per_segment(3);
        let (_dir, container) = open_container(&writer.write(container_archive(), &data), Catalog::new());
        let stream = ImageStream::new(
            IMAGE_ID,
            container,
            &writer.properties(data.len() as u64),
            &ReaderConfig::default(),
        );

        assert_eq!(stream.size(), data.len() as u64);
        let mut buf = vec![0u8; 5000];
        assert_eq!(stream.read(&mut buf, 1000).expect("Test operation should succeed"), 5000);
        assert_eq!(buf, data[1000..6000]);

        // Clipped at the end, including the short final chunk.
        let tail = data.len() as u64 - 100;
        assert_eq!(stream.read(&mut buf, tail).expect("Test operation should succeed"), 100);
        assert_eq!(&buf[..100], &data[data.len() - 100..]);
        assert_eq!(stream.read(&mut buf, data.len() as u64).expect("Test operation should succeed"), 0);
    }

    #[test]
    fn test_cached_chunks_not_reread() {
        let data = sample(8 * CHUNK as usize);
        let writer = ImageWriter::new(IMAGE_ID, CompressionMethod::Deflate)
            .with_chunk_size(CHUNK)
            .with_chunks_per_segment(4);
        let (_dir, container) = open_container(&writer.write(container_archive(), &data), Catalog::new());
        let counting = Arc::new(CountingContainer::new(container));
        let stream = ImageStream::new(
            IMAGE_ID,
            counting.clone(),
            &writer.properties(data.len() as u64),
            &ReaderConfig::default(),
        );

        let mut first = vec![0u8; 3 * CHUNK as usize];
        stream.read(&mut first, 500).expect("Test operation should succeed");
        let reads = counting.file_reads();
        assert_eq!(reads, 4);

        let mut second = vec![0u8; 3 * CHUNK as usize];
        stream.read(&mut second, 500).expect("Test operation should succeed");
        assert_eq!(first, second);
        assert_eq!(counting.file_reads(), reads);
        assert_eq!(stream.cached_chunks(), 4);

        stream.invalidate_chunk(CHUNK as u64 + 1);
        stream.read(&mut second, 500).expect("Test operation should succeed");
        assert_eq!(counting.file_reads(), reads + 1);
    }

    #[test]
    fn test_missing_chunk_fails_after_partial_copy() {
        let data = sample(4 * CHUNK as usize);
        let writer = ImageWriter::new(IMAGE_ID, CompressionMethod::Zlib)
            .with_chunk_size(CHUNK)
            .with_missing_chunk(1);
        let (_dir, container) = open_container(&writer.write(container_archive(), &data), Catalog::new());
        let stream = ImageStream::new(
            IMAGE_ID,
            container,
            &writer.properties(data.len() as u64),
            &ReaderConfig::default(),
        );

        let mut buf = vec![0u8; 2 * CHUNK as usize];
        let result = stream.read(&mut buf, 0);
        assert!(matches!(
            result,
            Err(StreamError::ChunkUnavailable { offset, .. }) if offset == u64::from(CHUNK)
        ));
        assert_eq!(&buf[..CHUNK as usize], &data[..CHUNK as usize]);
    }

    #[test]
    fn test_unknown_codec_degrades() {
        let data = sample(CHUNK as usize);
        let writer = ImageWriter::new(IMAGE_ID, CompressionMethod::Deflate).with_chunk_size(CHUNK);
        let (_dir, container) = open_container(&writer.write(container_archive(), &data), Catalog::new());
        let props = writer
            .properties(data.len() as u64)
            .with_compression_uri("https://example.com/brotli");
        let stream = ImageStream::new(IMAGE_ID, container, &props, &ReaderConfig::default());

        assert_eq!(stream.size(), 0);
        assert!(stream.codec().is_none());
        let mut buf = [0u8; 16];
        assert!(matches!(stream.read(&mut buf, 0), Err(StreamError::Closed(_))));
    }

    #[test]
    fn test_cache_capacity_follows_budget() {
        let data = sample(8 * CHUNK as usize);
        let writer = ImageWriter::new(IMAGE_ID, CompressionMethod::Lz4).with_chunk_size(CHUNK);
        let (_dir, container) = open_container(&writer.write(container_archive(), &data), Catalog::new());
        // 1 MiB over 2 KiB chunks leaves room for all eight.
        let config = ReaderConfig::default().with_chunk_cache_bytes(1024 * 1024);
        let stream = ImageStream::new(IMAGE_ID, container, &writer.properties(data.len() as u64), &config);

        let mut buf = vec![0u8; data.len()];
        stream.read(&mut buf, 0).expect("Test operation should succeed");
        assert_eq!(buf, data);
        assert_eq!(stream.cached_chunks(), 8);

        stream.close();
        stream.close();
        assert!(matches!(stream.read(&mut buf, 0), Err(StreamError::Closed(_))));
    }
}
