//! Builders for synthetic AFF4 containers.
//!
//! [`ImageWriter`] lays an image stream out as bevvies and indices the way
//! AFF4 writers do, [`MapWriter`] writes a map's `map` and `idx` segments,
//! and [`CountingContainer`] counts raw container reads. Only available in
//! tests or with the `test-utils` feature.

use aff4_zip::ArchiveEntry;
use aff4_zip::test_utils::ZipBuilder;
use binrw::BinWriterExt;
use flate2::Compression;
use flate2::write::{DeflateEncoder, ZlibEncoder};
use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::Result;
use crate::bevvy::ChunkPoint;
use crate::config::ReaderConfig;
use crate::container::{Container, Resolver};
use crate::lexicon::{CompressionMethod, encode_urn};
use crate::metadata::{ImageStreamProperties, Metadata};
use crate::stream::{MapEntryPoint, Stream};
use crate::zip_container::ZipContainer;

/// Resource id of containers made by [`container_archive`].
pub const CONTAINER_ID: &str = "aff4://685e15cc-d0fb-4dbc-ba47-48117fc77044";

/// Resource id used for test image streams.
pub const IMAGE_ID: &str = "aff4://fcbfdce7-4488-4677-abf6-08bc931e195b";

/// Resource id used for test maps.
pub const MAP_ID: &str = "aff4://8fcced2b-989f-4f51-bfa2-38d4a4d818fe";

/// Archive holding only the `container.description` of [`CONTAINER_ID`].
pub fn container_archive() -> ZipBuilder {
    container_archive_for(CONTAINER_ID)
}

/// Archive holding only the `container.description` of `resource_id`.
pub fn container_archive_for(resource_id: &str) -> ZipBuilder {
    ZipBuilder::new().stored("container.description", resource_id.as_bytes())
}

/// Write `builder` to a temporary `.aff4` file and open it.
#[allow(clippy::expect_used)] // Test fixture setup
pub fn open_container<M: Metadata + 'static>(
    builder: &ZipBuilder,
    metadata: M,
) -> (tempfile::TempDir, Arc<ZipContainer>) {
    let dir = tempfile::tempdir().expect("create temporary directory");
    let path = dir.path().join("container.aff4");
    builder.write_to(&path).expect("write test container");
    let container = ZipContainer::open(&path, Arc::new(metadata), ReaderConfig::default())
        .expect("open test container");
    (dir, container)
}

/// Lays image data out as compressed chunks in bevvies.
#[derive(Debug, Clone)]
pub struct ImageWriter {
    resource: String,
    method: CompressionMethod,
    chunk_size: u32,
    chunks_per_segment: u32,
    missing: BTreeSet<u64>,
}

impl ImageWriter {
    /// Writer for `resource` with 4 KiB chunks and four chunks per bevvy.
    pub fn new(resource: &str, method: CompressionMethod) -> Self {
        Self {
            resource: resource.to_string(),
            method,
            chunk_size: 4096,
            chunks_per_segment: 4,
            missing: BTreeSet::new(),
        }
    }

    /// Set the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the chunks per bevvy.
    #[must_use]
    pub fn with_chunks_per_segment(mut self, chunks: u32) -> Self {
        self.chunks_per_segment = chunks;
        self
    }

    /// Index chunk `chunk` (counted from the stream start) with length zero.
    #[must_use]
    pub fn with_missing_chunk(mut self, chunk: u64) -> Self {
        self.missing.insert(chunk);
        self
    }

    /// Codec.
    pub const fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Chunk size.
    pub const fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Chunks per bevvy.
    pub const fn chunks_per_segment(&self) -> u32 {
        self.chunks_per_segment
    }

    /// Properties describing a stream of `size` bytes written by this writer.
    pub fn properties(&self, size: u64) -> ImageStreamProperties {
        ImageStreamProperties::new(size)
            .with_chunk_size(self.chunk_size)
            .with_chunks_per_segment(self.chunks_per_segment)
            .with_compression(self.method)
    }

    /// Add the bevvies and indices holding `data` to `builder`.
    #[allow(clippy::expect_used)] // Writing into memory cannot fail
    pub fn write(&self, mut builder: ZipBuilder, data: &[u8]) -> ZipBuilder {
        let prefix = encode_urn(&self.resource);
        let chunks: Vec<&[u8]> = data.chunks(self.chunk_size as usize).collect();

        for (bevvy_id, bevvy_chunks) in chunks.chunks(self.chunks_per_segment as usize).enumerate() {
            let mut bevvy = Vec::new();
            let mut index = Cursor::new(Vec::new());
            for (i, chunk) in bevvy_chunks.iter().enumerate() {
                let number = (bevvy_id * self.chunks_per_segment as usize + i) as u64;
                let payload = self.compress_chunk(chunk);
                let length = if self.missing.contains(&number) {
                    0
                } else {
                    payload.len() as u32
                };
                index
                    .write_le(&ChunkPoint {
                        offset: bevvy.len() as u64,
                        length,
                    })
                    .expect("in-memory write");
                bevvy.extend_from_slice(&payload);
            }
            let name = format!("{prefix}/{bevvy_id:08}");
            builder = builder
                .stored(&name, &bevvy)
                .stored(&format!("{name}.index"), index.get_ref());
        }
        builder
    }

    /// Compressed form of one chunk, or the chunk itself when compression
    /// would not make a full chunk smaller.
    #[allow(clippy::expect_used)] // Writing into memory cannot fail
    fn compress_chunk(&self, chunk: &[u8]) -> Vec<u8> {
        let compressed = match self.method {
            CompressionMethod::Stored => return chunk.to_vec(),
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(chunk).expect("in-memory write");
                encoder.finish().expect("in-memory write")
            }
            CompressionMethod::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(chunk).expect("in-memory write");
                encoder.finish().expect("in-memory write")
            }
            CompressionMethod::Snappy => snap::raw::Encoder::new()
                .compress_vec(chunk)
                .expect("snappy input within limits"),
            CompressionMethod::Lz4 => lz4_flex::block::compress(chunk),
        };
        if chunk.len() == self.chunk_size as usize && compressed.len() >= chunk.len() {
            chunk.to_vec()
        } else {
            compressed
        }
    }
}

/// Writes the `map` and `idx` segments of a map.
#[derive(Debug, Clone, Default)]
pub struct MapWriter {
    resource: String,
    streams: Vec<String>,
    records: Vec<MapEntryPoint>,
}

impl MapWriter {
    /// Writer for map `resource`.
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            ..Self::default()
        }
    }

    /// Append a backing stream id to the `idx` table.
    #[must_use]
    pub fn stream(mut self, resource: &str) -> Self {
        self.streams.push(resource.to_string());
        self
    }

    /// Append a map record.
    #[must_use]
    pub fn extent(mut self, offset: u64, length: u64, stream_offset: u64, stream_id: u32) -> Self {
        self.records.push(MapEntryPoint {
            offset,
            length,
            stream_offset,
            stream_id,
        });
        self
    }

    /// Add the map segments to `builder`.
    #[allow(clippy::expect_used)] // Writing into memory cannot fail
    pub fn write(&self, builder: ZipBuilder) -> ZipBuilder {
        let prefix = encode_urn(&self.resource);
        let mut map = Cursor::new(Vec::new());
        for record in &self.records {
            map.write_le(record).expect("in-memory write");
        }
        let mut idx = self.streams.join("\n");
        idx.push('\n');
        builder
            .stored(&format!("{prefix}/map"), map.get_ref())
            .stored(&format!("{prefix}/idx"), idx.as_bytes())
    }
}

/// Container wrapper counting raw positioned reads.
pub struct CountingContainer {
    inner: Arc<dyn Container>,
    file_reads: AtomicUsize,
}

impl CountingContainer {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn Container>) -> Self {
        Self {
            inner,
            file_reads: AtomicUsize::new(0),
        }
    }

    /// Number of [`Container::file_read`] calls so far.
    pub fn file_reads(&self) -> usize {
        self.file_reads.load(Ordering::SeqCst)
    }
}

impl Container for CountingContainer {
    fn resource_id(&self) -> &str {
        self.inner.resource_id()
    }

    fn segment(&self, name: &str) -> Option<Arc<dyn Stream>> {
        self.inner.segment(name)
    }

    fn segment_entry(&self, name: &str) -> Option<ArchiveEntry> {
        self.inner.segment_entry(name)
    }

    fn image_stream(&self, resource: &str) -> Option<Arc<dyn Stream>> {
        self.inner.image_stream(resource)
    }

    fn file_read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.file_read(buf, offset)
    }

    fn resolver(&self) -> Option<Arc<dyn Resolver>> {
        self.inner.resolver()
    }

    fn stored_in(&self, resource: &str) -> Option<String> {
        self.inner.stored_in(resource)
    }
}
