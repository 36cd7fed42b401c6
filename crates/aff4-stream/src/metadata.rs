//! Typed stream properties.
//!
//! Containers describe their streams in RDF. Turning that into typed values
//! is the caller's business; the stream layer only consumes the result
//! through [`Metadata`]. [`Catalog`] is a plain in-memory implementation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::lexicon::CompressionMethod;

/// Default chunk size of an image stream.
pub const DEFAULT_CHUNK_SIZE: u32 = 32 * 1024;

/// Default number of chunks per bevvy.
pub const DEFAULT_CHUNKS_PER_SEGMENT: u32 = 2048;

/// Properties of one image stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStreamProperties {
    /// Logical size in bytes.
    pub size: u64,
    /// Decompressed chunk size.
    pub chunk_size: u32,
    /// Chunks per bevvy.
    pub chunks_per_segment: u32,
    /// Compression codec URI.
    pub compression: String,
    /// Id of the container holding the stream.
    pub stored: Option<String>,
}

impl ImageStreamProperties {
    /// Properties with default chunking and deflate compression.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunks_per_segment: DEFAULT_CHUNKS_PER_SEGMENT,
            compression: CompressionMethod::DEFLATE_URI.to_string(),
            stored: None,
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

    /// Set the codec.
    #[must_use]
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method.uri().to_string();
        self
    }

    /// Set the codec URI verbatim. Unknown URIs leave the stream unreadable.
    #[must_use]
    pub fn with_compression_uri(mut self, uri: impl Into<String>) -> Self {
        self.compression = uri.into();
        self
    }

    /// Set the holding container.
    #[must_use]
    pub fn with_stored(mut self, container: impl Into<String>) -> Self {
        self.stored = Some(container.into());
        self
    }
}

/// Properties of one map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapProperties {
    /// Declared logical size; zero derives it from the map records.
    pub size: u64,
    /// Stream filling unmapped ranges; zero-fill when absent.
    pub gap_stream: Option<String>,
    /// Backing streams named by the metadata.
    pub dependent_streams: Vec<String>,
    /// Id of the container holding the map.
    pub stored: Option<String>,
}

impl MapProperties {
    /// Properties with a declared size.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Set the gap stream.
    #[must_use]
    pub fn with_gap_stream(mut self, resource: impl Into<String>) -> Self {
        self.gap_stream = Some(resource.into());
        self
    }

    /// Add a dependent stream.
    #[must_use]
    pub fn with_dependent_stream(mut self, resource: impl Into<String>) -> Self {
        self.dependent_streams.push(resource.into());
        self
    }

    /// Set the holding container.
    #[must_use]
    pub fn with_stored(mut self, container: impl Into<String>) -> Self {
        self.stored = Some(container.into());
        self
    }
}

/// Source of stream properties.
pub trait Metadata: Send + Sync {
    /// Properties of an image stream.
    fn image_stream(&self, resource: &str) -> Option<ImageStreamProperties>;

    /// Properties of a map.
    fn map(&self, resource: &str) -> Option<MapProperties>;

    /// Id of the container storing `resource`.
    fn stored_in(&self, resource: &str) -> Option<String> {
        self.image_stream(resource)
            .and_then(|props| props.stored)
            .or_else(|| self.map(resource).and_then(|props| props.stored))
    }
}

/// In-memory [`Metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    image_streams: HashMap<String, ImageStreamProperties>,
    maps: HashMap<String, MapProperties>,
}

impl Catalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image stream.
    #[must_use]
    pub fn with_image_stream(
        mut self,
        resource: impl Into<String>,
        props: ImageStreamProperties,
    ) -> Self {
        self.insert_image_stream(resource, props);
        self
    }

    /// Add a map.
    #[must_use]
    pub fn with_map(mut self, resource: impl Into<String>, props: MapProperties) -> Self {
        self.insert_map(resource, props);
        self
    }

    /// Add or replace an image stream.
    pub fn insert_image_stream(&mut self, resource: impl Into<String>, props: ImageStreamProperties) {
        self.image_streams.insert(resource.into(), props);
    }

    /// Add or replace a map.
    pub fn insert_map(&mut self, resource: impl Into<String>, props: MapProperties) {
        self.maps.insert(resource.into(), props);
    }

    /// Ids of all image streams.
    pub fn image_stream_ids(&self) -> impl Iterator<Item = &str> {
        self.image_streams.keys().map(String::as_str)
    }

    /// Ids of all maps.
    pub fn map_ids(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }
}

impl Metadata for Catalog {
    fn image_stream(&self, resource: &str) -> Option<ImageStreamProperties> {
        self.image_streams.get(resource).cloned()
    }

    fn map(&self, resource: &str) -> Option<MapProperties> {
        self.maps.get(resource).cloned()
    }
}
