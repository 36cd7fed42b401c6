//! ZIP-backed AFF4 containers.

use aff4_zip::{ArchiveEntry, ZipArchive, is_aff4_container, read_resource_id};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::config::ReaderConfig;
use crate::container::{Container, Resolver, Resource};
use crate::lexicon::encode_urn;
use crate::map::Map;
use crate::metadata::Metadata;
use crate::stream::symbolic::symbolic_for_resource;
use crate::stream::{ImageStream, SegmentStream, Stream};
use crate::{Result, StreamError};

/// An AFF4 container stored as a ZIP archive.
///
/// Always handled through an `Arc`: streams created by the container keep
/// it alive for as long as they need its archive.
pub struct ZipContainer {
    this: Weak<ZipContainer>,
    resource_id: String,
    archive: Arc<ZipArchive>,
    metadata: Arc<dyn Metadata>,
    config: ReaderConfig,
    resolver: RwLock<Option<Arc<dyn Resolver>>>,
    closed: AtomicBool,
}

impl ZipContainer {
    /// Open the container at `path`.
    ///
    /// Fails when the file does not carry an AFF4 extension, when its
    /// resource id cannot be read, or when the archive has no entries.
    pub fn open<P: AsRef<Path>>(
        path: P,
        metadata: Arc<dyn Metadata>,
        config: ReaderConfig,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref();
        if !is_aff4_container(path) {
            return Err(StreamError::NotAContainer(path.display().to_string()));
        }

        let resource_id = read_resource_id(path)?;
        let archive = ZipArchive::open(path)?;
        if archive.entries().is_empty() {
            return Err(StreamError::NotAContainer(format!(
                "{} has no entries",
                path.display()
            )));
        }

        info!("Opened container {} from {:?}", resource_id, path);
        Ok(Self::from_archive(resource_id, Arc::new(archive), metadata, config))
    }

    /// Wrap an already opened archive.
    pub fn from_archive(
        resource_id: impl Into<String>,
        archive: Arc<ZipArchive>,
        metadata: Arc<dyn Metadata>,
        config: ReaderConfig,
    ) -> Arc<Self> {
        let resource_id = resource_id.into();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            resource_id,
            archive,
            metadata,
            config,
            resolver: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Segment name for a resource or member name.
    ///
    /// Strips a leading `/` and this container's own id, and encodes a
    /// leading `aff4://` the way segment names spell it.
    pub fn sanitize(&self, name: &str) -> String {
        let name = name.strip_prefix('/').unwrap_or(name);
        let name = name.strip_prefix(self.resource_id.as_str()).unwrap_or(name);
        let encoded = encode_urn(name);
        encoded
            .strip_prefix('/')
            .map_or_else(|| encoded.clone(), str::to_string)
    }

    /// Underlying archive.
    pub fn archive(&self) -> &Arc<ZipArchive> {
        &self.archive
    }

    /// Reader configuration handed to image streams.
    pub const fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Stream properties source.
    pub fn metadata(&self) -> &Arc<dyn Metadata> {
        &self.metadata
    }

    /// Attach or detach the resolver for resources in other containers.
    pub fn set_resolver(&self, resolver: Option<Arc<dyn Resolver>>) {
        *self.resolver.write() = resolver;
    }

    /// Whether the container has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the container. Streams already handed out keep working.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Closed container {}", self.resource_id);
            *self.resolver.write() = None;
        }
    }

    fn has_segment(&self, name: &str) -> bool {
        self.archive.has_entry(&self.sanitize(name))
    }

    /// Whether `stored` names this container, or nothing at all and
    /// `probe` is present here.
    fn holds(&self, stored: Option<&str>, probe: &str) -> bool {
        match stored {
            Some(stored) => stored == self.resource_id,
            None => self.has_segment(probe),
        }
    }

    fn shared(&self) -> Option<Arc<dyn Container>> {
        let this: Arc<dyn Container> = self.this.upgrade()?;
        Some(this)
    }

    /// Map resource stored in this container.
    pub fn map(&self, resource: &str) -> Option<Map> {
        if self.is_closed() {
            return None;
        }
        let props = self.metadata.map(resource)?;
        if !self.holds(props.stored.as_deref(), &format!("{resource}/map")) {
            return None;
        }
        Some(Map::new(resource, self.shared()?, props))
    }

    /// Open a map, image stream or raw segment by id, in that order.
    pub fn open_resource(&self, resource: &str) -> Option<Arc<dyn Stream>> {
        if let Some(map) = self.map(resource) {
            return Some(map.stream());
        }
        self.image_stream(resource)
            .or_else(|| self.segment(resource))
    }

    /// Whether [`open_resource`](Self::open_resource) would find `resource`.
    pub fn has_resource(&self, resource: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        if symbolic_for_resource(resource).is_some() || self.has_segment(resource) {
            return true;
        }
        let map = self
            .metadata
            .map(resource)
            .is_some_and(|props| self.holds(props.stored.as_deref(), &format!("{resource}/map")));
        let image = self.metadata.image_stream(resource).is_some_and(|props| {
            self.holds(props.stored.as_deref(), &format!("{resource}/00000000.index"))
        });
        map || image
    }
}

impl Container for ZipContainer {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn segment(&self, name: &str) -> Option<Arc<dyn Stream>> {
        let entry = self.segment_entry(name)?;
        Some(Arc::new(SegmentStream::new(entry, Arc::clone(&self.archive))))
    }

    fn segment_entry(&self, name: &str) -> Option<ArchiveEntry> {
        if self.is_closed() {
            return None;
        }
        self.archive.entry(&self.sanitize(name)).cloned()
    }

    fn image_stream(&self, resource: &str) -> Option<Arc<dyn Stream>> {
        if let Some(stream) = symbolic_for_resource(resource) {
            return Some(stream);
        }
        if self.is_closed() {
            return None;
        }
        let props = self.metadata.image_stream(resource)?;
        if !self.holds(props.stored.as_deref(), &format!("{resource}/00000000.index")) {
            return None;
        }
        Some(Arc::new(ImageStream::new(
            resource,
            self.shared()?,
            &props,
            &self.config,
        )))
    }

    fn file_read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if self.is_closed() {
            return Err(StreamError::Closed(self.resource_id.clone()));
        }
        Ok(self.archive.file_read(buf, offset)?)
    }

    fn resolver(&self) -> Option<Arc<dyn Resolver>> {
        self.resolver.read().clone()
    }

    fn stored_in(&self, resource: &str) -> Option<String> {
        self.metadata.stored_in(resource)
    }
}

impl Resolver for ZipContainer {
    fn has_resource(&self, resource: &str) -> bool {
        resource == self.resource_id || ZipContainer::has_resource(self, resource)
    }

    fn open(&self, resource: &str) -> Option<Resource> {
        if resource == self.resource_id {
            return self.shared().map(Resource::Container);
        }
        self.open_resource(resource).map(Resource::Stream)
    }
}

impl std::fmt::Debug for ZipContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipContainer")
            .field("resource_id", &self.resource_id)
            .field("path", &self.archive.path())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lexicon::{CompressionMethod, IMAGESTREAM_ZERO};
    use crate::metadata::{Catalog, ImageStreamProperties, MapProperties};
    use crate::test_utils::{
        CONTAINER_ID, IMAGE_ID, ImageWriter, MAP_ID, MapWriter, container_archive, open_container,
    };
    use aff4_zip::test_utils::ZipBuilder;

    #[test]
    fn test_sanitize() {
        let (_dir, container) = open_container(&container_archive(), Catalog::new());
        assert_eq!(
            container.sanitize(&format!("{CONTAINER_ID}/information.turtle")),
            "information.turtle"
        );
        assert_eq!(
            container.sanitize(&format!("/{IMAGE_ID}/00000000")),
            format!("aff4%3A%2F%2F{}/00000000", &IMAGE_ID["aff4://".len()..])
        );
        assert_eq!(container.sanitize("container.description"), "container.description");
    }

    #[test]
    fn test_rejects_wrong_extension() {
        let dir = tempfile::tempdir().expect("Test operation should succeed");
        let path = dir.path().join("image.zip");
        container_archive()
            .write_to(&path)
            .expect("Test operation should succeed");
        let result = ZipContainer::open(&path, Arc::new(Catalog::new()), ReaderConfig::default());
        assert!(matches!(result, Err(StreamError::NotAContainer(_))));
    }

    #[test]
    fn test_rejects_corrupt_segment_size() {
        let idx_name = format!("{}/idx", encode_urn(MAP_ID));
        let mut bytes = container_archive()
            .stored(&idx_name, b"aff4://fcbfdce7\n")
            .with_zip64(true)
            .build();

        // Point the ZIP64 uncompressed size of the idx entry far past the file.
        let magic = aff4_zip::constants::CENTRAL_DIRECTORY_MAGIC.to_le_bytes();
        let header = (0..bytes.len() - 46)
            .find(|&pos| {
                bytes[pos..pos + 4] == magic && bytes[pos + 46..].starts_with(idx_name.as_bytes())
            })
            .expect("Test operation should succeed");
        let field = header + 46 + idx_name.len() + 4;
        bytes[field..field + 8].copy_from_slice(&(u64::MAX - 1).to_le_bytes());

        let dir = tempfile::tempdir().expect("Test operation should succeed");
        let path = dir.path().join("corrupt.aff4");
        std::fs::write(&path, bytes).expect("Test operation should succeed");
        let result = ZipContainer::open(&path, Arc::new(Catalog::new()), ReaderConfig::default());
        assert!(matches!(result, Err(StreamError::Zip(_))));
    }

    #[test]
    fn test_image_stream_lookup() {
        let data = vec![0x42u8; 5000];
        let writer = ImageWriter::new(IMAGE_ID, CompressionMethod::Deflate).with_chunk_size(1024);
        let other = "aff4://0bc2c2a7-b2a6-44a3-8b1a-9e4f9c3c1f8e";
        let catalog = Catalog::new()
            .with_image_stream(IMAGE_ID, writer.properties(5000))
            .with_image_stream(other, ImageStreamProperties::new(10).with_stored("aff4://elsewhere"));
        let (_dir, container) = open_container(&writer.write(container_archive(), &data), catalog);

        let stream = container.image_stream(IMAGE_ID).expect("Test operation should succeed");
        let mut buf = vec![0u8; 5000];
        assert_eq!(stream.read(&mut buf, 0).expect("Test operation should succeed"), 5000);
        assert_eq!(buf, data);

        assert!(container.image_stream(other).is_none());
        assert!(container.image_stream(IMAGESTREAM_ZERO).is_some());
        assert!(container.has_resource(IMAGE_ID));
        assert!(!container.has_resource(other));
    }

    #[test]
    fn test_open_resource_order() {
        let map_writer = MapWriter::new(MAP_ID).stream(IMAGESTREAM_ZERO).extent(0, 16, 0, 0);
        let builder = map_writer.write(container_archive()).stored("information.turtle", b"@prefix");
        let catalog = Catalog::new().with_map(MAP_ID, MapProperties::new(16));
        let (_dir, container) = open_container(&builder, catalog);

        let map = container.open_resource(MAP_ID).expect("Test operation should succeed");
        assert_eq!(map.size(), 16);
        let turtle = container
            .open_resource(&format!("{CONTAINER_ID}/information.turtle"))
            .expect("Test operation should succeed");
        assert_eq!(turtle.size(), 7);
        assert!(container.open_resource("aff4://nothing").is_none());
    }

    #[test]
    fn test_resolver_opens_self() {
        let (_dir, container) = open_container(&container_archive(), Catalog::new());
        let resolver: &dyn Resolver = container.as_ref();
        assert!(resolver.has_resource(CONTAINER_ID));
        assert!(matches!(resolver.open(CONTAINER_ID), Some(Resource::Container(_))));
    }

    #[test]
    fn test_close() {
        let builder = ZipBuilder::new()
            .stored("container.description", CONTAINER_ID.as_bytes())
            .stored("payload", b"data");
        let (_dir, container) = open_container(&builder, Catalog::new());
        let payload = container.segment("payload").expect("Test operation should succeed");

        container.close();
        container.close();
        assert!(container.is_closed());
        assert!(container.segment("payload").is_none());
        let mut buf = [0u8; 4];
        assert!(container.file_read(&mut buf, 0).is_err());
        // Streams handed out earlier keep their archive.
        assert_eq!(payload.read(&mut buf, 0).expect("Test operation should succeed"), 4);
        assert_eq!(&buf, b"data");
    }
}
