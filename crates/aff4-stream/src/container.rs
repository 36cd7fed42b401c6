//! Container and resolver capabilities.
//!
//! Streams never own the archive they read from. They hold the container
//! behind an `Arc` and talk to it only through [`Container`], which keeps the
//! stream engine independent of how segments are stored. A [`Resolver`]
//! reaches resources outside the container, such as streams stored in
//! another volume of a multi-part image.

use aff4_zip::ArchiveEntry;
use std::sync::Arc;

use crate::Result;
use crate::stream::Stream;

/// Capability a container offers to the streams inside it.
pub trait Container: Send + Sync {
    /// Resource id of the container.
    fn resource_id(&self) -> &str;

    /// Named segment as a stream, or `None` when absent.
    fn segment(&self, name: &str) -> Option<Arc<dyn Stream>>;

    /// Archive entry of a named segment, or `None` when absent.
    fn segment_entry(&self, name: &str) -> Option<ArchiveEntry>;

    /// Image stream (or symbolic stream) with the given resource id.
    fn image_stream(&self, resource: &str) -> Option<Arc<dyn Stream>>;

    /// Positioned read of raw container bytes, clipped to the file length.
    fn file_read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Resolver for resources outside this container, if one is attached.
    fn resolver(&self) -> Option<Arc<dyn Resolver>>;

    /// Id of the container that stores `resource`, when known.
    fn stored_in(&self, resource: &str) -> Option<String>;
}

/// Something a [`Resolver`] can open.
#[derive(Clone)]
pub enum Resource {
    /// A readable stream.
    Stream(Arc<dyn Stream>),
    /// A container that may hold further resources.
    Container(Arc<dyn Container>),
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(stream) => f.debug_tuple("Stream").field(&stream.resource_id()).finish(),
            Self::Container(container) => f
                .debug_tuple("Container")
                .field(&container.resource_id())
                .finish(),
        }
    }
}

/// Locates resources by id across containers.
pub trait Resolver: Send + Sync {
    /// Whether `resource` can be opened.
    fn has_resource(&self, resource: &str) -> bool;

    /// Open `resource`.
    fn open(&self, resource: &str) -> Option<Resource>;
}
