//! Sparse address spaces stitched from backing streams.
//!
//! A map is stored as two segments: `<map>/idx`, the newline-separated ids of
//! its backing streams, and `<map>/map`, packed [`MapEntryPoint`] records
//! assigning logical ranges to ranges of those streams. The stream built
//! from them covers every offset below its size exactly once; ranges the
//! records leave open are served by the gap stream.

use binrw::{BinRead, BinWrite};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

use super::symbolic::{unknown_stream_for, zero_stream};
use super::{Stream, clip, read_all};
use crate::container::{Container, Resource};
use crate::lexicon::IMAGESTREAM_UNKNOWN;
use crate::{Result, StreamError};

/// One extent of a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct MapEntryPoint {
    /// Logical start offset
    pub offset: u64,
    /// Extent length
    pub length: u64,
    /// Start offset in the backing stream
    pub stream_offset: u64,
    /// Index into the backing stream table
    pub stream_id: u32,
}

impl MapEntryPoint {
    /// Encoded size of one record.
    pub const SIZE: usize = 28;
}

#[derive(Default)]
struct MapState {
    extents: BTreeMap<u64, MapEntryPoint>,
    streams: Vec<Arc<dyn Stream>>,
    /// Containers opened through the resolver, kept alive for the streams
    /// they hand out.
    external: Vec<Arc<dyn Container>>,
    parent: Option<Arc<dyn Container>>,
}

/// Logical stream composed from the extents of a map.
pub struct MapStream {
    resource: String,
    size: u64,
    state: RwLock<MapState>,
    closed: AtomicBool,
}

impl MapStream {
    /// Build the stream of map `resource` stored in `container`.
    ///
    /// A `declared_size` of zero takes the size from the records. Backing
    /// streams named `UnknownData` are replaced by `unknown_override` when
    /// given; unmapped ranges read from `gap_stream`, or zeros without one.
    /// A map that ends up with size zero, such as one without its `map`
    /// segment, is closed straight away.
    pub fn new(
        resource: impl Into<String>,
        container: Arc<dyn Container>,
        declared_size: u64,
        unknown_override: Option<Arc<dyn Stream>>,
        gap_stream: Option<Arc<dyn Stream>>,
    ) -> Self {
        let resource = resource.into();
        let mut state = MapState {
            parent: Some(Arc::clone(&container)),
            ..MapState::default()
        };

        load_streams(&resource, container.as_ref(), unknown_override.as_ref(), &mut state);
        let size = load_extents(
            &resource,
            container.as_ref(),
            declared_size,
            gap_stream.unwrap_or_else(zero_stream),
            &mut state,
        );
        debug!(
            "Opened map {} ({} bytes, {} extents, {} streams)",
            resource,
            size,
            state.extents.len(),
            state.streams.len()
        );

        let stream = Self {
            resource,
            size,
            state: RwLock::new(state),
            closed: AtomicBool::new(false),
        };
        if size == 0 {
            debug!("Map {} is empty, closing it", stream.resource);
            stream.close();
        }
        stream
    }

    /// Extents in logical order.
    pub fn extents(&self) -> Vec<MapEntryPoint> {
        self.state.read().extents.values().copied().collect()
    }

    /// Resource ids of the backing stream table, gap stream last.
    pub fn stream_ids(&self) -> Vec<String> {
        self.state
            .read()
            .streams
            .iter()
            .map(|stream| stream.resource_id().to_string())
            .collect()
    }
}

/// Resolve every line of the `idx` segment into the stream table.
fn load_streams(
    resource: &str,
    container: &dyn Container,
    unknown_override: Option<&Arc<dyn Stream>>,
    state: &mut MapState,
) {
    let idx_name = format!("{resource}/idx");
    let text = match container.segment(&idx_name).map(|s| read_all(s.as_ref())) {
        Some(Ok(raw)) => String::from_utf8_lossy(&raw).into_owned(),
        Some(Err(e)) => {
            warn!("Failed to read map index {}: {}", idx_name, e);
            return;
        }
        None => {
            debug!("Map {} has no stream index", resource);
            return;
        }
    };

    for line in text.lines() {
        let id = line.trim_end_matches('\r');
        if id.is_empty() {
            continue;
        }
        let stream = match unknown_override {
            Some(stream) if id == IMAGESTREAM_UNKNOWN => Arc::clone(stream),
            _ => container
                .image_stream(id)
                .or_else(|| resolve_external(id, container, state))
                .unwrap_or_else(|| {
                    warn!("Map {} backing stream {} unresolved", resource, id);
                    unknown_stream_for(id)
                }),
        };
        state.streams.push(stream);
    }
}

/// Open `id` through the container's resolver, one level deep.
fn resolve_external(
    id: &str,
    container: &dyn Container,
    state: &mut MapState,
) -> Option<Arc<dyn Stream>> {
    let resolver = container.resolver()?;
    if resolver.has_resource(id)
        && let Some(Resource::Stream(stream)) = resolver.open(id)
    {
        debug!("Resolved {} through resolver", id);
        return Some(stream);
    }

    let parent_id = container.stored_in(id)?;
    match resolver.open(&parent_id) {
        Some(Resource::Container(parent)) => {
            let stream = parent.image_stream(id);
            debug!("Resolved {} in container {}", id, parent_id);
            state.external.push(parent);
            stream
        }
        _ => None,
    }
}

/// Read the `map` segment into the extent table and return the map size.
fn load_extents(
    resource: &str,
    container: &dyn Container,
    declared_size: u64,
    gap_stream: Arc<dyn Stream>,
    state: &mut MapState,
) -> u64 {
    let map_name = format!("{resource}/map");
    let raw = match container.segment(&map_name).map(|s| read_all(s.as_ref())) {
        Some(Ok(raw)) => raw,
        Some(Err(e)) => {
            warn!("Failed to read map {}: {}", map_name, e);
            return 0;
        }
        None => {
            warn!("Map {} has no map segment", resource);
            return 0;
        }
    };

    let gap_id = u32::try_from(state.streams.len()).unwrap_or(u32::MAX);
    state.streams.push(gap_stream);
    let gap = |offset: u64, length: u64| MapEntryPoint {
        offset,
        length,
        stream_offset: offset,
        stream_id: gap_id,
    };

    let count = raw.len() / MapEntryPoint::SIZE;
    let mut cursor = Cursor::new(raw.as_slice());
    let mut running = 0u64;
    for mut record in (0..count).map_while(|_| MapEntryPoint::read(&mut cursor).ok()) {
        if record.length == 0 {
            continue;
        }
        if record.offset > running {
            state.extents.insert(running, gap(running, record.offset - running));
        }
        if record.stream_id as usize >= state.streams.len() {
            warn!(
                "Map {} extent at {} names stream {} of {}",
                resource,
                record.offset,
                record.stream_id,
                state.streams.len()
            );
            record.stream_id = u32::try_from(state.streams.len()).unwrap_or(u32::MAX);
            state.streams.push(unknown_stream_for(IMAGESTREAM_UNKNOWN));
        }
        state.extents.insert(record.offset, record);
        running = record.offset.saturating_add(record.length);
    }

    if declared_size == 0 {
        return running;
    }
    if running < declared_size {
        state.extents.insert(running, gap(running, declared_size - running));
    }
    declared_size
}

impl Stream for MapStream {
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
        let count = clip(offset, buf.len(), self.size);
        let state = self.state.read();

        let mut copied = 0;
        while copied < count {
            let position = offset + copied as u64;
            let Some((_, extent)) = state
                .extents
                .range(..=position)
                .next_back()
                .or_else(|| state.extents.iter().next_back())
            else {
                return Err(StreamError::NotFound(format!(
                    "{} has no extent at {}",
                    self.resource, position
                )));
            };
            let delta = position.saturating_sub(extent.offset);
            let available = extent.length.saturating_sub(delta);
            let Some(backing) = state.streams.get(extent.stream_id as usize) else {
                return Err(StreamError::NotFound(format!(
                    "{} stream {}",
                    self.resource, extent.stream_id
                )));
            };
            let want = usize::try_from(available).map_or(count - copied, |a| a.min(count - copied));
            let Some(backing_offset) = extent.stream_offset.checked_add(delta) else {
                return Err(StreamError::BackingRead {
                    stream: backing.resource_id().to_string(),
                    offset: extent.stream_offset,
                });
            };
            trace!(
                "Map {} reading {} bytes at {} from {} at {}",
                self.resource,
                want,
                position,
                backing.resource_id(),
                backing_offset
            );

            let read = if want == 0 {
                0
            } else {
                backing.read(&mut buf[copied..copied + want], backing_offset)?
            };
            if read == 0 {
                return Err(StreamError::BackingRead {
                    stream: backing.resource_id().to_string(),
                    offset: backing_offset,
                });
            }
            copied += read;
        }
        Ok(copied)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.write();
        state.streams.clear();
        state.external.clear();
        state.parent = None;
    }
}

impl std::fmt::Debug for MapStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapStream")
            .field("resource", &self.resource)
            .field("size", &self.size)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
