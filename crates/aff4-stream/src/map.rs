//! Map resources.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::container::Container;
use crate::lexicon::is_symbolic;
use crate::metadata::MapProperties;
use crate::stream::symbolic::{symbolic_for_resource, zero_stream};
use crate::stream::{MapStream, Stream, read_all};

struct Overrides {
    unknown: Option<Arc<dyn Stream>>,
    gap: Arc<dyn Stream>,
}

/// An `aff4:Map` resource inside a container.
///
/// Holds the map's properties and the streams substituted for unknown data
/// and for unmapped ranges. Each call to [`stream`](Map::stream) builds a new
/// [`MapStream`] from the current overrides.
pub struct Map {
    resource: String,
    container: Arc<dyn Container>,
    props: MapProperties,
    overrides: Mutex<Overrides>,
}

impl Map {
    /// Create the map `resource` stored in `container`.
    ///
    /// The gap stream comes from the map's `mapGapDefaultStream` property
    /// when it resolves, and is zero-fill otherwise.
    pub fn new(
        resource: impl Into<String>,
        container: Arc<dyn Container>,
        props: MapProperties,
    ) -> Self {
        let gap = props
            .gap_stream
            .as_deref()
            .and_then(|id| symbolic_for_resource(id).or_else(|| container.image_stream(id)))
            .unwrap_or_else(zero_stream);
        Self {
            resource: resource.into(),
            container,
            props,
            overrides: Mutex::new(Overrides { unknown: None, gap }),
        }
    }

    /// Resource id of the map.
    pub fn resource_id(&self) -> &str {
        &self.resource
    }

    /// Declared size.
    pub const fn size(&self) -> u64 {
        self.props.size
    }

    /// Map properties.
    pub const fn properties(&self) -> &MapProperties {
        &self.props
    }

    /// Build a stream over the map.
    pub fn stream(&self) -> Arc<MapStream> {
        let (unknown, gap) = {
            let overrides = self.overrides.lock();
            (overrides.unknown.clone(), Arc::clone(&overrides.gap))
        };
        Arc::new(MapStream::new(
            self.resource.clone(),
            Arc::clone(&self.container),
            self.props.size,
            unknown,
            Some(gap),
        ))
    }

    /// Stream replacing `UnknownData` backing streams, if any.
    pub fn unknown_override(&self) -> Option<Arc<dyn Stream>> {
        self.overrides.lock().unknown.clone()
    }

    /// Replace `UnknownData` backing streams in streams built from now on.
    pub fn set_unknown_override(&self, stream: Option<Arc<dyn Stream>>) {
        self.overrides.lock().unknown = stream;
    }

    /// Stream filling unmapped ranges.
    pub fn gap_override(&self) -> Arc<dyn Stream> {
        Arc::clone(&self.overrides.lock().gap)
    }

    /// Fill unmapped ranges from `stream` in streams built from now on.
    pub fn set_gap_override(&self, stream: Arc<dyn Stream>) {
        self.overrides.lock().gap = stream;
    }

    /// Ids of the streams the map reads from, excluding symbolic ones.
    ///
    /// Taken from the properties when they list any, otherwise from the
    /// map's `idx` segment.
    pub fn dependent_streams(&self) -> Vec<String> {
        if !self.props.dependent_streams.is_empty() {
            return self.props.dependent_streams.clone();
        }
        let idx_name = format!("{}/idx", self.resource);
        let Some(Ok(raw)) = self
            .container
            .segment(&idx_name)
            .map(|segment| read_all(segment.as_ref()))
        else {
            return Vec::new();
        };
        String::from_utf8_lossy(&raw)
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|id| !id.is_empty() && !is_symbolic(id))
            .map(str::to_string)
            .collect()
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("resource", &self.resource)
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}
