//! Bevvy chunk indices.
//!
//! An image stream stores its chunks in groups ("bevvies"). Bevvy `n` of a
//! stream is the segment `<stream>/%08d` holding the compressed chunks back
//! to back, and `<stream>/%08d.index` holds one [`ChunkPoint`] per chunk
//! giving its position inside the bevvy.

use binrw::{BinRead, BinWrite};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::container::Container;
use crate::stream::read_all;

/// Location of one compressed chunk inside its bevvy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ChunkPoint {
    /// Offset from the start of the bevvy data
    pub offset: u64,
    /// Compressed length; zero means the chunk is missing
    pub length: u32,
}

impl ChunkPoint {
    /// Encoded size of one record.
    pub const SIZE: usize = 12;
}

/// Parsed index of one bevvy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BevvyIndex {
    bevvy_id: u32,
    data_offset: u64,
    data_size: u64,
    points: Vec<ChunkPoint>,
}

impl BevvyIndex {
    /// Build an index from raw `.index` bytes for bevvy data of `data_size`
    /// bytes at `data_offset`. A trailing partial record is ignored.
    pub fn parse(bevvy_id: u32, data_offset: u64, data_size: u64, raw: &[u8]) -> Self {
        let count = raw.len() / ChunkPoint::SIZE;
        let mut cursor = Cursor::new(raw);
        let points = (0..count)
            .map_while(|_| ChunkPoint::read(&mut cursor).ok())
            .collect();
        Self {
            bevvy_id,
            data_offset,
            data_size,
            points,
        }
    }

    /// Index with no chunks, standing in for a bevvy that could not be loaded.
    pub fn empty(bevvy_id: u32) -> Self {
        Self {
            bevvy_id,
            ..Self::default()
        }
    }

    /// Bevvy number.
    pub const fn bevvy_id(&self) -> u32 {
        self.bevvy_id
    }

    /// Absolute container offset of the bevvy data.
    pub const fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Length of the bevvy data segment.
    pub const fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Whether `point` lies inside the bevvy data.
    pub fn holds(&self, point: ChunkPoint) -> bool {
        point
            .offset
            .checked_add(u64::from(point.length))
            .is_some_and(|end| end <= self.data_size)
    }

    /// Number of chunk records.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the index has no records.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Record for chunk `index`, or `{0, 0}` when out of range.
    pub fn point(&self, index: u32) -> ChunkPoint {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.points.get(i))
            .copied()
            .unwrap_or_default()
    }
}

/// Loads bevvy indices of one image stream from its container.
#[derive(Clone)]
pub struct BevvyIndexLoader {
    stream_id: String,
    container: Arc<dyn Container>,
}

impl BevvyIndexLoader {
    /// Create a loader for the bevvies of `stream_id`.
    pub fn new(stream_id: impl Into<String>, container: Arc<dyn Container>) -> Self {
        Self {
            stream_id: stream_id.into(),
            container,
        }
    }

    /// Name of the data segment of bevvy `bevvy_id`.
    pub fn segment_name(&self, bevvy_id: u32) -> String {
        format!("{}/{bevvy_id:08}", self.stream_id)
    }

    /// Load bevvy `bevvy_id`.
    ///
    /// A missing data segment or index yields an empty index, whose every
    /// point is `{0, 0}`.
    pub fn load(&self, bevvy_id: u32) -> Arc<BevvyIndex> {
        let data_name = self.segment_name(bevvy_id);
        let Some(entry) = self.container.segment_entry(&data_name) else {
            warn!("Bevvy segment {} not found", data_name);
            return Arc::new(BevvyIndex::empty(bevvy_id));
        };

        let index_name = format!("{data_name}.index");
        let raw = match self.container.segment(&index_name).map(|s| read_all(s.as_ref())) {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                warn!("Failed to read bevvy index {}: {}", index_name, e);
                return Arc::new(BevvyIndex::empty(bevvy_id));
            }
            None => {
                warn!("Bevvy index {} not found", index_name);
                return Arc::new(BevvyIndex::empty(bevvy_id));
            }
        };

        let index = BevvyIndex::parse(bevvy_id, entry.data_offset, entry.compressed_size, &raw);
        debug!(
            "Loaded bevvy {} with {} chunks at offset {}",
            data_name,
            index.len(),
            index.data_offset()
        );
        Arc::new(index)
    }
}

impl std::fmt::Debug for BevvyIndexLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BevvyIndexLoader")
            .field("stream_id", &self.stream_id)
            .field("container", &self.container.resource_id())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lexicon::CompressionMethod;
    use crate::metadata::Catalog;
    use crate::test_utils::{IMAGE_ID, ImageWriter, container_archive, open_container};

    #[test]
    fn test_parse_records() {
        let mut raw = Vec::new();
        for (offset, length) in [(0u64, 100u32), (100, 4096), (4196, 7)] {
            raw.extend_from_slice(&offset.to_le_bytes());
            raw.extend_from_slice(&length.to_le_bytes());
        }
        raw.extend_from_slice(&[1, 2, 3]);

        let index = BevvyIndex::parse(3, 900, 4203, &raw);
        assert_eq!(index.bevvy_id(), 3);
        assert_eq!(index.data_offset(), 900);
        assert_eq!(index.data_size(), 4203);
        assert!(index.holds(index.point(2)));
        assert!(!index.holds(ChunkPoint { offset: 4200, length: 4 }));
        assert!(!index.holds(ChunkPoint { offset: u64::MAX, length: 1 }));
        assert_eq!(index.len(), 3);
        assert_eq!(index.point(1), ChunkPoint { offset: 100, length: 4096 });
        assert_eq!(index.point(3), ChunkPoint::default());
        assert_eq!(index.point(u32::MAX), ChunkPoint::default());
    }

    #[test]
    fn test_load_from_container() {
        let writer = ImageWriter::new(IMAGE_ID, CompressionMethod::Deflate)
            .with_chunk_size(1024)
            .with_chunks_per_segment(4);
        let data: Vec<u8> = (0..10 * 1024u32).map(|i| (i % 13) as u8).collect();
        let (_dir, container) = open_container(
            &writer.write(container_archive(), &data),
            Catalog::new(),
        );
        let loader = BevvyIndexLoader::new(IMAGE_ID, container.clone());

        assert_eq!(loader.segment_name(2), format!("{IMAGE_ID}/00000002"));

        let first = loader.load(0);
        assert_eq!(first.len(), 4);
        let entry = container
            .segment_entry(&loader.segment_name(0))
            .expect("Test operation should succeed");
        assert_eq!(first.data_offset(), entry.data_offset);
        assert_eq!(first.data_size(), entry.compressed_size);
        assert_eq!(first.point(0).offset, 0);
        assert!(first.point(0).length > 0);
        assert_eq!(first.point(1).offset, u64::from(first.point(0).length));

        // Ten chunks over bevvies of four leaves two in the last one.
        assert_eq!(loader.load(2).len(), 2);
        assert!(loader.load(3).is_empty());
    }
}
