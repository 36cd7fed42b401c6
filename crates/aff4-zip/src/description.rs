//! Container identification.
//!
//! AFF4 writers store the container's resource id in a stored
//! `container.description` segment, conventionally the very first entry.
//! [`read_resource_id`] reads it straight out of the first 4 KiB of the file
//! without parsing the central directory, which matters for containers with
//! hundreds of thousands of entries. When that shortcut does not apply the
//! archive is opened normally: the zip comment is taken as the id, replaced by
//! the `container.description` content when the segment exists.

use binrw::BinRead;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, trace};

use crate::archive::ZipArchive;
use crate::constants::{
    CONTAINER_DESCRIPTION, CONTAINER_EXTENSIONS, DATA_DESCRIPTOR_MAGIC, TAIL_SCAN_SIZE,
    ZIP64_SENTINEL_32,
};
use crate::records::{DataDescriptor64, LocalFileHeader, Zip64Extra};
use crate::source::FileSource;
use crate::{Result, ZipError};

/// Check whether a path carries an AFF4 container extension.
pub fn is_aff4_container<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            CONTAINER_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Read the resource id of a container.
///
/// Returns [`ZipError::NotAContainer`] when neither the description segment
/// nor the zip comment yields an id.
pub fn read_resource_id<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let (source, file_size) = FileSource::open(path)?;

    let head_len = file_size.min(TAIL_SCAN_SIZE as u64) as usize;
    let mut head = vec![0u8; head_len];
    let read = source.read_at(&mut head, 0)?;
    head.truncate(read);

    if let Some(id) = description_from_head(&head) {
        trace!("Resource id for {:?} from leading description: {}", path, id);
        return Ok(id);
    }

    debug!("Falling back to full archive scan for resource id of {:?}", path);
    let archive = ZipArchive::open(path)?;
    let mut id = clean_id(archive.comment().as_bytes());
    if let Some(entry) = archive.entry(CONTAINER_DESCRIPTION) {
        let content = archive.read_entry_data(entry)?;
        let described = clean_id(&content);
        if !described.is_empty() {
            id = described;
        }
    }

    if id.is_empty() {
        return Err(ZipError::NotAContainer(path.display().to_string()));
    }
    Ok(id)
}

/// Extract the description content from the first bytes of an archive.
///
/// Returns `None` whenever any precondition of the shortcut fails.
fn description_from_head(head: &[u8]) -> Option<String> {
    let header = LocalFileHeader::read(&mut Cursor::new(head)).ok()?;
    if header.compression_method != 0 {
        trace!("Leading entry is compressed (method {})", header.compression_method);
        return None;
    }
    if usize::from(header.name_length) != CONTAINER_DESCRIPTION.len() {
        return None;
    }

    let name_start = LocalFileHeader::SIZE;
    let name_end = name_start + usize::from(header.name_length);
    if head.get(name_start..name_end)? != CONTAINER_DESCRIPTION.as_bytes() {
        return None;
    }
    let extra_end = name_end + usize::from(header.extra_length);
    let extra = head.get(name_end..extra_end)?;

    let mut size = if header.uncompressed_size == ZIP64_SENTINEL_32 {
        let zip64 = Zip64Extra::parse(
            extra,
            true,
            header.compressed_size == ZIP64_SENTINEL_32,
            false,
        );
        zip64
            .uncompressed_size
            .filter(|&s| s != 0 && s != u64::MAX)
            .or(zip64.compressed_size)
            .unwrap_or(0)
    } else {
        u64::from(header.uncompressed_size)
    };

    if header.uncompressed_size == ZIP64_SENTINEL_32 && (size == 0 || size == u64::MAX) {
        size = scan_data_descriptor(head).unwrap_or(0);
    }

    let size = usize::try_from(size).ok()?;
    if size == 0 {
        return None;
    }
    let content = head.get(extra_end..extra_end.checked_add(size)?)?;
    let id = clean_id(content);
    (!id.is_empty()).then_some(id)
}

/// Find a ZIP64 data descriptor in the buffer and return its compressed size.
fn scan_data_descriptor(head: &[u8]) -> Option<u64> {
    let magic = DATA_DESCRIPTOR_MAGIC.to_le_bytes();
    let last = head.len().checked_sub(DataDescriptor64::SIZE)?;
    (0..=last)
        .find(|&i| head[i..i + 4] == magic)
        .and_then(|i| DataDescriptor64::read(&mut Cursor::new(&head[i..])).ok())
        .map(|descriptor| descriptor.compressed_size)
}

fn clean_id(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}
