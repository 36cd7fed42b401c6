//! Fixed-size ZIP structural records.
//!
//! All records are little-endian and prefixed by their signature, which
//! `binrw` checks on read and emits on write. Variable-length trailers
//! (names, extra fields, comments) are handled by the caller.

use binrw::{BinRead, BinWrite};

/// End of central directory record.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = 0x06054b50u32)]
pub struct EndOfCentralDirectory {
    /// Number of this disk
    pub disk_number: u16,
    /// Disk holding the central directory
    pub disk_with_central_directory: u16,
    /// Central directory entries on this disk
    pub entries_on_disk: u16,
    /// Total central directory entries
    pub total_entries: u16,
    /// Central directory size in bytes
    pub central_directory_size: u32,
    /// Central directory offset relative to the archive start
    pub central_directory_offset: u32,
    /// Length of the trailing comment
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    /// Encoded size including the signature.
    pub const SIZE: usize = 22;

    /// Whether any field defers to the ZIP64 end record.
    pub fn is_zip64(&self) -> bool {
        use crate::constants::{ZIP64_SENTINEL_16, ZIP64_SENTINEL_32};
        self.central_directory_offset == ZIP64_SENTINEL_32
            || self.central_directory_size == ZIP64_SENTINEL_32
            || self.total_entries == ZIP64_SENTINEL_16
    }
}

/// ZIP64 end of central directory locator.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = 0x07064b50u32)]
pub struct Zip64Locator {
    /// Disk holding the ZIP64 end record
    pub disk_with_end_record: u32,
    /// Offset of the ZIP64 end record
    pub end_record_offset: u64,
    /// Total number of disks
    pub total_disks: u32,
}

impl Zip64Locator {
    /// Encoded size including the signature.
    pub const SIZE: usize = 20;
}

/// ZIP64 end of central directory record (fixed part).
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = 0x06064b50u32)]
pub struct Zip64EndOfCentralDirectory {
    /// Size of the remaining record
    pub record_size: u64,
    /// Version made by
    pub version_made_by: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// Number of this disk
    pub disk_number: u32,
    /// Disk holding the central directory
    pub disk_with_central_directory: u32,
    /// Central directory entries on this disk
    pub entries_on_disk: u64,
    /// Total central directory entries
    pub total_entries: u64,
    /// Central directory size in bytes
    pub central_directory_size: u64,
    /// Central directory offset relative to the archive start
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Encoded size including the signature.
    pub const SIZE: usize = 56;
}

/// Central directory file header (fixed part).
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = 0x02014b50u32)]
pub struct CentralDirectoryHeader {
    /// Version made by
    pub version_made_by: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose flags
    pub flags: u16,
    /// Compression method
    pub compression_method: u16,
    /// DOS modification time
    pub last_modified_time: u16,
    /// DOS modification date
    pub last_modified_date: u16,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size or ZIP64 sentinel
    pub compressed_size: u32,
    /// Uncompressed size or ZIP64 sentinel
    pub uncompressed_size: u32,
    /// Length of the entry name
    pub name_length: u16,
    /// Length of the extra field
    pub extra_length: u16,
    /// Length of the entry comment
    pub comment_length: u16,
    /// Disk where the entry starts
    pub disk_number_start: u16,
    /// Internal attributes
    pub internal_attributes: u16,
    /// External attributes
    pub external_attributes: u32,
    /// Local header offset or ZIP64 sentinel
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader {
    /// Encoded size including the signature.
    pub const SIZE: usize = 46;

    /// Bytes this header occupies including its variable trailers.
    pub fn record_len(&self) -> usize {
        Self::SIZE
            + usize::from(self.name_length)
            + usize::from(self.extra_length)
            + usize::from(self.comment_length)
    }
}

/// Local file header (fixed part).
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = 0x04034b50u32)]
pub struct LocalFileHeader {
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose flags
    pub flags: u16,
    /// Compression method
    pub compression_method: u16,
    /// DOS modification time
    pub last_modified_time: u16,
    /// DOS modification date
    pub last_modified_date: u16,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size or ZIP64 sentinel
    pub compressed_size: u32,
    /// Uncompressed size or ZIP64 sentinel
    pub uncompressed_size: u32,
    /// Length of the entry name
    pub name_length: u16,
    /// Length of the extra field
    pub extra_length: u16,
}

impl LocalFileHeader {
    /// Encoded size including the signature.
    pub const SIZE: usize = 30;

    /// Distance from the header start to the entry data.
    pub fn data_start(&self) -> u64 {
        Self::SIZE as u64 + u64::from(self.name_length) + u64::from(self.extra_length)
    }
}

/// ZIP64 data descriptor trailing streamed entries.
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = 0x08074b50u32)]
pub struct DataDescriptor64 {
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
}

impl DataDescriptor64 {
    /// Encoded size including the signature.
    pub const SIZE: usize = 24;
}

/// Header of one extra field block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ExtraFieldHeader {
    /// Extra field id
    pub id: u16,
    /// Payload size following this header
    pub size: u16,
}

impl ExtraFieldHeader {
    /// Encoded size.
    pub const SIZE: usize = 4;
}

/// 64-bit values recovered from a ZIP64 extra field.
///
/// Each field is present only when the matching 32-bit header field holds
/// the sentinel, in the fixed order uncompressed size, compressed size,
/// local header offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Extra {
    /// Uncompressed size
    pub uncompressed_size: Option<u64>,
    /// Compressed size
    pub compressed_size: Option<u64>,
    /// Local header offset
    pub local_header_offset: Option<u64>,
}

impl Zip64Extra {
    /// Scan an extra field area for the ZIP64 block.
    ///
    /// `want_*` flags say which header fields carried the sentinel. Blocks
    /// that run past the end of `extra` stop the scan.
    pub fn parse(
        extra: &[u8],
        want_uncompressed: bool,
        want_compressed: bool,
        want_offset: bool,
    ) -> Self {
        let mut result = Self::default();
        let mut pos = 0usize;
        while pos + ExtraFieldHeader::SIZE <= extra.len() {
            let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
            let size = usize::from(u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]));
            let body_start = pos + ExtraFieldHeader::SIZE;
            let body_end = (body_start + size).min(extra.len());
            if id == crate::constants::ZIP64_EXTRA_FIELD_ID {
                let mut values = extra[body_start..body_end]
                    .chunks_exact(8)
                    .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]));
                if want_uncompressed {
                    result.uncompressed_size = values.next();
                }
                if want_compressed {
                    result.compressed_size = values.next();
                }
                if want_offset {
                    result.local_header_offset = values.next();
                }
                break;
            }
            pos = body_start + size;
        }
        result
    }
}
