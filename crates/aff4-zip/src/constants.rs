//! ZIP record magics and limits used by AFF4 containers.

/// Local file header signature (`PK\x03\x04`).
pub const LOCAL_FILE_HEADER_MAGIC: u32 = 0x0403_4b50;

/// Central directory file header signature (`PK\x01\x02`).
pub const CENTRAL_DIRECTORY_MAGIC: u32 = 0x0201_4b50;

/// End of central directory signature (`PK\x05\x06`).
pub const END_OF_CENTRAL_DIRECTORY_MAGIC: u32 = 0x0605_4b50;

/// ZIP64 end of central directory signature.
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_MAGIC: u32 = 0x0606_4b50;

/// ZIP64 end of central directory locator signature.
pub const ZIP64_LOCATOR_MAGIC: u32 = 0x0706_4b50;

/// ZIP64 data descriptor signature.
pub const DATA_DESCRIPTOR_MAGIC: u32 = 0x0807_4b50;

/// Extra field header id carrying ZIP64 sizes and offsets.
pub const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// 32-bit sentinel meaning "look in the ZIP64 records".
pub const ZIP64_SENTINEL_32: u32 = 0xFFFF_FFFF;

/// 16-bit entry count sentinel.
pub const ZIP64_SENTINEL_16: u16 = 0xFFFF;

/// Bytes scanned at the archive tail for the end of central directory.
///
/// Also the number of leading bytes the fast resource id path inspects.
pub const TAIL_SCAN_SIZE: usize = 4096;

/// Largest deflated entry that is inflated in memory (32 MiB).
pub const MAX_INFLATE_SIZE: u64 = 32 * 1024 * 1024;

/// Segment through which containers identify themselves.
pub const CONTAINER_DESCRIPTION: &str = "container.description";

/// Container file extensions (compared case-insensitively).
pub const CONTAINER_EXTENSIONS: [&str; 2] = ["af4", "aff4"];

/// Files at or above this size are read with positioned I/O instead of mmap.
pub const MMAP_LIMIT: u64 = 2_147_483_648;
