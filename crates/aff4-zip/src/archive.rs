//! ZIP/ZIP64 structure parsing and positioned reads.
//!
//! Opening an archive locates the end of central directory record in the
//! last 4 KiB of the file, follows the ZIP64 locator when the classic record
//! carries sentinels, and then walks the central directory. Every entry's
//! data offset is recomputed from its local file header, since the local
//! extra field may differ in length from the central one.
//!
//! Archives appended to other data (for example a container written after
//! a bootloader or concatenated by a transfer tool) store offsets relative to
//! their own start. The difference between where the directory actually ends
//! and where the records say it should end is applied to every offset.

use binrw::BinRead;
use flate2::read::DeflateDecoder;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::constants::{END_OF_CENTRAL_DIRECTORY_MAGIC, MAX_INFLATE_SIZE, TAIL_SCAN_SIZE, ZIP64_SENTINEL_32};
use crate::entry::{ArchiveEntry, CompressionMethod};
use crate::records::{
    CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader, Zip64EndOfCentralDirectory,
    Zip64Extra, Zip64Locator,
};
use crate::source::FileSource;
use crate::{Result, ZipError};

/// An opened ZIP or ZIP64 archive.
///
/// Entries are immutable once parsed. All reads are positioned, so one
/// archive can be shared between threads behind an `Arc` without locking.
pub struct ZipArchive {
    path: PathBuf,
    source: FileSource,
    file_size: u64,
    entries: Vec<ArchiveEntry>,
    by_name: HashMap<String, usize>,
    comment: String,
    global_offset: i64,
}

/// Where the central directory lives, after ZIP64 resolution.
#[derive(Debug, Clone, Copy)]
struct DirectoryLocation {
    offset: u64,
    size: u64,
    entries: u64,
    global_offset: i64,
}

impl ZipArchive {
    /// Open and parse an archive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (source, file_size) = FileSource::open(path)?;

        let mut archive = Self {
            path: path.to_path_buf(),
            source,
            file_size,
            entries: Vec::new(),
            by_name: HashMap::new(),
            comment: String::new(),
            global_offset: 0,
        };

        let (eocd_offset, eocd) = archive.find_end_record()?;
        archive.comment = archive.read_comment(eocd_offset, &eocd)?;

        let location = if eocd.is_zip64() {
            archive.locate_zip64_directory(eocd_offset)?
        } else {
            DirectoryLocation {
                offset: u64::from(eocd.central_directory_offset),
                size: u64::from(eocd.central_directory_size),
                entries: u64::from(eocd.total_entries),
                global_offset: global_shift(
                    eocd_offset,
                    u64::from(eocd.central_directory_size),
                    u64::from(eocd.central_directory_offset),
                )?,
            }
        };
        archive.global_offset = location.global_offset;

        archive.parse_central_directory(location)?;

        debug!(
            "Parsed {} entries from {:?} (global offset {})",
            archive.entries.len(),
            archive.path,
            archive.global_offset
        );
        Ok(archive)
    }

    /// Path the archive was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total size of the archive file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// All entries in central directory order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Look up an entry by exact name. The first of duplicate names wins.
    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.by_name.get(name).map(|&index| &self.entries[index])
    }

    /// Check whether an entry with this exact name exists.
    pub fn has_entry(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Archive comment with any NUL terminator removed.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Correction applied to recorded offsets.
    pub fn global_offset(&self) -> i64 {
        self.global_offset
    }

    /// Positioned read from the archive file.
    ///
    /// Reads starting at or past the end return 0; reads running past the
    /// end are clipped.
    pub fn file_read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() || offset >= self.file_size {
            return Ok(0);
        }
        let available = self.file_size - offset;
        let count = usize::try_from(available).map_or(buf.len(), |a| a.min(buf.len()));
        Ok(self.source.read_at(&mut buf[..count], offset)?)
    }

    /// Read an entry's complete uncompressed payload.
    ///
    /// Deflated entries are inflated in memory, which is only supported up
    /// to [`MAX_INFLATE_SIZE`].
    pub fn read_entry_data(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        match entry.compression {
            CompressionMethod::Stored => self.read_exact_at(entry.data_offset, entry.uncompressed_size),
            CompressionMethod::Deflate => {
                if entry.uncompressed_size > MAX_INFLATE_SIZE {
                    return Err(ZipError::EntryTooLarge {
                        name: entry.name.clone(),
                        size: entry.uncompressed_size,
                    });
                }
                let raw = self.read_exact_at(entry.data_offset, entry.compressed_size)?;
                let mut inflated = Vec::with_capacity(entry.uncompressed_size as usize);
                DeflateDecoder::new(&raw[..])
                    .take(entry.uncompressed_size)
                    .read_to_end(&mut inflated)?;
                trace!(
                    "Inflated {} ({} -> {} bytes)",
                    entry.name,
                    raw.len(),
                    inflated.len()
                );
                Ok(inflated)
            }
            CompressionMethod::Other(method) => Err(ZipError::UnsupportedCompression {
                name: entry.name.clone(),
                method,
            }),
        }
    }

    fn read_exact_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if offset.checked_add(len).is_none_or(|end| end > self.file_size) {
            return Err(ZipError::Truncated(format!(
                "read of {len} bytes at {offset} runs past archive end {}",
                self.file_size
            )));
        }
        let size = usize::try_from(len)
            .map_err(|_| ZipError::Truncated(format!("read of {len} bytes at {offset}")))?;
        let mut buf = vec![0u8; size];
        let read = self.file_read(&mut buf, offset)?;
        if read != size {
            return Err(ZipError::Truncated(format!(
                "wanted {size} bytes at offset {offset}, got {read}"
            )));
        }
        Ok(buf)
    }

    fn find_end_record(&self) -> Result<(u64, EndOfCentralDirectory)> {
        let tail_len = self.file_size.min(TAIL_SCAN_SIZE as u64);
        let tail_start = self.file_size - tail_len;
        let tail = self.read_exact_at(tail_start, tail_len)?;

        if tail.len() < EndOfCentralDirectory::SIZE {
            return Err(ZipError::EndOfCentralDirectoryNotFound);
        }

        let magic = END_OF_CENTRAL_DIRECTORY_MAGIC.to_le_bytes();
        let position = (0..=tail.len() - EndOfCentralDirectory::SIZE)
            .rev()
            .find(|&i| tail[i..i + 4] == magic)
            .ok_or(ZipError::EndOfCentralDirectoryNotFound)?;

        let record = EndOfCentralDirectory::read(&mut Cursor::new(&tail[position..]))?;
        let eocd_offset = tail_start + position as u64;
        trace!("End of central directory at {}: {:?}", eocd_offset, record);
        Ok((eocd_offset, record))
    }

    fn read_comment(&self, eocd_offset: u64, eocd: &EndOfCentralDirectory) -> Result<String> {
        if eocd.comment_length == 0 {
            return Ok(String::new());
        }
        let mut buf = vec![0u8; usize::from(eocd.comment_length)];
        let read = self.file_read(&mut buf, eocd_offset + EndOfCentralDirectory::SIZE as u64)?;
        buf.truncate(read);
        if let Some(nul) = buf.iter().position(|&b| b == 0) {
            buf.truncate(nul);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn locate_zip64_directory(&self, eocd_offset: u64) -> Result<DirectoryLocation> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64Locator::SIZE as u64)
            .ok_or_else(|| ZipError::InvalidZip64("no room for locator".to_string()))?;
        let bytes = self.read_exact_at(locator_offset, Zip64Locator::SIZE as u64)?;
        let locator = Zip64Locator::read(&mut Cursor::new(&bytes[..]))
            .map_err(|e| ZipError::InvalidZip64(format!("locator: {e}")))?;
        if locator.disk_with_end_record != 0 || locator.total_disks != 1 {
            return Err(ZipError::InvalidZip64(format!(
                "multi-disk archives are not supported ({} disks)",
                locator.total_disks
            )));
        }

        // The locator's own offset is stale for appended archives, so the end
        // record is taken to sit directly before the locator.
        let end_offset = locator_offset
            .checked_sub(Zip64EndOfCentralDirectory::SIZE as u64)
            .ok_or_else(|| ZipError::InvalidZip64("no room for end record".to_string()))?;
        let bytes = self.read_exact_at(end_offset, Zip64EndOfCentralDirectory::SIZE as u64)?;
        let end = Zip64EndOfCentralDirectory::read(&mut Cursor::new(&bytes[..]))
            .map_err(|e| ZipError::InvalidZip64(format!("end record: {e}")))?;

        Ok(DirectoryLocation {
            offset: end.central_directory_offset,
            size: end.central_directory_size,
            entries: end.entries_on_disk,
            global_offset: global_shift(
                end_offset,
                end.central_directory_size,
                end.central_directory_offset,
            )?,
        })
    }

    fn parse_central_directory(&mut self, location: DirectoryLocation) -> Result<()> {
        let start = apply_shift(location.offset, location.global_offset)?;
        let directory = self.read_exact_at(start, location.size)?;

        let capacity = usize::try_from(location.entries).unwrap_or(0).min(directory.len() / CentralDirectoryHeader::SIZE);
        self.entries.reserve(capacity);

        let mut pos = 0usize;
        for index in 0..location.entries {
            if pos + CentralDirectoryHeader::SIZE > directory.len() {
                return Err(ZipError::Truncated(format!(
                    "central directory ends before entry {index}"
                )));
            }
            let header = CentralDirectoryHeader::read(&mut Cursor::new(&directory[pos..]))
                .map_err(|e| ZipError::InvalidArchive(format!("central directory entry {index}: {e}")))?;
            if pos + header.record_len() > directory.len() {
                return Err(ZipError::Truncated(format!(
                    "central directory entry {index} runs past the directory"
                )));
            }

            let name_start = pos + CentralDirectoryHeader::SIZE;
            let extra_start = name_start + usize::from(header.name_length);
            let extra_end = extra_start + usize::from(header.extra_length);
            let name = String::from_utf8_lossy(&directory[name_start..extra_start]).into_owned();

            let entry = self.resolve_entry(name, &header, &directory[extra_start..extra_end], location.global_offset)?;
            trace!(
                "Entry {}: data at {} ({} / {} bytes, {})",
                entry.name,
                entry.data_offset,
                entry.compressed_size,
                entry.uncompressed_size,
                entry.compression
            );

            let slot = self.entries.len();
            if self.by_name.contains_key(&entry.name) {
                warn!("Duplicate archive entry {}, keeping the first", entry.name);
            } else {
                self.by_name.insert(entry.name.clone(), slot);
            }
            self.entries.push(entry);

            pos += header.record_len();
        }
        Ok(())
    }

    fn resolve_entry(
        &self,
        name: String,
        header: &CentralDirectoryHeader,
        extra: &[u8],
        global_offset: i64,
    ) -> Result<ArchiveEntry> {
        let zip64 = Zip64Extra::parse(
            extra,
            header.uncompressed_size == ZIP64_SENTINEL_32,
            header.compressed_size == ZIP64_SENTINEL_32,
            header.local_header_offset == ZIP64_SENTINEL_32,
        );
        let uncompressed_size = zip64
            .uncompressed_size
            .unwrap_or_else(|| u64::from(header.uncompressed_size));
        let compressed_size = zip64
            .compressed_size
            .unwrap_or_else(|| u64::from(header.compressed_size));
        let recorded_offset = zip64
            .local_header_offset
            .unwrap_or_else(|| u64::from(header.local_header_offset));

        let header_offset = apply_shift(recorded_offset, global_offset)?;
        let bytes = self.read_exact_at(header_offset, LocalFileHeader::SIZE as u64)?;
        let local = LocalFileHeader::read(&mut Cursor::new(&bytes[..]))
            .map_err(|e| ZipError::InvalidArchive(format!("local header for {name}: {e}")))?;
        let data_offset = header_offset + local.data_start();

        let entry = ArchiveEntry {
            name,
            header_offset,
            data_offset,
            compressed_size,
            uncompressed_size,
            compression: CompressionMethod::from_raw(header.compression_method),
        };
        if entry.is_stored() && entry.uncompressed_size != entry.compressed_size {
            return Err(ZipError::InvalidArchive(format!(
                "stored entry {} declares {} bytes but holds {}",
                entry.name, entry.uncompressed_size, entry.compressed_size
            )));
        }
        if entry.data_end() > self.file_size {
            return Err(ZipError::Truncated(format!(
                "entry {} ends at {} past archive end {}",
                entry.name,
                entry.data_end(),
                self.file_size
            )));
        }
        Ok(entry)
    }
}

impl std::fmt::Debug for ZipArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchive")
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .field("entries", &self.entries.len())
            .field("global_offset", &self.global_offset)
            .finish_non_exhaustive()
    }
}

/// Observed directory end minus the recorded one.
fn global_shift(directory_end: u64, directory_size: u64, directory_offset: u64) -> Result<i64> {
    let shift = i128::from(directory_end) - i128::from(directory_size) - i128::from(directory_offset);
    i64::try_from(shift).map_err(|_| ZipError::InvalidArchive(format!("global offset {shift} out of range")))
}

fn apply_shift(offset: u64, shift: i64) -> Result<u64> {
    offset
        .checked_add_signed(shift)
        .ok_or_else(|| ZipError::InvalidArchive(format!("offset {offset} shifted by {shift} is out of range")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_utils::ZipBuilder;
    use pretty_assertions::assert_eq;

    fn write_archive(bytes: &[u8]) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().expect("Test operation should succeed");
        file.write_all(bytes).expect("Test operation should succeed");
        file
    }

    fn sample_builder() -> ZipBuilder {
        ZipBuilder::new()
            .stored("container.description", b"aff4://c0ffee")
            .stored("information.turtle", b"@prefix aff4: <http://aff4.org/Schema#> .")
            .deflated("notes/log.txt", &b"acquired ".repeat(200))
    }

    #[test]
    fn test_open_plain_archive() {
        let file = write_archive(&sample_builder().with_comment("aff4://c0ffee").build());
        let archive = ZipArchive::open(file.path()).expect("Test operation should succeed");

        assert_eq!(archive.entries().len(), 3);
        assert_eq!(archive.global_offset(), 0);
        assert_eq!(archive.comment(), "aff4://c0ffee");

        let entry = archive.entry("notes/log.txt").expect("Test operation should succeed");
        assert_eq!(entry.compression, CompressionMethod::Deflate);
        assert_eq!(entry.uncompressed_size, 1800);
        assert!(entry.compressed_size < entry.uncompressed_size);

        let data = archive.read_entry_data(entry).expect("Test operation should succeed");
        assert_eq!(data, b"acquired ".repeat(200));
    }

    #[test]
    fn test_stored_entry_offsets() {
        let file = write_archive(&sample_builder().build());
        let archive = ZipArchive::open(file.path()).expect("Test operation should succeed");

        let entry = archive.entry("container.description").expect("Test operation should succeed");
        assert_eq!(entry.header_offset, 0);
        assert_eq!(entry.data_offset, 30 + "container.description".len() as u64);

        let mut buf = vec![0u8; entry.uncompressed_size as usize];
        archive
            .file_read(&mut buf, entry.data_offset)
            .expect("Test operation should succeed");
        assert_eq!(buf, b"aff4://c0ffee");
    }

    #[test]
    fn test_zip64_archive() {
        let file = write_archive(&sample_builder().with_zip64(true).build());
        let archive = ZipArchive::open(file.path()).expect("Test operation should succeed");

        assert_eq!(archive.entries().len(), 3);
        let entry = archive.entry("information.turtle").expect("Test operation should succeed");
        let data = archive.read_entry_data(entry).expect("Test operation should succeed");
        assert!(data.starts_with(b"@prefix"));
    }

    #[test]
    fn test_prefixed_archive_applies_global_offset() {
        let prefix = vec![0xAAu8; 1234];
        let plain = write_archive(&sample_builder().build());
        let shifted = write_archive(&sample_builder().with_prefix(prefix.clone()).build());

        let plain = ZipArchive::open(plain.path()).expect("Test operation should succeed");
        let shifted = ZipArchive::open(shifted.path()).expect("Test operation should succeed");

        assert_eq!(shifted.global_offset(), 1234);
        for (a, b) in plain.entries().iter().zip(shifted.entries()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.data_offset + 1234, b.data_offset);
            assert_eq!(
                plain.read_entry_data(a).expect("Test operation should succeed"),
                shifted.read_entry_data(b).expect("Test operation should succeed")
            );
        }
    }

    #[test]
    fn test_prefixed_zip64_archive() {
        let file = write_archive(
            &sample_builder()
                .with_zip64(true)
                .with_prefix(vec![0u8; 77])
                .build(),
        );
        let archive = ZipArchive::open(file.path()).expect("Test operation should succeed");
        assert_eq!(archive.global_offset(), 77);
        let entry = archive.entry("container.description").expect("Test operation should succeed");
        assert_eq!(
            archive.read_entry_data(entry).expect("Test operation should succeed"),
            b"aff4://c0ffee"
        );
    }

    #[test]
    fn test_comment_nul_trimmed() {
        let file = write_archive(&sample_builder().with_comment("aff4://abc\0\0junk").build());
        let archive = ZipArchive::open(file.path()).expect("Test operation should succeed");
        assert_eq!(archive.comment(), "aff4://abc");
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let file = write_archive(
            &ZipBuilder::new()
                .stored("segment", b"first")
                .stored("segment", b"second")
                .build(),
        );
        let archive = ZipArchive::open(file.path()).expect("Test operation should succeed");
        assert_eq!(archive.entries().len(), 2);
        let entry = archive.entry("segment").expect("Test operation should succeed");
        assert_eq!(
            archive.read_entry_data(entry).expect("Test operation should succeed"),
            b"first"
        );
    }

    #[test]
    fn test_not_a_zip() {
        let file = write_archive(&[0x42u8; 8192]);
        assert!(matches!(
            ZipArchive::open(file.path()),
            Err(ZipError::EndOfCentralDirectoryNotFound)
        ));

        let empty = write_archive(&[]);
        assert!(ZipArchive::open(empty.path()).is_err());
    }

    #[test]
    fn test_truncated_central_directory() {
        let mut bytes = sample_builder().build();
        // Drop the first central directory header but keep the end record.
        let eocd = bytes.len() - EndOfCentralDirectory::SIZE;
        let cd_offset = u32::from_le_bytes(bytes[eocd + 16..eocd + 20].try_into().unwrap()) as usize;
        bytes.drain(cd_offset..cd_offset + 10);
        let file = write_archive(&bytes);
        assert!(ZipArchive::open(file.path()).is_err());
    }

    #[test]
    fn test_file_read_clips() {
        let bytes = sample_builder().build();
        let file = write_archive(&bytes);
        let archive = ZipArchive::open(file.path()).expect("Test operation should succeed");

        let mut buf = vec![0u8; 64];
        let offset = archive.file_size() - 10;
        assert_eq!(archive.file_read(&mut buf, offset).expect("Test operation should succeed"), 10);
        assert_eq!(&buf[..10], &bytes[bytes.len() - 10..]);
        assert_eq!(
            archive
                .file_read(&mut buf, archive.file_size() + 5)
                .expect("Test operation should succeed"),
            0
        );
    }

    /// Overwrite the ZIP64 uncompressed size of the only central entry.
    fn patch_declared_size(bytes: &mut [u8], size: u64) {
        let magic = crate::constants::CENTRAL_DIRECTORY_MAGIC.to_le_bytes();
        let header = bytes
            .windows(4)
            .position(|w| w == magic)
            .expect("Test operation should succeed");
        let name_len = u16::from_le_bytes([bytes[header + 28], bytes[header + 29]]) as usize;
        let field = header + CentralDirectoryHeader::SIZE + name_len + 4;
        bytes[field..field + 8].copy_from_slice(&size.to_le_bytes());
    }

    #[test]
    fn test_stored_entry_with_inflated_size_rejected() {
        let mut bytes = ZipBuilder::new()
            .stored("evidence/idx", b"aff4\n")
            .with_zip64(true)
            .build();
        patch_declared_size(&mut bytes, u64::MAX - 1);
        let file = write_archive(&bytes);
        assert!(matches!(
            ZipArchive::open(file.path()),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn test_deflated_entry_with_inflated_size_fails_read() {
        let mut bytes = ZipBuilder::new()
            .deflated("evidence/map", &[7u8; 512])
            .with_zip64(true)
            .build();
        patch_declared_size(&mut bytes, u64::MAX - 1);
        let file = write_archive(&bytes);
        let archive = ZipArchive::open(file.path()).expect("Test operation should succeed");
        let entry = archive.entry("evidence/map").expect("Test operation should succeed");
        assert!(matches!(
            archive.read_entry_data(entry),
            Err(ZipError::EntryTooLarge { .. })
        ));
    }

    #[test]
    fn test_reopen_is_deterministic() {
        let file = write_archive(&sample_builder().with_zip64(true).build());
        let first = ZipArchive::open(file.path()).expect("Test operation should succeed");
        let second = ZipArchive::open(file.path()).expect("Test operation should succeed");
        assert_eq!(first.entries(), second.entries());
    }
}
