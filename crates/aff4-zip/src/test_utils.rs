//! Archive builder for synthetic test containers.
//!
//! Produces byte-exact ZIP files with stored or deflated entries, optional
//! ZIP64 records, leading junk (to exercise the global offset correction)
//! and a trailing comment. Only available in tests or with the
//! `test-utils` feature.

use binrw::BinWriterExt;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::{Cursor, Write};
use std::path::Path;

use crate::constants::{ZIP64_EXTRA_FIELD_ID, ZIP64_SENTINEL_16, ZIP64_SENTINEL_32};
use crate::records::{
    CentralDirectoryHeader, DataDescriptor64, EndOfCentralDirectory, LocalFileHeader,
    Zip64EndOfCentralDirectory, Zip64Locator,
};

struct PendingEntry {
    name: String,
    payload: Vec<u8>,
    uncompressed_size: u64,
    crc32: u32,
    method: u16,
}

/// Builder for in-memory ZIP archives.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<PendingEntry>,
    prefix: Vec<u8>,
    comment: Vec<u8>,
    zip64: bool,
    descriptor_first: bool,
}

impl ZipBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry stored without compression.
    #[must_use]
    pub fn stored(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push(PendingEntry {
            name: name.to_string(),
            payload: data.to_vec(),
            uncompressed_size: data.len() as u64,
            crc32: crc32(data),
            method: 0,
        });
        self
    }

    /// Add an entry compressed with raw deflate.
    #[must_use]
    pub fn deflated(mut self, name: &str, data: &[u8]) -> Self {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        // Writing into a Vec cannot fail.
        let payload = encoder
            .write_all(data)
            .and_then(|()| encoder.finish())
            .unwrap_or_default();
        self.entries.push(PendingEntry {
            name: name.to_string(),
            payload,
            uncompressed_size: data.len() as u64,
            crc32: crc32(data),
            method: 8,
        });
        self
    }

    /// Bytes written before the archive proper.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Vec<u8>) -> Self {
        self.prefix = prefix;
        self
    }

    /// Archive comment written after the end record.
    #[must_use]
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    /// Emit ZIP64 extra fields and end records with 32-bit sentinels.
    #[must_use]
    pub const fn with_zip64(mut self, zip64: bool) -> Self {
        self.zip64 = zip64;
        self
    }

    /// Write the first entry's sizes only in a ZIP64 data descriptor.
    ///
    /// The first local header then carries sentinel sizes without a ZIP64
    /// extra field, the layout some streaming writers produce.
    #[must_use]
    pub const fn with_descriptor_first(mut self, descriptor_first: bool) -> Self {
        self.descriptor_first = descriptor_first;
        self
    }

    /// Serialize the archive.
    #[allow(clippy::expect_used)] // Writing into an in-memory cursor cannot fail
    pub fn build(&self) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        let mut offsets = Vec::with_capacity(self.entries.len());

        for (index, entry) in self.entries.iter().enumerate() {
            offsets.push(out.position());
            let descriptor = self.descriptor_first && index == 0;
            let local_extra = if self.zip64 && !descriptor {
                zip64_extra(&[entry.uncompressed_size, entry.payload.len() as u64])
            } else {
                Vec::new()
            };
            let sentinel_sizes = self.zip64 || descriptor;
            out.write_le(&LocalFileHeader {
                version_needed: if sentinel_sizes { 45 } else { 20 },
                flags: if descriptor { 0x8 } else { 0 },
                compression_method: entry.method,
                last_modified_time: 0,
                last_modified_date: 0x21,
                crc32: entry.crc32,
                compressed_size: if sentinel_sizes {
                    ZIP64_SENTINEL_32
                } else {
                    entry.payload.len() as u32
                },
                uncompressed_size: if sentinel_sizes {
                    ZIP64_SENTINEL_32
                } else {
                    entry.uncompressed_size as u32
                },
                name_length: entry.name.len() as u16,
                extra_length: local_extra.len() as u16,
            })
            .expect("in-memory write");
            out.write_all(entry.name.as_bytes()).expect("in-memory write");
            out.write_all(&local_extra).expect("in-memory write");
            out.write_all(&entry.payload).expect("in-memory write");
            if descriptor {
                out.write_le(&DataDescriptor64 {
                    crc32: entry.crc32,
                    compressed_size: entry.payload.len() as u64,
                    uncompressed_size: entry.uncompressed_size,
                })
                .expect("in-memory write");
            }
        }

        let directory_offset = out.position();
        for (entry, &offset) in self.entries.iter().zip(&offsets) {
            let central_extra = if self.zip64 {
                zip64_extra(&[entry.uncompressed_size, entry.payload.len() as u64, offset])
            } else {
                Vec::new()
            };
            out.write_le(&CentralDirectoryHeader {
                version_made_by: 0x031e,
                version_needed: if self.zip64 { 45 } else { 20 },
                flags: 0,
                compression_method: entry.method,
                last_modified_time: 0,
                last_modified_date: 0x21,
                crc32: entry.crc32,
                compressed_size: if self.zip64 {
                    ZIP64_SENTINEL_32
                } else {
                    entry.payload.len() as u32
                },
                uncompressed_size: if self.zip64 {
                    ZIP64_SENTINEL_32
                } else {
                    entry.uncompressed_size as u32
                },
                name_length: entry.name.len() as u16,
                extra_length: central_extra.len() as u16,
                comment_length: 0,
                disk_number_start: 0,
                internal_attributes: 0,
                external_attributes: 0o644 << 16,
                local_header_offset: if self.zip64 {
                    ZIP64_SENTINEL_32
                } else {
                    offset as u32
                },
            })
            .expect("in-memory write");
            out.write_all(entry.name.as_bytes()).expect("in-memory write");
            out.write_all(&central_extra).expect("in-memory write");
        }
        let directory_size = out.position() - directory_offset;
        let count = self.entries.len() as u64;

        if self.zip64 {
            let end_offset = out.position();
            out.write_le(&Zip64EndOfCentralDirectory {
                record_size: (Zip64EndOfCentralDirectory::SIZE - 12) as u64,
                version_made_by: 45,
                version_needed: 45,
                disk_number: 0,
                disk_with_central_directory: 0,
                entries_on_disk: count,
                total_entries: count,
                central_directory_size: directory_size,
                central_directory_offset: directory_offset,
            })
            .expect("in-memory write");
            out.write_le(&Zip64Locator {
                disk_with_end_record: 0,
                end_record_offset: end_offset,
                total_disks: 1,
            })
            .expect("in-memory write");
        }

        out.write_le(&EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_disk: if self.zip64 { ZIP64_SENTINEL_16 } else { count as u16 },
            total_entries: if self.zip64 { ZIP64_SENTINEL_16 } else { count as u16 },
            central_directory_size: if self.zip64 {
                ZIP64_SENTINEL_32
            } else {
                directory_size as u32
            },
            central_directory_offset: if self.zip64 {
                ZIP64_SENTINEL_32
            } else {
                directory_offset as u32
            },
            comment_length: self.comment.len() as u16,
        })
        .expect("in-memory write");
        out.write_all(&self.comment).expect("in-memory write");

        let mut bytes = self.prefix.clone();
        bytes.extend_from_slice(out.get_ref());
        bytes
    }

    /// Serialize the archive to a file.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }
}

fn zip64_extra(values: &[u64]) -> Vec<u8> {
    let mut extra = Vec::with_capacity(4 + values.len() * 8);
    extra.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
    extra.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
    for value in values {
        extra.extend_from_slice(&value.to_le_bytes());
    }
    extra
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}
