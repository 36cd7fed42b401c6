//! Positioned access to the archive file.
//!
//! Archives below [`MMAP_LIMIT`](crate::constants::MMAP_LIMIT) are memory
//! mapped; larger files, or files that fail to map, fall back to
//! offset-explicit reads on the file handle. Neither path keeps a shared
//! cursor, so concurrent reads need no locking.

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::debug;

use crate::constants::MMAP_LIMIT;

pub(crate) enum FileSource {
    Mapped(Mmap),
    File(File),
    Empty,
}

impl FileSource {
    pub(crate) fn open(path: &Path) -> io::Result<(Self, u64)> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        debug!("Opening archive: {:?} (size: {} bytes)", path, size);

        if size == 0 {
            return Ok((Self::Empty, 0));
        }
        if size < MMAP_LIMIT {
            // SAFETY: the mapping is read-only and lives as long as the source.
            #[allow(unsafe_code)]
            let mapped = unsafe { MmapOptions::new().map(&file) };
            match mapped {
                Ok(mmap) => {
                    debug!("Memory-mapped archive {:?}", path);
                    return Ok((Self::Mapped(mmap), size));
                }
                Err(e) => {
                    debug!("Failed to memory-map archive, using positioned reads: {}", e);
                }
            }
        }
        Ok((Self::File(file), size))
    }

    /// Read up to `buf.len()` bytes at `offset`, stopping early only at EOF.
    pub(crate) fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match self {
            Self::Empty => Ok(0),
            Self::Mapped(mmap) => {
                let Ok(start) = usize::try_from(offset) else {
                    return Ok(0);
                };
                if start >= mmap.len() {
                    return Ok(0);
                }
                let count = buf.len().min(mmap.len() - start);
                buf[..count].copy_from_slice(&mmap[start..start + count]);
                Ok(count)
            }
            Self::File(file) => {
                let mut filled = 0usize;
                while filled < buf.len() {
                    match positioned_read(file, &mut buf[filled..], offset + filled as u64) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(filled)
            }
        }
    }
}

#[cfg(unix)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mapped_read_clips_at_end() {
        let mut file = tempfile::NamedTempFile::new().expect("Test operation should succeed");
        file.write_all(b"0123456789")
            .expect("Test operation should succeed");

        let (source, size) = FileSource::open(file.path()).expect("Test operation should succeed");
        assert_eq!(size, 10);

        let mut buf = [0u8; 4];
        assert_eq!(source.read_at(&mut buf, 8).expect("Test operation should succeed"), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(source.read_at(&mut buf, 10).expect("Test operation should succeed"), 0);
    }

    #[test]
    fn test_file_fallback_matches_mapping() {
        let mut file = tempfile::NamedTempFile::new().expect("Test operation should succeed");
        file.write_all(b"abcdefgh")
            .expect("Test operation should succeed");

        let source = FileSource::File(File::open(file.path()).expect("Test operation should succeed"));
        let mut buf = [0u8; 16];
        let n = source.read_at(&mut buf, 3).expect("Test operation should succeed");
        assert_eq!(&buf[..n], b"defgh");
    }

    #[test]
    fn test_empty_file() {
        let file = tempfile::NamedTempFile::new().expect("Test operation should succeed");
        let (source, size) = FileSource::open(file.path()).expect("Test operation should succeed");
        assert_eq!(size, 0);
        let mut buf = [0u8; 4];
        assert_eq!(source.read_at(&mut buf, 0).expect("Test operation should succeed"), 0);
    }
}
