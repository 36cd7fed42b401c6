//! Chunk decompressors.
//!
//! Every image stream chunk is compressed on its own, so a codec only ever
//! maps one compressed buffer to at most one chunk's worth of output. The
//! destination is always exactly the stream's chunk size.

use flate2::{Decompress, FlushDecompress, Status};
use std::sync::Arc;

use crate::lexicon::CompressionMethod;
use crate::{Result, StreamError};

/// Decompressor for fixed-size image stream chunks.
pub trait Codec: Send + Sync {
    /// Codec identity.
    fn method(&self) -> CompressionMethod;

    /// Size of one decompressed chunk.
    fn chunk_size(&self) -> u32;

    /// Decompress `source` into `destination`, returning the bytes produced.
    ///
    /// `source` and `destination` are distinct buffers. An error or a result
    /// of zero means the chunk could not be reconstructed.
    fn decompress(&self, source: &[u8], destination: &mut [u8]) -> Result<usize>;
}

/// Build the codec for a method.
pub fn codec_for(method: CompressionMethod, chunk_size: u32) -> Arc<dyn Codec> {
    match method {
        CompressionMethod::Stored => Arc::new(NullCodec { chunk_size }),
        CompressionMethod::Deflate => Arc::new(DeflateCodec {
            chunk_size,
            zlib_header: false,
        }),
        CompressionMethod::Zlib => Arc::new(DeflateCodec {
            chunk_size,
            zlib_header: true,
        }),
        CompressionMethod::Snappy => Arc::new(SnappyCodec { chunk_size }),
        CompressionMethod::Lz4 => Arc::new(Lz4Codec { chunk_size }),
    }
}

/// Build the codec named by a URI. Unknown URIs yield `None`.
pub fn codec_for_uri(uri: &str, chunk_size: u32) -> Option<Arc<dyn Codec>> {
    CompressionMethod::from_uri(uri).map(|method| codec_for(method, chunk_size))
}

/// Pass-through codec for stored chunks.
#[derive(Debug)]
pub struct NullCodec {
    chunk_size: u32,
}

impl Codec for NullCodec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Stored
    }

    fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn decompress(&self, source: &[u8], destination: &mut [u8]) -> Result<usize> {
        let count = source.len().min(destination.len());
        destination[..count].copy_from_slice(&source[..count]);
        Ok(count)
    }
}

/// Deflate codec, raw or zlib-wrapped.
#[derive(Debug)]
pub struct DeflateCodec {
    chunk_size: u32,
    zlib_header: bool,
}

impl Codec for DeflateCodec {
    fn method(&self) -> CompressionMethod {
        if self.zlib_header {
            CompressionMethod::Zlib
        } else {
            CompressionMethod::Deflate
        }
    }

    fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn decompress(&self, source: &[u8], destination: &mut [u8]) -> Result<usize> {
        let mut inflater = Decompress::new(self.zlib_header);
        let status = inflater
            .decompress(source, destination, FlushDecompress::Finish)
            .map_err(|e| StreamError::Decompression(format!("{}: {e}", self.method())))?;
        let produced = usize::try_from(inflater.total_out()).unwrap_or(0);
        match status {
            Status::StreamEnd => Ok(produced),
            // Output full: the chunk is complete even if the trailer was not consumed.
            Status::Ok | Status::BufError if produced == destination.len() => Ok(produced),
            Status::Ok | Status::BufError => Err(StreamError::Decompression(format!(
                "{}: truncated input, {produced} of {} bytes",
                self.method(),
                destination.len()
            ))),
        }
    }
}

/// Snappy raw-format codec.
#[derive(Debug)]
pub struct SnappyCodec {
    chunk_size: u32,
}

impl Codec for SnappyCodec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Snappy
    }

    fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn decompress(&self, source: &[u8], destination: &mut [u8]) -> Result<usize> {
        snap::raw::Decoder::new()
            .decompress(source, destination)
            .map_err(|e| StreamError::Decompression(format!("snappy: {e}")))
    }
}

/// LZ4 block-format codec.
#[derive(Debug)]
pub struct Lz4Codec {
    chunk_size: u32,
}

impl Codec for Lz4Codec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Lz4
    }

    fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn decompress(&self, source: &[u8], destination: &mut [u8]) -> Result<usize> {
        lz4_flex::block::decompress_into(source, destination)
            .map_err(|e| StreamError::Decompression(format!("lz4: {e}")))
    }
}
