//! Entropy-coder dispatch. Codecs are opaque `{compress, decompress}`
//! functions over byte buffers; everything format-specific lives in the
//! container headers.

use std::io::{Read, Write};

use crate::container::{DataContainer, checksum};
use crate::error::{Error, Result};

/// Wire ids of the supported coders. An id the reader does not recognize
/// fails the block with [`Error::FormatUnsupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Codec {
    None,
    Deflate,
    Brotli,
}
impl Default for Codec {
    fn default() -> Self {
        Codec::Deflate
    }
}
impl Codec {
    pub fn id(self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::Deflate => 1,
            Codec::Brotli => 2,
        }
    }
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            0 => Codec::None,
            1 => Codec::Deflate,
            2 => Codec::Brotli,
            _ => return Err(Error::FormatUnsupported(format!("encoder id {id}"))),
        })
    }

    /// Compress `bytes` at `level`; levels clamp to the codec's own range.
    pub fn compress(self, bytes: &[u8], level: u32) -> Result<Vec<u8>> {
        Ok(match self {
            Codec::None => bytes.to_vec(),
            Codec::Deflate => {
                let level = flate2::Compression::new(level.clamp(1, 9));
                let mut enc = flate2::write::DeflateEncoder::new(
                    Vec::with_capacity(bytes.len() / 2 + 16),
                    level,
                );
                enc.write_all(bytes)?;
                enc.finish()?
            }
            Codec::Brotli => {
                let params = brotli::enc::BrotliEncoderParams {
                    quality: level.clamp(1, 11) as i32,
                    ..Default::default()
                };
                let mut out = Vec::with_capacity(bytes.len() / 2 + 16);
                brotli::BrotliCompress(&mut &bytes[..], &mut out, &params)?;
                out
            }
        })
    }

    pub fn decompress(self, bytes: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        Ok(match self {
            Codec::None => bytes.to_vec(),
            Codec::Deflate => {
                let mut out = Vec::with_capacity(expected_len);
                flate2::read::DeflateDecoder::new(bytes).read_to_end(&mut out)?;
                out
            }
            Codec::Brotli => {
                let mut out = Vec::with_capacity(expected_len);
                brotli::BrotliDecompress(&mut &bytes[..], &mut out)?;
                out
            }
        })
    }
}

/// Per-container codec dispatch: compresses data and stride buffers
/// independently and fills in the segment headers.
#[derive(Debug, Clone, Copy)]
pub struct CompressionManager {
    pub codec: Codec,
    pub level: u32,
}
impl CompressionManager {
    pub fn new(codec: Codec, level: u32) -> Self {
        Self { codec, level }
    }

    /// Compress a standalone buffer, falling back to raw storage when the
    /// coded form is not smaller. Returns the encoder id actually used.
    pub fn compress_buffer(&self, bytes: &[u8]) -> Result<(u8, Vec<u8>)> {
        let coded = self.codec.compress(bytes, self.level)?;
        if coded.len() < bytes.len() {
            Ok((self.codec.id(), coded))
        } else {
            Ok((Codec::None.id(), bytes.to_vec()))
        }
    }

    /// Compress a finalized container in place. Uniform containers skip
    /// compression of the data buffer but still populate both lengths.
    pub fn compress_container(&self, container: &mut DataContainer) -> Result<()> {
        debug_assert!(!container.compressed);

        let u_length = container.data.len() as u32;
        if container.header.uniform {
            container.header.data.encoder = Codec::None.id();
            container.header.data.u_length = u_length;
            container.header.data.c_length = u_length;
        } else {
            let (encoder, coded) = self.compress_buffer(&container.data)?;
            container.header.data.encoder = encoder;
            container.header.data.u_length = u_length;
            container.header.data.c_length = coded.len() as u32;
            container.data = coded;
        }

        if container.header.mixed_stride {
            let u_length = container.strides.len() as u32;
            let (encoder, coded) = self.compress_buffer(&container.strides)?;
            container.header.strides.encoder = encoder;
            container.header.strides.u_length = u_length;
            container.header.strides.c_length = coded.len() as u32;
            container.strides = coded;
        }

        container.compressed = true;
        Ok(())
    }
}

/// Inverse of [`CompressionManager::compress_container`]: restores the
/// uncompressed buffers and verifies the recorded checksums.
pub fn decompress_container(container: &mut DataContainer, context: &str) -> Result<()> {
    debug_assert!(container.compressed);

    // A coder failing on in-memory bytes is an integrity failure.
    let codec = Codec::from_id(container.header.data.encoder)?;
    let data = codec
        .decompress(&container.data, container.header.data.u_length as usize)
        .map_err(|e| match e {
            Error::FormatUnsupported(_) => e,
            _ => Error::checksum(context),
        })?;
    if data.len() != container.header.data.u_length as usize
        || checksum(&data) != container.header.data.checksum
    {
        return Err(Error::checksum(context));
    }
    container.data = data;

    if container.header.mixed_stride {
        let codec = Codec::from_id(container.header.strides.encoder)?;
        let strides = codec
            .decompress(&container.strides, container.header.strides.u_length as usize)
            .map_err(|e| match e {
                Error::FormatUnsupported(_) => e,
                _ => Error::checksum(context),
            })?;
        if strides.len() != container.header.strides.u_length as usize
            || checksum(&strides) != container.header.strides.checksum
        {
            return Err(Error::checksum(context));
        }
        container.strides = strides;
    }

    container.compressed = false;
    container.expand_uniform();
    Ok(())
}
