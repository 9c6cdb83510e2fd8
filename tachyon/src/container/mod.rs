//! Type-erased append log of homogeneous values with optional per-record
//! stride, the unit of compression inside a block.

mod header;

use std::io;

use byteorder::{ByteOrder, LE};
use xxhash_rust::xxh3::xxh3_64;

pub use header::{ContainerHeader, PrimitiveType, SegmentHeader};

pub fn checksum(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

/// A typed byte buffer plus a parallel stride buffer and the header that
/// describes both on disk.
///
/// Values are appended at the current primitive width; a value that does not
/// fit promotes the whole buffer to a wider primitive. `finalize` runs the
/// inverse narrowing, the uniform-value collapse, and the checksum pass, in
/// that order, after which the container is immutable.
#[derive(Debug, Clone, Default)]
pub struct DataContainer {
    pub header: ContainerHeader,
    pub data: Vec<u8>,
    pub strides: Vec<u8>,
    /// Whether `data`/`strides` currently hold compressed bytes.
    pub compressed: bool,

    int_min: i64,
    int_max: i64,
    typed: bool,
}

impl DataContainer {
    pub fn with_key(global_key: i32) -> Self {
        Self {
            header: ContainerHeader {
                global_key,
                ..ContainerHeader::default()
            },
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.n_additions == 0 && self.data.is_empty()
    }
    pub fn n_entries(&self) -> u32 {
        self.header.n_entries
    }
    pub fn n_additions(&self) -> u32 {
        self.header.n_additions
    }

    fn set_type(&mut self, ty: PrimitiveType) {
        if !self.typed {
            self.header.primitive = ty;
            self.header.signed = ty.is_signed();
            if ty.is_int() {
                self.int_min = i64::MAX;
                self.int_max = i64::MIN;
            }
            self.typed = true;
        } else {
            debug_assert_eq!(
                self.header.primitive.is_int(),
                ty.is_int(),
                "value type inconsistent with column"
            );
            debug_assert!(self.header.primitive.is_int() || self.header.primitive == ty);
        }
    }

    /// Append one integer, promoting the buffer if the value does not fit
    /// the current primitive.
    pub fn add_int(&mut self, value: i64) {
        if !self.typed {
            self.set_type(PrimitiveType::for_int_range(value, value));
        }
        debug_assert!(self.header.primitive.is_int());
        self.int_min = self.int_min.min(value);
        self.int_max = self.int_max.max(value);
        let needed = PrimitiveType::for_int_range(self.int_min, self.int_max);
        if needed != self.header.primitive {
            self.rewrite_ints(needed);
        }
        let mut scratch = [0u8; 8];
        write_int(&mut scratch, value, self.header.primitive);
        self.data
            .extend_from_slice(&scratch[..self.header.primitive.width()]);
        self.header.n_entries += 1;
    }

    pub fn add_u32(&mut self, value: u32) {
        self.add_int(value as i64);
    }

    pub fn add_f32_bits(&mut self, bits: u32) {
        self.set_type(PrimitiveType::F32);
        self.data.extend_from_slice(&bits.to_le_bytes());
        self.header.n_entries += 1;
    }

    pub fn add_f64_bits(&mut self, bits: u64) {
        self.set_type(PrimitiveType::F64);
        self.data.extend_from_slice(&bits.to_le_bytes());
        self.header.n_entries += 1;
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.set_type(PrimitiveType::Char);
        self.data.extend_from_slice(bytes);
        self.header.n_entries += bytes.len() as u32;
    }

    /// Presence-only column: typed, but no payload per element.
    pub fn mark_flag(&mut self) {
        self.set_type(PrimitiveType::Bool);
    }

    /// Close out one logical record worth of appends.
    pub fn add_stride(&mut self, stride: u32) {
        if self.header.n_additions == 0 {
            self.header.stride = stride as i32;
        } else if !self.header.mixed_stride && self.header.stride != stride as i32 {
            self.header.mixed_stride = true;
        }
        let mut scratch = [0u8; 4];
        LE::write_u32(&mut scratch, stride);
        self.strides.extend_from_slice(&scratch);
        self.header.n_additions += 1;
    }

    fn rewrite_ints(&mut self, to: PrimitiveType) {
        let from = self.header.primitive;
        if from.width() != to.width() {
            let old = std::mem::take(&mut self.data);
            let width = from.width();
            self.data = Vec::with_capacity(old.len() / width * to.width());
            let mut scratch = [0u8; 8];
            for chunk in old.chunks_exact(width) {
                let v = read_int(chunk, from);
                write_int(&mut scratch, v, to);
                self.data.extend_from_slice(&scratch[..to.width()]);
            }
        }
        self.header.primitive = to;
        self.header.signed = to.is_signed();
    }

    /// Narrow integers to the smallest primitive holding the observed range,
    /// and the stride buffer to the smallest primitive holding the largest
    /// stride.
    pub fn finalize_primitive(&mut self) {
        if self.typed && self.header.primitive.is_int() && self.header.n_entries > 0 {
            let needed = PrimitiveType::for_int_range(self.int_min, self.int_max);
            if needed != self.header.primitive {
                self.rewrite_ints(needed);
            }
        }

        if !self.header.mixed_stride {
            // Fixed stride lives in the header; the buffer is redundant.
            self.strides.clear();
            return;
        }
        self.header.stride = -1;
        let max = self
            .strides
            .chunks_exact(4)
            .map(LE::read_u32)
            .max()
            .unwrap_or(0);
        let narrow = PrimitiveType::for_int_range(0, max as i64);
        if narrow.width() < 4 {
            let old = std::mem::take(&mut self.strides);
            self.strides = Vec::with_capacity(old.len() / 4 * narrow.width());
            let mut scratch = [0u8; 8];
            for chunk in old.chunks_exact(4) {
                LE::write_uint(&mut scratch, LE::read_u32(chunk) as u64, narrow.width());
                self.strides.extend_from_slice(&scratch[..narrow.width()]);
            }
        }
        self.header.stride_primitive = narrow;
    }

    /// Collapse the buffer to a single element when every logical element is
    /// byte-identical. Detection hashes each stride-sized window.
    pub fn finalize_uniformity(&mut self) {
        if self.header.mixed_stride || self.header.stride < 1 || self.header.n_additions < 2 {
            return;
        }
        let window = self.header.stride as usize * self.header.primitive.width();
        // Containers with out-of-band layouts (length-prefixed entries) do
        // not cover the buffer with stride windows; leave those alone.
        if window == 0 || self.data.len() != window * self.header.n_additions as usize {
            return;
        }
        let first = xxh3_64(&self.data[..window]);
        for chunk in self.data.chunks_exact(window).skip(1) {
            if xxh3_64(chunk) != first {
                return;
            }
        }
        self.data.truncate(window);
        self.header.uniform = true;
    }

    /// Record the checksums of the (uncompressed) data and stride buffers.
    pub fn set_checksums(&mut self) {
        debug_assert!(!self.compressed);
        self.header.data.checksum = checksum(&self.data);
        if !self.strides.is_empty() {
            self.header.strides.checksum = checksum(&self.strides);
        }
    }

    /// Undo the uniform collapse after decompression so cursors see one
    /// window per logical record.
    pub fn expand_uniform(&mut self) {
        if !self.header.uniform || self.header.n_additions <= 1 {
            return;
        }
        let window = self.data.clone();
        let mut expanded = Vec::with_capacity(window.len() * self.header.n_additions as usize);
        for _ in 0..self.header.n_additions {
            expanded.extend_from_slice(&window);
        }
        self.data = expanded;
    }

    pub fn values(&self) -> ValueCursor<'_> {
        debug_assert!(!self.compressed);
        ValueCursor {
            data: &self.data,
            pos: 0,
            primitive: self.header.primitive,
        }
    }

    pub fn stride_of(&self, record: usize) -> u32 {
        if !self.header.mixed_stride {
            return self.header.stride.max(0) as u32;
        }
        let width = self.header.stride_primitive.width();
        let at = record * width;
        LE::read_uint(&self.strides[at..at + width], width) as u32
    }
}

fn read_int(bytes: &[u8], ty: PrimitiveType) -> i64 {
    if ty.is_signed() {
        LE::read_int(bytes, ty.width())
    } else {
        LE::read_uint(bytes, ty.width()) as i64
    }
}

fn write_int(scratch: &mut [u8; 8], value: i64, ty: PrimitiveType) {
    if ty.is_signed() {
        LE::write_int(scratch, value, ty.width());
    } else {
        LE::write_uint(scratch, value as u64, ty.width());
    }
}

/// Forward reader over a decompressed (and uniform-expanded) data buffer.
#[derive(Debug, Clone)]
pub struct ValueCursor<'a> {
    data: &'a [u8],
    pos: usize,
    primitive: PrimitiveType,
}
impl<'a> ValueCursor<'a> {
    pub fn read_int(&mut self) -> io::Result<i64> {
        let width = self.primitive.width();
        let bytes = self.take(width)?;
        Ok(read_int(bytes, self.primitive))
    }
    pub fn read_f32_bits(&mut self) -> io::Result<u32> {
        Ok(LE::read_u32(self.take(4)?))
    }
    pub fn read_f64_bits(&mut self) -> io::Result<u64> {
        Ok(LE::read_u64(self.take(8)?))
    }
    pub fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "container data exhausted",
            ));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }
}
