use std::io::{self, Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};

/// Primitive form of the values in a container. Width promotion during
/// ingestion and narrowing at finalize are explicit buffer rewrites between
/// these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PrimitiveType {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    U8 = 4,
    U16 = 5,
    U32 = 6,
    U64 = 7,
    F32 = 8,
    F64 = 9,
    Char = 10,
    Bool = 11,
}
impl PrimitiveType {
    pub fn width(self) -> usize {
        match self {
            PrimitiveType::I8 | PrimitiveType::U8 | PrimitiveType::Char | PrimitiveType::Bool => 1,
            PrimitiveType::I16 | PrimitiveType::U16 => 2,
            PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::I64 | PrimitiveType::U64 | PrimitiveType::F64 => 8,
        }
    }
    pub fn is_int(self) -> bool {
        matches!(
            self,
            PrimitiveType::I8
                | PrimitiveType::I16
                | PrimitiveType::I32
                | PrimitiveType::I64
                | PrimitiveType::U8
                | PrimitiveType::U16
                | PrimitiveType::U32
                | PrimitiveType::U64
        )
    }
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64
        )
    }
    pub fn from_code(code: u8) -> io::Result<Self> {
        Ok(match code {
            0 => PrimitiveType::I8,
            1 => PrimitiveType::I16,
            2 => PrimitiveType::I32,
            3 => PrimitiveType::I64,
            4 => PrimitiveType::U8,
            5 => PrimitiveType::U16,
            6 => PrimitiveType::U32,
            7 => PrimitiveType::U64,
            8 => PrimitiveType::F32,
            9 => PrimitiveType::F64,
            10 => PrimitiveType::Char,
            11 => PrimitiveType::Bool,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown primitive type code {code}"),
                ));
            }
        })
    }
    /// Narrowest integer type holding every value in `[min, max]`.
    pub fn for_int_range(min: i64, max: i64) -> Self {
        if min < 0 {
            match (min, max) {
                _ if min >= i8::MIN as i64 && max <= i8::MAX as i64 => PrimitiveType::I8,
                _ if min >= i16::MIN as i64 && max <= i16::MAX as i64 => PrimitiveType::I16,
                _ if min >= i32::MIN as i64 && max <= i32::MAX as i64 => PrimitiveType::I32,
                _ => PrimitiveType::I64,
            }
        } else {
            match max {
                _ if max <= u8::MAX as i64 => PrimitiveType::U8,
                _ if max <= u16::MAX as i64 => PrimitiveType::U16,
                _ if max <= u32::MAX as i64 => PrimitiveType::U32,
                _ => PrimitiveType::U64,
            }
        }
    }
}

/// Compression state of one byte stream (a container's data or strides).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Encoder id; 0 is uncompressed. Unknown ids fail the block on read.
    pub encoder: u8,
    /// Byte offset of the segment within the block body.
    pub offset: u32,
    pub c_length: u32,
    pub u_length: u32,
    /// xxh3 of the uncompressed bytes.
    pub checksum: u64,
}
impl SegmentHeader {
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u8(self.encoder)?;
        w.write_u32::<LE>(self.offset)?;
        w.write_u32::<LE>(self.c_length)?;
        w.write_u32::<LE>(self.u_length)?;
        w.write_u64::<LE>(self.checksum)
    }
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            encoder: r.read_u8()?,
            offset: r.read_u32::<LE>()?,
            c_length: r.read_u32::<LE>()?,
            u_length: r.read_u32::<LE>()?,
            checksum: r.read_u64::<LE>()?,
        })
    }
}

const CTRL_SIGNED: u16 = 1 << 0;
const CTRL_MIXED_STRIDE: u16 = 1 << 1;
const CTRL_UNIFORM: u16 = 1 << 2;
const CTRL_TYPE_SHIFT: u16 = 3; // 4 bits

/// Self-describing header of one container; serialized into the block
/// footer.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHeader {
    pub primitive: PrimitiveType,
    pub signed: bool,
    pub mixed_stride: bool,
    pub uniform: bool,
    /// Fixed stride, or -1 when per-record strides are in the stride buffer.
    pub stride: i32,
    /// Key into the global schema for INFO/FORMAT containers, -1 for base
    /// columns.
    pub global_key: i32,
    /// Primitive elements appended.
    pub n_entries: u32,
    /// Logical records appended.
    pub n_additions: u32,
    pub data: SegmentHeader,
    /// Meaningful only when `mixed_stride`.
    pub stride_primitive: PrimitiveType,
    pub strides: SegmentHeader,
}
impl Default for ContainerHeader {
    fn default() -> Self {
        Self {
            primitive: PrimitiveType::U8,
            signed: false,
            mixed_stride: false,
            uniform: false,
            stride: -1,
            global_key: -1,
            n_entries: 0,
            n_additions: 0,
            data: SegmentHeader::default(),
            stride_primitive: PrimitiveType::U32,
            strides: SegmentHeader::default(),
        }
    }
}
impl ContainerHeader {
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        let mut controller = (self.primitive as u16) << CTRL_TYPE_SHIFT;
        if self.signed {
            controller |= CTRL_SIGNED;
        }
        if self.mixed_stride {
            controller |= CTRL_MIXED_STRIDE;
        }
        if self.uniform {
            controller |= CTRL_UNIFORM;
        }
        w.write_u16::<LE>(controller)?;
        w.write_i32::<LE>(self.stride)?;
        w.write_i32::<LE>(self.global_key)?;
        w.write_u32::<LE>(self.n_entries)?;
        w.write_u32::<LE>(self.n_additions)?;
        self.data.write(w)?;
        if self.mixed_stride {
            w.write_u8(self.stride_primitive as u8)?;
            self.strides.write(w)?;
        }
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let controller = r.read_u16::<LE>()?;
        let mut header = Self {
            primitive: PrimitiveType::from_code((controller >> CTRL_TYPE_SHIFT) as u8 & 0x0f)?,
            signed: controller & CTRL_SIGNED != 0,
            mixed_stride: controller & CTRL_MIXED_STRIDE != 0,
            uniform: controller & CTRL_UNIFORM != 0,
            stride: r.read_i32::<LE>()?,
            global_key: r.read_i32::<LE>()?,
            n_entries: r.read_u32::<LE>()?,
            n_additions: r.read_u32::<LE>()?,
            data: SegmentHeader::read(r)?,
            ..Self::default()
        };
        if header.mixed_stride {
            header.stride_primitive = PrimitiveType::from_code(r.read_u8()?)?;
            header.strides = SegmentHeader::read(r)?;
        }
        Ok(header)
    }
}
