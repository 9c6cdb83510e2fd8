//! The variant block: a contiguous group of same-contig records sharing one
//! permutation array, the unit of compression, addressing and recovery.

mod builder;
mod decoded;
mod footer;

use std::io::{self, Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};

pub use builder::{BlockBuilder, FinishedBlock, QUALITY_MISSING_BITS};
pub use decoded::DecodedBlock;
pub use footer::{BlockFooter, Pattern, PatternTable};

/// Nibble codes of the packed ref/alt alphabet.
pub(crate) fn pack_allele_nibble(allele: &[u8]) -> Option<u8> {
    match allele {
        b"A" => Some(0),
        b"C" => Some(1),
        b"G" => Some(2),
        b"T" => Some(3),
        b"N" => Some(4),
        b"<NON_REF>" => Some(5),
        _ => None,
    }
}
pub(crate) fn allele_from_nibble(nibble: u8) -> Option<&'static [u8]> {
    Some(match nibble {
        0 => b"A",
        1 => b"C",
        2 => b"G",
        3 => b"T",
        4 => b"N",
        5 => b"<NON_REF>",
        _ => return None,
    })
}

use crate::codec::{Codec, CompressionManager};
use crate::container::DataContainer;
use crate::error::{Error, Result};
use crate::genotype::{GtFamily, GtWidth};

/// Fixed 8-byte terminator of every block; readers verify it.
pub const BLOCK_SENTINEL: u64 = 0x4e4f_5948_4341_5421; // "!TACHYON", little-endian

/// Frozen order of the base containers inside a block. Containers marked
/// empty in the footer's presence bitmap are omitted from the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BaseSlot {
    Contig = 0,
    Position,
    RefAlt,
    Controller,
    Quality,
    Names,
    Alleles,
    IdFilter,
    IdFormat,
    IdInfo,
    GtPloidy,
    Gt8,
    Gt16,
    Gt32,
    Gt64,
    GtS8,
    GtS16,
    GtS32,
    GtS64,
    GtN8,
    GtN16,
    GtN32,
    GtN64,
    GtSupport,
}
pub const N_BASE_SLOTS: usize = 24;

impl BaseSlot {
    pub const ALL: [BaseSlot; N_BASE_SLOTS] = [
        BaseSlot::Contig,
        BaseSlot::Position,
        BaseSlot::RefAlt,
        BaseSlot::Controller,
        BaseSlot::Quality,
        BaseSlot::Names,
        BaseSlot::Alleles,
        BaseSlot::IdFilter,
        BaseSlot::IdFormat,
        BaseSlot::IdInfo,
        BaseSlot::GtPloidy,
        BaseSlot::Gt8,
        BaseSlot::Gt16,
        BaseSlot::Gt32,
        BaseSlot::Gt64,
        BaseSlot::GtS8,
        BaseSlot::GtS16,
        BaseSlot::GtS32,
        BaseSlot::GtS64,
        BaseSlot::GtN8,
        BaseSlot::GtN16,
        BaseSlot::GtN32,
        BaseSlot::GtN64,
        BaseSlot::GtSupport,
    ];

    /// Stream a `(family, width)` pair encodes into.
    pub fn for_genotypes(family: GtFamily, width: GtWidth) -> BaseSlot {
        let base = match family {
            GtFamily::DiploidBiallelic => BaseSlot::Gt8 as usize,
            GtFamily::DiploidNallelic | GtFamily::DiploidBcf => BaseSlot::GtS8 as usize,
            GtFamily::Nploid => BaseSlot::GtN8 as usize,
        };
        BaseSlot::ALL[base + width as usize]
    }
}

/// Per-record controller bits, stored in the CONTROLLER base column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordController(pub u16);

impl RecordController {
    const GT_AVAILABLE: u16 = 1 << 0;
    const GT_MIXED_PHASING: u16 = 1 << 1;
    const GT_PHASE_UNIFORM: u16 = 1 << 2;
    const GT_HAS_MISSING: u16 = 1 << 3;
    const GT_HAS_EOV: u16 = 1 << 4;
    const BIALLELIC: u16 = 1 << 5;
    const DIPLOID: u16 = 1 << 6;
    const ALLELES_PACKED: u16 = 1 << 7;
    const HAS_NAME: u16 = 1 << 8;
    const HAS_QUALITY: u16 = 1 << 9;
    const GT_FAMILY_SHIFT: u16 = 10; // 2 bits
    const GT_WIDTH_SHIFT: u16 = 12; // 2 bits

    fn get(self, mask: u16) -> bool {
        self.0 & mask != 0
    }
    fn set(&mut self, mask: u16, value: bool) {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    pub fn gt_available(self) -> bool {
        self.get(Self::GT_AVAILABLE)
    }
    pub fn gt_mixed_phasing(self) -> bool {
        self.get(Self::GT_MIXED_PHASING)
    }
    pub fn gt_phase_uniform(self) -> bool {
        self.get(Self::GT_PHASE_UNIFORM)
    }
    pub fn gt_has_missing(self) -> bool {
        self.get(Self::GT_HAS_MISSING)
    }
    pub fn gt_has_eov(self) -> bool {
        self.get(Self::GT_HAS_EOV)
    }
    pub fn biallelic(self) -> bool {
        self.get(Self::BIALLELIC)
    }
    pub fn diploid(self) -> bool {
        self.get(Self::DIPLOID)
    }
    pub fn alleles_packed(self) -> bool {
        self.get(Self::ALLELES_PACKED)
    }
    pub fn has_name(self) -> bool {
        self.get(Self::HAS_NAME)
    }
    pub fn has_quality(self) -> bool {
        self.get(Self::HAS_QUALITY)
    }
    pub fn gt_family(self) -> Result<GtFamily> {
        GtFamily::from_code((self.0 >> Self::GT_FAMILY_SHIFT) as u8 & 0b11)
    }
    pub fn gt_width(self) -> GtWidth {
        GtWidth::from_code((self.0 >> Self::GT_WIDTH_SHIFT) as u8)
    }

    pub fn set_gt_available(&mut self, v: bool) {
        self.set(Self::GT_AVAILABLE, v);
    }
    pub fn set_gt_mixed_phasing(&mut self, v: bool) {
        self.set(Self::GT_MIXED_PHASING, v);
    }
    pub fn set_gt_phase_uniform(&mut self, v: bool) {
        self.set(Self::GT_PHASE_UNIFORM, v);
    }
    pub fn set_gt_has_missing(&mut self, v: bool) {
        self.set(Self::GT_HAS_MISSING, v);
    }
    pub fn set_gt_has_eov(&mut self, v: bool) {
        self.set(Self::GT_HAS_EOV, v);
    }
    pub fn set_biallelic(&mut self, v: bool) {
        self.set(Self::BIALLELIC, v);
    }
    pub fn set_diploid(&mut self, v: bool) {
        self.set(Self::DIPLOID, v);
    }
    pub fn set_alleles_packed(&mut self, v: bool) {
        self.set(Self::ALLELES_PACKED, v);
    }
    pub fn set_has_name(&mut self, v: bool) {
        self.set(Self::HAS_NAME, v);
    }
    pub fn set_has_quality(&mut self, v: bool) {
        self.set(Self::HAS_QUALITY, v);
    }
    pub fn set_gt_family(&mut self, family: GtFamily) {
        self.0 |= (family as u16) << Self::GT_FAMILY_SHIFT;
    }
    pub fn set_gt_width(&mut self, width: GtWidth) {
        self.0 |= (width as u16) << Self::GT_WIDTH_SHIFT;
    }
}

const BLOCK_HAS_GT: u16 = 1 << 0;
const BLOCK_HAS_GT_PERMUTED: u16 = 1 << 1;
const BLOCK_ANY_ENCRYPTED: u16 = 1 << 2;

/// Fixed-size header at the start of every block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub contig_id: i32,
    pub min_pos: u64,
    pub max_pos: u64,
    pub n_variants: u32,
    pub has_gt: bool,
    pub has_gt_permuted: bool,
    pub any_encrypted: bool,
    /// Bytes between the end of this header and the footer length prefix.
    pub l_body: u64,
}
impl BlockHeader {
    fn controller(&self) -> u16 {
        let mut c = 0;
        if self.has_gt {
            c |= BLOCK_HAS_GT;
        }
        if self.has_gt_permuted {
            c |= BLOCK_HAS_GT_PERMUTED;
        }
        if self.any_encrypted {
            c |= BLOCK_ANY_ENCRYPTED;
        }
        c
    }
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_i32::<LE>(self.contig_id)?;
        w.write_u64::<LE>(self.min_pos)?;
        w.write_u64::<LE>(self.max_pos)?;
        w.write_u32::<LE>(self.n_variants)?;
        w.write_u16::<LE>(self.controller())?;
        w.write_u64::<LE>(self.l_body)
    }
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let contig_id = r.read_i32::<LE>()?;
        let min_pos = r.read_u64::<LE>()?;
        let max_pos = r.read_u64::<LE>()?;
        let n_variants = r.read_u32::<LE>()?;
        let controller = r.read_u16::<LE>()?;
        let l_body = r.read_u64::<LE>()?;
        Ok(Self {
            contig_id,
            min_pos,
            max_pos,
            n_variants,
            has_gt: controller & BLOCK_HAS_GT != 0,
            has_gt_permuted: controller & BLOCK_HAS_GT_PERMUTED != 0,
            any_encrypted: controller & BLOCK_ANY_ENCRYPTED != 0,
            l_body,
        })
    }
}

/// A block with its containers; compressed after finalize, uncompressed
/// after [`DecodedBlock`] loads it.
#[derive(Debug, Default)]
pub struct VariantBlock {
    pub header: BlockHeader,
    pub ppa: Option<DataContainer>,
    pub base: Vec<DataContainer>,
    pub info: Vec<DataContainer>,
    pub format: Vec<DataContainer>,
    pub footer: BlockFooter,
}

impl VariantBlock {
    pub fn new() -> Self {
        Self {
            base: (0..N_BASE_SLOTS).map(|_| DataContainer::default()).collect(),
            ..Self::default()
        }
    }

    pub fn slot(&self, slot: BaseSlot) -> &DataContainer {
        &self.base[slot as usize]
    }
    pub fn slot_mut(&mut self, slot: BaseSlot) -> &mut DataContainer {
        &mut self.base[slot as usize]
    }

    /// Serialize the block: header, body segments, compressed footer,
    /// sentinel. Returns the number of bytes written.
    pub fn write_to(&mut self, w: &mut impl Write, manager: &CompressionManager) -> Result<u64> {
        // Lay out the body, assigning every segment its offset.
        let mut body: Vec<u8> = vec![];
        let mut place = |container: &mut DataContainer, body: &mut Vec<u8>| {
            container.header.data.offset = body.len() as u32;
            body.extend_from_slice(&container.data);
            if container.header.mixed_stride {
                container.header.strides.offset = body.len() as u32;
                body.extend_from_slice(&container.strides);
            }
        };
        if let Some(ppa) = &mut self.ppa {
            place(ppa, &mut body);
        }
        for slot in &mut self.base {
            if !slot.is_empty() {
                place(slot, &mut body);
            }
        }
        for container in self.info.iter_mut().chain(self.format.iter_mut()) {
            place(container, &mut body);
        }

        self.footer.sync(&self.ppa, &self.base, &self.info, &self.format);
        let footer_plain = self.footer.to_bytes()?;
        // The footer always goes through deflate: the reader has to parse it
        // before it can see any per-container encoder ids.
        let coded = Codec::Deflate.compress(&footer_plain, manager.level)?;
        let footer_coded = if coded.len() < footer_plain.len() {
            coded
        } else {
            footer_plain.clone()
        };

        self.header.l_body = body.len() as u64;
        self.header.write(w)?;
        w.write_all(&body)?;
        w.write_u32::<LE>(footer_plain.len() as u32)?;
        w.write_u32::<LE>(footer_coded.len() as u32)?;
        w.write_all(&footer_coded)?;
        w.write_u64::<LE>(BLOCK_SENTINEL)?;

        let header_len = 4 + 8 + 8 + 4 + 2 + 8;
        Ok(header_len + body.len() as u64 + 4 + 4 + footer_coded.len() as u64 + 8)
    }

    /// Read one block back; containers stay compressed.
    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let header = BlockHeader::read(r)?;
        if header.any_encrypted {
            return Err(Error::FormatUnsupported(
                "encrypted block (no cipher is wired in)".into(),
            ));
        }

        let mut body = vec![0; header.l_body as usize];
        r.read_exact(&mut body)?;

        let footer_u_len = r.read_u32::<LE>()? as usize;
        let footer_c_len = r.read_u32::<LE>()? as usize;
        let mut footer_coded = vec![0; footer_c_len];
        r.read_exact(&mut footer_coded)?;
        let footer_plain = if footer_c_len == footer_u_len {
            footer_coded
        } else {
            Codec::Deflate
                .decompress(&footer_coded, footer_u_len)
                .map_err(|_| Error::checksum("block footer"))?
        };
        if footer_plain.len() != footer_u_len {
            return Err(Error::checksum("block footer"));
        }
        let footer = BlockFooter::from_bytes(&footer_plain)?;

        if r.read_u64::<LE>()? != BLOCK_SENTINEL {
            return Err(Error::BlockSentinelMismatch);
        }

        // Slice the body back into containers.
        let take = |header: &crate::container::ContainerHeader| -> Result<DataContainer> {
            let mut container = DataContainer::default();
            container.header = header.clone();
            container.compressed = true;
            let at = header.data.offset as usize;
            let end = at + header.data.c_length as usize;
            let data = body.get(at..end).ok_or(Error::checksum("block body layout"));
            container.data = data?.to_vec();
            if header.mixed_stride {
                let at = header.strides.offset as usize;
                let end = at + header.strides.c_length as usize;
                let strides = body
                    .get(at..end)
                    .ok_or(Error::checksum("block body layout"));
                container.strides = strides?.to_vec();
            }
            Ok(container)
        };

        let mut block = VariantBlock::new();
        block.ppa = footer.ppa.as_ref().map(&take).transpose()?;
        for (slot, header) in footer.base_headers() {
            block.base[slot] = take(header)?;
        }
        block.info = footer.info.iter().map(&take).collect::<Result<_>>()?;
        block.format = footer.format.iter().map(&take).collect::<Result<_>>()?;
        block.header = header;
        block.footer = footer;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genotype_slot_dispatch() {
        assert_eq!(
            BaseSlot::for_genotypes(GtFamily::DiploidBiallelic, GtWidth::W8),
            BaseSlot::Gt8
        );
        assert_eq!(
            BaseSlot::for_genotypes(GtFamily::DiploidBiallelic, GtWidth::W64),
            BaseSlot::Gt64
        );
        assert_eq!(
            BaseSlot::for_genotypes(GtFamily::DiploidNallelic, GtWidth::W16),
            BaseSlot::GtS16
        );
        assert_eq!(
            BaseSlot::for_genotypes(GtFamily::Nploid, GtWidth::W32),
            BaseSlot::GtN32
        );
    }

    #[test]
    fn controller_bits_round_trip() {
        let mut c = RecordController::default();
        c.set_gt_available(true);
        c.set_gt_mixed_phasing(true);
        c.set_diploid(true);
        c.set_gt_family(GtFamily::DiploidNallelic);
        c.set_gt_width(GtWidth::W32);

        let back = RecordController(c.0);
        assert!(back.gt_available());
        assert!(back.gt_mixed_phasing());
        assert!(!back.gt_has_missing());
        assert!(back.diploid());
        assert!(!back.biallelic());
        assert_eq!(back.gt_family().unwrap(), GtFamily::DiploidNallelic);
        assert_eq!(back.gt_width(), GtWidth::W32);
    }

    #[test]
    fn block_header_round_trip() {
        let header = BlockHeader {
            contig_id: 3,
            min_pos: 999_000,
            max_pos: 1_000_050,
            n_variants: 512,
            has_gt: true,
            has_gt_permuted: true,
            any_encrypted: false,
            l_body: 123_456,
        };
        let mut buf = vec![];
        header.write(&mut buf).unwrap();
        assert_eq!(BlockHeader::read(&mut buf.as_slice()).unwrap(), header);
    }
}
