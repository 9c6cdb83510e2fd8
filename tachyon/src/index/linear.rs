use std::io::{self, Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};

/// One block's footprint: positional span, quad-tree bin span, and the byte
/// range it occupies in the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub block_id: u32,
    pub contig_id: i32,
    pub min_pos: u64,
    pub max_pos: u64,
    pub min_bin: u32,
    pub max_bin: u32,
    pub n_variants: u32,
    pub byte_offset: u64,
    pub byte_length: u64,
}
impl IndexEntry {
    /// Positional overlap against an inclusive query interval.
    pub fn overlaps(&self, from: u64, to: u64) -> bool {
        self.min_pos <= to && self.max_pos >= from
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LE>(self.block_id)?;
        w.write_i32::<LE>(self.contig_id)?;
        w.write_u64::<LE>(self.min_pos)?;
        w.write_u64::<LE>(self.max_pos)?;
        w.write_u32::<LE>(self.min_bin)?;
        w.write_u32::<LE>(self.max_bin)?;
        w.write_u32::<LE>(self.n_variants)?;
        w.write_u64::<LE>(self.byte_offset)?;
        w.write_u64::<LE>(self.byte_length)
    }
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            block_id: r.read_u32::<LE>()?,
            contig_id: r.read_i32::<LE>()?,
            min_pos: r.read_u64::<LE>()?,
            max_pos: r.read_u64::<LE>()?,
            min_bin: r.read_u32::<LE>()?,
            max_bin: r.read_u32::<LE>()?,
            n_variants: r.read_u32::<LE>()?,
            byte_offset: r.read_u64::<LE>()?,
            byte_length: r.read_u64::<LE>()?,
        })
    }
}

/// Per-contig list of block descriptors in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantIndexLinear {
    pub entries: Vec<IndexEntry>,
}
impl VariantIndexLinear {
    pub fn push(&mut self, entry: IndexEntry) {
        debug_assert!(
            self.entries
                .last()
                .is_none_or(|last| last.block_id < entry.block_id)
        );
        self.entries.push(entry);
    }
    /// Entry for `block_id`, by binary search over the emission order.
    pub fn by_block_id(&self, block_id: u32) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by_key(&block_id, |e| e.block_id)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LE>(self.entries.len() as u32)?;
        for entry in &self.entries {
            entry.write(w)?;
        }
        Ok(())
    }
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let n = r.read_u32::<LE>()? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            entries.push(IndexEntry::read(r)?);
        }
        Ok(Self { entries })
    }
}
