//! Two-tier positional index: a per-contig quad tree as a coarse superset
//! filter, a per-contig linear list as ground truth, and a meta index that
//! collapses contiguous same-contig block runs.

mod contig;
mod linear;

use std::io::{Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};
use varcore::Contig;

pub use contig::{ContigGeometry, VariantIndexContig};
pub use linear::{IndexEntry, VariantIndexLinear};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantIndex {
    contigs: Vec<VariantIndexContig>,
    linear: Vec<VariantIndexLinear>,
}

impl VariantIndex {
    pub fn new(contigs: &[Contig]) -> Self {
        Self {
            contigs: contigs
                .iter()
                .enumerate()
                .map(|(id, c)| VariantIndexContig::new(id as u32, c.length))
                .collect(),
            linear: vec![VariantIndexLinear::default(); contigs.len()],
        }
    }

    pub fn n_contigs(&self) -> usize {
        self.contigs.len()
    }
    pub fn contig(&self, contig_id: usize) -> Option<&VariantIndexContig> {
        self.contigs.get(contig_id)
    }
    pub fn linear(&self, contig_id: usize) -> Option<&VariantIndexLinear> {
        self.linear.get(contig_id)
    }

    /// The index must describe the same contigs the query schema does.
    pub fn check_compatible(&self, contigs: &[Contig]) -> Result<()> {
        if contigs.len() != self.contigs.len() {
            return Err(Error::FormatIncompatible(format!(
                "archive indexes {} contigs, schema declares {}",
                self.contigs.len(),
                contigs.len()
            )));
        }
        for (contig, indexed) in contigs.iter().zip(&self.contigs) {
            if contig.length != indexed.geometry.length {
                return Err(Error::FormatIncompatible(format!(
                    "contig {:?} changed length between write and read",
                    contig.name
                )));
            }
        }
        Ok(())
    }

    /// Writer-side registration of one finished block: every quad-tree bin
    /// its records touched, plus one linear entry.
    pub fn add_block(&mut self, entry: IndexEntry, bins: &[u32]) {
        let contig_id = entry.contig_id as usize;
        let contig = &mut self.contigs[contig_id];
        for &bin in bins {
            contig.register_bin(bin, entry.block_id);
        }
        contig.add_sites(entry.n_variants as u64);
        self.linear[contig_id].push(entry);
    }

    /// All blocks on a contig, in emission order. Unknown contigs are an
    /// empty result, not an error.
    pub fn find_contig(&self, contig_id: i32) -> Vec<IndexEntry> {
        usize::try_from(contig_id)
            .ok()
            .and_then(|id| self.linear.get(id))
            .map(|l| l.entries.clone())
            .unwrap_or_default()
    }

    /// Blocks that may hold records overlapping the inclusive interval
    /// `[from, to]`: quad-tree candidates, filtered by the linear list,
    /// sorted and de-duplicated by block id.
    pub fn find_overlap(&self, contig_id: i32, from: u64, to: u64) -> Vec<IndexEntry> {
        let Ok(id) = usize::try_from(contig_id) else {
            return vec![];
        };
        let (Some(contig), Some(linear)) = (self.contigs.get(id), self.linear.get(id)) else {
            return vec![];
        };

        let mut candidates = contig.candidate_blocks(from, to);
        candidates.sort_unstable();
        candidates.dedup();

        candidates
            .into_iter()
            .filter_map(|block_id| linear.by_block_id(block_id))
            .filter(|entry| entry.overlaps(from, to))
            .copied()
            .collect()
    }

    /// Every linear entry across contigs, sorted by block id; iterating this
    /// restores global record order.
    pub fn blocks_in_order(&self) -> Vec<IndexEntry> {
        let mut all: Vec<IndexEntry> = self
            .linear
            .iter()
            .flat_map(|l| l.entries.iter().copied())
            .collect();
        all.sort_unstable_by_key(|e| e.block_id);
        all
    }

    pub fn n_blocks(&self) -> usize {
        self.linear.iter().map(|l| l.entries.len()).sum()
    }

    /// Reduction over the linear lists: consecutive entries of one contig
    /// collapse into a contiguous span.
    pub fn build_meta(&self) -> MetaIndex {
        let mut spans = vec![];
        for linear in &self.linear {
            let mut entries = linear.entries.iter();
            let Some(first) = entries.next() else {
                continue;
            };
            let mut span = MetaEntry::starting_at(first);
            for entry in entries {
                if entry.block_id == span.last_block + 1 {
                    span.absorb(entry);
                } else {
                    spans.push(span);
                    span = MetaEntry::starting_at(entry);
                }
            }
            spans.push(span);
        }
        spans.sort_unstable_by_key(|s| s.first_block);
        MetaIndex { spans }
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_u32::<LE>(self.contigs.len() as u32)?;
        for contig in &self.contigs {
            contig.write(w)?;
        }
        for linear in &self.linear {
            linear.write(w)?;
        }
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Self> {
        let n = r.read_u32::<LE>()? as usize;
        let mut contigs = Vec::with_capacity(n);
        for _ in 0..n {
            contigs.push(VariantIndexContig::read(r)?);
        }
        let mut linear = Vec::with_capacity(n);
        for _ in 0..n {
            linear.push(VariantIndexLinear::read(r)?);
        }
        Ok(Self { contigs, linear })
    }
}

/// One contiguous run of same-contig blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaEntry {
    pub contig_id: i32,
    pub first_block: u32,
    pub last_block: u32,
    pub n_variants: u64,
    pub byte_offset: u64,
    pub byte_length: u64,
}
impl MetaEntry {
    fn starting_at(entry: &IndexEntry) -> Self {
        Self {
            contig_id: entry.contig_id,
            first_block: entry.block_id,
            last_block: entry.block_id,
            n_variants: entry.n_variants as u64,
            byte_offset: entry.byte_offset,
            byte_length: entry.byte_length,
        }
    }
    fn absorb(&mut self, entry: &IndexEntry) {
        self.last_block = entry.block_id;
        self.n_variants += entry.n_variants as u64;
        self.byte_length += entry.byte_length;
    }
}

/// Contig spans for fast skip over the block sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaIndex {
    pub spans: Vec<MetaEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chr(name: &str, length: u64) -> Contig {
        Contig {
            name: name.into(),
            length,
        }
    }

    fn entry(block_id: u32, contig_id: i32, min: u64, max: u64) -> IndexEntry {
        IndexEntry {
            block_id,
            contig_id,
            min_pos: min,
            max_pos: max,
            n_variants: 10,
            byte_offset: block_id as u64 * 1000,
            byte_length: 1000,
            ..IndexEntry::default()
        }
    }

    fn index_with_chr3_blocks() -> VariantIndex {
        let contigs = vec![
            chr("chr1", 248_956_422),
            chr("chr2", 242_193_529),
            chr("chr3", 198_295_559),
        ];
        let mut index = VariantIndex::new(&contigs);
        for (id, min, max) in [
            (0, 999_000, 1_000_050),
            (1, 1_000_050, 1_000_200),
            (2, 2_000_000, 2_000_100),
        ] {
            let geometry = index.contig(2).unwrap().geometry;
            let bin = geometry.deepest_bin(min, max);
            index.add_block(entry(id, 2, min, max), &[bin]);
        }
        index
    }

    #[test]
    fn overlap_query_filters_and_orders() {
        let index = index_with_chr3_blocks();
        let hits = index.find_overlap(2, 1_000_000, 1_000_100);
        let ids: Vec<u32> = hits.iter().map(|e| e.block_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn out_of_range_contig_is_empty_not_an_error() {
        let index = index_with_chr3_blocks();
        assert!(index.find_overlap(17, 0, u64::MAX).is_empty());
        assert!(index.find_overlap(-1, 0, 100).is_empty());
        assert!(index.find_contig(17).is_empty());
    }

    #[test]
    fn empty_interval_overlap_is_empty() {
        let index = index_with_chr3_blocks();
        assert!(index.find_overlap(2, 5_000_000, 5_000_100).is_empty());
        assert!(index.find_overlap(0, 1_000_000, 1_000_100).is_empty());
    }

    #[test]
    fn incompatible_contig_table_is_rejected() {
        let index = index_with_chr3_blocks();
        let mut contigs = vec![
            chr("chr1", 248_956_422),
            chr("chr2", 242_193_529),
            chr("chr3", 198_295_559),
        ];
        assert!(index.check_compatible(&contigs).is_ok());
        contigs[2].length = 5;
        match index.check_compatible(&contigs) {
            Err(Error::FormatIncompatible(_)) => {}
            other => panic!("expected incompatible, got {other:?}"),
        }
    }

    #[test]
    fn meta_index_collapses_contiguous_runs() {
        let index = index_with_chr3_blocks();
        let meta = index.build_meta();
        assert_eq!(meta.spans.len(), 1);
        assert_eq!(meta.spans[0].first_block, 0);
        assert_eq!(meta.spans[0].last_block, 2);
        assert_eq!(meta.spans[0].n_variants, 30);
        assert_eq!(meta.spans[0].byte_length, 3000);
    }

    #[test]
    fn serialization_round_trip() {
        let index = index_with_chr3_blocks();
        let mut buf = vec![];
        index.write(&mut buf).unwrap();
        let back = VariantIndex::read(&mut buf.as_slice()).unwrap();
        assert_eq!(back, index);
    }
}
