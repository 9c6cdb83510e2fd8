use std::io::{self, Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};

/// Bases covered by a leaf bin before another level pays off.
const MIN_BIN_SPAN: u64 = 2500;
const MAX_LEVELS: u8 = 7;

/// Shape of one contig's quad tree: number of 4-ary levels and the contig
/// length rounded up so every level divides it evenly. Pure arithmetic, so
/// block builders can place intervals without touching the index itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContigGeometry {
    pub length: u64,
    pub rounded: u64,
    pub levels: u8,
}
impl ContigGeometry {
    pub fn new(length: u64) -> Self {
        let mut levels = 1;
        for l in (1..=MAX_LEVELS).rev() {
            if length / 4u64.pow(l as u32) >= MIN_BIN_SPAN {
                levels = l;
                break;
            }
        }
        let lowest = 4u64.pow(levels as u32);
        let rounded = length.div_ceil(lowest.max(1)).max(1) * lowest;
        Self {
            length,
            rounded,
            levels,
        }
    }

    /// Bins on all levels: `(4^(levels+1) - 1) / 3`.
    pub fn n_bins(&self) -> usize {
        ((4usize.pow(self.levels as u32 + 1)) - 1) / 3
    }
    /// First bin id of `level`, the prefix rank in pre-order.
    pub fn level_offset(level: u8) -> u32 {
        ((4u32.pow(level as u32)) - 1) / 3
    }
    fn bin_span(&self, level: u8) -> u64 {
        self.rounded / 4u64.pow(level as u32)
    }

    /// Deepest bin fully containing the inclusive interval `[from, to]`:
    /// the largest level at which both ends land in the same bin.
    pub fn deepest_bin(&self, from: u64, to: u64) -> u32 {
        let from = from.min(self.rounded - 1);
        let to = to.clamp(from, self.rounded - 1);
        for level in (1..=self.levels).rev() {
            let span = self.bin_span(level);
            if from / span == to / span {
                return Self::level_offset(level) + (from / span) as u32;
            }
        }
        0 // root
    }

    /// Every bin whose interval overlaps `[from, to]`, root first.
    pub fn overlapping_bins(&self, from: u64, to: u64) -> Vec<u32> {
        if from >= self.rounded {
            return vec![];
        }
        let to = to.clamp(from, self.rounded - 1);
        let mut bins = vec![];
        for level in 0..=self.levels {
            let span = self.bin_span(level);
            let offset = Self::level_offset(level);
            for idx in from / span..=to / span {
                bins.push(offset + idx as u32);
            }
        }
        bins
    }
}

/// The per-contig quad tree: a flat array of bins, each holding the sorted
/// list of block ids whose record span overlaps the bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantIndexContig {
    pub contig_id: u32,
    pub geometry: ContigGeometry,
    bins: Vec<Vec<u32>>,
    n_sites: u64,
}

impl VariantIndexContig {
    pub fn new(contig_id: u32, length: u64) -> Self {
        let geometry = ContigGeometry::new(length);
        Self {
            contig_id,
            geometry,
            bins: vec![vec![]; geometry.n_bins()],
            n_sites: 0,
        }
    }

    pub fn n_sites(&self) -> u64 {
        self.n_sites
    }

    /// Register `block_id` for the interval `[from, to]`; returns the bin it
    /// landed in. Repeated registration of the same block is collapsed.
    pub fn insert(&mut self, from: u64, to: u64, block_id: u32) -> u32 {
        let bin = self.geometry.deepest_bin(from, to);
        self.register_bin(bin, block_id);
        self.n_sites += 1;
        bin
    }

    /// Register a precomputed bin, as the writer does for bins the block
    /// builder already placed.
    pub fn register_bin(&mut self, bin: u32, block_id: u32) {
        let list = &mut self.bins[bin as usize];
        if list.last() != Some(&block_id) {
            list.push(block_id);
        }
    }

    pub fn add_sites(&mut self, n: u64) {
        self.n_sites += n;
    }

    /// Block ids of every bin overlapping `[from, to]`. A superset filter:
    /// callers must still check the linear index for positional overlap.
    pub fn candidate_blocks(&self, from: u64, to: u64) -> Vec<u32> {
        let mut blocks = vec![];
        for bin in self.geometry.overlapping_bins(from, to) {
            blocks.extend_from_slice(&self.bins[bin as usize]);
        }
        blocks
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LE>(self.contig_id)?;
        w.write_u64::<LE>(self.geometry.length)?;
        w.write_u64::<LE>(self.geometry.rounded)?;
        w.write_u8(self.geometry.levels)?;
        w.write_u64::<LE>(self.n_sites)?;
        let occupied = self.bins.iter().filter(|b| !b.is_empty()).count();
        w.write_u32::<LE>(occupied as u32)?;
        for (bin, blocks) in self.bins.iter().enumerate() {
            if !blocks.is_empty() {
                w.write_u32::<LE>(bin as u32)?;
                crate::wire::write_u32_slice(w, blocks)?;
            }
        }
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let contig_id = r.read_u32::<LE>()?;
        let length = r.read_u64::<LE>()?;
        let rounded = r.read_u64::<LE>()?;
        let levels = r.read_u8()?;
        let geometry = ContigGeometry {
            length,
            rounded,
            levels,
        };
        let n_sites = r.read_u64::<LE>()?;
        let mut bins = vec![vec![]; geometry.n_bins()];
        let occupied = r.read_u32::<LE>()?;
        for _ in 0..occupied {
            let bin = r.read_u32::<LE>()? as usize;
            let blocks = crate::wire::read_u32_vec(r)?;
            if bin >= bins.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "bin id out of range",
                ));
            }
            bins[bin] = blocks;
        }
        Ok(Self {
            contig_id,
            geometry,
            bins,
            n_sites,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_selection() {
        assert_eq!(ContigGeometry::new(5_000).levels, 1);
        assert_eq!(ContigGeometry::new(9_999).levels, 1);
        assert_eq!(ContigGeometry::new(10_000).levels, 1);
        assert_eq!(ContigGeometry::new(40_000).levels, 2);
        assert_eq!(ContigGeometry::new(248_956_422).levels, 7); // chr1
    }

    #[test]
    fn bin_arithmetic() {
        assert_eq!(ContigGeometry::level_offset(0), 0);
        assert_eq!(ContigGeometry::level_offset(1), 1);
        assert_eq!(ContigGeometry::level_offset(2), 5);
        assert_eq!(ContigGeometry::level_offset(3), 21);

        let g = ContigGeometry::new(40_000);
        assert_eq!(g.levels, 2);
        assert_eq!(g.n_bins(), 21);
        // A tiny interval lands on the deepest level.
        let bin = g.deepest_bin(100, 101);
        assert!(bin >= ContigGeometry::level_offset(2));
        // An interval spanning the contig midpoint can only live at the root.
        assert_eq!(g.deepest_bin(0, g.rounded - 1), 0);
    }

    #[test]
    fn superset_filter_contains_inserted_blocks() {
        let mut contig = VariantIndexContig::new(0, 1_000_000);
        let bin = contig.insert(999_000, 1_000_050, 7);
        contig.insert(999_500, 999_600, 7); // same block twice
        contig.insert(500, 600, 8);

        let candidates = contig.candidate_blocks(999_900, 1_000_000);
        assert!(candidates.contains(&7));
        assert!(!candidates.contains(&8));
        assert!(bin < contig.geometry.n_bins() as u32);
    }

    #[test]
    fn serialization_round_trip() {
        let mut contig = VariantIndexContig::new(3, 12_345_678);
        contig.insert(10, 20, 0);
        contig.insert(1_000_000, 1_000_100, 1);
        contig.insert(12_000_000, 12_000_001, 2);

        let mut buf = vec![];
        contig.write(&mut buf).unwrap();
        let back = VariantIndexContig::read(&mut buf.as_slice()).unwrap();
        assert_eq!(back, contig);
    }

    #[test]
    fn positions_past_the_rounded_end_clamp() {
        let g = ContigGeometry::new(10_000);
        let bin = g.deepest_bin(g.rounded + 50, g.rounded + 60);
        assert!(bin < g.n_bins() as u32);
        assert!(g.overlapping_bins(g.rounded + 1, g.rounded + 2).is_empty());
    }
}
