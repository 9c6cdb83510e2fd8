use std::io::{self, Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};

use crate::container::{ContainerHeader, DataContainer};
use crate::error::Result;
use crate::wire;

/// One interned combination of keys on a single axis.
///
/// `keys` is the canonical form (sorted, de-duplicated global keys);
/// `wire_order` is the producer order observed when the pattern was first
/// interned, which is the order decode emits; `bitmap` marks membership over
/// the block-local key space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    pub keys: Vec<u32>,
    pub wire_order: Vec<u32>,
    pub bitmap: Vec<u8>,
}
impl Pattern {
    pub fn contains_local(&self, local_key: usize) -> bool {
        self.bitmap
            .get(local_key / 8)
            .is_some_and(|byte| byte & (1 << (local_key % 8)) != 0)
    }
}

/// All patterns of one axis plus the block-local key space they index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternTable {
    /// Global keys used in this block, in container order.
    pub keys: Vec<u32>,
    pub patterns: Vec<Pattern>,
}
impl PatternTable {
    pub fn local_key(&self, global_key: u32) -> Option<usize> {
        self.keys.iter().position(|&k| k == global_key)
    }
    /// Which patterns contain `global_key`; the balanced-container test.
    pub fn membership(&self, global_key: u32) -> Vec<bool> {
        match self.local_key(global_key) {
            Some(local) => self
                .patterns
                .iter()
                .map(|p| p.contains_local(local))
                .collect(),
            None => vec![false; self.patterns.len()],
        }
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        wire::write_u32_slice(w, &self.keys)?;
        w.write_u32::<LE>(self.patterns.len() as u32)?;
        for pattern in &self.patterns {
            wire::write_u32_slice(w, &pattern.keys)?;
            wire::write_u32_slice(w, &pattern.wire_order)?;
            wire::write_len_bytes(w, &pattern.bitmap)?;
        }
        Ok(())
    }
    fn read(r: &mut impl Read) -> io::Result<Self> {
        let keys = wire::read_u32_vec(r)?;
        let n = r.read_u32::<LE>()? as usize;
        let mut patterns = Vec::with_capacity(n);
        for _ in 0..n {
            patterns.push(Pattern {
                keys: wire::read_u32_vec(r)?,
                wire_order: wire::read_u32_vec(r)?,
                bitmap: wire::read_len_bytes(r)?,
            });
        }
        Ok(Self { keys, patterns })
    }
}

/// Offsets table and pattern dictionaries of one block; compressed as a unit
/// and written between the body and the sentinel.
#[derive(Debug, Clone, Default)]
pub struct BlockFooter {
    /// Bit per base slot, set when the container is present in the body.
    pub presence: u32,
    pub ppa: Option<ContainerHeader>,
    /// Headers of the present base slots, in slot order.
    pub base: Vec<ContainerHeader>,
    pub info: Vec<ContainerHeader>,
    pub format: Vec<ContainerHeader>,
    pub info_axis: PatternTable,
    pub format_axis: PatternTable,
    pub filter_axis: PatternTable,
}

impl BlockFooter {
    /// Capture the current container headers (offsets included) ahead of
    /// serialization.
    pub fn sync(
        &mut self,
        ppa: &Option<DataContainer>,
        base: &[DataContainer],
        info: &[DataContainer],
        format: &[DataContainer],
    ) {
        self.presence = 0;
        self.base.clear();
        for (slot, container) in base.iter().enumerate() {
            if !container.is_empty() {
                self.presence |= 1 << slot;
                self.base.push(container.header.clone());
            }
        }
        self.ppa = ppa.as_ref().map(|c| c.header.clone());
        self.info = info.iter().map(|c| c.header.clone()).collect();
        self.format = format.iter().map(|c| c.header.clone()).collect();
    }

    /// `(slot index, header)` pairs for the present base containers.
    pub fn base_headers(&self) -> impl Iterator<Item = (usize, &ContainerHeader)> {
        let presence = self.presence;
        (0..super::N_BASE_SLOTS)
            .filter(move |slot| presence & (1 << slot) != 0)
            .zip(self.base.iter())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![];
        out.write_u32::<LE>(self.presence)?;
        match &self.ppa {
            Some(header) => {
                out.write_u8(1)?;
                header.write(&mut out)?;
            }
            None => out.write_u8(0)?,
        }
        debug_assert_eq!(self.presence.count_ones() as usize, self.base.len());
        for header in &self.base {
            header.write(&mut out)?;
        }
        out.write_u32::<LE>(self.info.len() as u32)?;
        for header in &self.info {
            header.write(&mut out)?;
        }
        out.write_u32::<LE>(self.format.len() as u32)?;
        for header in &self.format {
            header.write(&mut out)?;
        }
        self.info_axis.write(&mut out)?;
        self.format_axis.write(&mut out)?;
        self.filter_axis.write(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let r = &mut &bytes[..];
        let presence = r.read_u32::<LE>()?;
        let ppa = match r.read_u8()? {
            0 => None,
            _ => Some(ContainerHeader::read(r)?),
        };
        let mut base = Vec::with_capacity(presence.count_ones() as usize);
        for _ in 0..presence.count_ones() {
            base.push(ContainerHeader::read(r)?);
        }
        let n_info = r.read_u32::<LE>()? as usize;
        let mut info = Vec::with_capacity(n_info);
        for _ in 0..n_info {
            info.push(ContainerHeader::read(r)?);
        }
        let n_format = r.read_u32::<LE>()? as usize;
        let mut format = Vec::with_capacity(n_format);
        for _ in 0..n_format {
            format.push(ContainerHeader::read(r)?);
        }
        Ok(Self {
            presence,
            ppa,
            base,
            info,
            format,
            info_axis: PatternTable::read(r)?,
            format_axis: PatternTable::read(r)?,
            filter_axis: PatternTable::read(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(keys: &[u32], wire: &[u32], n_local: usize, locals: &[usize]) -> Pattern {
        let mut bitmap = vec![0u8; n_local.div_ceil(8)];
        for &local in locals {
            bitmap[local / 8] |= 1 << (local % 8);
        }
        Pattern {
            keys: keys.to_vec(),
            wire_order: wire.to_vec(),
            bitmap,
        }
    }

    #[test]
    fn membership_follows_bitmaps() {
        let table = PatternTable {
            keys: vec![4, 9, 11],
            patterns: vec![
                pattern(&[4, 9], &[9, 4], 3, &[0, 1]),
                pattern(&[11], &[11], 3, &[2]),
            ],
        };
        assert_eq!(table.membership(4), vec![true, false]);
        assert_eq!(table.membership(9), vec![true, false]);
        assert_eq!(table.membership(11), vec![false, true]);
        assert_eq!(table.membership(77), vec![false, false]);
    }

    #[test]
    fn footer_round_trip() {
        let mut header = ContainerHeader::default();
        header.global_key = 7;
        header.n_additions = 3;

        let footer = BlockFooter {
            presence: 0b1011,
            ppa: Some(ContainerHeader::default()),
            base: vec![
                ContainerHeader::default(),
                header.clone(),
                ContainerHeader::default(),
            ],
            info: vec![header.clone()],
            format: vec![],
            info_axis: PatternTable {
                keys: vec![7],
                patterns: vec![pattern(&[7], &[7], 1, &[0])],
            },
            format_axis: PatternTable::default(),
            filter_axis: PatternTable::default(),
        };
        let bytes = footer.to_bytes().unwrap();
        let back = BlockFooter::from_bytes(&bytes).unwrap();
        assert_eq!(back.presence, footer.presence);
        assert_eq!(back.base.len(), 3);
        assert_eq!(back.info[0].global_key, 7);
        assert_eq!(back.info_axis, footer.info_axis);
        let slots: Vec<usize> = back.base_headers().map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![0, 1, 3]);
    }
}
