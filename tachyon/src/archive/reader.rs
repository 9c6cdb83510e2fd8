use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LE, ReadBytesExt};
use varcore::{Record, Schema};

use super::{MAGIC, read_compressed_section, read_magic, schema_from_bytes};
use crate::block::{DecodedBlock, VariantBlock};
use crate::error::{Error, Result};
use crate::index::{IndexEntry, MetaIndex, VariantIndex};

/// A write-once archive opened for reading: global header, index, and
/// random access to blocks.
#[derive(Debug)]
pub struct Archive {
    file: BufReader<File>,
    schema: Schema,
    index: VariantIndex,
    meta: MetaIndex,
}

impl Archive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        read_magic(&mut file)?;
        let schema = schema_from_bytes(&read_compressed_section(&mut file)?)?;

        // The tail: u64 index offset, then the magic again.
        let end = file.seek(SeekFrom::End(0))?;
        if end < 16 {
            return Err(Error::FormatMagicMismatch);
        }
        file.seek(SeekFrom::End(-16))?;
        let index_offset = file.read_u64::<LE>()?;
        let mut tail_magic = [0u8; 8];
        file.read_exact(&mut tail_magic)?;
        if tail_magic != MAGIC {
            return Err(Error::FormatMagicMismatch);
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let index = VariantIndex::read(&mut &read_compressed_section(&mut file)?[..])?;
        index.check_compatible(&schema.contigs)?;

        let meta = index.build_meta();
        Ok(Self {
            file,
            schema,
            index,
            meta,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
    pub fn index(&self) -> &VariantIndex {
        &self.index
    }
    pub fn meta_index(&self) -> &MetaIndex {
        &self.meta
    }
    pub fn n_blocks(&self) -> usize {
        self.index.n_blocks()
    }

    /// Queries from an external schema must agree with the archive on the
    /// contig table.
    pub fn verify_schema(&self, schema: &Schema) -> Result<()> {
        self.index.check_compatible(&schema.contigs)
    }

    /// Raw block bytes at an index entry, sentinel included.
    pub fn read_block_bytes(&mut self, entry: &IndexEntry) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(entry.byte_offset))?;
        let mut bytes = vec![0; entry.byte_length as usize];
        self.file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Load and fully decode the block an index entry points at.
    pub fn load_block(&mut self, entry: &IndexEntry) -> Result<DecodedBlock> {
        self.file.seek(SeekFrom::Start(entry.byte_offset))?;
        let block = VariantBlock::read_from(&mut self.file)?;
        DecodedBlock::decode(block, &self.schema)
    }

    /// Stream every record, blocks in id order (which restores global
    /// submission order), records in written order within each block.
    pub fn records(&mut self) -> BlockRecords<'_> {
        let entries = self.index.blocks_in_order();
        BlockRecords::new(self, entries, None, false)
    }

    /// Like [`Archive::records`], but checksum-corrupt blocks are skipped
    /// with a warning instead of ending the stream.
    pub fn records_skip_corrupt(&mut self) -> BlockRecords<'_> {
        let entries = self.index.blocks_in_order();
        BlockRecords::new(self, entries, None, true)
    }

    /// Records whose reference span intersects the inclusive interval
    /// `[from, to]`. Unknown contigs and empty intersections yield an empty
    /// stream, not an error.
    pub fn query(&mut self, contig: &str, from: u64, to: u64) -> BlockRecords<'_> {
        let entries = match self.schema.contig_id(contig) {
            Some(contig_id) => self.index.find_overlap(contig_id, from, to),
            None => vec![],
        };
        BlockRecords::new(self, entries, Some((from, to)), false)
    }

    /// Every record on one contig, in emission order.
    pub fn query_contig(&mut self, contig: &str) -> BlockRecords<'_> {
        let entries = match self.schema.contig_id(contig) {
            Some(contig_id) => self.index.find_contig(contig_id),
            None => vec![],
        };
        BlockRecords::new(self, entries, None, false)
    }
}

/// Iterator over the records of a run of blocks, optionally filtered by a
/// positional interval. Fail-fast by default: the first corrupt block ends
/// the stream with its error.
pub struct BlockRecords<'a> {
    archive: &'a mut Archive,
    entries: std::vec::IntoIter<IndexEntry>,
    current: std::vec::IntoIter<Record>,
    range: Option<(u64, u64)>,
    skip_corrupt: bool,
    failed: bool,
}

impl<'a> BlockRecords<'a> {
    fn new(
        archive: &'a mut Archive,
        entries: Vec<IndexEntry>,
        range: Option<(u64, u64)>,
        skip_corrupt: bool,
    ) -> Self {
        Self {
            archive,
            entries: entries.into_iter(),
            current: vec![].into_iter(),
            range,
            skip_corrupt,
            failed: false,
        }
    }

    fn matches(&self, record: &Record) -> bool {
        match self.range {
            None => true,
            Some((from, to)) => {
                let span = record.interval();
                span.start <= to && span.end > from
            }
        }
    }
}

impl Iterator for BlockRecords<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            while let Some(record) = self.current.next() {
                if self.matches(&record) {
                    return Some(Ok(record));
                }
            }
            let entry = self.entries.next()?;
            let records = match self.archive.load_block(&entry) {
                Ok(block) => block.records(&self.archive.schema),
                Err(e) => Err(e),
            };
            match records {
                Ok(records) => self.current = records.into_iter(),
                Err(e @ Error::ChecksumMismatch { .. }) if self.skip_corrupt => {
                    log::warn!("skipping corrupt block {}: {e}", entry.block_id);
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
