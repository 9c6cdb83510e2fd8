use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LE, WriteBytesExt};
use varcore::Schema;

use super::{schema_to_bytes, write_compressed_section, write_magic};
use crate::block::FinishedBlock;
use crate::codec::CompressionManager;
use crate::error::Result;
use crate::index::{MetaIndex, VariantIndex};

/// Appends finished blocks to an archive and maintains the index. Blocks
/// must arrive in id order; the single writer thread owns this exclusively.
pub struct ArchiveWriter<W: Write> {
    out: W,
    offset: u64,
    schema: Schema,
    manager: CompressionManager,
    index: VariantIndex,
    n_blocks: u32,
    n_variants: u64,
}

impl ArchiveWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, schema: Schema, manager: CompressionManager) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?), schema, manager)
    }
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(mut out: W, schema: Schema, manager: CompressionManager) -> Result<Self> {
        let mut head = vec![];
        write_magic(&mut head)?;
        write_compressed_section(&mut head, &schema_to_bytes(&schema)?, manager.level)?;
        out.write_all(&head)?;

        let index = VariantIndex::new(&schema.contigs);
        Ok(Self {
            offset: head.len() as u64,
            out,
            schema,
            manager,
            index,
            n_blocks: 0,
            n_variants: 0,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
    pub fn n_blocks(&self) -> u32 {
        self.n_blocks
    }
    pub fn n_variants(&self) -> u64 {
        self.n_variants
    }

    /// Append one block and index it. The index only ever describes blocks
    /// that hit the file in full.
    pub fn write_block(&mut self, mut finished: FinishedBlock) -> Result<()> {
        assert_eq!(
            finished.block_id, self.n_blocks,
            "blocks must be written in dispatch order"
        );
        let byte_offset = self.offset;
        let byte_length = finished.block.write_to(&mut self.out, &self.manager)?;
        self.offset += byte_length;

        finished.entry.byte_offset = byte_offset;
        finished.entry.byte_length = byte_length;
        self.n_variants += finished.entry.n_variants as u64;
        self.index.add_block(finished.entry, &finished.bins);
        self.n_blocks += 1;
        Ok(())
    }

    /// Serialize the index, the tail pointer and the closing magic, and
    /// return the underlying writer.
    pub fn finish(mut self) -> Result<(W, MetaIndex)> {
        let meta = self.index.build_meta();

        let index_offset = self.offset;
        let mut plain = vec![];
        self.index.write(&mut plain)?;
        write_compressed_section(&mut self.out, &plain, self.manager.level)?;
        self.out.write_u64::<LE>(index_offset)?;
        self.out.write_all(&super::MAGIC)?;
        self.out.flush()?;

        log::debug!(
            "archive closed: {} blocks, {} variants, index at byte {index_offset}",
            self.n_blocks,
            self.n_variants,
        );
        Ok((self.out, meta))
    }
}
