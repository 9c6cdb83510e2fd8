use std::collections::BTreeSet;

use ahash::AHashMap;
use varcore::{FieldValue, FormatValues, GenotypeRow, Record, Schema};
use xxhash_rust::xxh3::xxh3_64;

use super::{
    BaseSlot, BlockHeader, Pattern, PatternTable, RecordController, VariantBlock,
    pack_allele_nibble,
};
use crate::codec::CompressionManager;
use crate::container::DataContainer;
use crate::error::{Error, Result};
use crate::genotype::{self, Permuter};
use crate::index::{ContigGeometry, IndexEntry};

/// Bit pattern carried in the quality column when the producer supplied no
/// quality. Compared byte-for-byte, never as a float.
pub const QUALITY_MISSING_BITS: u32 = 0x7f80_0001;

/// Interner for one of the INFO/FORMAT/FILTER axes: the block-local key
/// space plus the dictionary of sorted, de-duplicated key sets.
#[derive(Debug, Default)]
struct AxisBuilder {
    keys: Vec<u32>,
    key_index: AHashMap<u32, usize>,
    patterns: Vec<(Vec<u32>, Vec<u32>)>,
    pattern_index: AHashMap<u64, usize>,
}
impl AxisBuilder {
    /// Local slot of a global key, creating one on first use.
    fn key_slot(&mut self, global_key: u32) -> usize {
        *self.key_index.entry(global_key).or_insert_with(|| {
            self.keys.push(global_key);
            self.keys.len() - 1
        })
    }

    /// Dictionary id of the sorted form of `wire_order`, interning it (with
    /// the producer order as first observed) when new. Empty patterns get
    /// the id -1.
    fn intern(&mut self, wire_order: &[u32]) -> i32 {
        if wire_order.is_empty() {
            return -1;
        }
        let mut sorted = wire_order.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut bytes = Vec::with_capacity(sorted.len() * 4);
        for key in &sorted {
            bytes.extend_from_slice(&key.to_le_bytes());
        }
        let hash = xxh3_64(&bytes);
        *self.pattern_index.entry(hash).or_insert_with(|| {
            self.patterns.push((sorted, wire_order.to_vec()));
            self.patterns.len() - 1
        }) as i32
    }

    fn table(&self) -> PatternTable {
        let bitmap_len = self.keys.len().div_ceil(8);
        PatternTable {
            keys: self.keys.clone(),
            patterns: self
                .patterns
                .iter()
                .map(|(sorted, wire)| {
                    let mut bitmap = vec![0u8; bitmap_len];
                    for key in sorted {
                        let local = self.key_index[key];
                        bitmap[local / 8] |= 1 << (local % 8);
                    }
                    Pattern {
                        keys: sorted.clone(),
                        wire_order: wire.clone(),
                        bitmap,
                    }
                })
                .collect(),
        }
    }
}

/// Base-column values buffered until finalize; genotype state only lands in
/// the controller after the permutation pass has seen every record.
#[derive(Debug)]
struct RecordMeta {
    position: u64,
    quality: Option<f32>,
    name: Option<String>,
    alleles: Vec<Vec<u8>>,
    packed: Option<u8>,
    info_pattern: i32,
    format_pattern: i32,
    filter_pattern: i32,
}

/// Accumulates records for one block, then finalizes them into containers,
/// pattern dictionaries, genotype streams and an index entry.
pub struct BlockBuilder<'a> {
    schema: &'a Schema,
    block_id: u32,
    permute: bool,

    contig_id: Option<i32>,
    geometry: Option<ContigGeometry>,
    metas: Vec<RecordMeta>,
    rows: Vec<Option<GenotypeRow>>,

    info_axis: AxisBuilder,
    format_axis: AxisBuilder,
    filter_axis: AxisBuilder,
    info_containers: Vec<DataContainer>,
    format_containers: Vec<DataContainer>,

    bins: BTreeSet<u32>,
    min_pos: u64,
    max_end: u64,
}

/// A block ready for the writer thread: the serialized-form block plus the
/// index information only the writer may apply.
#[derive(Debug)]
pub struct FinishedBlock {
    pub block_id: u32,
    pub block: VariantBlock,
    /// `byte_offset`/`byte_length` are filled in by the writer.
    pub entry: IndexEntry,
    pub bins: Vec<u32>,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(schema: &'a Schema, block_id: u32, permute: bool) -> Self {
        Self {
            schema,
            block_id,
            permute,
            contig_id: None,
            geometry: None,
            metas: vec![],
            rows: vec![],
            info_axis: AxisBuilder::default(),
            format_axis: AxisBuilder::default(),
            filter_axis: AxisBuilder::default(),
            info_containers: vec![],
            format_containers: vec![],
            bins: BTreeSet::new(),
            min_pos: u64::MAX,
            max_end: 0,
        }
    }

    pub fn n_records(&self) -> usize {
        self.metas.len()
    }

    pub fn add(&mut self, record: Record) -> Result<()> {
        self.schema
            .validate_record(&record)
            .map_err(|e| Error::FormatIncompatible(e.to_string()))?;
        if let Some(row) = &record.genotypes {
            genotype::check_packing_limit(row.ploidy, record.n_alleles())?;
        }
        match self.contig_id {
            None => {
                let contig = self.schema.contig(record.contig_id).expect("validated");
                self.contig_id = Some(record.contig_id);
                self.geometry = Some(ContigGeometry::new(contig.length));
            }
            Some(id) => assert_eq!(id, record.contig_id, "block spans multiple contigs"),
        }

        let Record {
            contig_id: _,
            position,
            quality,
            name,
            alleles,
            filter_keys,
            info,
            format,
            genotypes,
        } = record;

        // INFO values go to their per-key containers right away; only the
        // pattern id is kept on the record.
        let mut wire_order = Vec::with_capacity(info.len());
        for (key, value) in &info {
            let slot = self.info_axis.key_slot(*key);
            if slot == self.info_containers.len() {
                self.info_containers
                    .push(DataContainer::with_key(*key as i32));
            }
            let container = &mut self.info_containers[slot];
            match value {
                FieldValue::Flag => container.mark_flag(),
                FieldValue::Int(values) => {
                    for &v in values {
                        container.add_int(v as i64);
                    }
                }
                FieldValue::Float(values) => {
                    for &v in values {
                        container.add_f32_bits(v.to_bits());
                    }
                }
                FieldValue::Str(bytes) => container.add_bytes(bytes),
            }
            container.add_stride(value.stride() as u32);
            wire_order.push(*key);
        }
        let info_pattern = self.info_axis.intern(&wire_order);

        let mut wire_order = Vec::with_capacity(format.len());
        for (key, column) in &format {
            let slot = self.format_axis.key_slot(*key);
            if slot == self.format_containers.len() {
                self.format_containers
                    .push(DataContainer::with_key(*key as i32));
            }
            let container = &mut self.format_containers[slot];
            match &column.values {
                FormatValues::Int(values) => {
                    for &v in values {
                        container.add_int(v as i64);
                    }
                }
                FormatValues::Float(values) => {
                    for &v in values {
                        container.add_f32_bits(v.to_bits());
                    }
                }
                FormatValues::Str(bytes) => container.add_bytes(bytes),
            }
            container.add_stride(column.stride as u32);
            wire_order.push(*key);
        }
        let format_pattern = self.format_axis.intern(&wire_order);

        for &key in &filter_keys {
            self.filter_axis.key_slot(key);
        }
        let filter_pattern = self.filter_axis.intern(&filter_keys);

        // Index placement: simple SNV/indel alleles stretch the interval,
        // symbolic alleles index by their left edge only.
        let longest = alleles
            .iter()
            .filter(|a| !a.is_empty() && a.iter().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T')))
            .map(|a| a.len() as u64)
            .max()
            .unwrap_or(0);
        let reach = longest.max(alleles.first().map_or(0, |a| a.len() as u64)).max(1);
        let end = position + reach - 1;
        let geometry = self.geometry.expect("geometry set with the contig");
        self.bins.insert(geometry.deepest_bin(position, end));
        self.min_pos = self.min_pos.min(position);
        self.max_end = self.max_end.max(end);

        let packed = pack_ref_alt(&alleles);
        self.metas.push(RecordMeta {
            position,
            quality,
            name,
            alleles,
            packed,
            info_pattern,
            format_pattern,
            filter_pattern,
        });
        self.rows.push(genotypes);
        Ok(())
    }

    pub fn finish(mut self, manager: &CompressionManager) -> Result<FinishedBlock> {
        let n_samples = self.schema.n_samples();
        let n_records = self.metas.len();
        let has_gt = self.rows.iter().any(|r| r.is_some());

        // Pass 1: the permutation array, one radix pass per genotype row.
        let mut permuter = None;
        if has_gt && self.permute && n_samples > 1 {
            let mut p = Permuter::new(n_samples);
            for (meta, row) in self.metas.iter().zip(&self.rows) {
                if let Some(row) = row {
                    p.update(row, meta.alleles.len())?;
                }
            }
            permuter = Some(p);
        }

        let mut block = VariantBlock::new();

        // Pass 2: encode genotype rows over the permuted order.
        let mut controllers = Vec::with_capacity(n_records);
        let mut payload = vec![];
        for (meta, row) in self.metas.iter().zip(&self.rows) {
            let mut controller = RecordController::default();
            controller.set_has_name(meta.name.is_some());
            controller.set_has_quality(meta.quality.is_some());
            controller.set_alleles_packed(meta.packed.is_some());
            controller.set_biallelic(meta.alleles.len() == 2);

            if let Some(row) = row {
                payload.clear();
                let ppa = permuter.as_ref().map(|p| p.ppa());
                let enc = genotype::encode_row(row, meta.alleles.len(), ppa, &mut payload)?;

                controller.set_gt_available(true);
                controller.set_diploid(row.ploidy == 2);
                controller.set_gt_mixed_phasing(enc.mixed_phasing);
                controller.set_gt_phase_uniform(enc.uniform_phase);
                controller.set_gt_has_missing(enc.has_missing);
                controller.set_gt_has_eov(enc.has_eov);
                controller.set_gt_family(enc.family);
                controller.set_gt_width(enc.width);

                let slot = block.slot_mut(BaseSlot::for_genotypes(enc.family, enc.width));
                slot.add_bytes(&payload);
                slot.add_stride(payload.len() as u32);

                let support = block.slot_mut(BaseSlot::GtSupport);
                support.add_int(enc.n_runs as i64);
                support.add_stride(1);

                let ploidy = block.slot_mut(BaseSlot::GtPloidy);
                ploidy.add_int(row.ploidy as i64);
                ploidy.add_stride(1);
            }
            controllers.push(controller);
        }

        // Pass 3: interleave the buffered meta out to the base columns.
        let contig_id = self.contig_id.unwrap_or(0);
        for (meta, controller) in self.metas.iter().zip(&controllers) {
            let c = block.slot_mut(BaseSlot::Contig);
            c.add_int(contig_id as i64);
            c.add_stride(1);

            let c = block.slot_mut(BaseSlot::Position);
            c.add_int(meta.position as i64);
            c.add_stride(1);

            let c = block.slot_mut(BaseSlot::Controller);
            c.add_int(controller.0 as i64);
            c.add_stride(1);

            let c = block.slot_mut(BaseSlot::Quality);
            c.add_f32_bits(meta.quality.map(f32::to_bits).unwrap_or(QUALITY_MISSING_BITS));
            c.add_stride(1);

            let c = block.slot_mut(BaseSlot::Names);
            let name = meta.name.as_deref().unwrap_or("");
            c.add_bytes(name.as_bytes());
            c.add_stride(name.len() as u32);

            match meta.packed {
                Some(byte) => {
                    let c = block.slot_mut(BaseSlot::RefAlt);
                    c.add_int(byte as i64);
                    c.add_stride(1);
                }
                None => {
                    let c = block.slot_mut(BaseSlot::Alleles);
                    for allele in &meta.alleles {
                        c.add_bytes(&(allele.len() as u16).to_le_bytes());
                        c.add_bytes(allele);
                    }
                    c.add_stride(meta.alleles.len() as u32);
                }
            }

            for (slot, pattern) in [
                (BaseSlot::IdFilter, meta.filter_pattern),
                (BaseSlot::IdFormat, meta.format_pattern),
                (BaseSlot::IdInfo, meta.info_pattern),
            ] {
                let c = block.slot_mut(slot);
                c.add_int(pattern as i64);
                c.add_stride(1);
            }
        }

        // The permutation array itself.
        if let Some(permuter) = &permuter {
            let mut c = DataContainer::default();
            for &sample in permuter.ppa() {
                c.add_int(sample as i64);
            }
            c.add_stride(n_samples as u32);
            block.ppa = Some(c);
        }

        block.info = std::mem::take(&mut self.info_containers);
        block.format = std::mem::take(&mut self.format_containers);
        block.footer.info_axis = self.info_axis.table();
        block.footer.format_axis = self.format_axis.table();
        block.footer.filter_axis = self.filter_axis.table();

        // Finalize every container, then hand them to the codec.
        let finalize = |c: &mut DataContainer| -> Result<()> {
            if c.is_empty() {
                return Ok(());
            }
            c.finalize_primitive();
            c.finalize_uniformity();
            c.set_checksums();
            manager.compress_container(c)
        };
        if let Some(ppa) = &mut block.ppa {
            finalize(ppa)?;
        }
        for c in &mut block.base {
            finalize(c)?;
        }
        for c in block.info.iter_mut().chain(block.format.iter_mut()) {
            finalize(c)?;
        }

        let min_pos = if n_records == 0 { 0 } else { self.min_pos };
        block.header = BlockHeader {
            contig_id,
            min_pos,
            max_pos: self.max_end,
            n_variants: n_records as u32,
            has_gt,
            has_gt_permuted: permuter.is_some(),
            any_encrypted: false,
            l_body: 0,
        };

        let bins: Vec<u32> = self.bins.iter().copied().collect();
        let entry = IndexEntry {
            block_id: self.block_id,
            contig_id,
            min_pos,
            max_pos: self.max_end,
            min_bin: bins.first().copied().unwrap_or(0),
            max_bin: bins.last().copied().unwrap_or(0),
            n_variants: n_records as u32,
            byte_offset: 0,
            byte_length: 0,
        };

        log::debug!(
            "finalized block {}: {} records on contig {} ({} info, {} format streams)",
            self.block_id,
            n_records,
            contig_id,
            block.info.len(),
            block.format.len(),
        );

        Ok(FinishedBlock {
            block_id: self.block_id,
            block,
            entry,
            bins,
        })
    }
}

/// Diploid single-byte alleles in the packed alphabet collapse to one byte:
/// low nibble reference, high nibble alternate.
fn pack_ref_alt(alleles: &[Vec<u8>]) -> Option<u8> {
    match alleles {
        [reference, alternate] => {
            let r = pack_allele_nibble(reference)?;
            let a = pack_allele_nibble(alternate)?;
            Some((a << 4) | r)
        }
        _ => None,
    }
}
