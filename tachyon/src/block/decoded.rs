use varcore::{FieldType, FieldValue, FormatColumn, FormatValues, Record, Schema};

use super::{
    BaseSlot, N_BASE_SLOTS, QUALITY_MISSING_BITS, RecordController, VariantBlock,
    allele_from_nibble,
};
use crate::codec::decompress_container;
use crate::container::ValueCursor;
use crate::error::{Error, Result};
use crate::genotype::{self, GtRecordSpec};

/// A block with every container decompressed, checksum-verified and
/// uniform-expanded, ready to stream records back out.
#[derive(Debug)]
pub struct DecodedBlock {
    pub block: VariantBlock,
    ppa: Option<Vec<u32>>,
}

impl DecodedBlock {
    pub fn decode(mut block: VariantBlock, schema: &Schema) -> Result<Self> {
        if let Some(ppa) = &mut block.ppa {
            decompress_container(ppa, "sample permutation array")?;
        }
        for (slot, container) in block.base.iter_mut().enumerate() {
            if !container.is_empty() {
                decompress_container(container, &format!("base container {slot}"))?;
            }
        }
        for container in &mut block.info {
            let context = format!("info container (key {})", container.header.global_key);
            decompress_container(container, &context)?;
        }
        for container in &mut block.format {
            let context = format!("format container (key {})", container.header.global_key);
            decompress_container(container, &context)?;
        }

        let ppa = match &block.ppa {
            Some(container) => {
                let mut cursor = container.values();
                let mut ppa = Vec::with_capacity(container.n_entries() as usize);
                for _ in 0..container.n_entries() {
                    ppa.push(cursor.read_int()? as u32);
                }
                genotype::verify_ppa(&ppa, schema.n_samples())?;
                Some(ppa)
            }
            None => None,
        };

        Ok(Self { block, ppa })
    }

    pub fn n_variants(&self) -> u32 {
        self.block.header.n_variants
    }
    pub fn ppa(&self) -> Option<&[u32]> {
        self.ppa.as_deref()
    }

    /// Which of the block's interned INFO patterns carry `global_key`.
    pub fn info_membership(&self, global_key: u32) -> Vec<bool> {
        self.block.footer.info_axis.membership(global_key)
    }
    pub fn format_membership(&self, global_key: u32) -> Vec<bool> {
        self.block.footer.format_axis.membership(global_key)
    }

    /// Materialize every record in submission order.
    pub fn records(&self, schema: &Schema) -> Result<Vec<Record>> {
        let block = &self.block;
        let n = block.header.n_variants as usize;
        let mut out = Vec::with_capacity(n);

        let mut base: Vec<ValueCursor> = (0..N_BASE_SLOTS)
            .map(|slot| block.base[slot].values())
            .collect();
        let mut info_cursors: Vec<ValueCursor> = block.info.iter().map(|c| c.values()).collect();
        let mut info_seen = vec![0usize; block.info.len()];
        let mut format_cursors: Vec<ValueCursor> =
            block.format.iter().map(|c| c.values()).collect();
        let mut format_seen = vec![0usize; block.format.len()];
        let mut alleles_seen = 0usize;
        let mut gt_seen = 0usize;

        for record_at in 0..n {
            let contig_id = base[BaseSlot::Contig as usize].read_int()? as i32;
            let position = base[BaseSlot::Position as usize].read_int()? as u64;
            let controller =
                RecordController(base[BaseSlot::Controller as usize].read_int()? as u16);

            let quality_bits = base[BaseSlot::Quality as usize].read_f32_bits()?;
            let quality = if quality_bits == QUALITY_MISSING_BITS {
                None
            } else {
                Some(f32::from_bits(quality_bits))
            };

            let name_len = block.slot(BaseSlot::Names).stride_of(record_at) as usize;
            let name_bytes = base[BaseSlot::Names as usize].take(name_len)?;
            let name = if controller.has_name() {
                Some(String::from_utf8_lossy(name_bytes).into_owned())
            } else {
                None
            };

            let alleles = if controller.alleles_packed() {
                let packed = base[BaseSlot::RefAlt as usize].read_int()? as u8;
                let reference = allele_from_nibble(packed & 0x0f);
                let alternate = allele_from_nibble(packed >> 4);
                match (reference, alternate) {
                    (Some(r), Some(a)) => vec![r.to_vec(), a.to_vec()],
                    _ => return Err(Error::checksum("packed ref/alt byte")),
                }
            } else {
                let n_alleles = block.slot(BaseSlot::Alleles).stride_of(alleles_seen) as usize;
                alleles_seen += 1;
                let cursor = &mut base[BaseSlot::Alleles as usize];
                let mut alleles = Vec::with_capacity(n_alleles);
                for _ in 0..n_alleles {
                    let len = u16::from_le_bytes(cursor.take(2)?.try_into().unwrap()) as usize;
                    alleles.push(cursor.take(len)?.to_vec());
                }
                alleles
            };

            let filter_pattern = base[BaseSlot::IdFilter as usize].read_int()? as i32;
            let format_pattern = base[BaseSlot::IdFormat as usize].read_int()? as i32;
            let info_pattern = base[BaseSlot::IdInfo as usize].read_int()? as i32;

            let filter_keys = pattern_wire_order(&block.footer.filter_axis, filter_pattern)?
                .unwrap_or_default();

            let mut info = vec![];
            if let Some(keys) = pattern_wire_order(&block.footer.info_axis, info_pattern)? {
                for key in keys {
                    let local = block
                        .footer
                        .info_axis
                        .local_key(key)
                        .ok_or_else(|| Error::checksum("info pattern table"))?;
                    let ty = schema
                        .info_def(key)
                        .ok_or_else(|| {
                            Error::FormatIncompatible(format!("archive uses unknown INFO key {key}"))
                        })?
                        .ty;
                    let stride = block.info[local].stride_of(info_seen[local]) as usize;
                    info_seen[local] += 1;
                    let value = read_info_value(&mut info_cursors[local], ty, stride)?;
                    info.push((key, value));
                }
            }

            let mut format = vec![];
            if let Some(keys) = pattern_wire_order(&block.footer.format_axis, format_pattern)? {
                for key in keys {
                    let local = block
                        .footer
                        .format_axis
                        .local_key(key)
                        .ok_or_else(|| Error::checksum("format pattern table"))?;
                    let ty = schema
                        .format_def(key)
                        .ok_or_else(|| {
                            Error::FormatIncompatible(format!(
                                "archive uses unknown FORMAT key {key}"
                            ))
                        })?
                        .ty;
                    let stride = block.format[local].stride_of(format_seen[local]) as usize;
                    format_seen[local] += 1;
                    let count = stride * schema.n_samples();
                    let values = read_format_values(&mut format_cursors[local], ty, count)?;
                    format.push((key, FormatColumn { stride, values }));
                }
            }

            let genotypes = if controller.gt_available() {
                let ploidy = base[BaseSlot::GtPloidy as usize].read_int()? as u8;
                let n_runs = base[BaseSlot::GtSupport as usize].read_int()? as u32;
                let family = controller.gt_family()?;
                let width = controller.gt_width();
                let spec = GtRecordSpec {
                    family,
                    width,
                    mixed_phasing: controller.gt_mixed_phasing(),
                    uniform_phase: controller.gt_phase_uniform(),
                    ploidy,
                    n_alleles: alleles.len(),
                    n_runs,
                };
                let slot = BaseSlot::for_genotypes(family, width);
                let permuted =
                    genotype::decode_row(&spec, schema.n_samples(), &mut base[slot as usize])?;
                gt_seen += 1;
                Some(match &self.ppa {
                    Some(ppa) => genotype::restore_order(&permuted, ppa),
                    None => permuted,
                })
            } else {
                None
            };

            out.push(Record {
                contig_id,
                position,
                quality,
                name,
                alleles,
                filter_keys,
                info,
                format,
                genotypes,
            });
        }

        debug_assert_eq!(
            gt_seen as u32,
            block.slot(BaseSlot::GtSupport).n_additions()
        );
        Ok(out)
    }
}

fn pattern_wire_order(
    table: &super::PatternTable,
    pattern_id: i32,
) -> Result<Option<Vec<u32>>> {
    if pattern_id < 0 {
        return Ok(None);
    }
    table
        .patterns
        .get(pattern_id as usize)
        .map(|p| Some(p.wire_order.clone()))
        .ok_or_else(|| Error::checksum("pattern dictionary id"))
}

fn read_info_value(cursor: &mut ValueCursor, ty: FieldType, stride: usize) -> Result<FieldValue> {
    Ok(match ty {
        FieldType::Flag => FieldValue::Flag,
        FieldType::Integer => {
            let mut values = Vec::with_capacity(stride);
            for _ in 0..stride {
                values.push(cursor.read_int()? as i32);
            }
            FieldValue::Int(values)
        }
        FieldType::Float => {
            let mut values = Vec::with_capacity(stride);
            for _ in 0..stride {
                values.push(f32::from_bits(cursor.read_f32_bits()?));
            }
            FieldValue::Float(values)
        }
        FieldType::String => FieldValue::Str(cursor.take(stride)?.to_vec()),
    })
}

fn read_format_values(
    cursor: &mut ValueCursor,
    ty: FieldType,
    count: usize,
) -> Result<FormatValues> {
    Ok(match ty {
        FieldType::Integer | FieldType::Flag => {
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(cursor.read_int()? as i32);
            }
            FormatValues::Int(values)
        }
        FieldType::Float => {
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(f32::from_bits(cursor.read_f32_bits()?));
            }
            FormatValues::Float(values)
        }
        FieldType::String => FormatValues::Str(cursor.take(count)?.to_vec()),
    })
}
