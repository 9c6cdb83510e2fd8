use varcore::GenotypeRow;

use super::{GtFamily, GtWidth, allele_shift};
use crate::container::ValueCursor;
use crate::error::{Error, Result};

/// Everything the decoder needs about one record, recovered from the record
/// controller and the support container.
#[derive(Debug, Clone, Copy)]
pub struct GtRecordSpec {
    pub family: GtFamily,
    pub width: GtWidth,
    pub mixed_phasing: bool,
    pub uniform_phase: bool,
    pub ploidy: u8,
    pub n_alleles: usize,
    pub n_runs: u32,
}

/// Decode one record from its width-specific stream; the returned row is in
/// permuted sample order.
pub fn decode_row(
    spec: &GtRecordSpec,
    n_samples: usize,
    data: &mut ValueCursor<'_>,
) -> Result<GenotypeRow> {
    let ploidy = spec.ploidy as usize;
    let mut bytes = Vec::with_capacity(ploidy * n_samples);
    let mut total = 0u64;

    match spec.family {
        GtFamily::DiploidBcf => {
            return Err(Error::FormatUnsupported(
                "legacy BCF-style genotype encoding".into(),
            ));
        }
        GtFamily::Nploid => {
            for _ in 0..spec.n_runs {
                let run = read_entry(data, spec.width)?;
                let tuple = data.take(ploidy)?;
                for _ in 0..run {
                    bytes.extend_from_slice(tuple);
                }
                total += run;
            }
        }
        GtFamily::DiploidBiallelic | GtFamily::DiploidNallelic => {
            let shift = match spec.family {
                GtFamily::DiploidBiallelic => 1,
                _ => allele_shift(spec.n_alleles),
            };
            let add = spec.mixed_phasing as u32;
            let mask = (1u64 << shift) - 1;
            for _ in 0..spec.n_runs {
                let v = read_entry(data, spec.width)?;
                let phase = if add == 1 {
                    v & 1 != 0
                } else {
                    spec.uniform_phase
                };
                let a_field = (v >> add) & mask;
                let b_field = (v >> (add + shift)) & mask;
                let run = v >> (2 * shift + add);

                let code = |field: u64| match spec.family {
                    GtFamily::DiploidBiallelic => field as u8 + 2,
                    _ => field as u8,
                };
                let a = (code(a_field) << 1) | phase as u8;
                let b = (code(b_field) << 1) | phase as u8;
                for _ in 0..run {
                    bytes.push(a);
                    bytes.push(b);
                }
                total += run;
            }
        }
    }

    if total != n_samples as u64 {
        return Err(Error::GenotypeStreamCorrupt(format!(
            "run lengths cover {total} samples, expected {n_samples}"
        )));
    }
    Ok(GenotypeRow {
        ploidy: spec.ploidy,
        bytes,
    })
}

fn read_entry(data: &mut ValueCursor<'_>, width: GtWidth) -> Result<u64> {
    let bytes = data.take(width.bytes())?;
    let mut scratch = [0u8; 8];
    scratch[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(scratch))
}

/// Undo the block permutation: sample `i` of the permuted row is sample
/// `ppa[i]` of the original order.
pub fn restore_order(permuted: &GenotypeRow, ppa: &[u32]) -> GenotypeRow {
    let ploidy = permuted.ploidy as usize;
    let mut bytes = vec![0u8; permuted.bytes.len()];
    for (i, &target) in ppa.iter().enumerate() {
        let target = target as usize;
        bytes[target * ploidy..(target + 1) * ploidy]
            .copy_from_slice(&permuted.bytes[i * ploidy..(i + 1) * ploidy]);
    }
    GenotypeRow {
        ploidy: permuted.ploidy,
        bytes,
    }
}

/// A permutation array read from disk must be a bijection over the sample
/// space before it is trusted.
pub fn verify_ppa(ppa: &[u32], n_samples: usize) -> Result<()> {
    if ppa.len() != n_samples {
        return Err(Error::GenotypeStreamCorrupt(format!(
            "permutation array covers {} samples, expected {n_samples}",
            ppa.len()
        )));
    }
    let mut seen = vec![false; n_samples];
    for &p in ppa {
        match seen.get_mut(p as usize) {
            Some(slot @ false) => *slot = true,
            _ => {
                return Err(Error::GenotypeStreamCorrupt(
                    "permutation array is not a bijection".into(),
                ));
            }
        }
    }
    Ok(())
}
