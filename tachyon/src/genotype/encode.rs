use varcore::{GenotypeRow, gt};

use super::{GtFamily, GtWidth, allele_shift, check_packing_limit};
use crate::error::{Error, Result};

/// Controller-facing description of one encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedGenotypes {
    pub family: GtFamily,
    pub width: GtWidth,
    pub mixed_phasing: bool,
    /// The shared phase when `mixed_phasing` is false.
    pub uniform_phase: bool,
    pub has_missing: bool,
    pub has_eov: bool,
    pub n_runs: u32,
}

struct Run {
    length: u64,
    /// First sample of the run, as raw genotype bytes.
    tuple_at: usize,
}

/// Encode one row over the permuted sample order (`ppa` is `None` when the
/// block carries no permutation). Appends the run entries to `payload` and
/// returns the controller description.
pub fn encode_row(
    row: &GenotypeRow,
    n_alleles: usize,
    ppa: Option<&[u32]>,
    payload: &mut Vec<u8>,
) -> Result<EncodedGenotypes> {
    check_packing_limit(row.ploidy, n_alleles)?;
    let n_samples = row.n_samples();
    debug_assert!(n_samples > 0);
    if let Some(ppa) = ppa {
        debug_assert_eq!(ppa.len(), n_samples);
    }

    let ploidy = row.ploidy as usize;
    let sample_at = |i: usize| -> &[u8] {
        let s = ppa.map(|p| p[i] as usize).unwrap_or(i);
        row.sample(s)
    };

    // One scan for the state bits that pick the family.
    let mut has_missing = false;
    let mut has_eov = false;
    let mut phase_consistent = true;
    let mut mixed_phasing = false;
    let first_phase = gt::phased(sample_at(0)[0]);
    for i in 0..n_samples {
        let tuple = sample_at(i);
        let phase = gt::phased(tuple[0]);
        for &byte in tuple {
            match gt::code(byte) {
                gt::MISSING => has_missing = true,
                gt::EOV => has_eov = true,
                _ => {}
            }
            if gt::phased(byte) != phase {
                phase_consistent = false;
            }
        }
        if phase != first_phase {
            mixed_phasing = true;
        }
    }

    let family = if row.ploidy != 2 || !phase_consistent {
        GtFamily::Nploid
    } else if n_alleles == 2 && !has_missing && !has_eov {
        GtFamily::DiploidBiallelic
    } else {
        GtFamily::DiploidNallelic
    };

    // Maximal runs of identical sample tuples (phase included).
    let mut runs: Vec<Run> = vec![];
    let mut i = 0;
    while i < n_samples {
        let tuple = sample_at(i);
        let mut j = i + 1;
        while j < n_samples && sample_at(j) == tuple {
            j += 1;
        }
        runs.push(Run {
            length: (j - i) as u64,
            tuple_at: i,
        });
        i = j;
    }
    let max_run = runs.iter().map(|r| r.length).max().unwrap_or(0);

    let encoded = match family {
        GtFamily::Nploid => {
            let width = nploid_width(max_run);
            for run in &runs {
                payload.extend_from_slice(&run.length.to_le_bytes()[..width.bytes()]);
                payload.extend_from_slice(sample_at(run.tuple_at));
            }
            EncodedGenotypes {
                family,
                width,
                mixed_phasing: false,
                uniform_phase: false,
                has_missing,
                has_eov,
                n_runs: runs.len() as u32,
            }
        }
        GtFamily::DiploidBiallelic | GtFamily::DiploidNallelic => {
            let shift = match family {
                GtFamily::DiploidBiallelic => 1,
                _ => allele_shift(n_alleles),
            };
            let add = mixed_phasing as u32;
            let value_bits = 2 * shift + add;
            let width = diploid_width(max_run, value_bits)?;

            for run in &runs {
                let tuple = sample_at(run.tuple_at);
                let phase = gt::phased(tuple[0]) as u64;
                let field = |byte: u8| -> u64 {
                    match family {
                        // Biallelic rows carry only concrete alleles.
                        GtFamily::DiploidBiallelic => (gt::code(byte) - 2) as u64,
                        _ => gt::code(byte) as u64,
                    }
                };
                let mut v = run.length << value_bits;
                v |= field(tuple[1]) << (shift + add);
                v |= field(tuple[0]) << add;
                if add == 1 {
                    v |= phase;
                }
                payload.extend_from_slice(&v.to_le_bytes()[..width.bytes()]);
            }
            EncodedGenotypes {
                family,
                width,
                mixed_phasing,
                uniform_phase: !mixed_phasing && first_phase,
                has_missing,
                has_eov,
                n_runs: runs.len() as u32,
            }
        }
        GtFamily::DiploidBcf => unreachable!(),
    };
    Ok(encoded)
}

fn nploid_width(max_run: u64) -> GtWidth {
    match max_run {
        _ if max_run <= u8::MAX as u64 => GtWidth::W8,
        _ if max_run <= u16::MAX as u64 => GtWidth::W16,
        _ if max_run <= u32::MAX as u64 => GtWidth::W32,
        _ => GtWidth::W64,
    }
}

/// Smallest width whose run-length field holds `max_run` next to
/// `value_bits` of allele and phase data.
fn diploid_width(max_run: u64, value_bits: u32) -> Result<GtWidth> {
    for width in [GtWidth::W8, GtWidth::W16, GtWidth::W32, GtWidth::W64] {
        let total_bits = width.bytes() as u32 * 8;
        if total_bits <= value_bits {
            continue;
        }
        let run_bits = total_bits - value_bits;
        if run_bits >= 64 || max_run <= (1u64 << run_bits) - 1 {
            return Ok(width);
        }
    }
    Err(Error::ResourceExhausted(format!(
        "run of {max_run} samples cannot be packed next to {value_bits} value bits"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn biallelic_phased_pair() {
        // `0|1  1|1`
        let row = GenotypeRow::diploid(&[(Some(0), Some(1), true), (Some(1), Some(1), true)]);
        let mut payload = vec![];
        let enc = encode_row(&row, 2, None, &mut payload).unwrap();

        assert_eq!(enc.family, GtFamily::DiploidBiallelic);
        assert_eq!(enc.width, GtWidth::W8);
        assert_eq!(enc.n_runs, 2);
        assert!(!enc.mixed_phasing);
        assert!(enc.uniform_phase);
        // shift = 1, no phase bit: [run:6][B:1][A:1]
        assert_eq!(payload, vec![0b0000_0110, 0b0000_0111]);
    }

    #[test]
    fn runs_collapse_identical_columns() {
        let row = GenotypeRow::diploid(&[
            (Some(0), Some(0), false),
            (Some(0), Some(0), false),
            (Some(1), Some(1), false),
            (Some(1), Some(1), false),
        ]);
        let mut payload = vec![];
        let enc = encode_row(&row, 2, Some(&[0, 1, 2, 3]), &mut payload).unwrap();
        assert_eq!(enc.n_runs, 2);
        assert_eq!(payload.len(), 2);
        assert_eq!(payload[0] >> 2, 2); // run of two 0/0
        assert_eq!(payload[1], (2 << 2) | (1 << 1) | 1); // run of two 1/1
    }

    #[test]
    fn missing_routes_to_nallelic() {
        let row = GenotypeRow::diploid(&[(Some(0), None, false), (Some(1), Some(1), false)]);
        let mut payload = vec![];
        let enc = encode_row(&row, 2, None, &mut payload).unwrap();
        assert_eq!(enc.family, GtFamily::DiploidNallelic);
        assert!(enc.has_missing);
        // shift = 2: [run:4][B:2][A:2]
        assert_eq!(payload[0], (1 << 4) | (0 << 2) | 2);
        assert_eq!(payload[1], (1 << 4) | (3 << 2) | 3);
    }

    #[test]
    fn five_alleles_use_three_bit_fields() {
        let row = GenotypeRow::diploid(&[(Some(4), Some(2), false)]);
        let mut payload = vec![];
        let enc = encode_row(&row, 5, None, &mut payload).unwrap();
        assert_eq!(enc.family, GtFamily::DiploidNallelic);
        assert_eq!(enc.width, GtWidth::W8);
        // shift = ceil(log2(7)) = 3: [run:2][B:3][A:3]
        assert_eq!(payload[0], (1 << 6) | (4 << 3) | 6);
    }

    #[test]
    fn mixed_phasing_spends_a_bit() {
        let row = GenotypeRow::diploid(&[(Some(0), Some(1), true), (Some(0), Some(1), false)]);
        let mut payload = vec![];
        let enc = encode_row(&row, 2, None, &mut payload).unwrap();
        assert!(enc.mixed_phasing);
        assert_eq!(enc.n_runs, 2); // phase breaks the run
        // [run:5][B:1][A:1][phase:1]
        assert_eq!(payload[0], (1 << 3) | (1 << 2) | (0 << 1) | 1);
        assert_eq!(payload[1], (1 << 3) | (1 << 2) | (0 << 1) | 0);
    }

    #[test]
    fn triploid_rows_use_the_nploid_family() {
        let row = GenotypeRow {
            ploidy: 3,
            bytes: vec![
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(1), false),
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(1), false),
            ],
        };
        let mut payload = vec![];
        let enc = encode_row(&row, 2, None, &mut payload).unwrap();
        assert_eq!(enc.family, GtFamily::Nploid);
        assert_eq!(enc.n_runs, 1);
        // u8 run length + 3 raw genotype bytes.
        assert_eq!(
            payload,
            vec![
                2,
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(1), false),
            ]
        );
    }

    #[test]
    fn long_runs_widen_the_primitive() {
        let calls: Vec<_> = (0..100).map(|_| (Some(0), Some(0), false)).collect();
        let row = GenotypeRow::diploid(&calls);
        let mut payload = vec![];
        let enc = encode_row(&row, 2, None, &mut payload).unwrap();
        assert_eq!(enc.width, GtWidth::W16);
        assert_eq!(enc.n_runs, 1);
        assert_eq!(payload, (100u16 << 2).to_le_bytes().to_vec());
    }
}
