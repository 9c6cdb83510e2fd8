//! Genotype permutation and run-length encoding.
//!
//! Rows are permuted by the block's sample permutation array to maximize run
//! length, then each record is encoded under one of three run-length
//! families, keyed by primitive width into dedicated containers.

mod decode;
mod encode;
mod permute;

pub use decode::{GtRecordSpec, decode_row, restore_order, verify_ppa};
pub use encode::{EncodedGenotypes, encode_row};
pub use permute::Permuter;

use varcore::{GenotypeRow, gt};

use crate::error::{Error, Result};

/// Encoding family of one record, stored in the record controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GtFamily {
    DiploidBiallelic = 0,
    DiploidNallelic = 1,
    Nploid = 2,
    /// Reserved legacy layout; never produced, rejected on read.
    DiploidBcf = 3,
}
impl GtFamily {
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => GtFamily::DiploidBiallelic,
            1 => GtFamily::DiploidNallelic,
            2 => GtFamily::Nploid,
            3 => GtFamily::DiploidBcf,
            _ => {
                return Err(Error::GenotypeStreamCorrupt(format!(
                    "unknown encoding family {code}"
                )));
            }
        })
    }
}

/// Primitive width of the run entries of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GtWidth {
    W8 = 0,
    W16 = 1,
    W32 = 2,
    W64 = 3,
}
impl GtWidth {
    pub fn bytes(self) -> usize {
        1 << self as usize
    }
    pub fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => GtWidth::W8,
            1 => GtWidth::W16,
            2 => GtWidth::W32,
            _ => GtWidth::W64,
        }
    }
}

/// Bits per allele field for a record with `n_alleles` alleles; the code
/// space reserves two sentinel symbols (missing and end-of-vector).
pub fn allele_shift(n_alleles: usize) -> u32 {
    let space = n_alleles as u64 + 2;
    u64::BITS - (space - 1).leading_zeros()
}

/// Reject rows whose packed sample tuple cannot fit one 64-bit key.
pub fn check_packing_limit(ploidy: u8, n_alleles: usize) -> Result<()> {
    let shift = allele_shift(n_alleles);
    if shift * ploidy as u32 > 64 {
        return Err(Error::ResourceExhausted(format!(
            "ploidy {ploidy} with {n_alleles} alleles exceeds the 64-bit tuple packing limit"
        )));
    }
    Ok(())
}

/// Occurrences of each concrete allele across one row, the per-record
/// summary derived from the decoded runs.
pub fn allele_counts(row: &GenotypeRow, n_alleles: usize) -> Vec<u64> {
    let mut counts = vec![0u64; n_alleles];
    for &byte in &row.bytes {
        if let Some(index) = gt::allele_index(byte) {
            counts[index as usize] += 1;
        }
    }
    counts
}

/// Aggregate genotype statistics over one or more rows: per-allele totals
/// plus occupancy per distinct (unphased) genotype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenotypeSummary {
    /// Indexed by allele; sentinels are not counted.
    pub allele_counts: Vec<u64>,
    pub missing: u64,
    /// Distinct genotypes as sorted allele-code tuples, with sample counts.
    pub genotypes: ahash::AHashMap<Vec<u8>, u64>,
}
impl GenotypeSummary {
    pub fn new(n_alleles: usize) -> Self {
        Self {
            allele_counts: vec![0; n_alleles],
            ..Self::default()
        }
    }

    pub fn add_row(&mut self, row: &GenotypeRow) {
        let ploidy = row.ploidy as usize;
        for sample in row.bytes.chunks_exact(ploidy) {
            let mut codes: Vec<u8> = sample.iter().map(|&b| gt::code(b)).collect();
            for &code in &codes {
                match code {
                    gt::MISSING => self.missing += 1,
                    gt::EOV => {}
                    _ => {
                        if let Some(slot) = self.allele_counts.get_mut(code as usize - 2) {
                            *slot += 1;
                        }
                    }
                }
            }
            // Unphased occupancy: 0/1 and 1/0 are the same genotype.
            codes.sort_unstable();
            *self.genotypes.entry(codes).or_insert(0) += 1;
        }
    }

    /// Frequency of each concrete allele among the called alleles.
    pub fn allele_frequencies(&self) -> Vec<f64> {
        let total: u64 = self.allele_counts.iter().sum();
        if total == 0 {
            return vec![0.0; self.allele_counts.len()];
        }
        self.allele_counts
            .iter()
            .map(|&c| c as f64 / total as f64)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_matches_code_space() {
        assert_eq!(allele_shift(1), 2); // {missing, eov, a0}
        assert_eq!(allele_shift(2), 2);
        assert_eq!(allele_shift(3), 3);
        assert_eq!(allele_shift(5), 3); // 7 symbols
        assert_eq!(allele_shift(14), 4);
    }

    #[test]
    fn packing_limit() {
        assert!(check_packing_limit(2, 2).is_ok());
        assert!(check_packing_limit(32, 2).is_ok());
        match check_packing_limit(33, 2) {
            Err(Error::ResourceExhausted(_)) => {}
            other => panic!("expected exhaustion, got {other:?}"),
        }
        match check_packing_limit(22, 14) {
            Err(Error::ResourceExhausted(_)) => {}
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn counts_skip_sentinels() {
        let row = GenotypeRow {
            ploidy: 2,
            bytes: vec![
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(1), false),
                gt::encode(gt::MISSING, false),
                gt::encode(gt::allele(0), false),
            ],
        };
        assert_eq!(allele_counts(&row, 2), vec![2, 1]);
    }

    #[test]
    fn summary_folds_phase_out_of_occupancy() {
        // 0|1, 1/0, 1|1, ./0 over two rows.
        let rows = [
            GenotypeRow::diploid(&[(Some(0), Some(1), true), (Some(1), Some(0), false)]),
            GenotypeRow::diploid(&[(Some(1), Some(1), true), (None, Some(0), false)]),
        ];
        let mut summary = GenotypeSummary::new(2);
        for row in &rows {
            summary.add_row(row);
        }

        assert_eq!(summary.allele_counts, vec![3, 4]);
        assert_eq!(summary.missing, 1);
        let het = summary.genotypes[&vec![gt::allele(0), gt::allele(1)]];
        assert_eq!(het, 2);
        assert_eq!(summary.genotypes[&vec![gt::allele(1), gt::allele(1)]], 1);
        assert_eq!(summary.genotypes[&vec![gt::MISSING, gt::allele(0)]], 1);

        let freqs = summary.allele_frequencies();
        assert!((freqs[0] - 3.0 / 7.0).abs() < 1e-9);
        assert!((freqs[1] - 4.0 / 7.0).abs() < 1e-9);
    }
}
