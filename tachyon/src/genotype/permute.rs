use varcore::{GenotypeRow, gt};

use super::allele_shift;
use crate::error::Result;

/// Diploid-biallelic states pack to a nibble `(first << 2) | second` with
/// allele symbols {0 = ref, 1 = alt, 2 = missing}; the nibble is binned so
/// the most common state (0/0) sorts first.
const DIPLOID_BIALLELIC_BIN: [u8; 11] = [
    0, // 0/0
    3, // 0/1
    4, // 0/.
    u8::MAX,
    2, // 1/0
    1, // 1/1
    5, // 1/.
    u8::MAX,
    6, // ./0
    7, // ./1
    8, // ./.
];

/// Maintains the block's sample permutation array (PPA): one radix pass per
/// record, in place, over the current permutation order.
#[derive(Debug)]
pub struct Permuter {
    ppa: Vec<u32>,
    scratch: Vec<u32>,
    states: Vec<u8>,
    keys: Vec<(u64, u32)>,
    updates: u64,
}

impl Permuter {
    pub fn new(n_samples: usize) -> Self {
        Self {
            ppa: (0..n_samples as u32).collect(),
            scratch: vec![0; n_samples],
            states: vec![0; n_samples],
            keys: Vec::with_capacity(n_samples),
            updates: 0,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.ppa.len()
    }
    pub fn ppa(&self) -> &[u32] {
        &self.ppa
    }
    /// Whether any record actually contributed a pass.
    pub fn touched(&self) -> bool {
        self.updates > 0
    }

    pub fn update(&mut self, row: &GenotypeRow, n_alleles: usize) -> Result<()> {
        super::check_packing_limit(row.ploidy, n_alleles)?;
        if self.ppa.len() < 2 {
            return Ok(());
        }

        let hot = row.ploidy == 2
            && n_alleles == 2
            && row.bytes.iter().all(|&b| gt::code(b) != gt::EOV && gt::code(b) <= 3);
        if hot {
            self.update_diploid_biallelic(row);
        } else {
            self.update_general(row, n_alleles);
        }
        self.updates += 1;
        Ok(())
    }

    /// 9-state counting pass over the packed diploid nibbles.
    fn update_diploid_biallelic(&mut self, row: &GenotypeRow) {
        let unpack = |byte: u8| match gt::code(byte) {
            gt::MISSING => 2u8,
            code => code - 2,
        };
        for (j, &sample) in self.ppa.iter().enumerate() {
            let pair = row.sample(sample as usize);
            let packed = (unpack(pair[0]) << 2) | unpack(pair[1]);
            self.states[j] = DIPLOID_BIALLELIC_BIN[packed as usize];
        }

        let mut counts = [0u32; 9];
        for &state in &self.states {
            counts[state as usize] += 1;
        }
        let mut offsets = [0u32; 9];
        let mut total = 0;
        for (bin, &count) in counts.iter().enumerate() {
            offsets[bin] = total;
            total += count;
        }
        debug_assert_eq!(total as usize, self.ppa.len());

        for (j, &sample) in self.ppa.iter().enumerate() {
            let bin = self.states[j] as usize;
            self.scratch[offsets[bin] as usize] = sample;
            offsets[bin] += 1;
        }
        std::mem::swap(&mut self.ppa, &mut self.scratch);
    }

    /// General path: stable sort of the current permutation by the packed
    /// base-(n_alleles + 2) tuple integer.
    fn update_general(&mut self, row: &GenotypeRow, n_alleles: usize) {
        let shift = allele_shift(n_alleles);
        self.keys.clear();
        for &sample in &self.ppa {
            let mut key = 0u64;
            for &byte in row.sample(sample as usize) {
                key = (key << shift) | gt::code(byte) as u64;
            }
            self.keys.push((key, sample));
        }
        self.keys.sort_by_key(|&(key, _)| key);
        for (slot, &(_, sample)) in self.ppa.iter_mut().zip(&self.keys) {
            *slot = sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_bijection(ppa: &[u32]) -> bool {
        let mut seen = vec![false; ppa.len()];
        for &p in ppa {
            if seen[p as usize] {
                return false;
            }
            seen[p as usize] = true;
        }
        true
    }

    #[test]
    fn groups_identical_columns() {
        // Samples 0 and 2 always 0/0, samples 1 and 3 always 1/1.
        let row = GenotypeRow::diploid(&[
            (Some(0), Some(0), false),
            (Some(1), Some(1), false),
            (Some(0), Some(0), false),
            (Some(1), Some(1), false),
        ]);
        let mut permuter = Permuter::new(4);
        for _ in 0..3 {
            permuter.update(&row, 2).unwrap();
        }
        assert_eq!(permuter.ppa(), &[0, 2, 1, 3]);
        assert!(is_bijection(permuter.ppa()));
    }

    #[test]
    fn repeated_passes_stay_bijective() {
        let rows = [
            GenotypeRow::diploid(&[
                (Some(0), Some(1), true),
                (None, None, false),
                (Some(1), Some(1), true),
                (Some(0), Some(0), true),
                (Some(1), Some(0), false),
            ]),
            GenotypeRow::diploid(&[
                (Some(2), Some(0), false),
                (Some(0), Some(0), false),
                (Some(2), Some(2), false),
                (None, Some(1), false),
                (Some(0), Some(0), false),
            ]),
        ];
        let mut permuter = Permuter::new(5);
        permuter.update(&rows[0], 2).unwrap();
        assert!(is_bijection(permuter.ppa()));
        permuter.update(&rows[1], 3).unwrap();
        assert!(is_bijection(permuter.ppa()));
    }

    #[test]
    fn missing_states_sort_after_concrete_ones() {
        let row = GenotypeRow::diploid(&[
            (None, None, false),
            (Some(0), Some(0), false),
            (Some(1), Some(1), false),
        ]);
        let mut permuter = Permuter::new(3);
        permuter.update(&row, 2).unwrap();
        assert_eq!(permuter.ppa(), &[1, 2, 0]);
    }

    #[test]
    fn single_sample_is_left_alone() {
        let row = GenotypeRow::diploid(&[(Some(0), Some(1), false)]);
        let mut permuter = Permuter::new(1);
        permuter.update(&row, 2).unwrap();
        assert_eq!(permuter.ppa(), &[0]);
    }

    #[test]
    fn polyploid_rows_take_the_general_path() {
        let row = GenotypeRow {
            ploidy: 3,
            bytes: vec![
                gt::encode(gt::allele(1), false),
                gt::encode(gt::allele(1), false),
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(0), false),
                gt::encode(gt::allele(1), false),
                gt::encode(gt::allele(1), false),
                gt::encode(gt::EOV, false),
            ],
        };
        let mut permuter = Permuter::new(3);
        permuter.update(&row, 2).unwrap();
        // 0/0/0 sorts first, then 1/1/<eov> (the sentinel ranks below any
        // concrete allele), then 1/1/0.
        assert_eq!(permuter.ppa(), &[1, 2, 0]);
        assert!(is_bijection(permuter.ppa()));
    }
}
