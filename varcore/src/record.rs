use serde::{Deserialize, Serialize};

/// Allele byte code space used in genotype rows.
///
/// Every genotype byte is `(code << 1) | phase` where `code` is `0` for a
/// missing call, `1` for the end-of-vector sentinel (samples with lower
/// ploidy than the record), and `allele_index + 2` otherwise. The phase bit
/// refers to the separator preceding the allele.
pub mod gt {
    pub const MISSING: u8 = 0;
    pub const EOV: u8 = 1;

    pub fn encode(code: u8, phased: bool) -> u8 {
        (code << 1) | phased as u8
    }
    pub fn allele(index: u8) -> u8 {
        index + 2
    }
    pub fn code(byte: u8) -> u8 {
        byte >> 1
    }
    pub fn phased(byte: u8) -> bool {
        byte & 1 != 0
    }
    /// Allele index carried by the byte, if it is a concrete allele.
    pub fn allele_index(byte: u8) -> Option<u8> {
        match byte >> 1 {
            MISSING | EOV => None,
            code => Some(code - 2),
        }
    }
}

/// One genotype row: `ploidy` bytes per sample, samples in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenotypeRow {
    pub ploidy: u8,
    /// `ploidy * n_samples` bytes in the code space of [`gt`].
    pub bytes: Vec<u8>,
}
impl GenotypeRow {
    pub fn n_samples(&self) -> usize {
        debug_assert_eq!(self.bytes.len() % self.ploidy as usize, 0);
        self.bytes.len() / self.ploidy as usize
    }
    pub fn sample(&self, s: usize) -> &[u8] {
        let p = self.ploidy as usize;
        &self.bytes[s * p..(s + 1) * p]
    }
    /// A diploid row from `(a, b, phased)` calls, `None` meaning missing.
    pub fn diploid(calls: &[(Option<u8>, Option<u8>, bool)]) -> Self {
        let mut bytes = Vec::with_capacity(calls.len() * 2);
        for &(a, b, phased) in calls {
            let code = |c: Option<u8>| c.map(gt::allele).unwrap_or(gt::MISSING);
            bytes.push(gt::encode(code(a), phased));
            bytes.push(gt::encode(code(b), phased));
        }
        Self { ploidy: 2, bytes }
    }
}

/// Value of one INFO field occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Presence-only field; carries no data.
    Flag,
    Int(Vec<i32>),
    Float(Vec<f32>),
    Str(Vec<u8>),
}
impl FieldValue {
    /// Number of logical elements (the container stride).
    pub fn stride(&self) -> usize {
        match self {
            FieldValue::Flag => 0,
            FieldValue::Int(v) => v.len(),
            FieldValue::Float(v) => v.len(),
            FieldValue::Str(v) => v.len(),
        }
    }
}

/// Per-sample values of one FORMAT field, flattened sample-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormatValues {
    /// `n_samples * stride` values.
    Int(Vec<i32>),
    Float(Vec<f32>),
    /// `n_samples * stride` bytes, NUL-padded per sample.
    Str(Vec<u8>),
}
impl FormatValues {
    pub fn len(&self) -> usize {
        match self {
            FormatValues::Int(v) => v.len(),
            FormatValues::Float(v) => v.len(),
            FormatValues::Str(v) => v.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One FORMAT column of a record: a fixed per-sample stride plus the
/// flattened value matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatColumn {
    pub stride: usize,
    pub values: FormatValues,
}

/// One variant site, the unit handed over by the producer and handed back by
/// the reader.
///
/// `info` and `format` preserve producer order; keys are indices into the
/// archive [`Schema`](crate::Schema). The first allele is the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub contig_id: i32,
    /// 0-based position on the contig.
    pub position: u64,
    pub quality: Option<f32>,
    pub name: Option<String>,
    pub alleles: Vec<Vec<u8>>,
    pub filter_keys: Vec<u32>,
    pub info: Vec<(u32, FieldValue)>,
    pub format: Vec<(u32, FormatColumn)>,
    pub genotypes: Option<GenotypeRow>,
}
impl Record {
    pub fn n_alleles(&self) -> usize {
        self.alleles.len()
    }
    /// Reference allele length, used for interval intersection.
    pub fn ref_len(&self) -> u64 {
        self.alleles.first().map(|a| a.len() as u64).unwrap_or(0)
    }
    /// The half-open interval this record occupies on its contig.
    pub fn interval(&self) -> std::ops::Range<u64> {
        self.position..self.position + self.ref_len().max(1)
    }
}
