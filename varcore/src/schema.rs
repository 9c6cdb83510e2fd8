use std::io;

use serde::{Deserialize, Serialize};

use crate::Record;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contig {
    pub name: String,
    pub length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Flag,
    Integer,
    Float,
    String,
}

/// How many values a field carries per occurrence, mirroring the `Number`
/// declaration of the source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldCardinality {
    Fixed(u16),
    Variable,
    PerAlternate,
    PerAllele,
    PerGenotype,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: String,
    pub ty: FieldType,
    pub cardinality: FieldCardinality,
}

/// Immutable description of an archive: sample names, the contig table, and
/// the INFO/FORMAT/FILTER declarations. Keys used in [`Record`]s are indices
/// into the corresponding vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub samples: Vec<String>,
    pub contigs: Vec<Contig>,
    pub info: Vec<FieldDef>,
    pub format: Vec<FieldDef>,
    pub filter: Vec<String>,
}
impl Schema {
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }
    pub fn contig(&self, id: i32) -> Option<&Contig> {
        usize::try_from(id).ok().and_then(|id| self.contigs.get(id))
    }
    pub fn contig_id(&self, name: &str) -> Option<i32> {
        self.contigs
            .iter()
            .position(|c| c.name == name)
            .map(|i| i as i32)
    }
    pub fn info_def(&self, key: u32) -> Option<&FieldDef> {
        self.info.get(key as usize)
    }
    pub fn format_def(&self, key: u32) -> Option<&FieldDef> {
        self.format.get(key as usize)
    }
}

/// Ways a record can violate the schema it claims to follow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("unknown contig id {0}")]
    UnknownContig(i32),
    #[error("position {position} beyond the end of contig {contig:?} ({length})")]
    PositionPastContigEnd {
        contig: String,
        position: u64,
        length: u64,
    },
    #[error("unknown INFO key {0}")]
    UnknownInfoKey(u32),
    #[error("unknown FORMAT key {0}")]
    UnknownFormatKey(u32),
    #[error("unknown FILTER key {0}")]
    UnknownFilterKey(u32),
    #[error("FORMAT key {key} carries {got} values, expected {expected}")]
    FormatShape {
        key: u32,
        got: usize,
        expected: usize,
    },
    #[error("genotype row of {got} bytes does not cover {samples} samples at ploidy {ploidy}")]
    GenotypeShape {
        got: usize,
        samples: usize,
        ploidy: u8,
    },
    #[error("genotypes on a record with no alleles")]
    GenotypesWithoutAlleles,
}

impl Schema {
    /// Check one record against the declarations, the producer contract the
    /// engine relies on.
    pub fn validate_record(&self, record: &Record) -> Result<(), RecordError> {
        let contig = self
            .contig(record.contig_id)
            .ok_or(RecordError::UnknownContig(record.contig_id))?;
        if record.position >= contig.length {
            return Err(RecordError::PositionPastContigEnd {
                contig: contig.name.clone(),
                position: record.position,
                length: contig.length,
            });
        }
        for (key, _) in &record.info {
            if self.info_def(*key).is_none() {
                return Err(RecordError::UnknownInfoKey(*key));
            }
        }
        for (key, column) in &record.format {
            if self.format_def(*key).is_none() {
                return Err(RecordError::UnknownFormatKey(*key));
            }
            let expected = column.stride * self.n_samples();
            if column.values.len() != expected {
                return Err(RecordError::FormatShape {
                    key: *key,
                    got: column.values.len(),
                    expected,
                });
            }
        }
        for &key in &record.filter_keys {
            if key as usize >= self.filter.len() {
                return Err(RecordError::UnknownFilterKey(key));
            }
        }
        if let Some(row) = &record.genotypes {
            if record.alleles.is_empty() {
                return Err(RecordError::GenotypesWithoutAlleles);
            }
            if row.ploidy == 0
                || self.samples.is_empty()
                || row.bytes.len() != row.ploidy as usize * self.n_samples()
            {
                return Err(RecordError::GenotypeShape {
                    got: row.bytes.len(),
                    samples: self.n_samples(),
                    ploidy: row.ploidy,
                });
            }
        }
        Ok(())
    }
}

/// The upstream record source. Implementations parse whatever their source
/// format is and hand whole records over; the engine never sees the source
/// bytes.
pub trait RecordProducer {
    fn schema(&self) -> &Schema;
    fn next_record(&mut self) -> Option<io::Result<Record>>;
}

/// Producer over an in-memory record list, used by embedders and tests.
#[derive(Debug)]
pub struct VecProducer {
    schema: Schema,
    records: std::vec::IntoIter<Record>,
}
impl VecProducer {
    pub fn new(schema: Schema, records: Vec<Record>) -> Self {
        Self {
            schema,
            records: records.into_iter(),
        }
    }
}
impl RecordProducer for VecProducer {
    fn schema(&self) -> &Schema {
        &self.schema
    }
    fn next_record(&mut self) -> Option<io::Result<Record>> {
        self.records.next().map(Ok)
    }
}
