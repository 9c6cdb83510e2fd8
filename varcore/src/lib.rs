//! Shared data model for the tachyon archive: variant records, the archive
//! schema, and the producer contract the engine consumes.

mod record;
mod schema;

pub use record::{FieldValue, FormatColumn, FormatValues, GenotypeRow, Record, gt};
pub use schema::{
    Contig, FieldCardinality, FieldDef, FieldType, RecordError, RecordProducer, Schema,
    VecProducer,
};
