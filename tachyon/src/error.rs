use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Every way the engine can fail. Out-of-range lookups are not errors: index
/// queries over unknown contigs or empty intervals return empty sets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    #[error("not a tachyon archive (bad magic)")]
    FormatMagicMismatch,

    #[error("unsupported format feature: {0}")]
    FormatUnsupported(String),

    #[error("archive is incompatible with the query schema: {0}")]
    FormatIncompatible(String),

    #[error("checksum mismatch in {context}")]
    ChecksumMismatch { context: String },

    #[error("block sentinel mismatch")]
    BlockSentinelMismatch,

    #[error("genotype stream corrupt: {0}")]
    GenotypeStreamCorrupt(String),

    #[error("resource limit exceeded: {0}")]
    ResourceExhausted(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn checksum(context: impl Into<String>) -> Self {
        Error::ChecksumMismatch {
            context: context.into(),
        }
    }
}
