//! Tachyon: a block-structured, compressed, randomly addressable archive
//! for variant-call records.
//!
//! Records enter through a [`varcore::RecordProducer`], are grouped into
//! same-contig blocks of per-column containers, genotype-permuted and
//! run-length encoded, compressed per container, and indexed by a per-contig
//! quad tree plus linear block list. [`archive::Archive`] reads everything
//! back, by full scan or by contig interval.

pub mod archive;
pub mod block;
pub mod codec;
pub mod container;
mod error;
pub mod genotype;
pub mod index;
pub mod pipeline;
mod wire;

pub use archive::{Archive, ArchiveWriter};
pub use codec::{Codec, CompressionManager};
pub use error::{Error, Result};
pub use pipeline::{ImportReport, ImportSettings, import, read_all};
