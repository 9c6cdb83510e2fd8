//! Threaded import and decode pipelines: bounded queues of owned batches
//! between a producer, a pool of block workers, and the single writer (or
//! collector) that owns file and index.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use crossbeam_channel::{Receiver, Sender, bounded};
use serde::{Deserialize, Serialize};
use varcore::{Record, RecordProducer, Schema};

use crate::archive::{Archive, ArchiveWriter};
use crate::block::{BlockBuilder, DecodedBlock, FinishedBlock, VariantBlock};
use crate::codec::{Codec, CompressionManager};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSettings {
    /// Records per block before a checkpoint is forced.
    pub records_per_block: usize,
    /// Block-builder workers; the writer is always a single extra thread.
    pub threads: usize,
    pub codec: Codec,
    /// Clamped to the codec's own range.
    pub compression_level: u32,
    pub permute_genotypes: bool,
}
impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            records_per_block: 5000,
            threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            codec: Codec::default(),
            compression_level: 6,
            permute_genotypes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub n_records: u64,
    pub n_blocks: u32,
}

enum WriterFeed {
    Block(Box<FinishedBlock>),
    Failed(Error),
}

/// Drain `producer` into a new archive at `path`.
///
/// Batches are cut at contig changes and at `records_per_block`, dispatched
/// to the worker pool with contiguous block ids, and written strictly in id
/// order. On failure the archive is still closed over the blocks that were
/// written in full, so the index never names a partial block, and the first
/// error is returned.
pub fn import(
    producer: &mut dyn RecordProducer,
    path: impl AsRef<Path>,
    settings: &ImportSettings,
) -> Result<ImportReport> {
    let schema = producer.schema().clone();
    let manager = CompressionManager::new(settings.codec, settings.compression_level);
    let writer = ArchiveWriter::create(path, schema.clone(), manager)?;

    let workers = settings.threads.max(1);
    let (work_tx, work_rx) = bounded::<(u32, Vec<Record>)>(workers * 2);
    let (done_tx, done_rx) = bounded::<WriterFeed>(workers * 2);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let schema = &schema;
            let permute = settings.permute_genotypes;
            scope.spawn(move || build_worker(work_rx, done_tx, schema, permute, manager));
        }
        // The scope's own copies are surrendered so the channels close when
        // the batcher and workers are done.
        drop(work_rx);
        drop(done_tx);

        let writer_handle = scope.spawn(move || drain_to_writer(done_rx, writer));

        let batch_error = dispatch_batches(producer, settings.records_per_block, &work_tx);
        drop(work_tx);

        let (report, writer_error) = match writer_handle.join() {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        match (batch_error, writer_error) {
            (None, None) => {
                log::info!(
                    "imported {} records into {} blocks",
                    report.n_records,
                    report.n_blocks
                );
                Ok(report)
            }
            // The writer saw the root cause; the batcher typically only saw
            // its queue close underneath it.
            (_, Some(e)) | (Some(e), None) => Err(e),
        }
    })
}

/// Pull records, cut same-contig batches, assign contiguous block ids.
fn dispatch_batches(
    producer: &mut dyn RecordProducer,
    records_per_block: usize,
    work_tx: &Sender<(u32, Vec<Record>)>,
) -> Option<Error> {
    let mut next_id = 0u32;
    let mut batch: Vec<Record> = vec![];
    let mut n_seen = 0u64;

    let mut dispatch = |batch: &mut Vec<Record>, next_id: &mut u32| -> bool {
        let records = std::mem::take(batch);
        let id = *next_id;
        *next_id += 1;
        work_tx.send((id, records)).is_ok()
    };

    while let Some(record) = producer.next_record() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                return Some(Error::Io(io::Error::new(
                    e.kind(),
                    format!("record {n_seen}: {e}"),
                )));
            }
        };
        n_seen += 1;
        let boundary = batch
            .last()
            .is_some_and(|last| last.contig_id != record.contig_id);
        if boundary && !dispatch(&mut batch, &mut next_id) {
            return Some(Error::Cancelled);
        }
        batch.push(record);
        if batch.len() >= records_per_block && !dispatch(&mut batch, &mut next_id) {
            return Some(Error::Cancelled);
        }
    }
    if !batch.is_empty() && !dispatch(&mut batch, &mut next_id) {
        return Some(Error::Cancelled);
    }
    None
}

/// One block-builder worker: owns each batch it takes, never emits a
/// half-built block.
fn build_worker(
    work_rx: Receiver<(u32, Vec<Record>)>,
    done_tx: Sender<WriterFeed>,
    schema: &Schema,
    permute: bool,
    manager: CompressionManager,
) {
    for (block_id, records) in work_rx.iter() {
        let mut builder = BlockBuilder::new(schema, block_id, permute);
        let finished = records
            .into_iter()
            .try_for_each(|record| builder.add(record))
            .and_then(|()| builder.finish(&manager));
        let feed = match finished {
            Ok(block) => WriterFeed::Block(Box::new(block)),
            Err(e) => WriterFeed::Failed(e),
        };
        if done_tx.send(feed).is_err() {
            // Writer is gone; cooperative cancellation.
            return;
        }
    }
}

/// The single writer thread: restores dispatch order with a reorder buffer
/// and advances file and index together.
fn drain_to_writer<W: io::Write>(
    done_rx: Receiver<WriterFeed>,
    mut writer: ArchiveWriter<W>,
) -> (ImportReport, Option<Error>) {
    let mut pending: BTreeMap<u32, Box<FinishedBlock>> = BTreeMap::new();
    let mut next_block = 0u32;
    let mut failure = None;

    'feed: for feed in done_rx.iter() {
        match feed {
            WriterFeed::Block(block) => {
                pending.insert(block.block_id, block);
                while let Some(block) = pending.remove(&next_block) {
                    if let Err(e) = writer.write_block(*block) {
                        failure = Some(e);
                        break 'feed;
                    }
                    next_block += 1;
                }
            }
            WriterFeed::Failed(e) => {
                failure = Some(e);
                break 'feed;
            }
        }
    }
    // Stop pulling so the queues unwind, but still close the archive over
    // every block written in full.
    drop(done_rx);
    drop(pending);

    let report = ImportReport {
        n_records: writer.n_variants(),
        n_blocks: writer.n_blocks(),
    };
    match writer.finish() {
        Ok(_) => (report, failure),
        Err(e) => (report, Some(failure.unwrap_or(e))),
    }
}

/// Read-side pool: one reader thread hands raw on-disk blocks to decoder
/// workers; records come back in global block order.
pub fn read_all(path: impl AsRef<Path>, threads: usize) -> Result<Vec<Record>> {
    let mut archive = Archive::open(path)?;
    let schema = archive.schema().clone();
    let entries = archive.index().blocks_in_order();
    let workers = threads.max(1);

    let (raw_tx, raw_rx) = bounded::<(u32, Vec<u8>)>(workers * 2);
    let (out_tx, out_rx) = bounded::<(u32, Result<Vec<Record>>)>(workers * 2);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let raw_rx = raw_rx.clone();
            let out_tx = out_tx.clone();
            let schema = &schema;
            scope.spawn(move || {
                for (block_id, bytes) in raw_rx.iter() {
                    let records = VariantBlock::read_from(&mut &bytes[..])
                        .and_then(|block| DecodedBlock::decode(block, schema))
                        .and_then(|decoded| decoded.records(schema));
                    if out_tx.send((block_id, records)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(raw_rx);
        drop(out_tx);

        let collector = scope.spawn(move || -> Result<Vec<Record>> {
            let mut pending: BTreeMap<u32, Result<Vec<Record>>> = BTreeMap::new();
            let mut next = 0u32;
            let mut ordered = vec![];
            for (block_id, records) in out_rx.iter() {
                pending.insert(block_id, records);
                while let Some(records) = pending.remove(&next) {
                    ordered.extend(records?);
                    next += 1;
                }
            }
            Ok(ordered)
        });

        for entry in &entries {
            let bytes = archive.read_block_bytes(entry)?;
            if raw_tx.send((entry.block_id, bytes)).is_err() {
                break;
            }
        }
        drop(raw_tx);

        match collector.join() {
            Ok(records) => records,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}
