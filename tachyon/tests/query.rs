mod common;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tachyon::block::BlockBuilder;
use tachyon::{Archive, ArchiveWriter, Codec, CompressionManager, Error, ImportSettings, import};
use varcore::{Record, VecProducer};

use common::{CHR1, CHR3, random_records, schema, snv};

fn manager() -> CompressionManager {
    CompressionManager::new(Codec::Deflate, 6)
}

/// Three blocks on chr3 spanning [999_000, 1_000_050], [1_000_050,
/// 1_000_200] and [2_000_000, 2_000_100].
fn three_block_archive() -> (tempfile::TempDir, std::path::PathBuf) {
    let schema = schema(2);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("planned.yon");

    let spans: [&[u64]; 3] = [
        &[999_000, 999_500, 1_000_050],
        &[1_000_050, 1_000_120, 1_000_200],
        &[2_000_000, 2_000_100],
    ];
    let mut writer = ArchiveWriter::create(&path, schema.clone(), manager()).unwrap();
    for (block_id, positions) in spans.iter().enumerate() {
        let mut builder = BlockBuilder::new(&schema, block_id as u32, true);
        for &position in *positions {
            builder.add(snv(CHR3, position, "A", "G")).unwrap();
        }
        writer.write_block(builder.finish(&manager()).unwrap()).unwrap();
    }
    writer.finish().unwrap();
    (dir, path)
}

#[test]
fn query_planning_returns_exactly_the_overlapping_blocks() {
    let (_dir, path) = three_block_archive();
    let archive = Archive::open(&path).unwrap();

    let hits = archive.index().find_overlap(CHR3, 1_000_000, 1_000_100);
    let ids: Vec<u32> = hits.iter().map(|e| e.block_id).collect();
    assert_eq!(ids, vec![0, 1]);

    assert!(archive.index().find_overlap(CHR3, 3_000_000, 4_000_000).is_empty());
    assert!(archive.index().find_overlap(CHR1, 999_000, 2_000_100).is_empty());
    assert!(archive.index().find_overlap(99, 0, u64::MAX).is_empty());
}

#[test]
fn index_entries_bound_their_blocks() {
    let (_dir, path) = three_block_archive();
    let mut archive = Archive::open(&path).unwrap();
    let schema = archive.schema().clone();

    for entry in archive.index().blocks_in_order() {
        let decoded = archive.load_block(&entry).unwrap();
        let records = decoded.records(&schema).unwrap();
        assert_eq!(records.len() as u32, entry.n_variants);
        for record in &records {
            assert!(entry.min_pos <= record.position);
            assert!(record.position <= entry.max_pos);
        }
    }
}

#[test]
fn queried_records_match_the_interval_predicate() {
    let schema = schema(6);
    let mut rng = SmallRng::seed_from_u64(2024);
    let mut records = random_records(&mut rng, &schema, CHR1, 400, 1_000);
    records.extend(random_records(&mut rng, &schema, CHR3, 400, 500_000));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("query.yon");
    let settings = ImportSettings {
        records_per_block: 50,
        threads: 4,
        ..ImportSettings::default()
    };
    let mut producer = VecProducer::new(schema.clone(), records.clone());
    import(&mut producer, &path, &settings).unwrap();
    let mut archive = Archive::open(&path).unwrap();

    let intervals = [
        (CHR1, "chr1", 1_000u64, 50_000u64),
        (CHR1, "chr1", 0, u64::MAX),
        (CHR3, "chr3", 600_000, 900_000),
        (CHR3, "chr3", 500_001, 500_001),
        (CHR3, "chr3", 1, 2),
    ];
    for (contig_id, contig, from, to) in intervals {
        let expected: Vec<Record> = records
            .iter()
            .filter(|r| {
                let span = r.interval();
                r.contig_id == contig_id && span.start <= to && span.end > from
            })
            .cloned()
            .collect();
        let got: Vec<Record> = archive
            .query(contig, from, to)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(got, expected, "query {contig}:{from}-{to}");
    }

    // Unknown contigs are an empty stream, not an error.
    assert_eq!(archive.query("chr17", 0, 1_000_000).count(), 0);

    // A contig-only region returns everything on that contig.
    let chr3_all: Vec<Record> = archive.query_contig("chr3").map(|r| r.unwrap()).collect();
    let expected: Vec<Record> = records
        .iter()
        .filter(|r| r.contig_id == CHR3)
        .cloned()
        .collect();
    assert_eq!(chr3_all, expected);
    assert_eq!(archive.query_contig("chrUn").count(), 0);
}

#[test]
fn schema_verification_catches_contig_drift() {
    let (_dir, path) = three_block_archive();
    let archive = Archive::open(&path).unwrap();

    assert!(archive.verify_schema(&schema(2)).is_ok());

    let mut drifted = schema(2);
    drifted.contigs[2].length += 1_000;
    match archive.verify_schema(&drifted) {
        Err(Error::FormatIncompatible(_)) => {}
        other => panic!("expected incompatible, got {other:?}"),
    }

    let mut truncated = schema(2);
    truncated.contigs.pop();
    assert!(archive.verify_schema(&truncated).is_err());
}

#[test]
fn meta_index_summarizes_contig_runs() {
    let schema = schema(2);
    let mut rng = SmallRng::seed_from_u64(5);
    let mut records = random_records(&mut rng, &schema, CHR1, 120, 1_000);
    records.extend(random_records(&mut rng, &schema, CHR3, 60, 9_000));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.yon");
    let settings = ImportSettings {
        records_per_block: 40,
        threads: 2,
        ..ImportSettings::default()
    };
    let mut producer = VecProducer::new(schema.clone(), records);
    import(&mut producer, &path, &settings).unwrap();

    let archive = Archive::open(&path).unwrap();
    let meta = archive.meta_index();
    assert_eq!(meta.spans.len(), 2);
    assert_eq!(meta.spans[0].contig_id, CHR1);
    assert_eq!(meta.spans[0].first_block, 0);
    assert_eq!(meta.spans[0].last_block, 2);
    assert_eq!(meta.spans[0].n_variants, 120);
    assert_eq!(meta.spans[1].contig_id, CHR3);
    assert_eq!(meta.spans[1].n_variants, 60);

    // Byte spans tile the block region of the file exactly.
    let entries = archive.index().blocks_in_order();
    assert_eq!(
        meta.spans[0].byte_offset + meta.spans[0].byte_length,
        meta.spans[1].byte_offset
    );
    assert_eq!(entries[0].byte_offset, meta.spans[0].byte_offset);
}

#[test]
fn pattern_membership_answers_without_materializing() {
    let schema = schema(2);
    let mut records = vec![];
    for i in 0..10u64 {
        let mut record = snv(CHR1, 100 + i, "A", "G");
        if i % 2 == 0 {
            record.info = vec![(0, varcore::FieldValue::Int(vec![7]))];
        } else {
            record.info = vec![
                (0, varcore::FieldValue::Int(vec![9])),
                (2, varcore::FieldValue::Flag),
            ];
        }
        records.push(record);
    }

    let mut builder = BlockBuilder::new(&schema, 0, true);
    for record in &records {
        builder.add(record.clone()).unwrap();
    }
    let finished = builder.finish(&manager()).unwrap();
    let decoded = tachyon::block::DecodedBlock::decode(finished.block, &schema).unwrap();

    // DP (key 0) is in both patterns, DB (key 2) only in the odd one.
    assert_eq!(decoded.info_membership(0), vec![true, true]);
    assert_eq!(decoded.info_membership(2), vec![false, true]);
    assert_eq!(decoded.info_membership(3), vec![false, false]);

    // And the bitmaps agree with the records' own pattern ids.
    assert_eq!(decoded.records(&schema).unwrap(), records);
}
