// Not every integration suite uses every helper.
#![allow(dead_code)]

use rand::prelude::*;
use rand::rngs::SmallRng;
use varcore::{
    Contig, FieldCardinality, FieldDef, FieldType, FieldValue, FormatColumn, FormatValues,
    GenotypeRow, Record, Schema,
};

pub const CHR1: i32 = 0;
pub const CHR2: i32 = 1;
pub const CHR3: i32 = 2;
pub const CHR_M: i32 = 3;

pub fn schema(n_samples: usize) -> Schema {
    let int1 = |id: &str| FieldDef {
        id: id.into(),
        ty: FieldType::Integer,
        cardinality: FieldCardinality::Fixed(1),
    };
    Schema {
        samples: (0..n_samples).map(|i| format!("S{i:04}")).collect(),
        contigs: vec![
            Contig {
                name: "chr1".into(),
                length: 248_956_422,
            },
            Contig {
                name: "chr2".into(),
                length: 242_193_529,
            },
            Contig {
                name: "chr3".into(),
                length: 198_295_559,
            },
            Contig {
                name: "chrM".into(),
                length: 16_569,
            },
        ],
        info: vec![
            int1("DP"),
            FieldDef {
                id: "AF".into(),
                ty: FieldType::Float,
                cardinality: FieldCardinality::PerAlternate,
            },
            FieldDef {
                id: "DB".into(),
                ty: FieldType::Flag,
                cardinality: FieldCardinality::Fixed(0),
            },
            FieldDef {
                id: "CULPRIT".into(),
                ty: FieldType::String,
                cardinality: FieldCardinality::Variable,
            },
        ],
        format: vec![
            int1("DP"),
            int1("GQ"),
            FieldDef {
                id: "AD".into(),
                ty: FieldType::Integer,
                cardinality: FieldCardinality::PerAllele,
            },
        ],
        filter: vec!["PASS".into(), "LowQual".into(), "q10".into()],
    }
}

pub fn snv(contig_id: i32, position: u64, reference: &str, alternate: &str) -> Record {
    Record {
        contig_id,
        position,
        quality: None,
        name: None,
        alleles: vec![reference.as_bytes().to_vec(), alternate.as_bytes().to_vec()],
        filter_keys: vec![],
        info: vec![],
        format: vec![],
        genotypes: None,
    }
}

/// A record with every axis populated, shaped by the rng.
pub fn random_record(
    rng: &mut SmallRng,
    schema: &Schema,
    contig_id: i32,
    position: u64,
) -> Record {
    let n_samples = schema.n_samples();
    const BASES: [&str; 4] = ["A", "C", "G", "T"];

    let n_alleles: usize = match rng.random_range(0..10) {
        0..7 => 2,
        7..9 => 3,
        _ => 5,
    };
    let mut alleles: Vec<Vec<u8>> = vec![];
    alleles.push(if rng.random_bool(0.85) {
        BASES.choose(rng).unwrap().as_bytes().to_vec()
    } else {
        let len = rng.random_range(2..6);
        (0..len)
            .map(|_| BASES.choose(rng).unwrap().as_bytes()[0])
            .collect()
    });
    for _ in 1..n_alleles {
        alleles.push(BASES.choose(rng).unwrap().as_bytes().to_vec());
    }

    let mut info = vec![];
    if rng.random_bool(0.8) {
        info.push((0, FieldValue::Int(vec![rng.random_range(0..10_000)])));
    }
    if rng.random_bool(0.5) {
        let afs = (1..n_alleles).map(|_| rng.random::<f32>()).collect();
        info.push((1, FieldValue::Float(afs)));
    }
    if rng.random_bool(0.3) {
        info.push((2, FieldValue::Flag));
    }
    if rng.random_bool(0.2) {
        info.push((3, FieldValue::Str(b"HaplotypeScore".to_vec())));
    }

    let mut format = vec![];
    if rng.random_bool(0.7) {
        format.push((
            0,
            FormatColumn {
                stride: 1,
                values: FormatValues::Int(
                    (0..n_samples).map(|_| rng.random_range(0..500)).collect(),
                ),
            },
        ));
    }
    if rng.random_bool(0.4) {
        format.push((
            2,
            FormatColumn {
                stride: n_alleles,
                values: FormatValues::Int(
                    (0..n_samples * n_alleles)
                        .map(|_| rng.random_range(0..200))
                        .collect(),
                ),
            },
        ));
    }

    let genotypes = if rng.random_bool(0.9) {
        let phased = rng.random_bool(0.5);
        let calls: Vec<_> = (0..n_samples)
            .map(|_| {
                if rng.random_bool(0.05) {
                    (None, None, phased)
                } else {
                    let a = rng.random_range(0..n_alleles as u8);
                    let b = rng.random_range(0..n_alleles as u8);
                    (Some(a), Some(b), phased)
                }
            })
            .collect();
        Some(GenotypeRow::diploid(&calls))
    } else {
        None
    };

    let mut filter_keys = vec![];
    if rng.random_bool(0.8) {
        filter_keys.push(0);
    } else {
        filter_keys.push(1);
        if rng.random_bool(0.3) {
            filter_keys.push(2);
        }
    }

    Record {
        contig_id,
        position,
        quality: rng.random_bool(0.8).then(|| rng.random_range(0.0..4000.0)),
        name: rng
            .random_bool(0.2)
            .then(|| format!("rs{}", rng.random_range(1..100_000_000))),
        alleles,
        filter_keys,
        info,
        format,
        genotypes,
    }
}

/// Sorted same-contig records with strictly increasing positions.
pub fn random_records(
    rng: &mut SmallRng,
    schema: &Schema,
    contig_id: i32,
    n: usize,
    start: u64,
) -> Vec<Record> {
    random_records_stepped(rng, schema, contig_id, n, start, 5_000)
}

pub fn random_records_stepped(
    rng: &mut SmallRng,
    schema: &Schema,
    contig_id: i32,
    n: usize,
    start: u64,
    max_step: u64,
) -> Vec<Record> {
    let mut position = start;
    (0..n)
        .map(|_| {
            position += rng.random_range(1..max_step);
            random_record(rng, schema, contig_id, position)
        })
        .collect()
}
