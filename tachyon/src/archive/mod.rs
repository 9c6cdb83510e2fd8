//! On-disk archive layout: magic and version, compressed global header,
//! block sequence, and the serialized index at the tail.

mod reader;
mod writer;

use std::io::{self, Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};
use varcore::{Contig, FieldCardinality, FieldDef, FieldType, Schema};

pub use reader::{Archive, BlockRecords};
pub use writer::ArchiveWriter;

use crate::codec::Codec;
use crate::error::{Error, Result};

pub const MAGIC: [u8; 8] = *b"TACHYON\0";
pub const VERSION: (i32, i32, i32) = (0, 1, 0);

pub(crate) fn write_magic(w: &mut impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_i32::<LE>(VERSION.0)?;
    w.write_i32::<LE>(VERSION.1)?;
    w.write_i32::<LE>(VERSION.2)
}

pub(crate) fn read_magic(r: &mut impl Read) -> Result<(i32, i32, i32)> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(Error::FormatMagicMismatch);
    }
    let version = (
        r.read_i32::<LE>()?,
        r.read_i32::<LE>()?,
        r.read_i32::<LE>()?,
    );
    if version.0 != VERSION.0 {
        return Err(Error::FormatUnsupported(format!(
            "archive major version {} (reader supports {})",
            version.0, VERSION.0
        )));
    }
    Ok(version)
}

/// A length-prefixed, deflate-compressed section: the global header, block
/// footers and the index all share this shape. Equal lengths mean the
/// payload is stored raw.
pub(crate) fn write_compressed_section(
    w: &mut impl Write,
    plain: &[u8],
    level: u32,
) -> Result<()> {
    let coded = Codec::Deflate.compress(plain, level)?;
    let coded = if coded.len() < plain.len() {
        coded
    } else {
        plain.to_vec()
    };
    w.write_u32::<LE>(plain.len() as u32)?;
    w.write_u32::<LE>(coded.len() as u32)?;
    w.write_all(&coded)?;
    Ok(())
}

pub(crate) fn read_compressed_section(r: &mut impl Read) -> Result<Vec<u8>> {
    let u_len = r.read_u32::<LE>()? as usize;
    let c_len = r.read_u32::<LE>()? as usize;
    let mut coded = vec![0; c_len];
    r.read_exact(&mut coded)?;
    let plain = if c_len == u_len {
        coded
    } else {
        Codec::Deflate.decompress(&coded, u_len)?
    };
    if plain.len() != u_len {
        return Err(Error::checksum("compressed section length"));
    }
    Ok(plain)
}

fn write_field_def(w: &mut impl Write, def: &FieldDef) -> io::Result<()> {
    crate::wire::write_string(w, &def.id)?;
    w.write_u8(match def.ty {
        FieldType::Flag => 0,
        FieldType::Integer => 1,
        FieldType::Float => 2,
        FieldType::String => 3,
    })?;
    match def.cardinality {
        FieldCardinality::Fixed(n) => {
            w.write_u8(0)?;
            w.write_u16::<LE>(n)
        }
        FieldCardinality::Variable => w.write_u8(1),
        FieldCardinality::PerAlternate => w.write_u8(2),
        FieldCardinality::PerAllele => w.write_u8(3),
        FieldCardinality::PerGenotype => w.write_u8(4),
    }
}

fn read_field_def(r: &mut impl Read) -> io::Result<FieldDef> {
    let id = crate::wire::read_string(r)?;
    let ty = match r.read_u8()? {
        0 => FieldType::Flag,
        1 => FieldType::Integer,
        2 => FieldType::Float,
        3 => FieldType::String,
        code => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown field type code {code}"),
            ));
        }
    };
    let cardinality = match r.read_u8()? {
        0 => FieldCardinality::Fixed(r.read_u16::<LE>()?),
        1 => FieldCardinality::Variable,
        2 => FieldCardinality::PerAlternate,
        3 => FieldCardinality::PerAllele,
        4 => FieldCardinality::PerGenotype,
        code => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown cardinality code {code}"),
            ));
        }
    };
    Ok(FieldDef {
        id,
        ty,
        cardinality,
    })
}

pub(crate) fn schema_to_bytes(schema: &Schema) -> io::Result<Vec<u8>> {
    let mut out = vec![];
    let w = &mut out;
    w.write_u32::<LE>(schema.samples.len() as u32)?;
    for sample in &schema.samples {
        crate::wire::write_string(w, sample)?;
    }
    w.write_u32::<LE>(schema.contigs.len() as u32)?;
    for contig in &schema.contigs {
        crate::wire::write_string(w, &contig.name)?;
        w.write_u64::<LE>(contig.length)?;
    }
    for axis in [&schema.info, &schema.format] {
        w.write_u32::<LE>(axis.len() as u32)?;
        for def in axis {
            write_field_def(w, def)?;
        }
    }
    w.write_u32::<LE>(schema.filter.len() as u32)?;
    for filter in &schema.filter {
        crate::wire::write_string(w, filter)?;
    }
    Ok(out)
}

pub(crate) fn schema_from_bytes(bytes: &[u8]) -> io::Result<Schema> {
    let r = &mut &bytes[..];
    let mut schema = Schema::default();
    for _ in 0..r.read_u32::<LE>()? {
        schema.samples.push(crate::wire::read_string(r)?);
    }
    for _ in 0..r.read_u32::<LE>()? {
        schema.contigs.push(Contig {
            name: crate::wire::read_string(r)?,
            length: r.read_u64::<LE>()?,
        });
    }
    for _ in 0..r.read_u32::<LE>()? {
        schema.info.push(read_field_def(r)?);
    }
    for _ in 0..r.read_u32::<LE>()? {
        schema.format.push(read_field_def(r)?);
    }
    for _ in 0..r.read_u32::<LE>()? {
        schema.filter.push(crate::wire::read_string(r)?);
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_round_trip() {
        let schema = Schema {
            samples: vec!["NA12878".into(), "NA12891".into()],
            contigs: vec![Contig {
                name: "chr20".into(),
                length: 64_444_167,
            }],
            info: vec![
                FieldDef {
                    id: "DP".into(),
                    ty: FieldType::Integer,
                    cardinality: FieldCardinality::Fixed(1),
                },
                FieldDef {
                    id: "AF".into(),
                    ty: FieldType::Float,
                    cardinality: FieldCardinality::PerAlternate,
                },
            ],
            format: vec![FieldDef {
                id: "GT".into(),
                ty: FieldType::String,
                cardinality: FieldCardinality::Fixed(1),
            }],
            filter: vec!["PASS".into(), "LowQual".into()],
        };
        let bytes = schema_to_bytes(&schema).unwrap();
        assert_eq!(schema_from_bytes(&bytes).unwrap(), schema);
    }

    #[test]
    fn magic_round_trip() {
        let mut buf = vec![];
        write_magic(&mut buf).unwrap();
        assert_eq!(read_magic(&mut buf.as_slice()).unwrap(), VERSION);

        buf[2] ^= 0x20;
        match read_magic(&mut buf.as_slice()) {
            Err(Error::FormatMagicMismatch) => {}
            other => panic!("expected magic mismatch, got {other:?}"),
        }
    }

    #[test]
    fn sections_fall_back_to_raw_storage() {
        // High-entropy payloads do not shrink under deflate.
        let plain: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(197)).collect();
        let mut buf = vec![];
        write_compressed_section(&mut buf, &plain, 6).unwrap();
        assert_eq!(read_compressed_section(&mut buf.as_slice()).unwrap(), plain);

        let redundant = vec![7u8; 100_000];
        let mut buf = vec![];
        write_compressed_section(&mut buf, &redundant, 6).unwrap();
        assert!(buf.len() < redundant.len() / 10);
        assert_eq!(
            read_compressed_section(&mut buf.as_slice()).unwrap(),
            redundant
        );
    }
}
