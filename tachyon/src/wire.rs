//! Little-endian helpers for the fixed-width pieces of the archive format.

use std::io::{self, Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};

pub fn write_len_bytes(w: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    w.write_u32::<LE>(bytes.len() as u32)?;
    w.write_all(bytes)
}

pub fn read_len_bytes(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LE>()? as usize;
    let mut buf = vec![0; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    write_len_bytes(w, s.as_bytes())
}

pub fn read_string(r: &mut impl Read) -> io::Result<String> {
    String::from_utf8(read_len_bytes(r)?)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-utf8 string"))
}

pub fn write_u32_slice(w: &mut impl Write, values: &[u32]) -> io::Result<()> {
    w.write_u32::<LE>(values.len() as u32)?;
    for &v in values {
        w.write_u32::<LE>(v)?;
    }
    Ok(())
}

pub fn read_u32_vec(r: &mut impl Read) -> io::Result<Vec<u32>> {
    let len = r.read_u32::<LE>()? as usize;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(r.read_u32::<LE>()?);
    }
    Ok(out)
}
