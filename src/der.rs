//! DER signature codec
//!
//! 0x30 ∥ len ∥ 0x02 ∥ len(r) ∥ r ∥ 0x02 ∥ len(s) ∥ s
//!
//! r and s are DER integers, so a magnitude whose high bit is set gets a
//! single 0x00 prefix to stay non-negative. Both are scalars mod n, at most
//! 32 bytes wide, so every length fits the short form (< 0x80).

use crate::error::{ConsensusError, Result};
use crate::stream::{ByteReader, ByteWriter};
use crate::types::{ByteString, Signature};

const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;
const MAX_SCALAR_LEN: usize = 32;
const LONG_FORM_LENGTH: u8 = 0x80;

fn der_integer(value: &[u8]) -> ByteString {
    let mut out = Vec::with_capacity(value.len() + 1);
    if value.first().is_some_and(|b| b & 0x80 != 0) {
        out.push(0x00);
    }
    out.extend_from_slice(value);
    out
}

fn bad_der(reason: &'static str) -> ConsensusError {
    ConsensusError::BadDer(reason.into())
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Minimal encoding of `(r, s)`. Fails if either is wider than a 32-byte
/// scalar.
pub fn encode_der(signature: &Signature) -> Result<ByteString> {
    let r = strip_leading_zeros(&signature.r);
    let s = strip_leading_zeros(&signature.s);
    if r.len() > MAX_SCALAR_LEN || s.len() > MAX_SCALAR_LEN {
        return Err(bad_der("integer wider than 32 bytes"));
    }
    let r = der_integer(r);
    let s = der_integer(s);

    let mut writer = ByteWriter::with_capacity(6 + r.len() + s.len());
    writer
        .write_u8(SEQUENCE_TAG)
        .write_u8((4 + r.len() + s.len()) as u8)
        .write_u8(INTEGER_TAG)
        .write_u8(r.len() as u8)
        .write(&r)
        .write_u8(INTEGER_TAG)
        .write_u8(s.len() as u8)
        .write(&s);
    Ok(writer.into_bytes())
}

fn read_length(reader: &mut ByteReader<'_>) -> Result<usize> {
    let len = reader.read_u8()?;
    if len >= LONG_FORM_LENGTH {
        return Err(bad_der("long-form length"));
    }
    Ok(len as usize)
}

/// Strip the sign-padding byte [`encode_der`] adds
fn magnitude(value: &[u8]) -> ByteString {
    match value {
        [0x00, next, ..] if next & 0x80 != 0 => value[1..].to_vec(),
        _ => value.to_vec(),
    }
}

pub fn decode_der(bytes: &[u8]) -> Result<Signature> {
    let mut reader = ByteReader::new(bytes);

    if reader.read_u8()? != SEQUENCE_TAG {
        return Err(bad_der("expected sequence tag"));
    }
    let total_len = read_length(&mut reader)?;

    if reader.read_u8()? != INTEGER_TAG {
        return Err(bad_der("expected integer tag for r"));
    }
    let r_len = read_length(&mut reader)?;
    let r = reader.read(r_len)?;

    if reader.read_u8()? != INTEGER_TAG {
        return Err(bad_der("expected integer tag for s"));
    }
    let s_len = read_length(&mut reader)?;
    let s = reader.read(s_len)?;

    if total_len != 4 + r_len + s_len {
        return Err(bad_der("length mismatch"));
    }
    reader.close()?;

    Ok(Signature {
        r: magnitude(r),
        s: magnitude(s),
    })
}
