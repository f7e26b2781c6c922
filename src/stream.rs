//! Cursor-based byte reading and append-only byte writing
//!
//! All integers on the wire are little-endian. Varints follow the usual
//! Bitcoin layout:
//! - value < 0xfd: single byte
//! - value <= 0xffff: 0xfd prefix + 2 bytes
//! - value <= 0xffffffff: 0xfe prefix + 4 bytes
//! - otherwise: 0xff prefix + 8 bytes, capped at 2^53 - 1

use thiserror::Error;

use crate::constants::MAX_SAFE_INTEGER;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    #[error("not enough data")]
    NotEnoughData,

    #[error("unconsumed data")]
    UnconsumedData,

    #[error("varint too large")]
    VarintTooLarge,
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Sequential reader over a borrowed buffer
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Take the next `len` bytes
    pub fn read(&mut self, len: usize) -> StreamResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(StreamError::NotEnoughData)?;
        if end > self.data.len() {
            return Err(StreamError::NotEnoughData);
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> StreamResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> StreamResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> StreamResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> StreamResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> StreamResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_varint(&mut self) -> StreamResult<u64> {
        let prefix = self.read_u8()?;
        let value = match prefix {
            0xfd => self.read_u16_le()? as u64,
            0xfe => self.read_u32_le()? as u64,
            0xff => self.read_u64_le()?,
            n => n as u64,
        };
        if value > MAX_SAFE_INTEGER {
            return Err(StreamError::VarintTooLarge);
        }
        Ok(value)
    }

    /// Read a varint length prefix followed by that many bytes
    pub fn read_var_bytes(&mut self) -> StreamResult<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| StreamError::NotEnoughData)?;
        self.read(len)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails if anything is left unread
    pub fn close(&self) -> StreamResult<()> {
        if self.remaining() > 0 {
            return Err(StreamError::UnconsumedData);
        }
        Ok(())
    }
}

/// Growable output buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_u16_le(&mut self, value: u16) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    pub fn write_u32_le(&mut self, value: u32) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    pub fn write_u64_le(&mut self, value: u64) -> &mut Self {
        self.write(&value.to_le_bytes())
    }

    pub fn write_varint(&mut self, value: u64) -> &mut Self {
        if value < 0xfd {
            self.write_u8(value as u8)
        } else if value <= 0xffff {
            self.write_u8(0xfd).write_u16_le(value as u16)
        } else if value <= 0xffff_ffff {
            self.write_u8(0xfe).write_u32_le(value as u32)
        } else {
            self.write_u8(0xff).write_u64_le(value)
        }
    }

    /// Varint length prefix followed by the bytes themselves
    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_varint(bytes.len() as u64).write(bytes)
    }

    /// Script push of `data` using the smallest opcode able to carry it
    pub fn write_push_data(&mut self, data: &[u8]) -> &mut Self {
        use crate::opcodes::{OP_0, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4};

        let len = data.len();
        if len == 0 {
            self.write_u8(OP_0)
        } else if len <= 75 {
            self.write_u8(len as u8).write(data)
        } else if len <= 0xff {
            self.write_u8(OP_PUSHDATA1).write_u8(len as u8).write(data)
        } else if len <= 0xffff {
            self.write_u8(OP_PUSHDATA2).write_u16_le(len as u16).write(data)
        } else {
            self.write_u8(OP_PUSHDATA4).write_u32_le(len as u32).write(data)
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode a single varint
///
/// ```
/// use script_consensus::stream::encode_varint;
///
/// assert_eq!(encode_varint(252), vec![252]);
/// assert_eq!(encode_varint(253), vec![0xfd, 253, 0]);
/// assert_eq!(encode_varint(65536), vec![0xfe, 0, 0, 1, 0]);
/// ```
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(9);
    writer.write_varint(value);
    writer.into_bytes()
}

/// Decode a varint that occupies the whole buffer
pub fn decode_varint(bytes: &[u8]) -> StreamResult<u64> {
    let mut reader = ByteReader::new(bytes);
    let value = reader.read_varint()?;
    reader.close()?;
    Ok(value)
}
