//! Script byte strings and their chunk decomposition
//!
//! A script is an immutable byte string. Its decomposition into chunks
//! (opcodes with optional push data) is computed on first use and cached.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;
use std::slice::SliceIndex;
use std::sync::OnceLock;

use crate::error::{ConsensusError, Result};
use crate::opcodes::*;
use crate::stream::ByteWriter;
use crate::types::ByteString;

/// Chunk: 𝒞 = 𝕆 × 𝕊? × ℕ
///
/// `data` is present for push opcodes (0..=78). `offset` is the byte position
/// of the opcode inside the script it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub opcode: u8,
    pub data: Option<ByteString>,
    pub offset: usize,
}

impl Chunk {
    /// Byte position just past this chunk
    pub fn end(&self) -> usize {
        self.offset + encoded_push_len(self.opcode, self.data.as_deref())
    }

    pub fn is_push(&self) -> bool {
        self.data.is_some()
    }
}

fn encoded_push_len(opcode: u8, data: Option<&[u8]>) -> usize {
    let data_len = data.map_or(0, <[u8]>::len);
    match opcode {
        OP_PUSHDATA1 => 2 + data_len,
        OP_PUSHDATA2 => 3 + data_len,
        OP_PUSHDATA4 => 5 + data_len,
        _ => 1 + data_len,
    }
}

/// DecodeChunks: 𝕊 → 𝒞*
///
/// Walks the script once:
/// - 0: empty push
/// - 1..=75: push that many following bytes
/// - 76/77/78: 1/2/4-byte little-endian length, then the data
/// - 79..=255: opcode only
///
/// Every declared length must fit inside the buffer.
pub fn decode_chunks(script: &[u8]) -> Result<Vec<Chunk>> {
    fn take(script: &[u8], start: usize, len: usize) -> Result<&[u8]> {
        start
            .checked_add(len)
            .and_then(|end| script.get(start..end))
            .ok_or_else(|| {
                ConsensusError::BadScript(
                    format!("not enough data for {len} bytes at offset {start}").into(),
                )
            })
    }

    let mut chunks = Vec::new();
    let mut i = 0usize;

    while i < script.len() {
        let offset = i;
        let opcode = script[i];
        i += 1;

        let data = match opcode {
            OP_0 => Some(Vec::new()),
            1..=75 => {
                let len = opcode as usize;
                let data = take(script, i, len)?.to_vec();
                i += len;
                Some(data)
            }
            OP_PUSHDATA1 => {
                let len = take(script, i, 1)?[0] as usize;
                i += 1;
                let data = take(script, i, len)?.to_vec();
                i += len;
                Some(data)
            }
            OP_PUSHDATA2 => {
                let raw = take(script, i, 2)?;
                let len = u16::from_le_bytes([raw[0], raw[1]]) as usize;
                i += 2;
                let data = take(script, i, len)?.to_vec();
                i += len;
                Some(data)
            }
            OP_PUSHDATA4 => {
                let raw = take(script, i, 4)?;
                let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
                i += 4;
                let data = take(script, i, len)?.to_vec();
                i += len;
                Some(data)
            }
            _ => None,
        };

        chunks.push(Chunk { opcode, data, offset });
    }

    Ok(chunks)
}

/// Minimal push of `data`
pub fn encode_push_data(data: &[u8]) -> ByteString {
    let mut writer = ByteWriter::with_capacity(data.len() + 5);
    writer.write_push_data(data);
    writer.into_bytes()
}

/// Immutable script with lazily decoded chunks
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(from = "ByteString", into = "ByteString")]
pub struct Script {
    bytes: ByteString,
    chunks: OnceLock<Vec<Chunk>>,
}

/// Accepted inputs for [`Script::from_source`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Bytes(ByteString),
    Hex(String),
    Asm(String),
}

impl Script {
    pub fn new(bytes: ByteString) -> Self {
        Self {
            bytes,
            chunks: OnceLock::new(),
        }
    }

    pub fn from_source(source: ScriptSource) -> Result<Self> {
        match source {
            ScriptSource::Bytes(bytes) => Ok(Self::new(bytes)),
            ScriptSource::Hex(hex) => Self::from_hex(&hex),
            ScriptSource::Asm(asm) => Self::from_asm(&asm),
        }
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex).map_err(|e| ConsensusError::InvalidHex(e.to_string().into()))?;
        Ok(Self::new(bytes))
    }

    pub fn from_asm(asm: &str) -> Result<Self> {
        decode_asm(asm).map(Self::new)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn to_asm(&self) -> Result<String> {
        encode_asm(&self.bytes)
    }

    /// Chunk decomposition, decoded once
    pub fn chunks(&self) -> Result<&[Chunk]> {
        if let Some(chunks) = self.chunks.get() {
            return Ok(chunks);
        }
        let decoded = decode_chunks(&self.bytes)?;
        Ok(self.chunks.get_or_init(move || decoded))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> ByteString {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, u8> {
        self.bytes.iter()
    }

    pub fn is_p2pkh(&self) -> bool {
        is_p2pkh_lock_script(&self.bytes)
    }
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Script {}

impl std::hash::Hash for Script {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl<I: SliceIndex<[u8]>> Index<I> for Script {
    type Output = I::Output;

    fn index(&self, index: I) -> &Self::Output {
        &self.bytes[index]
    }
}

impl<'a> IntoIterator for &'a Script {
    type Item = &'a u8;
    type IntoIter = std::slice::Iter<'a, u8>;

    fn into_iter(self) -> Self::IntoIter {
        self.bytes.iter()
    }
}

impl AsRef<[u8]> for Script {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<ByteString> for Script {
    fn from(bytes: ByteString) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Script {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl From<Script> for ByteString {
    fn from(script: Script) -> Self {
        script.bytes
    }
}

// ============================================================================
// ASM
// ============================================================================

/// Human-readable form: push data as hex (`0` when empty), `-1` for
/// `OP_1NEGATE`, opcode names otherwise.
pub fn encode_asm(script: &[u8]) -> Result<String> {
    let parts: Vec<String> = decode_chunks(script)?
        .iter()
        .map(|chunk| match &chunk.data {
            Some(data) if data.is_empty() => "0".to_string(),
            Some(data) => hex::encode(data),
            None if chunk.opcode == OP_1NEGATE => "-1".to_string(),
            None => opcode_name(chunk.opcode)
                .map(str::to_string)
                .unwrap_or_else(|| format!("<unknown opcode {}>", chunk.opcode)),
        })
        .collect();
    Ok(parts.join(" "))
}

/// Inverse of [`encode_asm`]
pub fn decode_asm(asm: &str) -> Result<ByteString> {
    let mut writer = ByteWriter::new();
    for part in asm.split_whitespace() {
        if let Some(opcode) = opcode_from_name(part) {
            writer.write_u8(opcode);
        } else if part == "0" {
            writer.write_u8(OP_0);
        } else if part == "-1" {
            writer.write_u8(OP_1NEGATE);
        } else {
            let data = hex::decode(part)
                .map_err(|e| ConsensusError::InvalidHex(format!("{part}: {e}").into()))?;
            writer.write_push_data(&data);
        }
    }
    Ok(writer.into_bytes())
}

// ============================================================================
// P2PKH TEMPLATES
// ============================================================================

/// OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
pub fn p2pkh_lock_script(pubkeyhash: &[u8; 20]) -> Script {
    let mut bytes = Vec::with_capacity(25);
    bytes.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
    bytes.extend_from_slice(pubkeyhash);
    bytes.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    Script::new(bytes)
}

/// <signature> <pubkey>
pub fn p2pkh_unlock_script(signature: &[u8], pubkey: &[u8]) -> Script {
    let mut writer = ByteWriter::new();
    writer.write_push_data(signature).write_push_data(pubkey);
    Script::new(writer.into_bytes())
}

pub fn is_p2pkh_lock_script(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub fn extract_p2pkh_pubkeyhash(script: &[u8]) -> Result<[u8; 20]> {
    if !is_p2pkh_lock_script(script) {
        return Err(ConsensusError::BadScript("not a p2pkh lock script".into()));
    }
    let mut pubkeyhash = [0u8; 20];
    pubkeyhash.copy_from_slice(&script[3..23]);
    Ok(pubkeyhash)
}
