//! Signature hash engine
//!
//! Preimage layout (BIP143 with the fork id):
//!
//! version ∥ hashPrevouts ∥ hashSequence ∥ outpoint ∥ scriptCode ∥ amount
//! ∥ sequence ∥ hashOutputs ∥ locktime ∥ flags
//!
//! The three sub-hashes that do not depend on the signed input are memoized
//! on the transaction and shared by every input.

use bitflags::bitflags;
use std::sync::OnceLock;
use tracing::trace;

use crate::constants::SIGHASH_BASE_MASK;
use crate::der::{decode_der, encode_der};
use crate::ecdsa::{self, PrivateKey};
use crate::error::{ConsensusError, Result};
use crate::hash::sha256d;
use crate::stream::ByteWriter;
use crate::transaction::{write_output, Transaction};
use crate::types::{ByteString, Hash, Point};

bitflags! {
    /// Sighash flags. The low five bits select the base mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SighashFlags: u32 {
        const ALL = 0x01;
        const NONE = 0x02;
        const SINGLE = 0x03;
        const FORKID = 0x40;
        const ANYONECANPAY = 0x80;
    }
}

impl SighashFlags {
    /// Base mode: flags & 0x1f
    pub fn base(self) -> u32 {
        self.bits() & SIGHASH_BASE_MASK
    }

    pub fn anyone_can_pay(self) -> bool {
        self.contains(SighashFlags::ANYONECANPAY)
    }

    fn commits_to_all_outputs(self) -> bool {
        self.base() != SighashFlags::SINGLE.bits() && self.base() != SighashFlags::NONE.bits()
    }

    /// Flags as the trailing signature byte
    pub fn to_byte(self) -> u8 {
        self.bits() as u8
    }

    pub fn from_byte(byte: u8) -> Self {
        SighashFlags::from_bits_retain(byte as u32)
    }
}

fn memoized(cell: &OnceLock<Hash>, name: &str, compute: impl FnOnce() -> Result<Hash>) -> Result<Hash> {
    if let Some(hash) = cell.get() {
        return Ok(*hash);
    }
    let hash = compute()?;
    trace!(name, hash = %hex::encode(hash), "sighash cache fill");
    Ok(*cell.get_or_init(|| hash))
}

fn hash_prevouts(tx: &Transaction) -> Result<Hash> {
    memoized(&tx.sighash_cache.hash_prevouts, "hashPrevouts", || {
        let mut writer = ByteWriter::with_capacity(tx.inputs().len() * 36);
        for input in tx.inputs() {
            input.write_outpoint(&mut writer);
        }
        sha256d(writer.as_bytes())
    })
}

fn hash_sequence(tx: &Transaction) -> Result<Hash> {
    memoized(&tx.sighash_cache.hash_sequence, "hashSequence", || {
        let mut writer = ByteWriter::with_capacity(tx.inputs().len() * 4);
        for input in tx.inputs() {
            writer.write_u32_le(input.sequence);
        }
        sha256d(writer.as_bytes())
    })
}

fn hash_outputs_all(tx: &Transaction) -> Result<Hash> {
    memoized(&tx.sighash_cache.hash_outputs_all, "hashOutputs", || {
        let mut writer = ByteWriter::new();
        for output in tx.outputs() {
            write_output(&mut writer, output);
        }
        sha256d(writer.as_bytes())
    })
}

fn hash_single_output(tx: &Transaction, index: usize) -> Result<Hash> {
    let mut writer = ByteWriter::new();
    write_output(&mut writer, &tx.outputs()[index]);
    sha256d(writer.as_bytes())
}

/// Preimage: 𝒯𝒳 × ℕ × 𝕊 × ℕ × 𝔽 → 𝕊
pub fn preimage(
    tx: &Transaction,
    vin: usize,
    parent_script: &[u8],
    parent_satoshis: u64,
    flags: SighashFlags,
) -> Result<ByteString> {
    let input = tx
        .inputs()
        .get(vin)
        .ok_or(ConsensusError::InvalidInputIndex(vin))?;

    let zero = [0u8; 32];

    let prevouts = if flags.anyone_can_pay() {
        zero
    } else {
        hash_prevouts(tx)?
    };

    let sequence = if !flags.anyone_can_pay() && flags.commits_to_all_outputs() {
        hash_sequence(tx)?
    } else {
        zero
    };

    let outputs = if flags.commits_to_all_outputs() {
        hash_outputs_all(tx)?
    } else if flags.base() == SighashFlags::SINGLE.bits() && vin < tx.outputs().len() {
        hash_single_output(tx, vin)?
    } else {
        zero
    };

    let mut writer = ByteWriter::with_capacity(156 + parent_script.len() + 9);
    writer
        .write_u32_le(tx.version())
        .write(&prevouts)
        .write(&sequence);
    input.write_outpoint(&mut writer);
    writer
        .write_var_bytes(parent_script)
        .write_u64_le(parent_satoshis)
        .write_u32_le(input.sequence)
        .write(&outputs)
        .write_u32_le(tx.locktime())
        .write_u32_le(flags.bits());
    Ok(writer.into_bytes())
}

/// Sighash = sha256d(preimage)
pub fn sighash(
    tx: &Transaction,
    vin: usize,
    parent_script: &[u8],
    parent_satoshis: u64,
    flags: SighashFlags,
) -> Result<Hash> {
    sha256d(&preimage(tx, vin, parent_script, parent_satoshis, flags)?)
}

fn append_flag(signature: &crate::types::Signature, flags: SighashFlags) -> Result<ByteString> {
    let mut out = encode_der(signature)?;
    out.push(flags.to_byte());
    Ok(out)
}

/// DER signature over the sighash, followed by the flag byte. FORKID is
/// always set.
pub fn generate_tx_signature(
    tx: &Transaction,
    vin: usize,
    parent_script: &[u8],
    parent_satoshis: u64,
    key: &PrivateKey,
    flags: SighashFlags,
) -> Result<ByteString> {
    let flags = flags | SighashFlags::FORKID;
    let hash = sighash(tx, vin, parent_script, parent_satoshis, flags)?;
    let signature = key.sign(&hash)?;
    append_flag(&signature, flags)
}

/// Like [`generate_tx_signature`] with a caller-chosen nonce. `None` when
/// the nonce is degenerate.
pub fn generate_tx_signature_with_nonce(
    tx: &Transaction,
    vin: usize,
    parent_script: &[u8],
    parent_satoshis: u64,
    key: &PrivateKey,
    nonce: &[u8; 32],
    flags: SighashFlags,
) -> Result<Option<ByteString>> {
    let flags = flags | SighashFlags::FORKID;
    let hash = sighash(tx, vin, parent_script, parent_satoshis, flags)?;
    let signature = ecdsa::sign_with_nonce(&hash, nonce, key.secret_bytes())?;
    signature.map(|sig| append_flag(&sig, flags)).transpose()
}

/// Check `DER ∥ flag` against the sighash of input `vin`.
///
/// Malformed DER is an error; a well-formed signature that does not match
/// is `Ok(false)`.
pub fn verify_tx_signature(
    tx: &Transaction,
    vin: usize,
    signature: &[u8],
    public_key: &Point,
    parent_script: &[u8],
    parent_satoshis: u64,
) -> Result<bool> {
    let Some((&flag, der)) = signature.split_last() else {
        return Err(ConsensusError::BadDer("empty signature".into()));
    };
    let signature = decode_der(der)?;
    let hash = sighash(tx, vin, parent_script, parent_satoshis, SighashFlags::from_byte(flag))?;
    Ok(ecdsa::verify(&signature, &hash, public_key))
}
