//! Transactions: data model, wire codec and builder
//!
//! A transaction stays mutable until [`Transaction::finalize`]. Every mutator
//! checks that first and clears the memoized hashes, so a cached txid or
//! sighash sub-hash always describes the current inputs and outputs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::trace;

use crate::constants::*;
use crate::ecdsa::PrivateKey;
use crate::error::{ConsensusError, Result};
use crate::hash::sha256d;
use crate::script::{extract_p2pkh_pubkeyhash, p2pkh_lock_script, p2pkh_unlock_script, Script};
use crate::sighash::{generate_tx_signature, SighashFlags};
use crate::stream::{ByteReader, ByteWriter};
use crate::types::{ByteString, Hash};
use crate::verify::verify_tx;

fn verify_satoshis(satoshis: u64) -> Result<u64> {
    if satoshis > MAX_SAFE_INTEGER {
        return Err(ConsensusError::InvalidSatoshis(satoshis));
    }
    Ok(satoshis)
}

/// Output: 𝒯 = 𝕊 × ℕ, 0 ≤ satoshis ≤ 2^53 - 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OutputFields")]
pub struct Output {
    script: Script,
    satoshis: u64,
}

#[derive(Deserialize)]
struct OutputFields {
    script: Script,
    satoshis: u64,
}

impl TryFrom<OutputFields> for Output {
    type Error = ConsensusError;

    fn try_from(fields: OutputFields) -> Result<Self> {
        Output::new(fields.script, fields.satoshis)
    }
}

impl Output {
    pub fn new(script: impl Into<Script>, satoshis: u64) -> Result<Self> {
        Ok(Self {
            script: script.into(),
            satoshis: verify_satoshis(satoshis)?,
        })
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn satoshis(&self) -> u64 {
        self.satoshis
    }
}

/// Input: ℐ = ℍ × ℕ × 𝕊 × ℕ
///
/// `txid` is kept in display order and reversed on the wire. `output` is the
/// spent output when known; it is not part of the wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub txid: Hash,
    pub vout: u32,
    pub script: Script,
    pub sequence: u32,
    #[serde(default)]
    pub output: Option<Output>,
}

impl Input {
    pub fn new(txid: Hash, vout: u32, script: impl Into<Script>, sequence: u32) -> Self {
        Self {
            txid,
            vout,
            script: script.into(),
            sequence,
            output: None,
        }
    }

    /// Build from a 64-character hex txid
    pub fn from_txid_hex(txid: &str, vout: u32, script: impl Into<Script>, sequence: u32) -> Result<Self> {
        Ok(Self::new(parse_txid(txid)?, vout, script, sequence))
    }

    /// Attach the output this input spends
    pub fn with_output(mut self, output: Output) -> Self {
        self.output = Some(output);
        self
    }

    pub fn txid_hex(&self) -> String {
        hex::encode(self.txid)
    }

    /// Outpoint as it appears on the wire: txid (little-endian) ∥ vout
    pub(crate) fn write_outpoint(&self, writer: &mut ByteWriter) {
        let mut txid = self.txid;
        txid.reverse();
        writer.write(&txid).write_u32_le(self.vout);
    }
}

pub fn parse_txid(txid: &str) -> Result<Hash> {
    let bytes = hex::decode(txid).map_err(|e| ConsensusError::InvalidHex(e.to_string().into()))?;
    bytes
        .try_into()
        .map_err(|_| ConsensusError::InvalidHex(format!("bad txid: {txid}").into()))
}

/// Memoized BIP143 sub-hashes, filled by the sighash engine
#[derive(Debug, Clone, Default)]
pub(crate) struct SighashCache {
    pub(crate) hash_prevouts: OnceLock<Hash>,
    pub(crate) hash_sequence: OnceLock<Hash>,
    pub(crate) hash_outputs_all: OnceLock<Hash>,
}

/// Transaction: 𝒯𝒳 = ℕ × ℐ* × 𝒯* × ℕ
#[derive(Clone, Serialize, Deserialize)]
pub struct Transaction {
    version: u32,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    locktime: u32,
    #[serde(default = "default_fee_per_kb")]
    fee_per_kb: u64,
    #[serde(skip)]
    change_index: Option<usize>,
    #[serde(skip)]
    finalized: bool,
    #[serde(skip)]
    txid: OnceLock<Hash>,
    #[serde(skip)]
    pub(crate) sighash_cache: SighashCache,
}

fn default_fee_per_kb() -> u64 {
    DEFAULT_FEE_PER_KB
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.locktime == other.locktime
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("version", &self.version)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("locktime", &self.locktime)
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl Transaction {
    /// Version 1, locktime 0, default fee rate
    pub fn new() -> Self {
        Self::with_fee_per_kb(DEFAULT_FEE_PER_KB)
    }

    pub fn with_fee_per_kb(fee_per_kb: u64) -> Self {
        Self {
            version: TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            locktime: 0,
            fee_per_kb,
            change_index: None,
            finalized: false,
            txid: OnceLock::new(),
            sighash_cache: SighashCache::default(),
        }
    }

    // ============================================================================
    // ACCESSORS
    // ============================================================================

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn locktime(&self) -> u32 {
        self.locktime
    }

    pub fn fee_per_kb(&self) -> u64 {
        self.fee_per_kb
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn change_output(&self) -> Option<&Output> {
        self.change_index.and_then(|i| self.outputs.get(i))
    }

    // ============================================================================
    // MUTATORS
    // ============================================================================

    /// Gate for every mutation: refuses once finalized, otherwise drops the
    /// memoized hashes
    fn begin_mutation(&mut self) -> Result<()> {
        if self.finalized {
            return Err(ConsensusError::TransactionFinalized);
        }
        self.txid = OnceLock::new();
        self.sighash_cache = SighashCache::default();
        Ok(())
    }

    pub fn set_version(&mut self, version: u32) -> Result<&mut Self> {
        self.begin_mutation()?;
        self.version = version;
        Ok(self)
    }

    pub fn set_locktime(&mut self, locktime: u32) -> Result<&mut Self> {
        self.begin_mutation()?;
        self.locktime = locktime;
        Ok(self)
    }

    pub fn set_fee_per_kb(&mut self, satoshis: u64) -> Result<&mut Self> {
        self.begin_mutation()?;
        self.fee_per_kb = verify_satoshis(satoshis)?;
        Ok(self)
    }

    pub fn add_input(&mut self, input: Input) -> Result<&mut Self> {
        self.begin_mutation()?;
        self.inputs.push(input);
        Ok(self)
    }

    pub fn add_output(&mut self, output: Output) -> Result<&mut Self> {
        self.begin_mutation()?;
        self.outputs.push(output);
        Ok(self)
    }

    /// Mutable access to one input, e.g. to attach its spent output
    pub fn input_mut(&mut self, index: usize) -> Result<&mut Input> {
        self.begin_mutation()?;
        self.inputs
            .get_mut(index)
            .ok_or(ConsensusError::InvalidInputIndex(index))
    }

    /// Spend `parent.outputs[vout]`
    pub fn spend(&mut self, parent: &Transaction, vout: u32) -> Result<&mut Self> {
        let output = parent
            .outputs
            .get(vout as usize)
            .cloned()
            .ok_or_else(|| {
                ConsensusError::TransactionValidation(format!("parent has no output {vout}").into())
            })?;
        let input = Input::new(parent.txid()?, vout, Script::default(), SEQUENCE_FINAL)
            .with_output(output);
        self.add_input(input)
    }

    /// Pay `satoshis` to a P2PKH lock script
    pub fn pay_to(&mut self, pubkeyhash: &[u8; 20], satoshis: u64) -> Result<&mut Self> {
        let output = Output::new(p2pkh_lock_script(pubkeyhash), satoshis)?;
        self.add_output(output)
    }

    /// Add a zero-valued P2PKH change output, filled in by
    /// [`calculate_change`](Self::calculate_change)
    pub fn change(&mut self, pubkeyhash: &[u8; 20]) -> Result<&mut Self> {
        self.begin_mutation()?;
        if self.change_index.is_some() {
            return Err(ConsensusError::ChangeOutputAlreadyAdded);
        }
        self.outputs.push(Output::new(p2pkh_lock_script(pubkeyhash), 0)?);
        self.change_index = Some(self.outputs.len() - 1);
        Ok(self)
    }

    /// Fee = Σ spent satoshis − Σ output satoshis
    pub fn fee(&self) -> Result<i64> {
        let mut satoshis_in: i64 = 0;
        for (index, input) in self.inputs.iter().enumerate() {
            let output = input
                .output
                .as_ref()
                .ok_or(ConsensusError::MissingPreviousOutput { index })?;
            satoshis_in = satoshis_in.saturating_add(output.satoshis as i64);
        }
        let satoshis_out = self
            .outputs
            .iter()
            .fold(0i64, |acc, o| acc.saturating_add(o.satoshis as i64));
        Ok(satoshis_in - satoshis_out)
    }

    /// Encoded size once every unsigned P2PKH input has been signed, assuming
    /// the largest unlock script
    pub fn estimated_size(&self) -> usize {
        let unsigned = self
            .inputs
            .iter()
            .filter(|input| input.script.is_empty())
            .filter(|input| input.output.as_ref().is_some_and(|o| o.script.is_p2pkh()))
            .count();
        self.size() + unsigned * MAX_P2PKH_UNLOCK_SIZE
    }

    /// Change = fee − ⌈estimated size × fee_per_kb / 1000⌉, with the change
    /// output dropped when that is below one satoshi.
    ///
    /// Outputs are left untouched once any input carries an unlock script.
    pub fn calculate_change(&mut self) -> Result<&mut Self> {
        self.begin_mutation()?;
        let Some(index) = self.change_index else {
            return Ok(self);
        };
        if self.inputs.iter().any(|input| !input.script.is_empty()) {
            return Ok(self);
        }

        self.outputs[index].satoshis = 0;
        let fee = self.fee()?;
        let required = required_fee(self.estimated_size(), self.fee_per_kb) as i64;
        let change = fee - required;

        if change >= MIN_CHANGE_SATOSHIS as i64 {
            self.outputs[index].satoshis = verify_satoshis(change as u64)?;
        } else {
            self.outputs.remove(index);
            self.change_index = None;
        }
        Ok(self)
    }

    /// Fill in change, then sign every unsigned P2PKH input paying to `key`
    pub fn sign(&mut self, key: &PrivateKey) -> Result<&mut Self> {
        self.calculate_change()?;
        let pubkeyhash = key.pubkeyhash()?;
        let pubkey = key.public_key_bytes();

        let tx: &Transaction = self;
        let mut unlocks = Vec::new();
        for (vin, input) in tx.inputs.iter().enumerate() {
            if !input.script.is_empty() {
                continue;
            }
            let Some(output) = &input.output else {
                continue;
            };
            match extract_p2pkh_pubkeyhash(output.script.as_bytes()) {
                Ok(hash) if hash == pubkeyhash => {}
                _ => continue,
            }

            let signature = generate_tx_signature(
                tx,
                vin,
                output.script.as_bytes(),
                output.satoshis,
                key,
                SighashFlags::ALL,
            )?;
            unlocks.push((vin, p2pkh_unlock_script(&signature, &pubkey)));
        }

        self.begin_mutation()?;
        for (vin, script) in unlocks {
            self.inputs[vin].script = script;
        }
        Ok(self)
    }

    /// Fill in change, then freeze
    pub fn finalize(&mut self) -> Result<&mut Self> {
        if self.finalized {
            return Ok(self);
        }
        self.calculate_change()?;
        self.finalized = true;
        Ok(self)
    }

    /// Verify against the attached spent outputs at this transaction's own
    /// fee rate
    pub fn verify(&self) -> Result<()> {
        let parents = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                input
                    .output
                    .clone()
                    .ok_or(ConsensusError::MissingPreviousOutput { index })
            })
            .collect::<Result<Vec<_>>>()?;
        verify_tx(self, &parents, self.fee_per_kb)
    }

    // ============================================================================
    // CODEC
    // ============================================================================

    pub fn encode(&self) -> ByteString {
        let mut writer = ByteWriter::new();
        write_tx(&mut writer, self);
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let tx = read_tx(&mut reader)?;
        reader.close()?;
        Ok(tx)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex).map_err(|e| ConsensusError::InvalidHex(e.to_string().into()))?;
        Self::decode(&bytes)
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        self.encode().len()
    }

    /// Txid in display order
    pub fn txid(&self) -> Result<Hash> {
        if let Some(txid) = self.txid.get() {
            return Ok(*txid);
        }
        let txid = calculate_txid(&self.encode())?;
        trace!(txid = %hex::encode(txid), "computed txid");
        Ok(*self.txid.get_or_init(|| txid))
    }

    pub fn txid_hex(&self) -> Result<String> {
        self.txid().map(hex::encode)
    }
}

/// ⌈size × fee_per_kb / 1000⌉
pub fn required_fee(size: usize, fee_per_kb: u64) -> u64 {
    let product = size as u128 * fee_per_kb as u128;
    product.div_ceil(1000) as u64
}

/// sha256d of the serialized transaction, byte-reversed for display
pub fn calculate_txid(encoded: &[u8]) -> Result<Hash> {
    let mut hash = sha256d(encoded)?;
    hash.reverse();
    Ok(hash)
}

pub(crate) fn write_output(writer: &mut ByteWriter, output: &Output) {
    writer
        .write_u64_le(output.satoshis)
        .write_var_bytes(output.script.as_bytes());
}

/// version ∥ varint(|ins|) ∥ ins ∥ varint(|outs|) ∥ outs ∥ locktime
pub fn write_tx(writer: &mut ByteWriter, tx: &Transaction) {
    writer.write_u32_le(tx.version);

    writer.write_varint(tx.inputs.len() as u64);
    for input in &tx.inputs {
        input.write_outpoint(writer);
        writer
            .write_var_bytes(input.script.as_bytes())
            .write_u32_le(input.sequence);
    }

    writer.write_varint(tx.outputs.len() as u64);
    for output in &tx.outputs {
        write_output(writer, output);
    }

    writer.write_u32_le(tx.locktime);
}

pub fn read_tx(reader: &mut ByteReader<'_>) -> Result<Transaction> {
    let mut tx = Transaction::new();
    tx.version = reader.read_u32_le()?;

    let input_count = reader.read_varint()?;
    for _ in 0..input_count {
        let mut txid: Hash = reader.read_array()?;
        txid.reverse();
        let vout = reader.read_u32_le()?;
        let script = reader.read_var_bytes()?.to_vec();
        let sequence = reader.read_u32_le()?;
        tx.inputs.push(Input::new(txid, vout, script, sequence));
    }

    let output_count = reader.read_varint()?;
    for _ in 0..output_count {
        let satoshis = reader.read_u64_le()?;
        let script = reader.read_var_bytes()?.to_vec();
        tx.outputs.push(Output::new(script, satoshis)?);
    }

    tx.locktime = reader.read_u32_le()?;
    Ok(tx)
}
