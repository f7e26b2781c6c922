//! Script interpreter
//!
//! EvalScript: 𝕊 × 𝕊 × 𝒯𝒳 × ℕ × ℕ → VmResult
//!
//! The unlock script's chunks are followed by the lock script's chunks and
//! executed by a single program counter:
//! 1. Reject unlock scripts with non-push opcodes (> `OP_16`)
//! 2. While chunks remain and no `OP_RETURN` was hit:
//!    - inside an untaken branch, skip to the matching `ELSE`/`ENDIF`
//!    - otherwise execute the chunk
//! 3. Succeed iff no error, every `IF` closed and the top of the stack is true
//!
//! Failures never escape [`eval_script`]; they are reported in
//! [`VmResult::error`].

pub mod stack;

use std::sync::OnceLock;
use tracing::{debug, trace};

use crate::constants::DEFAULT_MAX_ELEMENT_SIZE;
use crate::ecdsa::decode_public_key;
use crate::error::ScriptError;
use crate::hash::{hash160, ripemd160, sha1, sha256, sha256d};
use crate::num::{cast_to_bool, encode_bool, ScriptNum};
use crate::opcodes::*;
use crate::script::{decode_chunks, Chunk};
use crate::sighash::verify_tx_signature;
use crate::transaction::Transaction;
use crate::types::{Point, StackItem};

pub use stack::Stack;

type Result<T> = std::result::Result<T, ScriptError>;

const LSHIFT_MASK: [u8; 8] = [0xff, 0x7f, 0x3f, 0x1f, 0x0f, 0x07, 0x03, 0x01];
const RSHIFT_MASK: [u8; 8] = [0xff, 0xfe, 0xfc, 0xf8, 0xf0, 0xe0, 0xc0, 0x80];

/// The spend a script pair is evaluated for: signature checks hash input
/// `vin` of `tx`, which spends `parent_satoshis`.
#[derive(Debug, Clone, Copy)]
pub struct SpendContext<'a> {
    pub tx: &'a Transaction,
    pub vin: usize,
    pub parent_satoshis: u64,
}

impl<'a> SpendContext<'a> {
    pub fn new(tx: &'a Transaction, vin: usize, parent_satoshis: u64) -> Self {
        Self {
            tx,
            vin,
            parent_satoshis,
        }
    }
}

impl Default for SpendContext<'static> {
    /// Empty transaction, input 0, zero satoshis. Signature checks fail.
    fn default() -> Self {
        static EMPTY: OnceLock<Transaction> = OnceLock::new();
        Self::new(EMPTY.get_or_init(Transaction::new), 0, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// Record a [`TraceEntry`] per visited chunk
    pub trace: bool,
    /// Largest item `OP_CAT`, `OP_NUM2BIN` or `OP_MUL` may produce
    pub max_element_size: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            trace: false,
            max_element_size: DEFAULT_MAX_ELEMENT_SIZE,
        }
    }
}

impl EvalOptions {
    pub fn traced() -> Self {
        Self {
            trace: true,
            ..Self::default()
        }
    }
}

/// Stack snapshot taken after a chunk is visited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub opcode: u8,
    /// `false` for chunks passed over inside an untaken branch
    pub executed: bool,
    pub stack: Vec<StackItem>,
    pub alt_stack: Vec<StackItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmResult {
    pub success: bool,
    pub error: Option<ScriptError>,
    pub chunks: Vec<Chunk>,
    pub stack: Vec<StackItem>,
    pub alt_stack: Vec<StackItem>,
    pub stack_trace: Vec<TraceEntry>,
}

/// Position of the `ELSE` or `ENDIF` closing the branch that contains
/// `start`, or `chunks.len()` if there is none.
///
/// Nested `IF`/`NOTIF` blocks inside the skipped region are passed over whole.
pub fn skip_branch(chunks: &[Chunk], start: usize) -> usize {
    let mut depth = 0usize;
    for (i, chunk) in chunks.iter().enumerate().skip(start) {
        match chunk.opcode {
            OP_IF | OP_NOTIF => depth += 1,
            OP_ELSE | OP_ENDIF if depth == 0 => return i,
            OP_ENDIF => depth -= 1,
            _ => {}
        }
    }
    chunks.len()
}

/// Evaluate `unlock` followed by `lock`
pub fn eval_script(unlock: &[u8], lock: &[u8], ctx: SpendContext<'_>, options: EvalOptions) -> VmResult {
    let mut vm = Machine::new(lock, ctx, options);
    let outcome = vm.load(unlock).and_then(|()| vm.run());
    vm.finish(outcome.err())
}

struct Machine<'a> {
    lock: &'a [u8],
    ctx: SpendContext<'a>,
    options: EvalOptions,
    chunks: Vec<Chunk>,
    /// Index of the first lock script chunk
    lock_start: usize,
    stack: Stack,
    alt_stack: Stack,
    branch_exec: Vec<bool>,
    /// Byte offset into the lock script where the signed script code starts
    checkpoint: usize,
    stack_trace: Vec<TraceEntry>,
    pc: usize,
    done: bool,
}

impl<'a> Machine<'a> {
    fn new(lock: &'a [u8], ctx: SpendContext<'a>, options: EvalOptions) -> Self {
        Self {
            lock,
            ctx,
            options,
            chunks: Vec::new(),
            lock_start: 0,
            stack: Stack::new(),
            alt_stack: Stack::new(),
            branch_exec: Vec::new(),
            checkpoint: 0,
            stack_trace: Vec::new(),
            pc: 0,
            done: false,
        }
    }

    fn load(&mut self, unlock: &[u8]) -> Result<()> {
        let unlock_chunks = decode_chunks(unlock)?;
        if unlock_chunks.iter().any(|c| c.opcode > MAX_PUSH_OPCODE) {
            return Err(ScriptError::NonPushUnlockScript);
        }
        let lock_chunks = decode_chunks(self.lock)?;

        self.lock_start = unlock_chunks.len();
        self.chunks = unlock_chunks;
        self.chunks.extend(lock_chunks);
        Ok(())
    }

    fn record(&mut self, index: usize, executed: bool) {
        if !self.options.trace {
            return;
        }
        let opcode = self.chunks[index].opcode;
        trace!(
            opcode = opcode_name(opcode).unwrap_or("PUSH"),
            executed,
            stack = %self.stack,
            "script step"
        );
        self.stack_trace.push(TraceEntry {
            opcode,
            executed,
            stack: self.stack.to_vec(),
            alt_stack: self.alt_stack.to_vec(),
        });
    }

    fn run(&mut self) -> Result<()> {
        while self.pc < self.chunks.len() && !self.done {
            if self.branch_exec.last() == Some(&false) {
                let target = skip_branch(&self.chunks, self.pc);
                for index in self.pc..target {
                    self.record(index, false);
                }
                self.pc = target;
                if self.pc >= self.chunks.len() {
                    break;
                }
            }

            let index = self.pc;
            self.pc += 1;
            let outcome = self.step(index);
            self.record(index, true);
            outcome?;
        }
        Ok(())
    }

    fn finish(self, error: Option<ScriptError>) -> VmResult {
        let error = match error {
            Some(err) => Some(err),
            None if !self.branch_exec.is_empty() => Some(ScriptError::MissingEndif),
            None if !self.stack.last().is_some_and(|top| cast_to_bool(top)) => {
                Some(ScriptError::FalseStackTop)
            }
            None => None,
        };

        if let Some(err) = &error {
            debug!(vin = self.ctx.vin, error = %err, "script evaluation failed");
        }

        VmResult {
            success: error.is_none(),
            error,
            chunks: self.chunks,
            stack: self.stack.into(),
            alt_stack: self.alt_stack.into(),
            stack_trace: self.stack_trace,
        }
    }

    // ============================================================================
    // OPCODES
    // ============================================================================

    fn step(&mut self, index: usize) -> Result<()> {
        if let Some(data) = &self.chunks[index].data {
            self.stack.push(data.clone());
            return Ok(());
        }

        let opcode = self.chunks[index].opcode;
        match opcode {
            OP_1NEGATE => {
                self.stack.push(vec![0x81]);
            }
            OP_1..=OP_16 => {
                self.stack.push(vec![opcode - OP_1 + 1]);
            }

            // Flow control
            OP_NOP | OP_NOP1..=OP_NOP10 => {}
            OP_IF => {
                let value = self.stack.pop_bool()?;
                self.branch_exec.push(value);
            }
            OP_NOTIF => {
                let value = self.stack.pop_bool()?;
                self.branch_exec.push(!value);
            }
            OP_ELSE => {
                let top = self.branch_exec.last_mut().ok_or(ScriptError::UnmatchedElse)?;
                *top = !*top;
            }
            OP_ENDIF => {
                self.branch_exec.pop().ok_or(ScriptError::UnmatchedEndif)?;
            }
            OP_VERIFY => {
                if !self.stack.pop_bool()? {
                    return Err(ScriptError::Verify("OP_VERIFY"));
                }
            }
            OP_RETURN => {
                self.done = true;
            }

            // Stack
            OP_TOALTSTACK => {
                let item = self.stack.pop()?;
                self.alt_stack.push(item);
            }
            OP_FROMALTSTACK => {
                let item = self.alt_stack.pop().map_err(|_| ScriptError::AltStackEmpty)?;
                self.stack.push(item);
            }
            OP_IFDUP => {
                let top = self.stack.top(0)?;
                if cast_to_bool(top) {
                    let copy = top.clone();
                    self.stack.push(copy);
                }
            }
            OP_DEPTH => {
                let depth = ScriptNum::from(self.stack.len());
                self.stack.push(depth.to_bytes());
            }
            OP_DROP => {
                self.stack.pop()?;
            }
            OP_DUP => {
                let top = self.stack.top(0)?.clone();
                self.stack.push(top);
            }
            OP_NIP => {
                self.stack.remove(1)?;
            }
            OP_OVER => {
                let item = self.stack.top(1)?.clone();
                self.stack.push(item);
            }
            OP_PICK | OP_ROLL => {
                let n = self.stack.pop_num()?;
                let depth = n
                    .to_usize()
                    .filter(|n| *n < self.stack.len())
                    .ok_or(ScriptError::OutOfRange(if opcode == OP_PICK { "OP_PICK" } else { "OP_ROLL" }))?;
                let item = if opcode == OP_PICK {
                    self.stack.top(depth)?.clone()
                } else {
                    self.stack.remove(depth)?
                };
                self.stack.push(item);
            }
            OP_ROT => {
                // [x1 x2 x3] -> [x2 x3 x1]
                let x1 = self.stack.remove(2)?;
                self.stack.push(x1);
            }
            OP_SWAP => {
                let x1 = self.stack.remove(1)?;
                self.stack.push(x1);
            }
            OP_TUCK => {
                // [x1 x2] -> [x2 x1 x2]
                let items = self.stack.pop_n(2)?;
                let (x1, x2) = (items[0].clone(), items[1].clone());
                self.stack.extend([x2.clone(), x1, x2]);
            }
            OP_2DROP => {
                self.stack.pop_n(2)?;
            }
            OP_2DUP => {
                let items = vec![self.stack.top(1)?.clone(), self.stack.top(0)?.clone()];
                self.stack.extend(items);
            }
            OP_3DUP => {
                let items = vec![
                    self.stack.top(2)?.clone(),
                    self.stack.top(1)?.clone(),
                    self.stack.top(0)?.clone(),
                ];
                self.stack.extend(items);
            }
            OP_2OVER => {
                // [x1 x2 x3 x4] -> [x1 x2 x3 x4 x1 x2]
                let items = vec![self.stack.top(3)?.clone(), self.stack.top(2)?.clone()];
                self.stack.extend(items);
            }
            OP_2ROT => {
                // [x1 x2 x3 x4 x5 x6] -> [x3 x4 x5 x6 x1 x2]
                self.stack.require(6)?;
                let x1 = self.stack.remove(5)?;
                let x2 = self.stack.remove(4)?;
                self.stack.extend([x1, x2]);
            }
            OP_2SWAP => {
                // [x1 x2 x3 x4] -> [x3 x4 x1 x2]
                self.stack.require(4)?;
                let x1 = self.stack.remove(3)?;
                let x2 = self.stack.remove(2)?;
                self.stack.extend([x1, x2]);
            }

            // Splice
            OP_CAT => {
                let x2 = self.stack.pop()?;
                let mut x1 = self.stack.pop()?;
                self.check_element_size("OP_CAT", x1.len() + x2.len())?;
                x1.extend_from_slice(&x2);
                self.stack.push(x1);
            }
            OP_SPLIT => {
                let n = self.stack.pop_num()?;
                let mut x1 = self.stack.pop()?;
                let n = n
                    .to_usize()
                    .filter(|n| *n <= x1.len())
                    .ok_or(ScriptError::OutOfRange("OP_SPLIT"))?;
                let x2 = x1.split_off(n);
                self.stack.extend([x1, x2]);
            }
            OP_SIZE => {
                let size = ScriptNum::from(self.stack.top(0)?.len());
                self.stack.push(size.to_bytes());
            }

            // Bitwise logic
            OP_INVERT => {
                let mut x = self.stack.pop()?;
                x.iter_mut().for_each(|b| *b ^= 0xff);
                self.stack.push(x);
            }
            OP_AND => self.bitwise("OP_AND", |a, b| a & b)?,
            OP_OR => self.bitwise("OP_OR", |a, b| a | b)?,
            OP_XOR => self.bitwise("OP_XOR", |a, b| a ^ b)?,
            OP_EQUAL | OP_EQUALVERIFY => {
                let a = self.stack.pop()?;
                let b = self.stack.pop()?;
                if opcode == OP_EQUAL {
                    self.stack.push(encode_bool(a == b));
                } else if a != b {
                    return Err(ScriptError::Verify("OP_EQUALVERIFY"));
                }
            }
            OP_LSHIFT | OP_RSHIFT => {
                let name = if opcode == OP_LSHIFT { "OP_LSHIFT" } else { "OP_RSHIFT" };
                let n = self.stack.pop_num()?;
                if n.is_negative() {
                    return Err(ScriptError::NegativeShift(name));
                }
                // counts past usize shift every bit out
                let bits = n.to_usize().unwrap_or(usize::MAX);
                let x = self.stack.pop()?;
                let shifted = if opcode == OP_LSHIFT { lshift(&x, bits) } else { rshift(&x, bits) };
                self.stack.push(shifted);
            }

            // Arithmetic
            OP_1ADD => self.unary_num(|a| a + ScriptNum::one())?,
            OP_1SUB => self.unary_num(|a| a - ScriptNum::one())?,
            OP_NEGATE => self.unary_num(|a| -a)?,
            OP_ABS => self.unary_num(|a| a.abs())?,
            OP_NOT => self.unary_num(|a| ScriptNum::from(a.is_zero() as u8))?,
            OP_0NOTEQUAL => self.unary_num(|a| ScriptNum::from(!a.is_zero() as u8))?,
            OP_ADD => self.binary_num(|a, b| Ok(a + b))?,
            OP_SUB => self.binary_num(|a, b| Ok(a - b))?,
            OP_MUL => {
                // |a·b| needs at most len(a) + len(b) bytes
                let len = self.stack.top(0)?.len() + self.stack.top(1)?.len();
                self.check_element_size("OP_MUL", len)?;
                self.binary_num(|a, b| Ok(a * b))?
            }
            OP_DIV => self.binary_num(|a, b| a.checked_div(&b).ok_or(ScriptError::DivideByZero("OP_DIV")))?,
            OP_MOD => self.binary_num(|a, b| a.checked_rem(&b).ok_or(ScriptError::DivideByZero("OP_MOD")))?,
            OP_BOOLAND => {
                let a = self.stack.pop_bool()?;
                let b = self.stack.pop_bool()?;
                self.stack.push(encode_bool(a && b));
            }
            OP_BOOLOR => {
                let a = self.stack.pop_bool()?;
                let b = self.stack.pop_bool()?;
                self.stack.push(encode_bool(a || b));
            }
            OP_NUMEQUAL => self.compare(|a, b| a == b)?,
            OP_NUMEQUALVERIFY => {
                let b = self.stack.pop_num()?;
                let a = self.stack.pop_num()?;
                if a != b {
                    return Err(ScriptError::Verify("OP_NUMEQUALVERIFY"));
                }
            }
            OP_NUMNOTEQUAL => self.compare(|a, b| a != b)?,
            OP_LESSTHAN => self.compare(|a, b| a < b)?,
            OP_GREATERTHAN => self.compare(|a, b| a > b)?,
            OP_LESSTHANOREQUAL => self.compare(|a, b| a <= b)?,
            OP_GREATERTHANOREQUAL => self.compare(|a, b| a >= b)?,
            OP_MIN => self.binary_num(|a, b| Ok(a.min(b)))?,
            OP_MAX => self.binary_num(|a, b| Ok(a.max(b)))?,
            OP_WITHIN => {
                let max = self.stack.pop_num()?;
                let min = self.stack.pop_num()?;
                let x = self.stack.pop_num()?;
                self.stack.push(encode_bool(min <= x && x < max));
            }
            OP_BIN2NUM => {
                let x = self.stack.pop()?;
                self.stack.push(ScriptNum::from_bytes(&x).to_bytes());
            }
            OP_NUM2BIN => {
                let size = self.stack.pop_num()?;
                let x = self.stack.pop()?;
                let out_of_range = ScriptError::OutOfRange("OP_NUM2BIN");
                let size = size.to_usize().ok_or(out_of_range.clone())?;
                self.check_element_size("OP_NUM2BIN", size)?;
                let encoded = ScriptNum::from_bytes(&x)
                    .encode_fixed(size as u64)
                    .map_err(|_| out_of_range)?;
                self.stack.push(encoded);
            }

            // Crypto
            OP_RIPEMD160 => {
                let x = self.stack.pop()?;
                self.stack.push(ripemd160(&x)?.to_vec());
            }
            OP_SHA1 => {
                let x = self.stack.pop()?;
                self.stack.push(sha1(&x)?.to_vec());
            }
            OP_SHA256 => {
                let x = self.stack.pop()?;
                self.stack.push(sha256(&x)?.to_vec());
            }
            OP_HASH160 => {
                let x = self.stack.pop()?;
                self.stack.push(hash160(&x)?.to_vec());
            }
            OP_HASH256 => {
                let x = self.stack.pop()?;
                self.stack.push(sha256d(&x)?.to_vec());
            }
            OP_CODESEPARATOR => {
                if index >= self.lock_start {
                    self.checkpoint = self.chunks[index].end();
                }
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let public_key = decode_public_key(&self.stack.pop()?)?;
                let signature = self.stack.pop()?;
                let verified = self.check_signature(&signature, &public_key)?;
                if opcode == OP_CHECKSIG {
                    self.stack.push(encode_bool(verified));
                } else if !verified {
                    return Err(ScriptError::Verify("OP_CHECKSIGVERIFY"));
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let verified = self.check_multisig()?;
                if opcode == OP_CHECKMULTISIG {
                    self.stack.push(encode_bool(verified));
                } else if !verified {
                    return Err(ScriptError::Verify("OP_CHECKMULTISIGVERIFY"));
                }
            }

            other => return Err(ScriptError::ReservedOpcode(other)),
        }
        Ok(())
    }

    fn unary_num(&mut self, op: impl FnOnce(ScriptNum) -> ScriptNum) -> Result<()> {
        let a = self.stack.pop_num()?;
        self.stack.push(op(a).to_bytes());
        Ok(())
    }

    /// Pops `b` (top) then `a`, pushes `op(a, b)`
    fn binary_num(&mut self, op: impl FnOnce(ScriptNum, ScriptNum) -> Result<ScriptNum>) -> Result<()> {
        let b = self.stack.pop_num()?;
        let a = self.stack.pop_num()?;
        self.stack.push(op(a, b)?.to_bytes());
        Ok(())
    }

    fn check_element_size(&self, name: &'static str, len: usize) -> Result<()> {
        if len > self.options.max_element_size {
            return Err(ScriptError::OutOfRange(name));
        }
        Ok(())
    }

    fn compare(&mut self, op: impl FnOnce(&ScriptNum, &ScriptNum) -> bool) -> Result<()> {
        let b = self.stack.pop_num()?;
        let a = self.stack.pop_num()?;
        self.stack.push(encode_bool(op(&a, &b)));
        Ok(())
    }

    fn bitwise(&mut self, name: &'static str, op: impl Fn(u8, u8) -> u8) -> Result<()> {
        let a = self.stack.pop()?;
        let b = self.stack.pop()?;
        if a.len() != b.len() {
            return Err(ScriptError::DifferentSizes(name));
        }
        self.stack.push(a.iter().zip(&b).map(|(x, y)| op(*x, *y)).collect());
        Ok(())
    }

    /// Script code is the lock script from the last `OP_CODESEPARATOR` on
    fn check_signature(&self, signature: &[u8], public_key: &Point) -> Result<bool> {
        let script_code = self.lock.get(self.checkpoint..).unwrap_or_default();
        Ok(verify_tx_signature(
            self.ctx.tx,
            self.ctx.vin,
            signature,
            public_key,
            script_code,
            self.ctx.parent_satoshis,
        )?)
    }

    /// Stack: dummy ∥ sig_m … sig_1 ∥ m ∥ key_n … key_1 ∥ n
    ///
    /// Keys and signatures are consumed top-first. Each signature must
    /// verify against a key after the one the previous signature matched.
    fn check_multisig(&mut self) -> Result<bool> {
        let total = self
            .stack
            .pop_num()?
            .to_usize()
            .ok_or(ScriptError::OutOfRange("OP_CHECKMULTISIG"))?;
        let mut keys = Vec::new();
        for _ in 0..total {
            keys.push(decode_public_key(&self.stack.pop()?)?);
        }

        let required = self
            .stack
            .pop_num()?
            .to_usize()
            .filter(|m| *m <= total)
            .ok_or(ScriptError::OutOfRange("OP_CHECKMULTISIG"))?;
        let mut signatures = Vec::with_capacity(required);
        for _ in 0..required {
            signatures.push(self.stack.pop()?);
        }

        // Dummy item below the signatures, value ignored
        self.stack.pop()?;

        let mut key = 0;
        let mut sig = 0;
        while sig < signatures.len() {
            if key == keys.len() {
                return Ok(false);
            }
            if self.check_signature(&signatures[sig], &keys[key])? {
                sig += 1;
            }
            key += 1;
        }
        Ok(true)
    }
}

/// Shift a big-endian bit string left, keeping its length
fn lshift(data: &[u8], bits: usize) -> Vec<u8> {
    let bit_shift = bits % 8;
    let byte_shift = bits / 8;
    let mask = LSHIFT_MASK[bit_shift];
    let overflow_mask = !mask;

    let mut result = vec![0u8; data.len()];
    for (i, byte) in data.iter().enumerate().rev() {
        let Some(k) = i.checked_sub(byte_shift) else {
            continue;
        };
        result[k] |= (byte & mask) << bit_shift;
        if k > 0 {
            result[k - 1] |= (byte & overflow_mask) >> ((8 - bit_shift) % 8);
        }
    }
    result
}

/// Shift a big-endian bit string right, keeping its length
fn rshift(data: &[u8], bits: usize) -> Vec<u8> {
    let bit_shift = bits % 8;
    let byte_shift = bits / 8;
    let mask = RSHIFT_MASK[bit_shift];
    let overflow_mask = !mask;

    let mut result = vec![0u8; data.len()];
    for (i, byte) in data.iter().enumerate() {
        let Some(k) = i.checked_add(byte_shift).filter(|k| *k < data.len()) else {
            break;
        };
        result[k] |= (byte & mask) >> bit_shift;
        if k + 1 < data.len() {
            result[k + 1] |= (byte & overflow_mask) << ((8 - bit_shift) % 8);
        }
    }
    result
}
