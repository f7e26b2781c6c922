//! # script-consensus
//!
//! Bitcoin script evaluation and transaction signing/verification as pure
//! functions over byte strings.
//!
//! ## Architecture
//!
//! The crate is layered bottom-up:
//! - Codecs (byte streams, script numbers, script chunks, DER, transactions)
//! - Primitives (hashes, the secp256k1 curve, ECDSA)
//! - Sighash engine (BIP143-style preimage with FORKID)
//! - Script interpreter (the stack machine)
//! - Transaction verifier
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: evaluation and verification never mutate their inputs
//! 2. **Explicit Configuration**: fee rates and tracing are passed in, never global
//! 3. **Exact Version Pinning**: consensus-critical dependencies are pinned to exact versions
//! 4. **Non-throwing Interpreter**: script failures are values in [`VmResult`]
//!
//! ## Usage
//!
//! ```rust
//! use script_consensus::ScriptConsensus;
//! use script_consensus::interpreter::SpendContext;
//! use script_consensus::opcodes::*;
//!
//! let consensus = ScriptConsensus::new();
//! let vm = consensus.eval_script(&[OP_2, OP_3], &[OP_ADD, OP_5, OP_EQUAL], SpendContext::default());
//! assert!(vm.success);
//! assert_eq!(vm.stack, vec![vec![1]]);
//! ```

pub mod config;
pub mod constants;
pub mod curve;
pub mod der;
pub mod ecdsa;
pub mod error;
pub mod hash;
pub mod interpreter;
pub mod num;
pub mod opcodes;
pub mod script;
pub mod sighash;
pub mod stream;
pub mod transaction;
pub mod types;
pub mod verify;

// Re-export commonly used types
pub use config::Config;
pub use constants::*;
pub use ecdsa::PrivateKey;
pub use error::{ConsensusError, Result, ScriptError};
pub use interpreter::{eval_script, EvalOptions, SpendContext, VmResult};
pub use script::Script;
pub use sighash::SighashFlags;
pub use transaction::{Input, Output, Transaction};
pub use types::*;
pub use verify::{verify_script, verify_tx};

/// Entry point bundling a [`Config`] with the evaluation and verification
/// operations.
///
/// # Examples
///
/// ```
/// use script_consensus::{Config, ScriptConsensus};
///
/// let consensus = ScriptConsensus::with_config(Config { fee_per_kb: 1000, trace: true, ..Config::default() });
/// assert_eq!(consensus.new_transaction().fee_per_kb(), 1000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptConsensus {
    config: Config,
}

impl ScriptConsensus {
    /// Create an instance with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Empty version 1 transaction at the configured fee rate
    pub fn new_transaction(&self) -> Transaction {
        Transaction::with_fee_per_kb(self.config.fee_per_kb)
    }

    /// Evaluate `unlock` followed by `lock`, tracing if the configuration
    /// asks for it
    ///
    /// # Examples
    ///
    /// ```
    /// use script_consensus::{Config, ScriptConsensus, ScriptError};
    /// use script_consensus::interpreter::SpendContext;
    /// use script_consensus::opcodes::*;
    ///
    /// let consensus = ScriptConsensus::with_config(Config { trace: true, ..Config::default() });
    /// let vm = consensus.eval_script(&[OP_1], &[OP_VERIFY], SpendContext::default());
    /// assert!(!vm.success);
    /// assert_eq!(vm.error, Some(ScriptError::FalseStackTop));
    /// assert_eq!(vm.stack_trace.len(), 2);
    /// ```
    pub fn eval_script(&self, unlock: &[u8], lock: &[u8], ctx: SpendContext<'_>) -> VmResult {
        let options = EvalOptions {
            trace: self.config.trace,
            max_element_size: self.config.max_element_size,
        };
        interpreter::eval_script(unlock, lock, ctx, options)
    }

    /// See [`verify::verify_script`]
    ///
    /// # Examples
    ///
    /// ```
    /// use script_consensus::ScriptConsensus;
    /// use script_consensus::interpreter::SpendContext;
    ///
    /// let consensus = ScriptConsensus::new();
    /// // OP_1 | OP_1 OP_EQUAL
    /// let result = consensus.verify_script(&[0x51], &[0x51, 0x87], SpendContext::default()).unwrap();
    /// assert!(result);
    /// ```
    pub fn verify_script(&self, unlock: &[u8], lock: &[u8], ctx: SpendContext<'_>) -> Result<bool> {
        verify::verify_script(unlock, lock, ctx)
    }

    /// Verify `tx` against the outputs it spends at the configured fee rate.
    ///
    /// Rule violations come back as [`ValidationResult::Invalid`]; only
    /// malformed input is an `Err`.
    pub fn verify_transaction(&self, tx: &Transaction, parents: &[Output]) -> Result<ValidationResult> {
        match verify::verify_tx(tx, parents, self.config.fee_per_kb) {
            Ok(()) => Ok(ValidationResult::Valid),
            Err(
                err @ (ConsensusError::TransactionValidation(_)
                | ConsensusError::ScriptExecution(_)
                | ConsensusError::MissingPreviousOutput { .. }),
            ) => Ok(ValidationResult::Invalid(err.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Signature hash of input `vin` spending `parent_script`/`parent_satoshis`
    pub fn sighash(
        &self,
        tx: &Transaction,
        vin: usize,
        parent_script: &[u8],
        parent_satoshis: u64,
        flags: SighashFlags,
    ) -> Result<Hash> {
        sighash::sighash(tx, vin, parent_script, parent_satoshis, flags)
    }
}
