//! Transaction verification
//!
//! VerifyTx: 𝒯𝒳 × 𝒪* × ℕ → {valid, invalid}
//!
//! A transaction tx = (v, ins, outs, lt) spending parents ps is valid iff:
//! 1. v = 1
//! 2. |ins| > 0 ∧ |outs| > 0
//! 3. ins contains no outpoint twice
//! 4. Σ ps.satoshis - Σ outs.satoshis ≥ ⌈|tx| × fee_per_kb / 1000⌉
//! 5. ∀i: EvalScript(ins[i].script, ps[i].script, tx, i, ps[i].satoshis) succeeds
//!
//! Locktime is a `u32` so the `[0, 2^32 - 1]` range holds by construction.

use std::borrow::Cow;
use std::collections::HashSet;
use tracing::debug;

use crate::constants::TX_VERSION;
use crate::error::{ConsensusError, Result, ScriptError};
use crate::interpreter::{eval_script, EvalOptions, SpendContext};
use crate::transaction::{required_fee, Output, Transaction};

/// Run `unlock` ∥ `lock` and report the verdict.
///
/// `Ok(false)` means the scripts ran to the end but left a false value on
/// top of the stack. Any other failure is returned as
/// [`ConsensusError::ScriptExecution`].
pub fn verify_script(unlock: &[u8], lock: &[u8], ctx: SpendContext<'_>) -> Result<bool> {
    let vm = eval_script(unlock, lock, ctx, EvalOptions::default());
    match vm.error {
        None => Ok(true),
        Some(ScriptError::FalseStackTop) => Ok(false),
        Some(err) => Err(ConsensusError::ScriptExecution(err)),
    }
}

/// Check `tx` against the outputs it spends, `parents[i]` being the output
/// spent by input `i`.
pub fn verify_tx(tx: &Transaction, parents: &[Output], min_fee_per_kb: u64) -> Result<()> {
    check_structure(tx)?;

    if parents.len() < tx.inputs().len() {
        return Err(ConsensusError::MissingPreviousOutput { index: parents.len() });
    }
    if parents.len() > tx.inputs().len() {
        return reject("more parent outputs than inputs");
    }

    check_fee(tx, parents, min_fee_per_kb)?;
    check_scripts(tx, parents)
}

fn reject(reason: &'static str) -> Result<()> {
    debug!(reason, "transaction rejected");
    Err(ConsensusError::TransactionValidation(Cow::Borrowed(reason)))
}

fn check_structure(tx: &Transaction) -> Result<()> {
    if tx.version() != TX_VERSION {
        return reject("bad version");
    }
    if tx.inputs().is_empty() {
        return reject("no inputs");
    }
    if tx.outputs().is_empty() {
        return reject("no outputs");
    }

    let mut outpoints = HashSet::with_capacity(tx.inputs().len());
    for input in tx.inputs() {
        if !outpoints.insert((input.txid, input.vout)) {
            return reject("duplicate input");
        }
    }
    Ok(())
}

fn check_fee(tx: &Transaction, parents: &[Output], min_fee_per_kb: u64) -> Result<()> {
    let total_in: u128 = parents.iter().map(|o| o.satoshis() as u128).sum();
    let total_out: u128 = tx.outputs().iter().map(|o| o.satoshis() as u128).sum();
    let required = required_fee(tx.size(), min_fee_per_kb) as u128;

    match total_in.checked_sub(total_out) {
        Some(fee) if fee >= required => Ok(()),
        _ => {
            debug!(total_in, total_out, required, "fee below minimum");
            reject("insufficient priority")
        }
    }
}

fn check_input(tx: &Transaction, vin: usize, parent: &Output) -> Result<()> {
    let unlock = tx.inputs()[vin].script.as_bytes();
    let ctx = SpendContext::new(tx, vin, parent.satoshis());
    let vm = eval_script(unlock, parent.script().as_bytes(), ctx, EvalOptions::default());
    match vm.error {
        None => Ok(()),
        Some(err) => {
            debug!(vin, error = %err, "input script rejected");
            Err(ConsensusError::ScriptExecution(err))
        }
    }
}

fn check_scripts(tx: &Transaction, parents: &[Output]) -> Result<()> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        parents
            .par_iter()
            .enumerate()
            .try_for_each(|(vin, parent)| check_input(tx, vin, parent))
    }

    #[cfg(not(feature = "parallel"))]
    {
        parents
            .iter()
            .enumerate()
            .try_for_each(|(vin, parent)| check_input(tx, vin, parent))
    }
}
