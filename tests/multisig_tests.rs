//! CHECKMULTISIG ordering and CODESEPARATOR script code

use script_consensus::interpreter::{eval_script, EvalOptions, SpendContext};
use script_consensus::opcodes::*;
use script_consensus::script::encode_push_data;
use script_consensus::sighash::generate_tx_signature_with_nonce;
use script_consensus::*;

const PARENT_SATOSHIS: u64 = 25_000;

fn keys() -> anyhow::Result<Vec<PrivateKey>> {
    Ok(vec![
        PrivateKey::from_bytes([0x01; 32])?,
        PrivateKey::from_bytes([0x02; 32])?,
        PrivateKey::from_bytes([0x03; 32])?,
    ])
}

fn spending_tx() -> anyhow::Result<Transaction> {
    let mut tx = Transaction::new();
    tx.add_input(Input::new([0x77; 32], 0, Script::default(), SEQUENCE_FINAL))?;
    tx.add_output(Output::new(vec![OP_TRUE], 20_000)?)?;
    Ok(tx)
}

/// OP_2 <pk1> <pk2> <pk3> OP_3 OP_CHECKMULTISIG
fn two_of_three(keys: &[PrivateKey]) -> Vec<u8> {
    let mut lock = vec![OP_2];
    for key in keys {
        lock.extend(encode_push_data(&key.public_key_bytes()));
    }
    lock.extend([OP_3, OP_CHECKMULTISIG]);
    lock
}

fn sign(tx: &Transaction, script_code: &[u8], key: &PrivateKey) -> anyhow::Result<Vec<u8>> {
    let signature =
        generate_tx_signature_with_nonce(tx, 0, script_code, PARENT_SATOSHIS, key, &[0x5c; 32], SighashFlags::ALL)?;
    signature.ok_or_else(|| anyhow::anyhow!("degenerate nonce"))
}

fn unlock_with(signatures: &[&[u8]]) -> Vec<u8> {
    let mut unlock = vec![OP_0];
    for signature in signatures {
        unlock.extend(encode_push_data(signature));
    }
    unlock
}

#[test]
fn test_multisig_in_key_order() -> anyhow::Result<()> {
    let keys = keys()?;
    let lock = two_of_three(&keys);
    let tx = spending_tx()?;
    let ctx = SpendContext::new(&tx, 0, PARENT_SATOSHIS);

    let sig1 = sign(&tx, &lock, &keys[0])?;
    let sig2 = sign(&tx, &lock, &keys[1])?;
    let sig3 = sign(&tx, &lock, &keys[2])?;

    for pair in [[&sig1, &sig2], [&sig1, &sig3], [&sig2, &sig3]] {
        let unlock = unlock_with(&[pair[0], pair[1]]);
        let vm = eval_script(&unlock, &lock, ctx, EvalOptions::default());
        assert!(vm.success, "{:?}", vm.error);
        assert!(vm.stack.len() == 1);
    }
    Ok(())
}

#[test]
fn test_multisig_out_of_order_fails() -> anyhow::Result<()> {
    let keys = keys()?;
    let lock = two_of_three(&keys);
    let tx = spending_tx()?;
    let ctx = SpendContext::new(&tx, 0, PARENT_SATOSHIS);

    let sig1 = sign(&tx, &lock, &keys[0])?;
    let sig2 = sign(&tx, &lock, &keys[1])?;

    let vm = eval_script(&unlock_with(&[&sig2, &sig1]), &lock, ctx, EvalOptions::default());
    assert!(!vm.success);
    assert_eq!(vm.error, Some(ScriptError::FalseStackTop));
    Ok(())
}

#[test]
fn test_multisig_repeated_signature_fails() -> anyhow::Result<()> {
    let keys = keys()?;
    let lock = two_of_three(&keys);
    let tx = spending_tx()?;
    let ctx = SpendContext::new(&tx, 0, PARENT_SATOSHIS);

    let sig2 = sign(&tx, &lock, &keys[1])?;
    let vm = eval_script(&unlock_with(&[&sig2, &sig2]), &lock, ctx, EvalOptions::default());
    assert_eq!(vm.error, Some(ScriptError::FalseStackTop));
    Ok(())
}

#[test]
fn test_multisig_verify_variant() -> anyhow::Result<()> {
    let keys = keys()?;
    let mut lock = two_of_three(&keys);
    *lock.last_mut().unwrap() = OP_CHECKMULTISIGVERIFY;
    lock.push(OP_1);
    let tx = spending_tx()?;
    let ctx = SpendContext::new(&tx, 0, PARENT_SATOSHIS);

    let sig1 = sign(&tx, &lock, &keys[0])?;
    let sig3 = sign(&tx, &lock, &keys[2])?;
    assert!(eval_script(&unlock_with(&[&sig1, &sig3]), &lock, ctx, EvalOptions::default()).success);

    let vm = eval_script(&unlock_with(&[&sig3, &sig1]), &lock, ctx, EvalOptions::default());
    assert_eq!(vm.error, Some(ScriptError::Verify("OP_CHECKMULTISIGVERIFY")));
    Ok(())
}

#[test]
fn test_multisig_requires_dummy() -> anyhow::Result<()> {
    let keys = keys()?;
    let lock = two_of_three(&keys);
    let tx = spending_tx()?;
    let ctx = SpendContext::new(&tx, 0, PARENT_SATOSHIS);

    let sig1 = sign(&tx, &lock, &keys[0])?;
    let sig2 = sign(&tx, &lock, &keys[1])?;
    let unlock = unlock_with(&[&sig1, &sig2]);

    // drop the leading OP_0
    let vm = eval_script(&unlock[1..], &lock, ctx, EvalOptions::default());
    assert_eq!(vm.error, Some(ScriptError::StackEmpty));

    // any dummy value is accepted
    let mut unlock = unlock;
    unlock[0] = OP_16;
    assert!(eval_script(&unlock, &lock, ctx, EvalOptions::default()).success);
    Ok(())
}

#[test]
fn test_codeseparator_sets_script_code() -> anyhow::Result<()> {
    let key = PrivateKey::from_bytes([0x09; 32])?;
    let tx = spending_tx()?;
    let ctx = SpendContext::new(&tx, 0, PARENT_SATOSHIS);

    let mut lock = vec![OP_NOP, OP_CODESEPARATOR];
    lock.extend(encode_push_data(&key.public_key_bytes()));
    lock.push(OP_CHECKSIG);

    let after_separator = sign(&tx, &lock[2..], &key)?;
    let vm = eval_script(&encode_push_data(&after_separator), &lock, ctx, EvalOptions::default());
    assert!(vm.success, "{:?}", vm.error);

    let whole_script = sign(&tx, &lock, &key)?;
    let vm = eval_script(&encode_push_data(&whole_script), &lock, ctx, EvalOptions::default());
    assert_eq!(vm.error, Some(ScriptError::FalseStackTop));
    Ok(())
}

#[test]
fn test_malformed_signature_is_script_error() -> anyhow::Result<()> {
    let key = PrivateKey::from_bytes([0x09; 32])?;
    let tx = spending_tx()?;
    let ctx = SpendContext::new(&tx, 0, PARENT_SATOSHIS);

    let mut lock = encode_push_data(&key.public_key_bytes());
    lock.push(OP_CHECKSIG);

    let vm = eval_script(&encode_push_data(&[0x30, 0x01, 0x41]), &lock, ctx, EvalOptions::default());
    assert!(matches!(vm.error, Some(ScriptError::Malformed(_))));

    let vm = eval_script(&[OP_0], &lock, ctx, EvalOptions::default());
    assert!(matches!(vm.error, Some(ScriptError::Malformed(_))));
    Ok(())
}
