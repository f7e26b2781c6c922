//! Pay-to-pubkey-hash spends: signing, evaluation and verification

use script_consensus::interpreter::{eval_script, EvalOptions, SpendContext};
use script_consensus::script::{p2pkh_lock_script, p2pkh_unlock_script};
use script_consensus::sighash::{generate_tx_signature_with_nonce, verify_tx_signature};
use script_consensus::*;

const SECRET: [u8; 32] = [0x11; 32];
const NONCE: [u8; 32] = [0x22; 32];

// Spends output 3 of PREV_TX with an ALL|FORKID signature
const RAW_TX: &str = "0100000001b207aba3f19358f3a58048d7647cff2ca25a57fe92a1c4324ba47fdde7d7eca4030000006a4730440220316f5707b0a872c67bebc10f15832389c96a6be58e803c992d6b4b3bc5864687022019cf6ab02706865b8507a4f56eeae155ac794a363d95dce8c8777c10f1f9fc01412103093313584be3ccd8777947c1b8f9cc945e9764296451aa29209f9ac56eb4e91affffffff03204e0000000000001976a91461ed573d90e9582689739e72d17624b2d8faa4c388ac204e0000000000001976a914fca1fe054916c043dc36d703a464cb6edce8e72e88ac5b0c6e01000000001976a91400937c46183f418f8eaac2af10db62c5c852ffe888ac00000000";
const PREV_TX: &str = "01000000014b71d4aa217e6e515f343c1b5f3e6294fd416e8fa782b089a412c6e32ad0ed07050000006a4730440220449b66c7ec56b6e6f4c133e3cce67cb74e97bbc924deb3f4dbf43e3de941d05e0220649510d81de69df1bbef6b627dab88e20fa272a811613f97503c45715146c929412103a8ff752878232a096647f90350851419daca06a498f382de8b89772930ad4727ffffffff0450c30000000000001976a914902bfe624e2620a4615e7bb6511abd2c2fc7ff7d88ac204e0000000000001976a9149e2f22092ab09053c8be4a662045c069205a511588ac10270000000000001976a914eec1eda286b8fd1a198b6f6ee103bd24d3cdbd5188ac37a96e01000000001976a9149595b9d204ca44fde3b4fb43eff8e8b9d74edd8a88ac00000000";

fn spending_tx() -> anyhow::Result<Transaction> {
    let mut tx = Transaction::new();
    tx.add_input(Input::new([0x5a; 32], 1, Script::default(), SEQUENCE_FINAL))?;
    tx.add_output(Output::new(p2pkh_lock_script(&[0x42; 20]), 9_000)?)?;
    Ok(tx)
}

#[test]
fn test_p2pkh_end_to_end_with_fixed_nonce() -> anyhow::Result<()> {
    let key = PrivateKey::from_bytes(SECRET)?;
    let lock = p2pkh_lock_script(&key.pubkeyhash()?);
    let satoshis = 10_000;
    let tx = spending_tx()?;

    let signature = generate_tx_signature_with_nonce(&tx, 0, lock.as_bytes(), satoshis, &key, &NONCE, SighashFlags::ALL)?
        .expect("nonce is valid");
    assert_eq!(signature.last(), Some(&0x41));

    let unlock = p2pkh_unlock_script(&signature, &key.public_key_bytes());
    let ctx = SpendContext::new(&tx, 0, satoshis);
    let vm = eval_script(unlock.as_bytes(), lock.as_bytes(), ctx, EvalOptions::traced());
    assert!(vm.success, "{:?}", vm.error);
    assert_eq!(vm.stack, vec![vec![1]]);
    assert_eq!(vm.stack_trace.len(), 7);

    // Same nonce, same signature
    let again = generate_tx_signature_with_nonce(&tx, 0, lock.as_bytes(), satoshis, &key, &NONCE, SighashFlags::ALL)?;
    assert_eq!(again, Some(signature.clone()));

    for i in 0..signature.len() {
        let mut flipped = signature.clone();
        flipped[i] ^= 0x01;
        let unlock = p2pkh_unlock_script(&flipped, &key.public_key_bytes());
        let vm = eval_script(unlock.as_bytes(), lock.as_bytes(), ctx, EvalOptions::default());
        assert!(!vm.success, "flipping byte {i} still verified");
    }
    Ok(())
}

#[test]
fn test_signature_bound_to_spend() -> anyhow::Result<()> {
    let key = PrivateKey::from_bytes(SECRET)?;
    let lock = p2pkh_lock_script(&key.pubkeyhash()?);
    let tx = spending_tx()?;

    let signature = generate_tx_signature_with_nonce(&tx, 0, lock.as_bytes(), 10_000, &key, &NONCE, SighashFlags::ALL)?
        .expect("nonce is valid");
    let unlock = p2pkh_unlock_script(&signature, &key.public_key_bytes());

    // wrong parent amount
    let vm = eval_script(unlock.as_bytes(), lock.as_bytes(), SpendContext::new(&tx, 0, 10_001), EvalOptions::default());
    assert_eq!(vm.error, Some(ScriptError::FalseStackTop));

    // wrong key
    let other = PrivateKey::from_bytes([0x33; 32])?;
    let unlock = p2pkh_unlock_script(&signature, &other.public_key_bytes());
    let vm = eval_script(unlock.as_bytes(), lock.as_bytes(), SpendContext::new(&tx, 0, 10_000), EvalOptions::default());
    assert_eq!(vm.error, Some(ScriptError::Verify("OP_EQUALVERIFY")));
    Ok(())
}

#[test]
fn test_real_forkid_spend() -> anyhow::Result<()> {
    let tx = Transaction::from_hex(RAW_TX)?;
    let prev = Transaction::from_hex(PREV_TX)?;
    let parent = &prev.outputs()[3];

    assert_eq!(tx.inputs()[0].txid, prev.txid()?);
    assert_eq!(tx.inputs()[0].vout, 3);
    assert_eq!(parent.satoshis(), 0x016e_a937);

    let ctx = SpendContext::new(&tx, 0, parent.satoshis());
    let vm = eval_script(tx.inputs()[0].script.as_bytes(), parent.script().as_bytes(), ctx, EvalOptions::default());
    assert!(vm.success, "{:?}", vm.error);

    verify_tx(&tx, &[parent.clone()], DEFAULT_FEE_PER_KB)?;

    // A different amount changes the sighash
    let ctx = SpendContext::new(&tx, 0, parent.satoshis() - 1);
    let vm = eval_script(tx.inputs()[0].script.as_bytes(), parent.script().as_bytes(), ctx, EvalOptions::default());
    assert_eq!(vm.error, Some(ScriptError::FalseStackTop));
    Ok(())
}

#[test]
fn test_real_signature_check_directly() -> anyhow::Result<()> {
    let tx = Transaction::from_hex(RAW_TX)?;
    let prev = Transaction::from_hex(PREV_TX)?;
    let parent = &prev.outputs()[3];

    let chunks = tx.inputs()[0].script.chunks()?;
    let signature = chunks[0].data.clone().unwrap_or_default();
    let public_key = ecdsa::decode_public_key(chunks[1].data.as_deref().unwrap_or_default())?;

    assert!(verify_tx_signature(&tx, 0, &signature, &public_key, parent.script().as_bytes(), parent.satoshis())?);
    assert!(!verify_tx_signature(&tx, 0, &signature, &public_key, &[], parent.satoshis())?);
    Ok(())
}

#[test]
fn test_builder_sign_finalize_verify() -> anyhow::Result<()> {
    let key = PrivateKey::from_bytes(SECRET)?;
    let pubkeyhash = key.pubkeyhash()?;

    let mut parent = Transaction::new();
    parent.add_input(Input::new([0xaa; 32], 0, Script::default(), SEQUENCE_FINAL))?;
    parent.pay_to(&pubkeyhash, 50_000)?;

    let mut tx = Transaction::new();
    tx.spend(&parent, 0)?.pay_to(&[0x42; 20], 20_000)?.change(&pubkeyhash)?;
    tx.sign(&key)?.finalize()?;
    assert!(tx.is_finalized());
    tx.verify()?;

    let change = tx.change_output().map(Output::satoshis).unwrap_or_default();
    assert!(change > 29_000 && change < 30_000);
    assert!(tx.fee()? as u64 >= transaction::required_fee(tx.size(), DEFAULT_FEE_PER_KB));

    // Wire round trip drops the attached outputs; the verifier takes them explicitly
    let decoded = Transaction::from_hex(&tx.to_hex())?;
    assert_eq!(decoded.txid()?, tx.txid()?);
    verify_tx(&decoded, &parent.outputs()[..1], DEFAULT_FEE_PER_KB)?;
    assert!(matches!(decoded.verify(), Err(ConsensusError::MissingPreviousOutput { index: 0 })));

    let mut tampered = decoded.clone();
    tampered.input_mut(0)?.sequence = 7;
    let err = verify_tx(&tampered, &parent.outputs()[..1], DEFAULT_FEE_PER_KB).unwrap_err();
    assert!(matches!(err, ConsensusError::ScriptExecution(_)));
    Ok(())
}

#[test]
fn test_unsigned_input_fails_verification() -> anyhow::Result<()> {
    let key = PrivateKey::from_bytes(SECRET)?;

    let mut parent = Transaction::new();
    parent.add_input(Input::new([0xbb; 32], 0, Script::default(), SEQUENCE_FINAL))?;
    parent.pay_to(&key.pubkeyhash()?, 5_000)?;

    let mut tx = Transaction::new();
    tx.spend(&parent, 0)?.pay_to(&[0x42; 20], 1_000)?;
    let err = tx.verify().unwrap_err();
    assert_eq!(err, ConsensusError::ScriptExecution(ScriptError::StackEmpty));

    // Signing with a key that does not own the output changes nothing
    tx.sign(&PrivateKey::from_bytes([0x44; 32])?)?;
    assert!(tx.inputs()[0].script.is_empty());
    Ok(())
}

#[test]
fn test_facade_verifies_real_spend() -> anyhow::Result<()> {
    let consensus = ScriptConsensus::new();
    let tx = Transaction::from_hex(RAW_TX)?;
    let prev = Transaction::from_hex(PREV_TX)?;

    let result = consensus.verify_transaction(&tx, &prev.outputs()[3..])?;
    assert_eq!(result, ValidationResult::Valid);

    let result = consensus.verify_transaction(&tx, &prev.outputs()[2..3])?;
    assert!(matches!(result, ValidationResult::Invalid(_)));
    Ok(())
}
