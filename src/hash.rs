//! Hash primitives used by scripts and signatures
//!
//! Every function refuses inputs above [`MAX_HASH_INPUT_SIZE`].

use bitcoin_hashes::{sha1 as bh_sha1, sha256d as bh_sha256d, Hash as BitcoinHash, HashEngine};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::constants::MAX_HASH_INPUT_SIZE;
use crate::error::{ConsensusError, Result};

fn check_size(data: &[u8]) -> Result<()> {
    if data.len() > MAX_HASH_INPUT_SIZE {
        return Err(ConsensusError::HashInputTooLarge {
            len: data.len(),
            max: MAX_HASH_INPUT_SIZE,
        });
    }
    Ok(())
}

/// SHA-1
pub fn sha1(data: &[u8]) -> Result<[u8; 20]> {
    check_size(data)?;
    let mut engine = bh_sha1::Hash::engine();
    engine.input(data);
    Ok(bh_sha1::Hash::from_engine(engine).into_inner())
}

/// SHA-256
pub fn sha256(data: &[u8]) -> Result<[u8; 32]> {
    check_size(data)?;
    Ok(Sha256::digest(data).into())
}

/// SHA256(SHA256(x))
pub fn sha256d(data: &[u8]) -> Result<[u8; 32]> {
    check_size(data)?;
    let mut engine = bh_sha256d::Hash::engine();
    engine.input(data);
    Ok(bh_sha256d::Hash::from_engine(engine).into_inner())
}

/// RIPEMD-160
pub fn ripemd160(data: &[u8]) -> Result<[u8; 20]> {
    check_size(data)?;
    Ok(Ripemd160::digest(data).into())
}

/// RIPEMD160(SHA256(x))
pub fn hash160(data: &[u8]) -> Result<[u8; 20]> {
    ripemd160(&sha256(data)?)
}
