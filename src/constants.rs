//! Protocol constants for scripts, signatures and transactions

/// Largest satoshi amount and varint value accepted: 2^53 - 1
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Default relay fee rate in satoshis per 1000 bytes
pub const DEFAULT_FEE_PER_KB: u64 = 50;

/// Smallest change output worth keeping
pub const MIN_CHANGE_SATOSHIS: u64 = 1;

/// Largest P2PKH unlock script: push(72-byte DER ∥ flag) ∥ push(65-byte key)
pub const MAX_P2PKH_UNLOCK_SIZE: usize = 1 + 73 + 1 + 65;

/// Transaction version accepted by the verifier
pub const TX_VERSION: u32 = 1;

/// Sequence number for final transaction
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Input size ceiling for the hash primitives: 32 MiB
pub const MAX_HASH_INPUT_SIZE: usize = 32 * 1024 * 1024;

/// Default ceiling on stack items built by `OP_CAT`, `OP_NUM2BIN` and
/// `OP_MUL`: 32 MiB
pub const DEFAULT_MAX_ELEMENT_SIZE: usize = 32 * 1024 * 1024;

/// Upper bound of the `OP_NUM2BIN` size operand
pub const MAX_NUM2BIN_SIZE: u64 = 2_147_483_647;

/// Low 5 bits of a sighash type select ALL / NONE / SINGLE
pub const SIGHASH_BASE_MASK: u32 = 0x1f;

/// secp256k1 group order n
pub const CURVE_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b,
    0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

/// secp256k1 field prime p
pub const FIELD_PRIME: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xfe, 0xff, 0xff, 0xfc, 0x2f,
];
