//! ECDSA signing and verification, key generation and public key encoding

use secp256k1::rand::{thread_rng, Rng};
use secp256k1::SecretKey;
use std::cmp::Ordering;

use crate::curve::{self, CurveError};
use crate::error::{ConsensusError, Result};
use crate::hash::hash160;
use crate::types::{ByteString, Point, Signature};

fn bad_public_key(err: CurveError) -> ConsensusError {
    ConsensusError::BadPublicKey(err.to_string().into())
}

/// Random scalar in [1, n)
pub fn generate_private_key() -> [u8; 32] {
    SecretKey::new(&mut thread_rng()).secret_bytes()
}

/// 0 < d < n
pub fn verify_private_key(private_key: &[u8; 32]) -> bool {
    private_key.iter().any(|b| *b != 0)
        && curve::compare_scalar_to_curve_order(private_key) == Ordering::Less
}

pub fn calculate_public_key(private_key: &[u8; 32]) -> Result<Point> {
    curve::scalar_multiply_base_point(private_key)
        .map_err(|e| ConsensusError::BadPrivateKey(e.to_string().into()))
}

/// Sign with a nonce mixed from fresh randomness. Constant time, low-S.
///
/// `public_key` must belong to `private_key`.
pub fn sign(hash: &[u8; 32], private_key: &[u8; 32], public_key: &Point) -> Result<Signature> {
    if calculate_public_key(private_key)? != *public_key {
        return Err(ConsensusError::BadPrivateKey(
            "private key does not match public key".into(),
        ));
    }

    let entropy: [u8; 32] = thread_rng().gen();
    curve::ecdsa_sign(hash, private_key, &entropy)
        .map_err(|e| ConsensusError::BadPrivateKey(e.to_string().into()))
}

/// Sign with a caller-chosen nonce. `None` if the nonce is degenerate.
pub fn sign_with_nonce(
    hash: &[u8; 32],
    nonce: &[u8; 32],
    private_key: &[u8; 32],
) -> Result<Option<Signature>> {
    if !verify_private_key(private_key) {
        return Err(ConsensusError::BadPrivateKey("scalar out of range".into()));
    }
    Ok(curve::ecdsa_sign_with_nonce(hash, nonce, private_key))
}

pub fn verify(signature: &Signature, hash: &[u8; 32], public_key: &Point) -> bool {
    curve::ecdsa_verify(signature, hash, public_key)
}

/// SEC1 encoding: `02/03 ∥ x` when compressed, `04 ∥ x ∥ y` otherwise
pub fn encode_public_key(point: &Point, compressed: bool) -> ByteString {
    if compressed {
        let mut out = Vec::with_capacity(33);
        out.push(if point.y_is_odd() { 0x03 } else { 0x02 });
        out.extend_from_slice(&point.x);
        out
    } else {
        let mut out = Vec::with_capacity(65);
        out.push(0x04);
        out.extend_from_slice(&point.x);
        out.extend_from_slice(&point.y);
        out
    }
}

/// Parse and validate a SEC1 public key
pub fn decode_public_key(bytes: &[u8]) -> Result<Point> {
    let Some(&prefix) = bytes.first() else {
        return Err(ConsensusError::BadPublicKey("bad length".into()));
    };

    match prefix {
        0x04 => {
            if bytes.len() != 65 {
                return Err(ConsensusError::BadPublicKey("bad length".into()));
            }
            let mut point = Point { x: [0u8; 32], y: [0u8; 32] };
            point.x.copy_from_slice(&bytes[1..33]);
            point.y.copy_from_slice(&bytes[33..65]);
            curve::public_key_from_point(&point).map_err(bad_public_key)?;
            Ok(point)
        }
        0x02 | 0x03 => {
            if bytes.len() != 33 {
                return Err(ConsensusError::BadPublicKey("bad length".into()));
            }
            let mut x = [0u8; 32];
            x.copy_from_slice(&bytes[1..33]);
            curve::decompress_point(&x, prefix == 0x03).map_err(bad_public_key)
        }
        other => Err(ConsensusError::BadPublicKey(format!("bad prefix: {other}").into())),
    }
}

/// Private key plus the public key encoding it is paired with
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    secret: [u8; 32],
    public: Point,
    compressed: bool,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

impl PrivateKey {
    pub fn generate() -> Self {
        loop {
            if let Ok(key) = Self::from_bytes(generate_private_key()) {
                return key;
            }
        }
    }

    pub fn from_bytes(secret: [u8; 32]) -> Result<Self> {
        let public = calculate_public_key(&secret)?;
        Ok(Self {
            secret,
            public,
            compressed: true,
        })
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex).map_err(|e| ConsensusError::InvalidHex(e.to_string().into()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ConsensusError::BadPrivateKey("bad length".into()))?;
        Self::from_bytes(secret)
    }

    /// Use the 65-byte public key encoding
    pub fn uncompressed(mut self) -> Self {
        self.compressed = false;
        self
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn public_point(&self) -> &Point {
        &self.public
    }

    pub fn public_key_bytes(&self) -> ByteString {
        encode_public_key(&self.public, self.compressed)
    }

    /// HASH160 of the encoded public key
    pub fn pubkeyhash(&self) -> Result<[u8; 20]> {
        hash160(&self.public_key_bytes())
    }

    pub fn sign(&self, hash: &[u8; 32]) -> Result<Signature> {
        sign(hash, &self.secret, &self.public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CURVE_ORDER;

    fn key(n: u8) -> [u8; 32] {
        let mut k = [0u8; 32];
        k[31] = n;
        k
    }

    #[test]
    fn test_sign_and_verify() {
        let private_key = generate_private_key();
        let public_key = calculate_public_key(&private_key).unwrap();
        let hash = [0xabu8; 32];

        let signature = sign(&hash, &private_key, &public_key).unwrap();
        assert!(verify(&signature, &hash, &public_key));

        let other = calculate_public_key(&generate_private_key()).unwrap();
        assert!(!verify(&signature, &hash, &other));
    }

    #[test]
    fn test_sign_is_low_s_and_randomised() {
        let private_key = key(42);
        let public_key = calculate_public_key(&private_key).unwrap();
        let hash = [0x5au8; 32];
        let half_order = {
            let mut half = [0u8; 32];
            let mut carry = 0u8;
            for (i, byte) in CURVE_ORDER.iter().enumerate() {
                half[i] = (carry << 7) | (byte >> 1);
                carry = byte & 1;
            }
            half
        };

        let first = sign(&hash, &private_key, &public_key).unwrap();
        let second = sign(&hash, &private_key, &public_key).unwrap();
        for signature in [&first, &second] {
            assert!(verify(signature, &hash, &public_key));
            let mut s = [0u8; 32];
            s[32 - signature.s.len()..].copy_from_slice(&signature.s);
            assert!(s <= half_order, "high-S signature");
        }
        assert_ne!(first, second);
    }

    #[test]
    fn test_sign_rejects_mismatched_public_key() {
        let other = calculate_public_key(&key(2)).unwrap();
        assert!(matches!(
            sign(&[0u8; 32], &key(1), &other),
            Err(ConsensusError::BadPrivateKey(_))
        ));
    }

    #[test]
    fn test_sign_with_nonce() {
        let sig = sign_with_nonce(&[1u8; 32], &key(9), &key(4)).unwrap().unwrap();
        let public = calculate_public_key(&key(4)).unwrap();
        assert!(verify(&sig, &[1u8; 32], &public));
        assert_eq!(sign_with_nonce(&[1u8; 32], &[0u8; 32], &key(4)).unwrap(), None);
        assert!(sign_with_nonce(&[1u8; 32], &key(9), &[0u8; 32]).is_err());
    }

    #[test]
    fn test_verify_private_key() {
        assert!(verify_private_key(&key(1)));
        assert!(!verify_private_key(&[0u8; 32]));
        assert!(!verify_private_key(&CURVE_ORDER));
        assert!(verify_private_key(&generate_private_key()));
    }

    #[test]
    fn test_public_key_codec() {
        let point = calculate_public_key(&key(1)).unwrap();

        let compressed = encode_public_key(&point, true);
        assert_eq!(
            hex::encode(&compressed),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(decode_public_key(&compressed).unwrap(), point);

        let uncompressed = encode_public_key(&point, false);
        assert_eq!(uncompressed.len(), 65);
        assert_eq!(decode_public_key(&uncompressed).unwrap(), point);
    }

    #[test]
    fn test_decode_public_key_errors() {
        let err = decode_public_key(&[0x05; 33]).unwrap_err();
        assert_eq!(err.to_string(), "bad public key: bad prefix: 5");

        let err = decode_public_key(&[0x02; 20]).unwrap_err();
        assert!(err.to_string().contains("bad length"));

        assert!(decode_public_key(&[]).is_err());

        let mut bad = encode_public_key(&calculate_public_key(&key(1)).unwrap(), false);
        bad[64] ^= 1;
        let err = decode_public_key(&bad).unwrap_err();
        assert!(err.to_string().contains("not on curve"));
    }

    #[test]
    fn test_private_key_helper() {
        let key = PrivateKey::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(key.public_key_bytes().len(), 33);
        assert_eq!(key.clone().uncompressed().public_key_bytes().len(), 65);
        assert_eq!(
            hex::encode(key.pubkeyhash().unwrap()),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );

        let sig = key.sign(&[3u8; 32]).unwrap();
        assert!(verify(&sig, &[3u8; 32], key.public_point()));

        assert!(PrivateKey::from_hex("00").is_err());
        assert!(PrivateKey::from_bytes([0u8; 32]).is_err());
    }
}
