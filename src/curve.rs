//! secp256k1 curve engine
//!
//! Point arithmetic, signing and signature checks go through libsecp256k1.
//! Signing with a caller-chosen nonce is not exposed by that library, so
//! [`ecdsa_sign_with_nonce`] does the scalar half of ECDSA with big integers:
//!
//! r = (k·G).x mod n
//! s = k⁻¹ · (z + r·d) mod n, normalised to s ≤ n/2
//!
//! That path is not constant time; [`ecdsa_sign`] is the one to use for keys
//! that matter.

use num_bigint::BigUint;
use num_traits::Zero;
use secp256k1::{ecdsa, All, Message, PublicKey, Secp256k1, SecretKey};
use std::cmp::Ordering;
use std::sync::OnceLock;
use thiserror::Error;

use crate::constants::{CURVE_ORDER, FIELD_PRIME};
use crate::types::{Point, PointStatus, Signature};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveError {
    #[error("scalar out of range")]
    InvalidScalar,
    #[error("outside range")]
    OutsideRange,
    #[error("not on curve")]
    NotOnCurve,
}

fn context() -> &'static Secp256k1<All> {
    static CONTEXT: OnceLock<Secp256k1<All>> = OnceLock::new();
    CONTEXT.get_or_init(Secp256k1::new)
}

fn curve_order() -> &'static BigUint {
    static ORDER: OnceLock<BigUint> = OnceLock::new();
    ORDER.get_or_init(|| BigUint::from_bytes_be(&CURVE_ORDER))
}

fn field_prime() -> &'static BigUint {
    static PRIME: OnceLock<BigUint> = OnceLock::new();
    PRIME.get_or_init(|| BigUint::from_bytes_be(&FIELD_PRIME))
}

fn in_field(coordinate: &[u8; 32]) -> bool {
    BigUint::from_bytes_be(coordinate) < *field_prime()
}

pub(crate) fn point_from_public_key(key: &PublicKey) -> Point {
    let raw = key.serialize_uncompressed();
    let mut point = Point { x: [0u8; 32], y: [0u8; 32] };
    point.x.copy_from_slice(&raw[1..33]);
    point.y.copy_from_slice(&raw[33..65]);
    point
}

pub(crate) fn public_key_from_point(point: &Point) -> Result<PublicKey, CurveError> {
    if !in_field(&point.x) || !in_field(&point.y) {
        return Err(CurveError::OutsideRange);
    }
    let mut raw = [0u8; 65];
    raw[0] = 0x04;
    raw[1..33].copy_from_slice(&point.x);
    raw[33..65].copy_from_slice(&point.y);
    PublicKey::from_slice(&raw).map_err(|_| CurveError::NotOnCurve)
}

/// d·G for 0 < d < n
pub fn scalar_multiply_base_point(scalar: &[u8; 32]) -> Result<Point, CurveError> {
    let secret = SecretKey::from_slice(scalar).map_err(|_| CurveError::InvalidScalar)?;
    let public = PublicKey::from_secret_key(context(), &secret);
    Ok(point_from_public_key(&public))
}

/// Recover y from x and its parity
pub fn decompress_point(x: &[u8; 32], y_is_odd: bool) -> Result<Point, CurveError> {
    if !in_field(x) {
        return Err(CurveError::OutsideRange);
    }
    let mut raw = [0u8; 33];
    raw[0] = if y_is_odd { 0x03 } else { 0x02 };
    raw[1..].copy_from_slice(x);
    let public = PublicKey::from_slice(&raw).map_err(|_| CurveError::NotOnCurve)?;
    Ok(point_from_public_key(&public))
}

pub fn validate_point(point: &Point) -> PointStatus {
    match public_key_from_point(point) {
        Ok(_) => PointStatus::Ok,
        Err(CurveError::OutsideRange) => PointStatus::OutsideRange,
        Err(_) => PointStatus::NotOnCurve,
    }
}

/// Compare a big-endian scalar of any width against n
pub fn compare_scalar_to_curve_order(scalar: &[u8]) -> Ordering {
    BigUint::from_bytes_be(scalar).cmp(curve_order())
}

fn compact_to_signature(compact: &[u8; 64]) -> Signature {
    Signature {
        r: strip_leading_zeros(&compact[..32]).to_vec(),
        s: strip_leading_zeros(&compact[32..]).to_vec(),
    }
}

/// Constant-time ECDSA. The nonce is derived RFC 6979 style from the key,
/// the digest and `extra_entropy`. Always low-S.
pub fn ecdsa_sign(
    hash: &[u8; 32],
    private_key: &[u8; 32],
    extra_entropy: &[u8; 32],
) -> Result<Signature, CurveError> {
    let secret = SecretKey::from_slice(private_key).map_err(|_| CurveError::InvalidScalar)?;
    let message = Message::from_digest(*hash);
    let mut sig = context().sign_ecdsa_with_noncedata(&message, &secret, extra_entropy);
    sig.normalize_s();
    Ok(compact_to_signature(&sig.serialize_compact()))
}

/// ECDSA with an explicit nonce `k`.
///
/// Returns `None` when the nonce is degenerate: k ∉ [1, n), r = 0 or s = 0.
/// The private key must already be a valid scalar.
pub fn ecdsa_sign_with_nonce(
    hash: &[u8; 32],
    nonce: &[u8; 32],
    private_key: &[u8; 32],
) -> Option<Signature> {
    let n = curve_order();
    let k = BigUint::from_bytes_be(nonce);
    if k.is_zero() || &k >= n {
        return None;
    }

    let k_point = scalar_multiply_base_point(nonce).ok()?;
    let r = BigUint::from_bytes_be(&k_point.x) % n;
    if r.is_zero() {
        return None;
    }

    let d = BigUint::from_bytes_be(private_key);
    let z = BigUint::from_bytes_be(hash);
    // n is prime, so k⁻¹ = k^(n-2)
    let k_inv = k.modpow(&(n - 2u32), n);
    let mut s = (k_inv * ((z + &r * d) % n)) % n;
    if s.is_zero() {
        return None;
    }
    if s > (n >> 1) {
        s = n - s;
    }

    Some(Signature {
        r: r.to_bytes_be(),
        s: s.to_bytes_be(),
    })
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Verify (r, s) against a 32-byte digest. High-S signatures are accepted.
pub fn ecdsa_verify(signature: &Signature, hash: &[u8; 32], point: &Point) -> bool {
    let r = strip_leading_zeros(&signature.r);
    let s = strip_leading_zeros(&signature.s);
    if r.len() > 32 || s.len() > 32 {
        return false;
    }

    let mut compact = [0u8; 64];
    compact[32 - r.len()..32].copy_from_slice(r);
    compact[64 - s.len()..].copy_from_slice(s);

    let Ok(mut sig) = ecdsa::Signature::from_compact(&compact) else {
        return false;
    };
    sig.normalize_s();

    let Ok(public) = public_key_from_point(point) else {
        return false;
    };

    let message = Message::from_digest(*hash);
    context().verify_ecdsa(&message, &sig, &public).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const G_X: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const G_Y: &str = "483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";

    fn scalar(n: u8) -> [u8; 32] {
        let mut s = [0u8; 32];
        s[31] = n;
        s
    }

    #[test]
    fn test_generator() {
        let g = scalar_multiply_base_point(&scalar(1)).unwrap();
        assert_eq!(hex::encode(g.x), G_X);
        assert_eq!(hex::encode(g.y), G_Y);
        assert_eq!(validate_point(&g), PointStatus::Ok);
    }

    #[test]
    fn test_invalid_scalars() {
        assert_eq!(scalar_multiply_base_point(&[0u8; 32]), Err(CurveError::InvalidScalar));
        assert_eq!(scalar_multiply_base_point(&CURVE_ORDER), Err(CurveError::InvalidScalar));
    }

    #[test]
    fn test_decompress() {
        let g = scalar_multiply_base_point(&scalar(1)).unwrap();
        let decompressed = decompress_point(&g.x, g.y_is_odd()).unwrap();
        assert_eq!(decompressed, g);

        let flipped = decompress_point(&g.x, !g.y_is_odd()).unwrap();
        assert_eq!(flipped.x, g.x);
        assert_ne!(flipped.y, g.y);

        assert_eq!(decompress_point(&[0xff; 32], false), Err(CurveError::OutsideRange));
    }

    #[test]
    fn test_validate_point() {
        let mut g = scalar_multiply_base_point(&scalar(1)).unwrap();
        g.y[31] ^= 1;
        assert_eq!(validate_point(&g), PointStatus::NotOnCurve);
        g.y = [0xff; 32];
        assert_eq!(validate_point(&g), PointStatus::OutsideRange);
    }

    #[test]
    fn test_compare_scalar() {
        assert_eq!(compare_scalar_to_curve_order(&scalar(1)), Ordering::Less);
        assert_eq!(compare_scalar_to_curve_order(&CURVE_ORDER), Ordering::Equal);
        assert_eq!(compare_scalar_to_curve_order(&[0xff; 32]), Ordering::Greater);
    }

    #[test]
    fn test_sign_with_nonce_and_verify() {
        let d = scalar(7);
        let public = scalar_multiply_base_point(&d).unwrap();
        let hash = [0x42u8; 32];

        let sig = ecdsa_sign_with_nonce(&hash, &scalar(11), &d).unwrap();
        assert!(ecdsa_verify(&sig, &hash, &public));

        // Deterministic for a fixed nonce
        assert_eq!(ecdsa_sign_with_nonce(&hash, &scalar(11), &d), Some(sig.clone()));

        let mut other_hash = hash;
        other_hash[0] ^= 1;
        assert!(!ecdsa_verify(&sig, &other_hash, &public));
    }

    #[test]
    fn test_ecdsa_sign() {
        let d = scalar(7);
        let public = scalar_multiply_base_point(&d).unwrap();
        let hash = [0x42u8; 32];
        let half = curve_order() >> 1;

        let sig = ecdsa_sign(&hash, &d, &[0u8; 32]).unwrap();
        assert!(ecdsa_verify(&sig, &hash, &public));
        assert!(BigUint::from_bytes_be(&sig.s) <= half);
        assert!(sig.r.len() <= 32 && sig.r.first() != Some(&0));
        assert!(sig.s.len() <= 32 && sig.s.first() != Some(&0));

        // same inputs, same signature; fresh entropy, fresh nonce
        assert_eq!(ecdsa_sign(&hash, &d, &[0u8; 32]).unwrap(), sig);
        let other = ecdsa_sign(&hash, &d, &[1u8; 32]).unwrap();
        assert_ne!(other.r, sig.r);
        assert!(ecdsa_verify(&other, &hash, &public));

        assert_eq!(ecdsa_sign(&hash, &[0u8; 32], &[0u8; 32]), Err(CurveError::InvalidScalar));
    }

    #[test]
    fn test_signatures_are_low_s() {
        let d = scalar(3);
        let hash = [9u8; 32];
        let half = curve_order() >> 1;
        for k in 1..20u8 {
            let sig = ecdsa_sign_with_nonce(&hash, &scalar(k), &d).unwrap();
            assert!(BigUint::from_bytes_be(&sig.s) <= half);
        }
    }

    #[test]
    fn test_high_s_still_verifies() {
        let d = scalar(5);
        let public = scalar_multiply_base_point(&d).unwrap();
        let hash = [1u8; 32];
        let sig = ecdsa_sign_with_nonce(&hash, &scalar(13), &d).unwrap();
        let high_s = curve_order() - BigUint::from_bytes_be(&sig.s);
        let high = Signature {
            r: sig.r.clone(),
            s: high_s.to_bytes_be(),
        };
        assert!(ecdsa_verify(&high, &hash, &public));
    }

    #[test]
    fn test_degenerate_nonces() {
        let d = scalar(5);
        let hash = [1u8; 32];
        assert_eq!(ecdsa_sign_with_nonce(&hash, &[0u8; 32], &d), None);
        assert_eq!(ecdsa_sign_with_nonce(&hash, &CURVE_ORDER, &d), None);
    }

    #[test]
    fn test_verify_rejects_oversized_components() {
        let g = scalar_multiply_base_point(&scalar(1)).unwrap();
        let sig = Signature { r: vec![1; 33], s: vec![1; 32] };
        assert!(!ecdsa_verify(&sig, &[0u8; 32], &g));
    }
}
