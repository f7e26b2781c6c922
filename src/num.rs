//! Script numeric
//!
//! Numbers are sign-magnitude, little-endian, of any length:
//! - zero is the empty byte string
//! - the high bit of the last byte is the sign
//! - a magnitude whose top byte already uses the high bit gets an extra byte

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::ops::{Add, Mul, Neg, Sub};

use crate::constants::MAX_NUM2BIN_SIZE;

/// Script number error type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum NumError {
    #[error("size {0} outside [1, 2147483647]")]
    SizeOutOfRange(u64),
    #[error("size {requested} smaller than minimal encoding of {minimal} bytes")]
    SizeTooSmall { requested: usize, minimal: usize },
}

/// Arbitrary-precision number used by the arithmetic opcodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ScriptNum(BigInt);

impl<T: Into<BigInt>> From<T> for ScriptNum {
    fn from(value: T) -> Self {
        Self(value.into())
    }
}

impl ScriptNum {
    /// Decode any-length encoding. Never touches `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        let Some((&last, _)) = data.split_last() else {
            return Self(BigInt::zero());
        };

        let mut magnitude = data.to_vec();
        let top = magnitude.len() - 1;
        magnitude[top] = last & 0x7f;

        let magnitude = BigUint::from_bytes_le(&magnitude);
        let sign = if last & 0x80 != 0 { Sign::Minus } else { Sign::Plus };
        Self(BigInt::from_biguint(sign, magnitude))
    }

    /// Minimal encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.0.is_zero() {
            return Vec::new();
        }

        let (sign, mut result) = self.0.to_bytes_le();
        if result.last().is_some_and(|b| b & 0x80 != 0) {
            result.push(0x00);
        }
        if sign == Sign::Minus {
            if let Some(last) = result.last_mut() {
                *last |= 0x80;
            }
        }
        result
    }

    /// Encoding padded to exactly `size` bytes, as `OP_NUM2BIN` produces it.
    ///
    /// The sign bit moves to the final byte.
    pub fn encode_fixed(&self, size: u64) -> Result<Vec<u8>, NumError> {
        if size < 1 || size > MAX_NUM2BIN_SIZE {
            return Err(NumError::SizeOutOfRange(size));
        }
        let requested = size as usize;
        let minimal = self.to_bytes().len();
        if requested < minimal {
            return Err(NumError::SizeTooSmall { requested, minimal });
        }

        let mut result = self.0.magnitude().to_bytes_le();
        if self.0.is_zero() {
            result.clear();
        }
        result.resize(requested, 0x00);
        if self.is_negative() {
            result[requested - 1] |= 0x80;
        }
        Ok(result)
    }

    pub fn value(&self) -> &BigInt {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Non-negative values that fit a `usize` (stack indices, split points, shift counts)
    pub fn to_usize(&self) -> Option<usize> {
        if self.is_negative() {
            return None;
        }
        self.0.to_usize()
    }

    /// Truncating division, `None` on a zero divisor
    pub fn checked_div(&self, divisor: &Self) -> Option<Self> {
        if divisor.is_zero() {
            return None;
        }
        Some(Self(&self.0 / &divisor.0))
    }

    /// Remainder carrying the dividend's sign, `None` on a zero divisor
    pub fn checked_rem(&self, divisor: &Self) -> Option<Self> {
        if divisor.is_zero() {
            return None;
        }
        Some(Self(&self.0 % &divisor.0))
    }

    pub fn one() -> Self {
        Self(BigInt::one())
    }
}

impl Add for ScriptNum {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl Sub for ScriptNum {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

impl Mul for ScriptNum {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        Self(self.0 * other.0)
    }
}

impl Neg for ScriptNum {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

/// Encode a boolean result the way comparison opcodes push it
pub fn encode_bool(value: bool) -> Vec<u8> {
    if value {
        vec![0x01]
    } else {
        Vec::new()
    }
}

/// Any non-zero byte makes a stack item true
pub fn cast_to_bool(data: &[u8]) -> bool {
    data.iter().any(|b| *b != 0)
}
