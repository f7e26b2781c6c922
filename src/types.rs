//! Core value types shared across modules

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Stack item
pub type StackItem = ByteString;

/// Public key point: (x, y) ∈ 𝔽ₚ × 𝔽ₚ, big-endian coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl Point {
    /// Parity of y, as the compressed prefix records it
    pub fn y_is_odd(&self) -> bool {
        self.y[31] & 1 == 1
    }
}

/// ECDSA signature (r, s) as big-endian magnitudes without sign bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub r: ByteString,
    pub s: ByteString,
}

/// Point validation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
    Ok,
    OutsideRange,
    NotOnCurve,
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}
