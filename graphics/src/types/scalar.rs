//! Scalar kinds of constant-buffer data.

use serde::{Deserialize, Serialize};

/// The 32-bit scalar kind of a value on either side of a bind.
///
/// Engine values and native constant-buffer slots both reduce to lanes of
/// one of these kinds; booleans occupy a full 32-bit lane in constant
/// buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    UInt,
    Int,
    Float,
}

impl ScalarType {
    /// Size of one lane in bytes.
    pub const SIZE: u32 = 4;

    /// Convert a raw lane of kind `self` into a raw lane of kind `dst`.
    ///
    /// Bools become 1/0 (or 1.0/0.0); anything non-zero becomes `true`.
    /// Floats are truncated towards zero when narrowed to integers.
    pub fn convert(self, bits: u32, dst: ScalarType) -> u32 {
        use ScalarType::*;
        match (self, dst) {
            (Bool, Float) => {
                if bits != 0 {
                    1.0f32.to_bits()
                } else {
                    0.0f32.to_bits()
                }
            }
            (Bool, _) => u32::from(bits != 0),
            (UInt, Float) => (bits as f32).to_bits(),
            (Int, Float) => (bits as i32 as f32).to_bits(),
            (UInt | Int, Bool) => u32::from(bits != 0),
            (UInt | Int, UInt | Int) => bits,
            (Float, Float) => bits,
            (Float, Bool) => u32::from(f32::from_bits(bits) != 0.0),
            (Float, Int) => (f32::from_bits(bits) as i32) as u32,
            (Float, UInt) => f32::from_bits(bits) as u32,
        }
    }
}
