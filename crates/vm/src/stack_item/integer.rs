//! Integer encoding helpers.
//!
//! Integers are serialized as minimal little-endian two's complement, with
//! zero encoded as the empty byte string.

use crate::error::{VmError, VmResult};
use num_bigint::BigInt;
use num_traits::Zero;

/// The maximum size of an integer in bytes (256 bits).
pub const MAX_SIZE: usize = 32;

/// Encodes an integer as minimal little-endian two's complement.
pub fn to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_signed_bytes_le()
    }
}

/// Decodes little-endian two's complement bytes.
pub fn from_bytes(bytes: &[u8]) -> BigInt {
    if bytes.is_empty() {
        BigInt::zero()
    } else {
        BigInt::from_signed_bytes_le(bytes)
    }
}

/// The encoded size of an integer in bytes.
pub fn byte_size(value: &BigInt) -> usize {
    if value.is_zero() {
        0
    } else {
        value.to_signed_bytes_le().len()
    }
}

/// Faults if the integer does not fit in [`MAX_SIZE`] bytes.
pub fn check_size(value: &BigInt) -> VmResult<()> {
    let size = byte_size(value);
    if size > MAX_SIZE {
        return Err(VmError::arithmetic(format!(
            "Integer size {size} exceeds the maximum of {MAX_SIZE} bytes"
        )));
    }
    Ok(())
}
