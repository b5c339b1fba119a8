//! Execution engine limits.
//!
//! This module provides the numeric caps the engine enforces while executing
//! a script. Every limit is checked inline on the instruction that would
//! exceed it, so the resulting fault is reproducible.

use crate::error::{VmError, VmResult};

#[cfg(feature = "serde-types")]
use serde::{Deserialize, Serialize};

/// Restrictions on the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-types", serde(default))]
pub struct ExecutionEngineLimits {
    /// The maximum number of bits that SHL and SHR can shift, and the largest
    /// exponent accepted by POW.
    pub max_shift: u32,

    /// The maximum number of references (stack entries plus container edges)
    /// the reference counter may hold after an instruction completes.
    pub max_stack_size: usize,

    /// The maximum size in bytes of a byte string or buffer.
    pub max_item_size: usize,

    /// The maximum number of bytes an equality comparison may inspect.
    pub max_comparable_size: usize,

    /// The maximum depth of the invocation stack.
    pub max_invocation_stack_size: usize,

    /// The maximum nesting depth of TRY blocks within one context.
    pub max_try_nesting_depth: usize,

    /// Allows out-of-range and missing-key engine exceptions to be caught.
    pub catch_engine_exceptions: bool,

    /// The maximum fee the script may consume.
    pub fee_budget: u64,

    /// The factor applied to every opcode price.
    pub exec_fee_factor: u64,
}

impl ExecutionEngineLimits {
    /// The default limits.
    pub const DEFAULT: Self = Self {
        max_shift: 256,
        max_stack_size: 2 * 1024,
        max_item_size: u16::MAX as usize * 2,
        max_comparable_size: 65536,
        max_invocation_stack_size: 1024,
        max_try_nesting_depth: 16,
        catch_engine_exceptions: true,
        fee_budget: u64::MAX,
        exec_fee_factor: 1,
    };

    /// Faults if `size` exceeds [`max_item_size`](Self::max_item_size).
    pub fn assert_max_item_size(&self, size: usize) -> VmResult<()> {
        if size > self.max_item_size {
            return Err(VmError::limit_exceeded(format!(
                "MaxItemSize exceed: {size}/{}",
                self.max_item_size
            )));
        }
        Ok(())
    }

    /// Faults if `shift` is negative or exceeds [`max_shift`](Self::max_shift).
    pub fn assert_shift(&self, shift: i64) -> VmResult<()> {
        if shift < 0 || shift > i64::from(self.max_shift) {
            return Err(VmError::limit_exceeded(format!("Invalid shift value: {shift}")));
        }
        Ok(())
    }

    /// Parses limits from a JSON document. Missing fields keep their defaults.
    #[cfg(feature = "serde-types")]
    pub fn from_json(json: &str) -> VmResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| VmError::invalid_operation_msg(format!("Invalid limits: {e}")))
    }
}

impl Default for ExecutionEngineLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ExecutionEngineLimits::default();
        assert_eq!(limits.max_stack_size, 2048);
        assert_eq!(limits.max_item_size, 131070);
        assert_eq!(limits.max_try_nesting_depth, 16);
        assert!(limits.catch_engine_exceptions);
    }

    #[test]
    fn test_assertions() {
        let limits = ExecutionEngineLimits::default();
        assert!(limits.assert_shift(256).is_ok());
        assert!(limits.assert_shift(257).is_err());
        assert!(limits.assert_shift(-1).is_err());
        assert!(limits.assert_max_item_size(131070).is_ok());
        assert!(limits.assert_max_item_size(131071).is_err());
    }

    #[cfg(feature = "serde-types")]
    #[test]
    fn test_partial_json_overrides() {
        let limits =
            ExecutionEngineLimits::from_json(r#"{ "max_stack_size": 16, "fee_budget": 1000 }"#)
                .unwrap();
        assert_eq!(limits.max_stack_size, 16);
        assert_eq!(limits.fee_budget, 1000);
        assert_eq!(limits.max_shift, 256);
    }
}
