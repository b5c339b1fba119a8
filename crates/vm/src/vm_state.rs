//! VM state implementation.
//!
//! This module provides the states of the execution engine state machine.

#[cfg(feature = "serde-types")]
use serde::{Deserialize, Serialize};

/// Indicates the status of the VM.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-types", derive(Serialize, Deserialize))]
pub enum VMState {
    /// Execution is in progress or has not yet begun.
    #[default]
    NONE = 0,

    /// Execution completed successfully.
    HALT = 1 << 0,

    /// Execution ended with an error that was not caught.
    FAULT = 1 << 1,

    /// Execution is paused and can be resumed by the host.
    BREAK = 1 << 2,
}

impl VMState {
    #[inline]
    pub fn is_none(self) -> bool {
        self == VMState::NONE
    }

    #[inline]
    pub fn is_halt(self) -> bool {
        self == VMState::HALT
    }

    #[inline]
    pub fn is_fault(self) -> bool {
        self == VMState::FAULT
    }

    #[inline]
    pub fn is_break(self) -> bool {
        self == VMState::BREAK
    }

    /// Returns true for HALT and FAULT.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, VMState::HALT | VMState::FAULT)
    }
}

impl std::fmt::Display for VMState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VMState::NONE => "NONE",
            VMState::HALT => "HALT",
            VMState::FAULT => "FAULT",
            VMState::BREAK => "BREAK",
        };
        f.write_str(name)
    }
}
