//! Jump table module for the virtual machine.
//!
//! A jump table maps every opcode byte to a handler. The table is a flat
//! array of 256 function pointers filled once by the per-group
//! `register_handlers` functions; bytes without an opcode keep the
//! invalid-opcode handler. Hosts may override single entries, most commonly
//! SYSCALL.

pub mod bitwise;
pub mod compound;
pub mod control;
pub mod numeric;
pub mod push;
pub mod slot;
pub mod splice;
pub mod stack;
pub mod types;

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::op_code::OpCode;
use once_cell::sync::Lazy;
use std::fmt;

/// A handler for a VM instruction.
pub type InstructionHandler = fn(&mut ExecutionEngine, &Instruction) -> VmResult<()>;

static DEFAULT: Lazy<JumpTable> = Lazy::new(JumpTable::new);

/// Represents a jump table for the VM.
#[derive(Clone)]
pub struct JumpTable {
    handlers: [InstructionHandler; 256],
}

impl JumpTable {
    /// Creates a jump table with the standard handlers.
    pub fn new() -> Self {
        let mut jump_table = Self {
            handlers: [invalid_opcode as InstructionHandler; 256],
        };
        push::register_handlers(&mut jump_table);
        control::register_handlers(&mut jump_table);
        stack::register_handlers(&mut jump_table);
        slot::register_handlers(&mut jump_table);
        splice::register_handlers(&mut jump_table);
        bitwise::register_handlers(&mut jump_table);
        numeric::register_handlers(&mut jump_table);
        compound::register_handlers(&mut jump_table);
        types::register_handlers(&mut jump_table);
        jump_table
    }

    /// The process-wide standard table.
    pub fn default_table() -> &'static JumpTable {
        &DEFAULT
    }

    /// Registers a handler for an opcode.
    pub fn register(&mut self, opcode: OpCode, handler: InstructionHandler) {
        self.handlers[opcode as usize] = handler;
    }

    /// Gets the handler for a raw opcode byte.
    pub fn handler(&self, opcode: u8) -> InstructionHandler {
        self.handlers[opcode as usize]
    }
}

impl Default for JumpTable {
    fn default() -> Self {
        DEFAULT.clone()
    }
}

impl fmt::Debug for JumpTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let invalid = invalid_opcode as InstructionHandler;
        let mapped = self
            .handlers
            .iter()
            .filter(|handler| **handler as usize != invalid as usize)
            .count();
        f.debug_struct("JumpTable").field("mapped", &mapped).finish()
    }
}

impl std::ops::Index<OpCode> for JumpTable {
    type Output = InstructionHandler;

    fn index(&self, opcode: OpCode) -> &Self::Output {
        &self.handlers[opcode as usize]
    }
}

impl std::ops::IndexMut<OpCode> for JumpTable {
    fn index_mut(&mut self, opcode: OpCode) -> &mut Self::Output {
        &mut self.handlers[opcode as usize]
    }
}

/// Handler for bytes that do not name an opcode.
pub fn invalid_opcode(_engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    Err(VmError::InvalidOpcode(instruction.opcode))
}
