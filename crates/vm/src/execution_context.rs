//! Execution context module for the virtual machine.
//!
//! This module provides the call frame pushed on the invocation stack for
//! every loaded script and every CALL.

use crate::error::{VmError, VmResult};
use crate::exception_handling_context::ExceptionHandlingContext;
use crate::instruction::Instruction;
use crate::script::Script;
use crate::slot::Slot;
use std::sync::Arc;

/// State shared by a context and every context CALLed from it.
#[derive(Debug, Default)]
pub struct SharedStates {
    /// The static fields, created by INITSSLOT
    pub static_fields: Option<Slot>,

    /// Depth of the evaluation stack below which items belong to callers
    pub stack_base: usize,
}

impl SharedStates {
    /// Creates shared state for a region starting at `stack_base`.
    pub fn new(stack_base: usize) -> Self {
        Self {
            static_fields: None,
            stack_base,
        }
    }
}

/// Represents an execution context.
#[derive(Debug)]
pub struct ExecutionContext {
    /// The script being executed
    script: Arc<Script>,

    /// The current instruction pointer
    instruction_pointer: usize,

    /// The number of values to return when the context is unloaded (-1 for all)
    rvcount: i32,

    /// Index of the shared states in the engine
    shared_index: usize,

    /// Whether this context created its shared states
    owns_shared_states: bool,

    /// The local variables for this context
    local_variables: Option<Slot>,

    /// The arguments for this context
    arguments: Option<Slot>,

    /// The stack containing nested exception handling contexts
    try_stack: Vec<ExceptionHandlingContext>,
}

impl ExecutionContext {
    /// Creates a context that owns the shared states at `shared_index`.
    pub fn new(
        script: Arc<Script>,
        rvcount: i32,
        initial_position: usize,
        shared_index: usize,
    ) -> Self {
        Self {
            script,
            instruction_pointer: initial_position,
            rvcount,
            shared_index,
            owns_shared_states: true,
            local_variables: None,
            arguments: None,
            try_stack: Vec::new(),
        }
    }

    /// Creates a context for the same script that shares this context's
    /// static fields and stack region, starting at `initial_position`.
    pub fn clone_at(&self, initial_position: usize) -> Self {
        Self {
            script: Arc::clone(&self.script),
            instruction_pointer: initial_position,
            rvcount: 0,
            shared_index: self.shared_index,
            owns_shared_states: false,
            local_variables: None,
            arguments: None,
            try_stack: Vec::new(),
        }
    }

    /// Returns the script for this context.
    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    /// Returns the hash of the script.
    pub fn script_hash(&self) -> [u8; 20] {
        *self.script.hash()
    }

    /// Returns the current instruction pointer.
    pub fn instruction_pointer(&self) -> usize {
        self.instruction_pointer
    }

    /// Sets the instruction pointer.
    pub fn set_instruction_pointer(&mut self, position: usize) {
        self.instruction_pointer = position;
    }

    /// Returns the instruction at the instruction pointer, or an implicit RET
    /// once the pointer has reached the end of the script.
    pub fn current_instruction(&self) -> VmResult<Instruction> {
        if self.instruction_pointer >= self.script.len() {
            return Ok(Instruction::ret(self.instruction_pointer));
        }
        self.script.get_instruction(self.instruction_pointer)
    }

    /// Returns the instruction after the current one, if any.
    pub fn next_instruction(&self) -> VmResult<Option<Instruction>> {
        let next = self.current_instruction()?.next_position();
        if next >= self.script.len() {
            return Ok(None);
        }
        self.script.get_instruction(next).map(Some)
    }

    /// Returns the number of values to return when the context is unloaded.
    pub fn rvcount(&self) -> i32 {
        self.rvcount
    }

    pub(crate) fn shared_index(&self) -> usize {
        self.shared_index
    }

    /// Returns true if the context created its shared states rather than
    /// inheriting them through CALL.
    pub fn owns_shared_states(&self) -> bool {
        self.owns_shared_states
    }

    /// Returns the local variables for this context.
    pub fn local_variables(&self) -> Option<&Slot> {
        self.local_variables.as_ref()
    }

    pub(crate) fn local_variables_mut(&mut self) -> Option<&mut Slot> {
        self.local_variables.as_mut()
    }

    /// Returns the arguments for this context.
    pub fn arguments(&self) -> Option<&Slot> {
        self.arguments.as_ref()
    }

    pub(crate) fn arguments_mut(&mut self) -> Option<&mut Slot> {
        self.arguments.as_mut()
    }

    pub(crate) fn set_slots(&mut self, local_variables: Option<Slot>, arguments: Option<Slot>) {
        self.local_variables = local_variables;
        self.arguments = arguments;
    }

    pub(crate) fn take_slots(&mut self) -> (Option<Slot>, Option<Slot>) {
        (self.local_variables.take(), self.arguments.take())
    }

    /// Returns true once INITSLOT has run in this context.
    pub fn has_slots(&self) -> bool {
        self.local_variables.is_some() || self.arguments.is_some()
    }

    /// Returns the try stack for this context.
    pub fn try_stack(&self) -> &[ExceptionHandlingContext] {
        &self.try_stack
    }

    pub(crate) fn try_stack_last_mut(&mut self) -> VmResult<&mut ExceptionHandlingContext> {
        self.try_stack
            .last_mut()
            .ok_or_else(|| VmError::invalid_operation_msg("The corresponding TRY block cannot be found."))
    }

    pub(crate) fn push_try(&mut self, context: ExceptionHandlingContext) {
        self.try_stack.push(context);
    }

    pub(crate) fn pop_try(&mut self) -> Option<ExceptionHandlingContext> {
        self.try_stack.pop()
    }
}
