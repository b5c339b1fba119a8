//! Diagnostic hooks for tracing execution.
//!
//! A diagnostic observes the engine without influencing it: every callback
//! receives shared references only.

use crate::execution_context::ExecutionContext;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;

/// Callbacks invoked by the engine at well-defined points of execution.
pub trait Diagnostic: Send {
    /// The diagnostic was attached to `engine`.
    fn initialized(&mut self, _engine: &ExecutionEngine) {}

    /// The engine owning the diagnostic is being dropped.
    fn disposed(&mut self) {}

    /// A context was pushed on the invocation stack.
    fn context_loaded(&mut self, _context: &ExecutionContext) {}

    /// A context was popped from the invocation stack.
    fn context_unloaded(&mut self, _context: &ExecutionContext) {}

    /// `instruction` is about to be dispatched.
    fn pre_execute_instruction(&mut self, _instruction: &Instruction) {}

    /// `instruction` completed without faulting.
    fn post_execute_instruction(&mut self, _instruction: &Instruction) {}
}
