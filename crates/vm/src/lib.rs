//! # Contract Virtual Machine
//!
//! A deterministic, resource-bounded, stack-based virtual machine for smart
//! contract bytecode.
//!
//! Scripts are flat byte sequences of one-byte opcodes followed by their
//! operands. The engine keeps an invocation stack of execution contexts, a
//! shared evaluation stack and a result stack. Compound values (arrays,
//! structs, maps and buffers) live in a [`ReferenceCounter`] that tracks every
//! reference to them and sweeps unreachable ones, including cycles, after each
//! instruction.
//!
//! ## Architecture
//!
//! - **ExecutionEngine**: fetch, dispatch, fault handling and limits
//! - **JumpTable**: one handler per opcode, replaceable by the host
//! - **StackItem**: the tagged value model
//! - **ReferenceCounter**: arena of compound items with reachability tracking
//! - **InteropService**: host functions reached through SYSCALL
//! - **Debugger**: breakpoints and stepping on top of an engine
//! - **ScriptBuilder**: programmatic script construction
//!
//! ## Example
//!
//! ```rust
//! use contract_vm::{ExecutionEngine, OpCode, ScriptBuilder, VMState};
//! use num_bigint::BigInt;
//!
//! # fn main() -> Result<(), contract_vm::VmError> {
//! let mut builder = ScriptBuilder::new();
//! builder.emit_push_int(1).emit_push_int(2).emit(OpCode::ADD);
//!
//! let mut engine = ExecutionEngine::new();
//! engine.load_script(builder.to_script(), -1, 0)?;
//! assert_eq!(engine.execute(), VMState::HALT);
//! assert_eq!(engine.result_stack().peek(0)?.get_integer()?, BigInt::from(3));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Debugging support with breakpoints and step execution
pub mod debugger;
/// Instruction tracing hooks
pub mod diagnostic;
/// VM error types and result handling
pub mod error;
/// Evaluation stack implementation
pub mod evaluation_stack;
/// TRY/CATCH/FINALLY frames
pub mod exception_handling_context;
/// Script execution context
pub mod execution_context;
/// The execution engine
pub mod execution_engine;
/// Resource limits of an engine
pub mod execution_engine_limits;
/// Opcode prices
pub mod fee;
/// VM instruction representation
pub mod instruction;
/// Interop service registry
pub mod interop_service;
/// Opcode handlers and instruction dispatch
pub mod jump_table;
/// VM opcode definitions
pub mod op_code;
/// Reference tracking for compound items
pub mod reference_counter;
/// VM script representation and validation
pub mod script;
/// Utility for constructing VM bytecode
pub mod script_builder;
/// Static field, local and argument slots
pub mod slot;
/// Polymorphic data types for VM values
pub mod stack_item;
/// Engine states
pub mod vm_state;

pub use debugger::Debugger;
pub use diagnostic::Diagnostic;
pub use error::{FaultKind, VmError, VmResult};
pub use evaluation_stack::EvaluationStack;
pub use exception_handling_context::{ExceptionHandlingContext, ExceptionHandlingState};
pub use execution_context::ExecutionContext;
pub use execution_engine::{ExecutionEngine, MethodToken};
pub use execution_engine_limits::ExecutionEngineLimits;
pub use instruction::Instruction;
pub use interop_service::{interop_hash, InteropDescriptor, InteropMethod, InteropService};
pub use jump_table::{InstructionHandler, JumpTable};
pub use op_code::OpCode;
pub use reference_counter::ReferenceCounter;
pub use script::Script;
pub use script_builder::ScriptBuilder;
pub use slot::Slot;
pub use stack_item::{ItemRef, MapKey, Pointer, StackItem, StackItemType};
pub use vm_state::VMState;
