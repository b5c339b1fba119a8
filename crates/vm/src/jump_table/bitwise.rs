//! Bitwise operations for the virtual machine.
//!
//! INVERT, AND, OR and XOR work on the two's complement value of their
//! integer operands. EQUAL and NOTEQUAL apply the stack item equality rules.

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItem;
use num_bigint::BigInt;

/// Registers the bitwise operation handlers.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::INVERT, invert);
    jump_table.register(OpCode::AND, and);
    jump_table.register(OpCode::OR, or);
    jump_table.register(OpCode::XOR, xor);
    jump_table.register(OpCode::EQUAL, equal);
    jump_table.register(OpCode::NOTEQUAL, not_equal);
}

fn binary(engine: &mut ExecutionEngine, op: fn(&BigInt, &BigInt) -> BigInt) -> VmResult<()> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    engine.push_integer(op(&x1, &x2))
}

/// Implements the INVERT operation.
fn invert(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_integer()?;
    engine.push_integer(!x)
}

/// Implements the AND operation.
fn and(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    binary(engine, |x1, x2| x1 & x2)
}

/// Implements the OR operation.
fn or(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    binary(engine, |x1, x2| x1 | x2)
}

/// Implements the XOR operation.
fn xor(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    binary(engine, |x1, x2| x1 ^ x2)
}

fn pop_equal(engine: &mut ExecutionEngine) -> VmResult<bool> {
    let x2 = engine.pop()?;
    let x1 = engine.pop()?;
    x1.equals(&x2, &engine.reference_counter, &engine.limits)
}

/// Implements the EQUAL operation.
fn equal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let result = pop_equal(engine)?;
    engine.push(StackItem::from_bool(result));
    Ok(())
}

/// Implements the NOTEQUAL operation.
fn not_equal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let result = pop_equal(engine)?;
    engine.push(StackItem::from_bool(!result));
    Ok(())
}
