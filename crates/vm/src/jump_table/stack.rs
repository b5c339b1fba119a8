//! Stack operations for the virtual machine.
//!
//! Every handler only sees the items of the current context's region of
//! the evaluation stack.

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItem;

/// Registers the stack operation handlers.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::DEPTH, depth);
    jump_table.register(OpCode::DROP, drop);
    jump_table.register(OpCode::NIP, nip);
    jump_table.register(OpCode::XDROP, xdrop);
    jump_table.register(OpCode::CLEAR, clear);
    jump_table.register(OpCode::DUP, dup);
    jump_table.register(OpCode::OVER, over);
    jump_table.register(OpCode::PICK, pick);
    jump_table.register(OpCode::TUCK, tuck);
    jump_table.register(OpCode::SWAP, swap);
    jump_table.register(OpCode::ROT, rot);
    jump_table.register(OpCode::ROLL, roll);
    jump_table.register(OpCode::REVERSE3, reverse3);
    jump_table.register(OpCode::REVERSE4, reverse4);
    jump_table.register(OpCode::REVERSEN, reversen);
}

/// Implements the DEPTH operation.
fn depth(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let depth = engine.evaluation_stack.len();
    engine.push(StackItem::from_int(depth as u64));
    Ok(())
}

/// Implements the DROP operation.
fn drop(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.pop()?;
    Ok(())
}

/// Implements the NIP operation.
fn nip(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine
        .evaluation_stack
        .remove(1, &mut engine.reference_counter)?;
    Ok(())
}

/// Implements the XDROP operation.
fn xdrop(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop_usize()?;
    engine
        .evaluation_stack
        .remove(n, &mut engine.reference_counter)?;
    Ok(())
}

/// Implements the CLEAR operation.
fn clear(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.evaluation_stack.clear(&mut engine.reference_counter);
    Ok(())
}

/// Implements the DUP operation.
fn dup(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.peek(0)?.clone();
    engine.push(item);
    Ok(())
}

/// Implements the OVER operation.
fn over(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.peek(1)?.clone();
    engine.push(item);
    Ok(())
}

/// Implements the PICK operation.
fn pick(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop_usize()?;
    let item = engine.peek(n)?.clone();
    engine.push(item);
    Ok(())
}

/// Implements the TUCK operation.
fn tuck(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.peek(0)?.clone();
    engine
        .evaluation_stack
        .insert(2, item, &mut engine.reference_counter)
}

/// Implements the SWAP operation.
fn swap(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine
        .evaluation_stack
        .remove(1, &mut engine.reference_counter)?;
    engine.push(item);
    Ok(())
}

/// Implements the ROT operation.
fn rot(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine
        .evaluation_stack
        .remove(2, &mut engine.reference_counter)?;
    engine.push(item);
    Ok(())
}

/// Implements the ROLL operation.
fn roll(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop_usize()?;
    if n == 0 {
        return Ok(());
    }
    let item = engine
        .evaluation_stack
        .remove(n, &mut engine.reference_counter)?;
    engine.push(item);
    Ok(())
}

/// Implements the REVERSE3 operation.
fn reverse3(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.evaluation_stack.reverse(3)
}

/// Implements the REVERSE4 operation.
fn reverse4(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.evaluation_stack.reverse(4)
}

/// Implements the REVERSEN operation.
fn reversen(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop_usize()?;
    engine.evaluation_stack.reverse(n)
}
