//! Splice operations for the virtual machine.
//!
//! Results of CAT, SUBSTR, LEFT and RIGHT are new buffers. Lengths and
//! offsets are validated before any byte is copied.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItem;

/// Registers the splice operation handlers.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::NEWBUFFER, new_buffer);
    jump_table.register(OpCode::MEMCPY, memcpy);
    jump_table.register(OpCode::CAT, cat);
    jump_table.register(OpCode::SUBSTR, substr);
    jump_table.register(OpCode::LEFT, left);
    jump_table.register(OpCode::RIGHT, right);
}

fn pop_bytes(engine: &mut ExecutionEngine) -> VmResult<Vec<u8>> {
    let item = engine.pop()?;
    let bytes = item.get_span(&engine.reference_counter)?.into_owned();
    Ok(bytes)
}

fn push_buffer(engine: &mut ExecutionEngine, data: Vec<u8>) {
    let buffer = engine.reference_counter.new_buffer(data);
    engine.push(buffer);
}

fn out_of_range(value: usize) -> VmError {
    VmError::invalid_operation_msg(format!("The value {value} is out of range."))
}

/// Implements the NEWBUFFER operation.
fn new_buffer(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let length = engine.pop_usize()?;
    engine.limits.assert_max_item_size(length)?;
    push_buffer(engine, vec![0; length]);
    Ok(())
}

/// Implements the MEMCPY operation.
fn memcpy(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_usize()?;
    let source_index = engine.pop_usize()?;
    let source = pop_bytes(engine)?;
    if source_index.saturating_add(count) > source.len() {
        return Err(out_of_range(count));
    }
    let destination_index = engine.pop_usize()?;
    let destination = match engine.pop()? {
        StackItem::Buffer(r) => r,
        other => {
            return Err(VmError::invalid_type_simple(
                "Buffer",
                other.stack_item_type().to_string(),
            ))
        }
    };
    let target = engine.reference_counter.buffer_mut(destination)?;
    if destination_index.saturating_add(count) > target.len() {
        return Err(out_of_range(count));
    }
    target[destination_index..destination_index + count]
        .copy_from_slice(&source[source_index..source_index + count]);
    Ok(())
}

/// Implements the CAT operation.
fn cat(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = pop_bytes(engine)?;
    let mut x1 = pop_bytes(engine)?;
    engine.limits.assert_max_item_size(x1.len() + x2.len())?;
    x1.extend_from_slice(&x2);
    push_buffer(engine, x1);
    Ok(())
}

/// Implements the SUBSTR operation.
fn substr(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_usize()?;
    let index = engine.pop_usize()?;
    let x = pop_bytes(engine)?;
    if index.saturating_add(count) > x.len() {
        return Err(out_of_range(count));
    }
    engine.limits.assert_max_item_size(count)?;
    push_buffer(engine, x[index..index + count].to_vec());
    Ok(())
}

/// Implements the LEFT operation.
fn left(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_usize()?;
    let x = pop_bytes(engine)?;
    if count > x.len() {
        return Err(out_of_range(count));
    }
    push_buffer(engine, x[..count].to_vec());
    Ok(())
}

/// Implements the RIGHT operation.
fn right(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_usize()?;
    let x = pop_bytes(engine)?;
    if count > x.len() {
        return Err(out_of_range(count));
    }
    push_buffer(engine, x[x.len() - count..].to_vec());
    Ok(())
}
