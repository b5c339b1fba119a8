//! Push operations for the virtual machine.
//!
//! This module provides the handlers that push constants, data and
//! pointers onto the evaluation stack.

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::{integer, Pointer, StackItem};
use std::sync::Arc;

/// Registers the push operation handlers.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::PUSHINT8, push_int);
    jump_table.register(OpCode::PUSHINT16, push_int);
    jump_table.register(OpCode::PUSHINT32, push_int);
    jump_table.register(OpCode::PUSHINT64, push_int);
    jump_table.register(OpCode::PUSHINT128, push_int);
    jump_table.register(OpCode::PUSHINT256, push_int);
    jump_table.register(OpCode::PUSHT, push_t);
    jump_table.register(OpCode::PUSHF, push_f);
    jump_table.register(OpCode::PUSHA, push_a);
    jump_table.register(OpCode::PUSHNULL, push_null);
    jump_table.register(OpCode::PUSHDATA1, push_data);
    jump_table.register(OpCode::PUSHDATA2, push_data);
    jump_table.register(OpCode::PUSHDATA4, push_data);
    jump_table.register(OpCode::PUSHM1, push_small);
    for opcode in OpCode::PUSH0 as u8..=OpCode::PUSH16 as u8 {
        if let Some(opcode) = OpCode::from_u8(opcode) {
            jump_table.register(opcode, push_small);
        }
    }
}

/// Implements PUSHINT8 through PUSHINT256. The operand is a little-endian
/// two's complement integer of the opcode's width.
fn push_int(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::Integer(integer::from_bytes(&instruction.operand)));
    Ok(())
}

/// Implements PUSHM1 and PUSH0 through PUSH16.
fn push_small(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = i32::from(instruction.opcode) - i32::from(OpCode::PUSH0 as u8);
    engine.push(StackItem::from_int(value));
    Ok(())
}

/// Implements the PUSHT operation.
fn push_t(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::from_bool(true));
    Ok(())
}

/// Implements the PUSHF operation.
fn push_f(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::from_bool(false));
    Ok(())
}

/// Implements the PUSHA operation.
fn push_a(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let position = engine.resolve_target(i64::from(instruction.token_i32()?))?;
    let script = Arc::clone(engine.context()?.script());
    engine.push(StackItem::from_pointer(Pointer::new(script, position)));
    Ok(())
}

/// Implements the PUSHNULL operation.
fn push_null(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::Null);
    Ok(())
}

/// Implements PUSHDATA1, PUSHDATA2 and PUSHDATA4.
fn push_data(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.limits.assert_max_item_size(instruction.operand.len())?;
    engine.push(StackItem::ByteString(instruction.operand.clone()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::execution_engine::ExecutionEngine;
    use crate::op_code::OpCode;
    use crate::script::Script;
    use crate::stack_item::StackItem;
    use crate::vm_state::VMState;
    use num_bigint::BigInt;

    fn run(script: Vec<u8>) -> ExecutionEngine {
        let mut engine = ExecutionEngine::new();
        engine.load_script(Script::from(script), -1, 0).unwrap();
        assert_eq!(engine.execute(), VMState::HALT);
        engine
    }

    #[test]
    fn test_push_int() {
        let engine = run(vec![
            OpCode::PUSHINT8 as u8,
            0xff,
            OpCode::PUSHINT16 as u8,
            0x00,
            0x01,
            OpCode::PUSHM1 as u8,
            OpCode::PUSH16 as u8,
        ]);
        let stack = engine.result_stack();
        assert_eq!(stack.peek(0).unwrap().get_integer().unwrap(), BigInt::from(16));
        assert_eq!(stack.peek(1).unwrap().get_integer().unwrap(), BigInt::from(-1));
        assert_eq!(stack.peek(2).unwrap().get_integer().unwrap(), BigInt::from(256));
        assert_eq!(stack.peek(3).unwrap().get_integer().unwrap(), BigInt::from(-1));
    }

    #[test]
    fn test_push_data_and_constants() {
        let engine = run(vec![
            OpCode::PUSHDATA1 as u8,
            0x02,
            0xaa,
            0xbb,
            OpCode::PUSHT as u8,
            OpCode::PUSHNULL as u8,
        ]);
        let stack = engine.result_stack();
        assert!(stack.peek(0).unwrap().is_null());
        assert_eq!(stack.peek(1).unwrap(), &StackItem::from_bool(true));
        assert_eq!(
            stack.peek(2).unwrap(),
            &StackItem::from_byte_string(vec![0xaau8, 0xbb])
        );
    }

    #[test]
    fn test_push_a_out_of_range() {
        let mut engine = ExecutionEngine::new();
        engine
            .load_script(Script::from(vec![OpCode::PUSHA as u8, 0x10, 0, 0, 0]), -1, 0)
            .unwrap();
        assert_eq!(engine.execute(), VMState::FAULT);
    }
}
