//! Type operations for the virtual machine.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::{StackItem, StackItemType};

/// Registers the type operation handlers.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::ISNULL, is_null);
    jump_table.register(OpCode::ISTYPE, is_type);
    jump_table.register(OpCode::CONVERT, convert);
}

/// Implements the ISNULL operation.
fn is_null(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop()?;
    engine.push(StackItem::from_bool(x.is_null()));
    Ok(())
}

/// Implements the ISTYPE operation. `Any` is not a valid operand.
fn is_type(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let operand = instruction.token_u8()?;
    let item_type = StackItemType::from_u8(operand)
        .filter(|item_type| *item_type != StackItemType::Any)
        .ok_or_else(|| {
            VmError::invalid_operation_msg(format!("Invalid type: {operand}"))
        })?;
    let x = engine.pop()?;
    engine.push(StackItem::from_bool(x.stack_item_type() == item_type));
    Ok(())
}

/// Implements the CONVERT operation.
fn convert(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let item_type = StackItemType::try_from(instruction.token_u8()?)?;
    let x = engine.pop()?;
    let converted = x.convert_to(item_type, &mut engine.reference_counter)?;
    engine.push(converted);
    Ok(())
}
