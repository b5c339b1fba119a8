//! Slot operations for the virtual machine.
//!
//! Static fields are shared by a script's contexts. Locals and arguments
//! belong to a single context.

use crate::error::{VmError, VmResult};
use crate::execution_engine::{ExecutionEngine, SlotKind};
use crate::instruction::Instruction;
use crate::jump_table::{InstructionHandler, JumpTable};
use crate::op_code::OpCode;

/// Registers the slot operation handlers.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::INITSSLOT, init_sslot);
    jump_table.register(OpCode::INITSLOT, init_slot);

    let groups: [(OpCode, OpCode, InstructionHandler); 6] = [
        (OpCode::LDSFLD0, OpCode::LDSFLD, load),
        (OpCode::STSFLD0, OpCode::STSFLD, store),
        (OpCode::LDLOC0, OpCode::LDLOC, load),
        (OpCode::STLOC0, OpCode::STLOC, store),
        (OpCode::LDARG0, OpCode::LDARG, load),
        (OpCode::STARG0, OpCode::STARG, store),
    ];
    for (first, last, handler) in groups {
        for opcode in first as u8..=last as u8 {
            if let Some(opcode) = OpCode::from_u8(opcode) {
                jump_table.register(opcode, handler);
            }
        }
    }
}

/// Decodes the slot kind and index addressed by a load or store opcode.
/// The last opcode of each group of eight takes its index from the operand.
fn address(instruction: &Instruction) -> VmResult<(SlotKind, usize)> {
    let opcode = instruction.opcode;
    let kind = match opcode {
        0x58..=0x67 => SlotKind::Static,
        0x68..=0x77 => SlotKind::Local,
        0x78..=0x87 => SlotKind::Argument,
        _ => return Err(VmError::InvalidOpcode(opcode)),
    };
    let position = (opcode - OpCode::LDSFLD0 as u8) % 8;
    let index = if position == 7 {
        usize::from(instruction.token_u8()?)
    } else {
        usize::from(position)
    };
    Ok((kind, index))
}

/// Implements the LDSFLD, LDLOC and LDARG families.
fn load(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let (kind, index) = address(instruction)?;
    engine.load_slot(kind, index)
}

/// Implements the STSFLD, STLOC and STARG families.
fn store(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let (kind, index) = address(instruction)?;
    engine.store_slot(kind, index)
}

/// Implements the INITSSLOT operation.
fn init_sslot(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let count = instruction.token_u8()?;
    if count == 0 {
        return Err(VmError::invalid_operation_msg(
            "The operand 0 is invalid for OpCode.INITSSLOT.",
        ));
    }
    engine.init_static_slot(usize::from(count))
}

/// Implements the INITSLOT operation.
fn init_slot(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    if instruction.token_u16()? == 0 {
        return Err(VmError::invalid_operation_msg(
            "The operand 0 is invalid for OpCode.INITSLOT.",
        ));
    }
    let locals = usize::from(instruction.token_u8()?);
    let arguments = usize::from(instruction.token_u8_1()?);
    engine.init_slot(locals, arguments)
}
