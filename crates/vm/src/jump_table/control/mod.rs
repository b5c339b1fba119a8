//! Control operations for the virtual machine.
//!
//! This module contains the flow control handlers: jumps, calls, returns
//! and syscalls. The exception family lives in [`exception_handling`].

pub mod exception_handling;

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItem;
use num_bigint::BigInt;

/// Registers all control operation handlers with the jump table.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::NOP, nop);
    jump_table.register(OpCode::JMP, jmp);
    jump_table.register(OpCode::JMP_L, jmp);
    jump_table.register(OpCode::JMPIF, jmpif);
    jump_table.register(OpCode::JMPIF_L, jmpif);
    jump_table.register(OpCode::JMPIFNOT, jmpifnot);
    jump_table.register(OpCode::JMPIFNOT_L, jmpifnot);
    jump_table.register(OpCode::JMPEQ, jmpeq);
    jump_table.register(OpCode::JMPEQ_L, jmpeq);
    jump_table.register(OpCode::JMPNE, jmpne);
    jump_table.register(OpCode::JMPNE_L, jmpne);
    jump_table.register(OpCode::JMPGT, jmpgt);
    jump_table.register(OpCode::JMPGT_L, jmpgt);
    jump_table.register(OpCode::JMPGE, jmpge);
    jump_table.register(OpCode::JMPGE_L, jmpge);
    jump_table.register(OpCode::JMPLT, jmplt);
    jump_table.register(OpCode::JMPLT_L, jmplt);
    jump_table.register(OpCode::JMPLE, jmple);
    jump_table.register(OpCode::JMPLE_L, jmple);

    jump_table.register(OpCode::CALL, call);
    jump_table.register(OpCode::CALL_L, call);
    jump_table.register(OpCode::CALLA, calla);
    jump_table.register(OpCode::CALLT, callt);
    jump_table.register(OpCode::RET, ret);
    jump_table.register(OpCode::SYSCALL, syscall);

    jump_table.register(OpCode::ABORT, exception_handling::abort);
    jump_table.register(OpCode::ABORTMSG, exception_handling::abort_msg);
    jump_table.register(OpCode::ASSERT, exception_handling::assert);
    jump_table.register(OpCode::ASSERTMSG, exception_handling::assert_msg);
    jump_table.register(OpCode::THROW, exception_handling::throw);
    jump_table.register(OpCode::TRY, exception_handling::try_op);
    jump_table.register(OpCode::TRY_L, exception_handling::try_op);
    jump_table.register(OpCode::ENDTRY, exception_handling::endtry);
    jump_table.register(OpCode::ENDTRY_L, exception_handling::endtry);
    jump_table.register(OpCode::ENDFINALLY, exception_handling::endfinally);
}

/// Reads the relative offset of a jump, call or ENDTRY. Short forms carry
/// one signed byte, `_L` forms four.
pub(crate) fn offset(instruction: &Instruction) -> VmResult<i32> {
    if instruction.operand.len() == 1 {
        Ok(i32::from(instruction.token_i8()?))
    } else {
        instruction.token_i32()
    }
}

/// Implements the NOP operation.
fn nop(_engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    Ok(())
}

/// Implements JMP and JMP_L.
fn jmp(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.execute_jump_offset(i64::from(offset(instruction)?))
}

/// Implements JMPIF and JMPIF_L.
fn jmpif(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    if engine.pop_bool()? {
        engine.execute_jump_offset(i64::from(offset(instruction)?))?;
    }
    Ok(())
}

/// Implements JMPIFNOT and JMPIFNOT_L.
fn jmpifnot(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    if !engine.pop_bool()? {
        engine.execute_jump_offset(i64::from(offset(instruction)?))?;
    }
    Ok(())
}

/// Pops two integers and jumps if `condition(x1, x2)` holds, where `x2`
/// was on top.
fn jump_if(
    engine: &mut ExecutionEngine,
    instruction: &Instruction,
    condition: fn(&BigInt, &BigInt) -> bool,
) -> VmResult<()> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    if condition(&x1, &x2) {
        engine.execute_jump_offset(i64::from(offset(instruction)?))?;
    }
    Ok(())
}

/// Implements JMPEQ and JMPEQ_L.
fn jmpeq(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    jump_if(engine, instruction, |x1, x2| x1 == x2)
}

/// Implements JMPNE and JMPNE_L.
fn jmpne(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    jump_if(engine, instruction, |x1, x2| x1 != x2)
}

/// Implements JMPGT and JMPGT_L.
fn jmpgt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    jump_if(engine, instruction, |x1, x2| x1 > x2)
}

/// Implements JMPGE and JMPGE_L.
fn jmpge(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    jump_if(engine, instruction, |x1, x2| x1 >= x2)
}

/// Implements JMPLT and JMPLT_L.
fn jmplt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    jump_if(engine, instruction, |x1, x2| x1 < x2)
}

/// Implements JMPLE and JMPLE_L.
fn jmple(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    jump_if(engine, instruction, |x1, x2| x1 <= x2)
}

/// Implements CALL and CALL_L.
fn call(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let position = engine.resolve_target(i64::from(offset(instruction)?))?;
    engine.execute_call(position)
}

/// Implements the CALLA operation.
fn calla(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let pointer = match engine.pop()? {
        StackItem::Pointer(pointer) => pointer,
        other => {
            return Err(VmError::invalid_type_simple(
                "Pointer",
                other.stack_item_type().to_string(),
            ))
        }
    };
    if !pointer.belongs_to(engine.context()?.script()) {
        return Err(VmError::invalid_operation_msg(
            "Pointers can't be shared between scripts",
        ));
    }
    engine.execute_call(pointer.position())
}

/// Implements the CALLT operation.
fn callt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.execute_call_token(instruction.token_u16()?)
}

/// Implements the RET operation.
fn ret(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.execute_ret()
}

/// Implements the SYSCALL operation.
fn syscall(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.execute_syscall(instruction.token_u32()?)
}

#[cfg(test)]
mod tests {
    use crate::execution_engine::ExecutionEngine;
    use crate::op_code::OpCode;
    use crate::script::Script;
    use crate::vm_state::VMState;
    use num_bigint::BigInt;

    fn run(script: Vec<u8>) -> ExecutionEngine {
        let mut engine = ExecutionEngine::new();
        engine.load_script(Script::from(script), -1, 0).unwrap();
        engine.execute();
        engine
    }

    #[test]
    fn test_conditional_jump() {
        // PUSH2 PUSH3 JMPLT +3 PUSH0 PUSH7
        let engine = run(vec![
            OpCode::PUSH2 as u8,
            OpCode::PUSH3 as u8,
            OpCode::JMPLT as u8,
            0x03,
            OpCode::PUSH0 as u8,
            OpCode::PUSH7 as u8,
        ]);
        assert_eq!(engine.state(), VMState::HALT);
        assert_eq!(engine.result_stack().len(), 1);
        assert_eq!(
            engine.result_stack().peek(0).unwrap().get_integer().unwrap(),
            BigInt::from(7)
        );
    }

    #[test]
    fn test_call_returns_to_caller() {
        // CALL +4, PUSH2, RET, PUSH1, RET
        let engine = run(vec![
            OpCode::CALL as u8,
            0x04,
            OpCode::PUSH2 as u8,
            OpCode::RET as u8,
            OpCode::PUSH1 as u8,
            OpCode::RET as u8,
        ]);
        assert_eq!(engine.state(), VMState::HALT);
        let stack = engine.result_stack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.peek(0).unwrap().get_integer().unwrap(), BigInt::from(2));
        assert_eq!(stack.peek(1).unwrap().get_integer().unwrap(), BigInt::from(1));
    }

    #[test]
    fn test_calla_with_pointer() {
        // PUSHA +7, CALLA, RET, PUSH5, RET
        let engine = run(vec![
            OpCode::PUSHA as u8,
            0x07,
            0x00,
            0x00,
            0x00,
            OpCode::CALLA as u8,
            OpCode::RET as u8,
            OpCode::PUSH5 as u8,
            OpCode::RET as u8,
        ]);
        assert_eq!(engine.state(), VMState::HALT);
        assert_eq!(
            engine.result_stack().peek(0).unwrap().get_integer().unwrap(),
            BigInt::from(5)
        );
    }

    #[test]
    fn test_jump_out_of_range_faults() {
        let engine = run(vec![OpCode::JMP as u8, 0x7f]);
        assert_eq!(engine.state(), VMState::FAULT);
    }

    #[test]
    fn test_unregistered_syscall_faults() {
        let engine = run(vec![OpCode::SYSCALL as u8, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(engine.state(), VMState::FAULT);
    }
}
