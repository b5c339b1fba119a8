//! Exception handling operations for the virtual machine.
//!
//! THROW and a failed ASSERT unwind to the nearest TRY entry. ABORT and
//! ABORTMSG fault the engine without consulting any TRY entry.

use super::offset;
use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;

/// Implements the ABORT operation.
pub fn abort(_engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    Err(VmError::Abort("ABORT is executed.".into()))
}

/// Implements the ABORTMSG operation.
pub fn abort_msg(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let message = engine.pop()?.get_string(&engine.reference_counter)?;
    Err(VmError::Abort(format!(
        "ABORTMSG is executed. Reason: {message}"
    )))
}

/// Implements the ASSERT operation.
pub fn assert(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    if !engine.pop_bool()? {
        return Err(VmError::Throw(
            "ASSERT is executed with false result.".into(),
        ));
    }
    Ok(())
}

/// Implements the ASSERTMSG operation.
pub fn assert_msg(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let message = engine.pop()?.get_string(&engine.reference_counter)?;
    if !engine.pop_bool()? {
        return Err(VmError::Throw(format!(
            "ASSERT is executed with false result. Reason: {message}"
        )));
    }
    Ok(())
}

/// Implements the THROW operation.
pub fn throw(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let exception = engine.pop()?;
    engine.execute_throw(exception)
}

/// Implements TRY and TRY_L. The operand holds the catch offset followed by
/// the finally offset; zero means the block is absent.
pub fn try_op(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let (catch_offset, finally_offset) = if instruction.operand.len() == 2 {
        (
            i32::from(instruction.token_i8()?),
            i32::from(instruction.token_i8_1()?),
        )
    } else {
        (instruction.token_i32()?, instruction.token_i32_1()?)
    };
    engine.execute_try(catch_offset, finally_offset)
}

/// Implements ENDTRY and ENDTRY_L.
pub fn endtry(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine.execute_end_try(offset(instruction)?)
}

/// Implements the ENDFINALLY operation.
pub fn endfinally(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.execute_end_finally()
}

#[cfg(test)]
mod tests {
    use crate::error::VmError;
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
    fn test_throw_is_caught() {
        // 0: TRY +5 0
        // 3: PUSH1
        // 4: THROW
        // 5: PUSH2      (catch, exception below)
        // 6: ENDTRY +2
        // 8: RET
        let engine = run(vec![
            OpCode::TRY as u8,
            0x05,
            0x00,
            OpCode::PUSH1 as u8,
            OpCode::THROW as u8,
            OpCode::PUSH2 as u8,
            OpCode::ENDTRY as u8,
            0x02,
            OpCode::RET as u8,
        ]);
        assert_eq!(engine.state(), VMState::HALT);
        let stack = engine.result_stack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.peek(0).unwrap().get_integer().unwrap(), BigInt::from(2));
        assert_eq!(stack.peek(1).unwrap().get_integer().unwrap(), BigInt::from(1));
    }

    #[test]
    fn test_finally_runs_after_try() {
        // 0: TRY 0 +6
        // 3: PUSH1
        // 4: ENDTRY +4
        // 6: PUSH2      (finally)
        // 7: ENDFINALLY
        // 8: PUSH3
        let engine = run(vec![
            OpCode::TRY as u8,
            0x00,
            0x06,
            OpCode::PUSH1 as u8,
            OpCode::ENDTRY as u8,
            0x04,
            OpCode::PUSH2 as u8,
            OpCode::ENDFINALLY as u8,
            OpCode::PUSH3 as u8,
        ]);
        assert_eq!(engine.state(), VMState::HALT);
        let values: Vec<BigInt> = engine
            .result_stack()
            .iter()
            .map(|item| item.get_integer().unwrap())
            .collect();
        assert_eq!(values, vec![BigInt::from(1), BigInt::from(2), BigInt::from(3)]);
    }

    #[test]
    fn test_abort_ignores_try() {
        let engine = run(vec![
            OpCode::TRY as u8,
            0x04,
            0x00,
            OpCode::ABORT as u8,
            OpCode::RET as u8,
        ]);
        assert_eq!(engine.state(), VMState::FAULT);
        assert!(matches!(engine.fault_exception(), Some(VmError::Abort(_))));
    }

    #[test]
    fn test_assert_false_is_catchable() {
        // 0: TRY +5 0
        // 3: PUSHF
        // 4: ASSERT
        // 5: DROP       (catch)
        // 6: ENDTRY +2
        // 8: RET
        let engine = run(vec![
            OpCode::TRY as u8,
            0x05,
            0x00,
            OpCode::PUSHF as u8,
            OpCode::ASSERT as u8,
            OpCode::DROP as u8,
            OpCode::ENDTRY as u8,
            0x02,
            OpCode::RET as u8,
        ]);
        assert_eq!(engine.state(), VMState::HALT);
        assert!(engine.result_stack().is_empty());
    }

    #[test]
    fn test_uncaught_throw_faults() {
        let engine = run(vec![OpCode::PUSH1 as u8, OpCode::THROW as u8]);
        assert_eq!(engine.state(), VMState::FAULT);
        assert_eq!(
            engine.fault_exception(),
            Some(&VmError::Unhandled("1".into()))
        );
    }
}
