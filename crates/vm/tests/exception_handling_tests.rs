//! Integration tests for TRY, CATCH and FINALLY handling.

use contract_vm::{
    ExecutionEngine, ExecutionEngineLimits, FaultKind, OpCode, Script, StackItem, VMState, VmError,
};
use num_bigint::BigInt;

fn run_with(limits: ExecutionEngineLimits, script: Vec<u8>) -> ExecutionEngine {
    let mut engine = ExecutionEngine::with_limits(limits);
    engine.load_script(Script::from(script), -1, 0).unwrap();
    engine.execute();
    engine
}

fn run(script: Vec<u8>) -> ExecutionEngine {
    run_with(ExecutionEngineLimits::default(), script)
}

/// TRY(catch=C, finally=F); PUSH1; `raise`; C: PUSHDATA1 "caught";
/// ENDTRY(end=E); F: PUSH1; DROP; ENDFINALLY; E: RET
fn try_catch_finally(raise: OpCode) -> Vec<u8> {
    let mut script = vec![OpCode::TRY as u8, 5, 15, OpCode::PUSH1 as u8, raise as u8];
    script.extend([OpCode::PUSHDATA1 as u8, 6]);
    script.extend(b"caught");
    script.extend([
        OpCode::ENDTRY as u8,
        5,
        OpCode::PUSH1 as u8,
        OpCode::DROP as u8,
        OpCode::ENDFINALLY as u8,
        OpCode::RET as u8,
    ]);
    script
}

#[test]
fn test_try_catch_finally() {
    let engine = run(try_catch_finally(OpCode::THROW));
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(
        engine.result_stack().peek(0).unwrap(),
        &StackItem::from_byte_string(&b"caught"[..])
    );
    assert_eq!(
        engine.result_stack().peek(1).unwrap(),
        &StackItem::from_int(1)
    );
    assert!(engine.uncaught_exception().is_none());
}

#[test]
fn test_abort_bypasses_try() {
    let engine = run(try_catch_finally(OpCode::ABORT));
    assert_eq!(engine.state(), VMState::FAULT);
    assert_eq!(
        engine.fault_exception().map(VmError::kind),
        Some(FaultKind::UserAborted)
    );
}

#[test]
fn test_exception_crosses_contexts() {
    // 0: TRY catch=+7
    // 3: CALL +9        (to 12)
    // 5: ENDTRY +6      (to 11)
    // 7: DROP           catch
    // 8: PUSH7
    // 9: ENDTRY +2      (to 11)
    // 11: RET
    // 12: PUSH3; THROW
    let engine = run(vec![
        OpCode::TRY as u8,
        7,
        0,
        OpCode::CALL as u8,
        9,
        OpCode::ENDTRY as u8,
        6,
        OpCode::DROP as u8,
        OpCode::PUSH7 as u8,
        OpCode::ENDTRY as u8,
        2,
        OpCode::RET as u8,
        OpCode::PUSH3 as u8,
        OpCode::THROW as u8,
    ]);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(engine.result_stack().len(), 1);
    assert_eq!(
        engine.result_stack().peek(0).unwrap().get_integer().unwrap(),
        BigInt::from(7)
    );
}

#[test]
fn test_finally_rethrows_uncaught_exception() {
    // TRY finally=+5; PUSH2; THROW; ENDFINALLY
    let engine = run(vec![
        OpCode::TRY as u8,
        0,
        5,
        OpCode::PUSH2 as u8,
        OpCode::THROW as u8,
        OpCode::ENDFINALLY as u8,
    ]);
    assert_eq!(engine.state(), VMState::FAULT);
    assert_eq!(
        engine.fault_exception(),
        Some(&VmError::Unhandled("2".to_string()))
    );
    assert_eq!(engine.uncaught_exception(), Some(&StackItem::from_int(2)));
}

#[test]
fn test_endtry_inside_finally_faults() {
    // 0: TRY finally=+5; 3: ENDTRY +4; 5: ENDTRY +2; 7: RET
    let engine = run(vec![
        OpCode::TRY as u8,
        0,
        5,
        OpCode::ENDTRY as u8,
        4,
        OpCode::ENDTRY as u8,
        2,
        OpCode::RET as u8,
    ]);
    assert_eq!(engine.state(), VMState::FAULT);
    assert!(matches!(
        engine.fault_exception(),
        Some(VmError::InvalidOperation(_))
    ));
}

#[test]
fn test_try_nesting_limit() {
    let limits = ExecutionEngineLimits {
        max_try_nesting_depth: 2,
        ..ExecutionEngineLimits::default()
    };
    let mut script = Vec::new();
    for _ in 0..3 {
        script.extend([OpCode::TRY as u8, 3, 0]);
    }
    script.push(OpCode::RET as u8);
    let engine = run_with(limits, script);
    assert_eq!(engine.state(), VMState::FAULT);
    assert_eq!(
        engine.fault_exception().map(VmError::kind),
        Some(FaultKind::ResourceFault)
    );
}

#[test]
fn test_try_without_handlers_faults() {
    let engine = run(vec![OpCode::TRY as u8, 0, 0, OpCode::RET as u8]);
    assert_eq!(engine.state(), VMState::FAULT);
}

#[test]
fn test_catch_restores_stack_depth() {
    // PUSH5; TRY catch=+6; PUSH1; PUSH2; THROW; catch: DROP; DEPTH
    let engine = run(vec![
        OpCode::PUSH5 as u8,
        OpCode::TRY as u8,
        6,
        0,
        OpCode::PUSH1 as u8,
        OpCode::PUSH2 as u8,
        OpCode::THROW as u8,
        OpCode::DROP as u8,
        OpCode::DEPTH as u8,
    ]);
    assert_eq!(engine.state(), VMState::HALT);
    let values: Vec<BigInt> = engine
        .result_stack()
        .iter()
        .map(|item| item.get_integer().unwrap())
        .collect();
    assert_eq!(values, vec![BigInt::from(5), BigInt::from(1)]);
}

#[test]
fn test_assert_msg_message_is_caught() {
    // TRY catch=+9; PUSHF; PUSHDATA1 "no"; ASSERTMSG; RET; catch: RET
    let engine = run(vec![
        OpCode::TRY as u8,
        9,
        0,
        OpCode::PUSHF as u8,
        OpCode::PUSHDATA1 as u8,
        2,
        b'n',
        b'o',
        OpCode::ASSERTMSG as u8,
        OpCode::RET as u8,
    ]);
    assert_eq!(engine.state(), VMState::HALT);
    let message = engine.result_stack().peek(0).unwrap();
    let text = message.get_string(engine.reference_counter()).unwrap();
    assert!(text.contains("no"));
}

#[test]
fn test_engine_exception_message_reaches_catch() {
    // TRY catch=+8; NEWARRAY0; PUSH5; PICKITEM; ENDTRY +2; catch: RET
    let engine = run(vec![
        OpCode::TRY as u8,
        8,
        0,
        OpCode::NEWARRAY0 as u8,
        OpCode::PUSH5 as u8,
        OpCode::PICKITEM as u8,
        OpCode::ENDTRY as u8,
        2,
        OpCode::RET as u8,
    ]);
    assert_eq!(engine.state(), VMState::HALT);
    let caught = engine.result_stack().peek(0).unwrap();
    assert_eq!(
        caught.get_string(engine.reference_counter()).unwrap(),
        "The index 5 is out of range [0, 0)."
    );
}
