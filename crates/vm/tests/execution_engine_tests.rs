//! Integration tests for the execution engine.

use contract_vm::{
    Diagnostic, ExecutionEngine, ExecutionEngineLimits, FaultKind, Instruction, MethodToken,
    OpCode, Script, ScriptBuilder, StackItem, VMState, VmError, VmResult,
};
use num_bigint::BigInt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn run(builder: &ScriptBuilder) -> ExecutionEngine {
    let mut engine = ExecutionEngine::new();
    engine.load_script(builder.to_script(), -1, 0).unwrap();
    engine.execute();
    engine
}

fn top_int(engine: &ExecutionEngine) -> BigInt {
    engine.result_stack().peek(0).unwrap().get_integer().unwrap()
}

#[test]
fn test_stack_balance() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::PUSH1)
        .emit(OpCode::PUSH2)
        .emit(OpCode::ADD)
        .emit(OpCode::DROP)
        .emit(OpCode::RET);

    let mut engine = ExecutionEngine::new();
    let before = engine.reference_counter().count();
    engine.load_script(builder.to_script(), -1, 0).unwrap();
    assert_eq!(engine.execute(), VMState::HALT);
    assert_eq!(engine.reference_counter().count(), before);
    assert!(engine.result_stack().is_empty());
}

/// NEWARRAY0 followed by DUP, PUSH1, APPEND repeated without DROP. Each round
/// adds one edge, and the PUSH1 of the fifteenth round takes the total to 17.
fn growing_array_script() -> ScriptBuilder {
    let mut builder = ScriptBuilder::new();
    builder.emit(OpCode::NEWARRAY0);
    for _ in 0..20 {
        builder
            .emit(OpCode::DUP)
            .emit(OpCode::PUSH1)
            .emit(OpCode::APPEND);
    }
    builder
}

#[test]
fn test_resource_limit_determinism() {
    let limits = ExecutionEngineLimits {
        max_stack_size: 16,
        ..ExecutionEngineLimits::default()
    };
    let script = growing_array_script().to_script();
    let script = Arc::new(script);

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let mut engine = ExecutionEngine::with_limits(limits.clone());
        engine.load_script(script.clone(), -1, 0).unwrap();
        assert_eq!(engine.execute(), VMState::FAULT);

        let error = engine.fault_exception().cloned().unwrap();
        assert_eq!(error.kind(), FaultKind::ResourceFault);

        let position = engine.current_context().unwrap().instruction_pointer();
        let appended = match engine.peek(2).unwrap() {
            StackItem::Array(r) => engine.reference_counter().items(*r).unwrap().len(),
            other => panic!("unexpected item {other:?}"),
        };
        outcomes.push((position, appended, engine.gas_consumed()));
    }

    assert_eq!(outcomes[0], outcomes[1]);
    // NEWARRAY0 is one byte and every round three, so round 15 pushes at 44.
    assert_eq!(outcomes[0].0, 44);
    assert_eq!(outcomes[0].1, 14);
}

#[test]
fn test_invocation_depth_limit() {
    let limits = ExecutionEngineLimits {
        max_invocation_stack_size: 8,
        ..ExecutionEngineLimits::default()
    };
    let mut engine = ExecutionEngine::with_limits(limits);
    // CALL +0 calls itself forever.
    engine
        .load_script(Script::from(vec![OpCode::CALL as u8, 0x00]), -1, 0)
        .unwrap();
    assert_eq!(engine.execute(), VMState::FAULT);
    assert!(matches!(
        engine.fault_exception(),
        Some(VmError::LimitExceeded(_))
    ));
    assert_eq!(engine.invocation_stack().len(), 8);
}

fn double(engine: &mut ExecutionEngine) -> VmResult<()> {
    let value = engine.pop()?.get_integer()?;
    engine.push(StackItem::from_int(value * 2));
    Ok(())
}

#[test]
fn test_syscall_dispatch_and_price() {
    let mut builder = ScriptBuilder::new();
    builder.emit(OpCode::PUSH5).emit_syscall("Test.Double");

    let mut engine = ExecutionEngine::new();
    engine
        .interop_service_mut()
        .register("Test.Double", 100, double)
        .unwrap();
    engine.load_script(builder.to_script(), -1, 0).unwrap();
    assert_eq!(engine.execute(), VMState::HALT);
    assert_eq!(top_int(&engine), BigInt::from(10));
    // PUSH5 costs 1, SYSCALL itself is free.
    assert_eq!(engine.gas_consumed(), 101);
}

#[test]
fn test_unknown_syscall_faults() {
    let mut builder = ScriptBuilder::new();
    builder.emit_syscall("Test.Missing");
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::FAULT);
    assert_eq!(
        engine.fault_exception().map(VmError::kind),
        Some(FaultKind::StackFault)
    );
}

fn adder_token() -> MethodToken {
    MethodToken {
        script: Arc::new(Script::from(vec![OpCode::ADD as u8, OpCode::RET as u8])),
        offset: 0,
        parameters_count: 2,
        rvcount: 1,
    }
}

#[test]
fn test_callt_moves_arguments() {
    let mut engine = ExecutionEngine::new();
    engine.register_method_token(0, adder_token());
    engine
        .load_script(
            Script::from(vec![
                OpCode::PUSH3 as u8,
                OpCode::PUSH4 as u8,
                OpCode::CALLT as u8,
                0x00,
                0x00,
                OpCode::RET as u8,
            ]),
            -1,
            0,
        )
        .unwrap();
    assert_eq!(engine.execute(), VMState::HALT);
    assert_eq!(engine.result_stack().len(), 1);
    assert_eq!(top_int(&engine), BigInt::from(7));
}

#[test]
fn test_callt_region_hides_caller_items() {
    let mut engine = ExecutionEngine::new();
    engine.register_method_token(
        1,
        MethodToken {
            script: Arc::new(Script::from(vec![OpCode::DROP as u8])),
            offset: 0,
            parameters_count: 0,
            rvcount: 0,
        },
    );
    engine
        .load_script(
            Script::from(vec![OpCode::PUSH1 as u8, OpCode::CALLT as u8, 0x01, 0x00]),
            -1,
            0,
        )
        .unwrap();
    assert_eq!(engine.execute(), VMState::FAULT);
    assert!(matches!(
        engine.fault_exception(),
        Some(VmError::StackUnderflow { .. })
    ));
    assert_eq!(engine.invocation_stack().len(), 2);
}

#[test]
fn test_missing_method_token_is_catchable() {
    // TRY catch=+7; CALLT 9; RET; catch: DROP; PUSH2; RET
    let mut engine = ExecutionEngine::new();
    engine
        .load_script(
            Script::from(vec![
                OpCode::TRY as u8,
                0x07,
                0x00,
                OpCode::CALLT as u8,
                0x09,
                0x00,
                OpCode::RET as u8,
                OpCode::DROP as u8,
                OpCode::PUSH2 as u8,
                OpCode::RET as u8,
            ]),
            -1,
            0,
        )
        .unwrap();
    assert_eq!(engine.execute(), VMState::HALT);
    assert_eq!(top_int(&engine), BigInt::from(2));
}

#[test]
fn test_fault_keeps_invocation_stack() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::PUSH1)
        .emit(OpCode::PUSH0)
        .emit(OpCode::DIV);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::FAULT);
    assert_eq!(engine.fault_exception(), Some(&VmError::DivisionByZero));
    assert_eq!(engine.invocation_stack().len(), 1);
    assert_eq!(engine.current_context().unwrap().instruction_pointer(), 2);
}

#[test]
fn test_catch_engine_exceptions_switch() {
    // TRY catch=+7; NEWARRAY0; PUSH0; PICKITEM; RET; catch: DROP; PUSH9; RET
    let script = Arc::new(Script::from(vec![
        OpCode::TRY as u8,
        0x07,
        0x00,
        OpCode::NEWARRAY0 as u8,
        OpCode::PUSH0 as u8,
        OpCode::PICKITEM as u8,
        OpCode::RET as u8,
        OpCode::DROP as u8,
        OpCode::PUSH9 as u8,
        OpCode::RET as u8,
    ]));

    let mut engine = ExecutionEngine::new();
    engine.load_script(script.clone(), -1, 0).unwrap();
    assert_eq!(engine.execute(), VMState::HALT);
    assert_eq!(top_int(&engine), BigInt::from(9));

    let limits = ExecutionEngineLimits {
        catch_engine_exceptions: false,
        ..ExecutionEngineLimits::default()
    };
    let mut engine = ExecutionEngine::with_limits(limits);
    engine.load_script(script, -1, 0).unwrap();
    assert_eq!(engine.execute(), VMState::FAULT);
    assert!(matches!(
        engine.fault_exception(),
        Some(VmError::OutOfRange(_))
    ));
}

#[test]
fn test_load_script_rejects_position_past_end() {
    let mut engine = ExecutionEngine::new();
    let result = engine.load_script(Script::from(vec![OpCode::NOP as u8]), -1, 2);
    assert!(result.is_err());
    assert!(engine.invocation_stack().is_empty());
}

#[test]
fn test_fee_factor_scales_prices() {
    let limits = ExecutionEngineLimits {
        exec_fee_factor: 30,
        fee_budget: 60,
        ..ExecutionEngineLimits::default()
    };
    let mut builder = ScriptBuilder::new();
    builder.emit(OpCode::PUSH1).emit(OpCode::PUSH1).emit(OpCode::PUSH1);

    let mut engine = ExecutionEngine::with_limits(limits);
    engine.load_script(builder.to_script(), -1, 0).unwrap();
    assert_eq!(engine.execute(), VMState::FAULT);
    assert!(matches!(
        engine.fault_exception(),
        Some(VmError::InsufficientFee { consumed: 90, budget: 60 })
    ));
}

#[derive(Default)]
struct Counters {
    loaded: AtomicUsize,
    unloaded: AtomicUsize,
    executed: AtomicUsize,
    disposed: AtomicUsize,
}

struct CountingDiagnostic(Arc<Counters>);

impl Diagnostic for CountingDiagnostic {
    fn disposed(&mut self) {
        self.0.disposed.fetch_add(1, Ordering::SeqCst);
    }

    fn context_loaded(&mut self, _context: &contract_vm::ExecutionContext) {
        self.0.loaded.fetch_add(1, Ordering::SeqCst);
    }

    fn context_unloaded(&mut self, _context: &contract_vm::ExecutionContext) {
        self.0.unloaded.fetch_add(1, Ordering::SeqCst);
    }

    fn post_execute_instruction(&mut self, _instruction: &Instruction) {
        self.0.executed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_diagnostic_observes_execution() {
    let counters = Arc::new(Counters::default());
    // CALL +3; RET; PUSH1; RET
    let script = Script::from(vec![
        OpCode::CALL as u8,
        0x03,
        OpCode::RET as u8,
        OpCode::PUSH1 as u8,
        OpCode::RET as u8,
    ]);
    {
        let mut engine = ExecutionEngine::new();
        engine.set_diagnostic(Box::new(CountingDiagnostic(counters.clone())));
        engine.load_script(script, -1, 0).unwrap();
        assert_eq!(engine.execute(), VMState::HALT);
        assert_eq!(top_int(&engine), BigInt::from(1));
    }
    assert_eq!(counters.loaded.load(Ordering::SeqCst), 2);
    assert_eq!(counters.unloaded.load(Ordering::SeqCst), 2);
    assert_eq!(counters.executed.load(Ordering::SeqCst), 4);
    assert_eq!(counters.disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_implicit_return_at_end_of_script() {
    let mut builder = ScriptBuilder::new();
    builder.emit_push_int(300);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(top_int(&engine), BigInt::from(300));
}

#[test]
fn test_branch_to_script_end_faults() {
    let mut jmp_l = vec![OpCode::PUSH1 as u8, OpCode::JMP_L as u8];
    jmp_l.extend(5i32.to_le_bytes());
    let cases = [
        vec![OpCode::PUSH1 as u8, OpCode::JMP as u8, 0x02],
        vec![OpCode::PUSH1 as u8, OpCode::JMPIF as u8, 0x02],
        jmp_l,
    ];
    for bytes in cases {
        assert!(Script::new(bytes.clone(), true).is_err());

        let mut engine = ExecutionEngine::new();
        engine.load_script(Script::from(bytes.clone()), -1, 0).unwrap();
        assert_eq!(engine.execute(), VMState::FAULT, "{bytes:?}");
        assert_eq!(engine.fault_exception().unwrap().kind(), FaultKind::InvalidOpcode);
        assert_eq!(engine.current_context().unwrap().instruction_pointer(), 1);
    }

    // An untaken branch to the end is never checked.
    let mut engine = ExecutionEngine::new();
    engine
        .load_script(
            Script::from(vec![OpCode::PUSH0 as u8, OpCode::JMPIF as u8, 0x02]),
            -1,
            0,
        )
        .unwrap();
    assert_eq!(engine.execute(), VMState::HALT);
}

#[test]
fn test_call_to_script_end_returns() {
    // CALL +2 lands on the end of the script, which is an implicit RET.
    let mut engine = ExecutionEngine::new();
    engine
        .load_script(Script::from(vec![OpCode::CALL as u8, 0x02]), -1, 0)
        .unwrap();
    assert_eq!(engine.execute(), VMState::HALT);
    assert!(engine.result_stack().is_empty());
}
