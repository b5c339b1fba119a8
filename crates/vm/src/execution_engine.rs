//! Execution engine module for the virtual machine.
//!
//! The engine owns the invocation stack, the shared evaluation stack, the
//! reference counter and the jump table, and drives the
//! NONE / BREAK / HALT / FAULT state machine one instruction at a time.

use crate::diagnostic::Diagnostic;
use crate::error::{VmError, VmResult};
use crate::evaluation_stack::EvaluationStack;
use crate::exception_handling_context::{ExceptionHandlingContext, ExceptionHandlingState};
use crate::execution_context::{ExecutionContext, SharedStates};
use crate::execution_engine_limits::ExecutionEngineLimits;
use crate::fee;
use crate::instruction::Instruction;
use crate::interop_service::InteropService;
use crate::jump_table::JumpTable;
use crate::reference_counter::ReferenceCounter;
use crate::script::Script;
use crate::slot::Slot;
use crate::stack_item::{integer, StackItem};
use crate::vm_state::VMState;
use hashbrown::HashMap;
use num_bigint::BigInt;
use std::fmt;
use std::sync::Arc;

/// A call target reachable through CALLT.
#[derive(Debug, Clone)]
pub struct MethodToken {
    /// The script to call into
    pub script: Arc<Script>,

    /// The entry offset inside `script`
    pub offset: usize,

    /// Number of arguments moved from the caller
    pub parameters_count: u16,

    /// Number of values the callee must return (-1 for any)
    pub rvcount: i32,
}

/// Selects one of the three slot kinds of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Static,
    Local,
    Argument,
}

/// The execution engine.
pub struct ExecutionEngine {
    pub(crate) state: VMState,
    pub(crate) is_jumping: bool,
    pub(crate) jump_table: JumpTable,
    pub(crate) limits: ExecutionEngineLimits,
    pub(crate) reference_counter: ReferenceCounter,
    pub(crate) evaluation_stack: EvaluationStack,
    pub(crate) result_stack: EvaluationStack,
    pub(crate) invocation_stack: Vec<ExecutionContext>,
    pub(crate) shared_states: Vec<SharedStates>,
    pub(crate) uncaught_exception: Option<StackItem>,
    fault_exception: Option<VmError>,
    interop_service: InteropService,
    method_tokens: HashMap<u16, MethodToken>,
    gas_consumed: u64,
    diagnostic: Option<Box<dyn Diagnostic>>,
}

impl ExecutionEngine {
    /// Creates an engine with the default limits and jump table.
    pub fn new() -> Self {
        Self::with_limits(ExecutionEngineLimits::default())
    }

    /// Creates an engine with the given limits.
    pub fn with_limits(limits: ExecutionEngineLimits) -> Self {
        Self {
            state: VMState::NONE,
            is_jumping: false,
            jump_table: JumpTable::default(),
            limits,
            reference_counter: ReferenceCounter::new(),
            evaluation_stack: EvaluationStack::new(),
            result_stack: EvaluationStack::new(),
            invocation_stack: Vec::new(),
            shared_states: Vec::new(),
            uncaught_exception: None,
            fault_exception: None,
            interop_service: InteropService::new(),
            method_tokens: HashMap::new(),
            gas_consumed: 0,
            diagnostic: None,
        }
    }

    /// Replaces the jump table.
    pub fn with_jump_table(mut self, jump_table: JumpTable) -> Self {
        self.jump_table = jump_table;
        self
    }

    /// Returns the current state.
    pub fn state(&self) -> VMState {
        self.state
    }

    /// Sets the state.
    pub fn set_state(&mut self, state: VMState) {
        if self.state != state {
            log::debug!("vm state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Returns the limits in force.
    pub fn limits(&self) -> &ExecutionEngineLimits {
        &self.limits
    }

    /// The handler table used for dispatch.
    pub fn jump_table(&self) -> &JumpTable {
        &self.jump_table
    }

    /// Mutable access to the handler table, for overriding single opcodes.
    pub fn jump_table_mut(&mut self) -> &mut JumpTable {
        &mut self.jump_table
    }

    /// The reference counter tracking every compound item.
    pub fn reference_counter(&self) -> &ReferenceCounter {
        &self.reference_counter
    }

    /// Gives access to the reference counter, for example to build
    /// containers before pushing them.
    pub fn reference_counter_mut(&mut self) -> &mut ReferenceCounter {
        &mut self.reference_counter
    }

    /// The evaluation stack as seen by the current context.
    pub fn evaluation_stack(&self) -> &EvaluationStack {
        &self.evaluation_stack
    }

    /// The values returned by the entry context.
    pub fn result_stack(&self) -> &EvaluationStack {
        &self.result_stack
    }

    /// The loaded contexts, entry context first.
    pub fn invocation_stack(&self) -> &[ExecutionContext] {
        &self.invocation_stack
    }

    /// The context executing next, if any.
    pub fn current_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.last()
    }

    /// The context the first script was loaded into.
    pub fn entry_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.first()
    }

    pub(crate) fn context_mut(&mut self) -> VmResult<&mut ExecutionContext> {
        self.invocation_stack
            .last_mut()
            .ok_or_else(|| VmError::invalid_operation_msg("No current context"))
    }

    pub(crate) fn context(&self) -> VmResult<&ExecutionContext> {
        self.invocation_stack
            .last()
            .ok_or_else(|| VmError::invalid_operation_msg("No current context"))
    }

    /// The exception being propagated, if any.
    pub fn uncaught_exception(&self) -> Option<&StackItem> {
        self.uncaught_exception.as_ref()
    }

    /// The error that faulted the engine.
    pub fn fault_exception(&self) -> Option<&VmError> {
        self.fault_exception.as_ref()
    }

    /// Total fee charged so far.
    pub fn gas_consumed(&self) -> u64 {
        self.gas_consumed
    }

    /// The syscall registry.
    pub fn interop_service(&self) -> &InteropService {
        &self.interop_service
    }

    /// Mutable access to the syscall registry, for registering host methods.
    pub fn interop_service_mut(&mut self) -> &mut InteropService {
        &mut self.interop_service
    }

    /// Makes `token` callable as `CALLT index`.
    pub fn register_method_token(&mut self, index: u16, token: MethodToken) {
        self.method_tokens.insert(index, token);
    }

    /// Attaches a diagnostic and notifies it.
    pub fn set_diagnostic(&mut self, mut diagnostic: Box<dyn Diagnostic>) {
        diagnostic.initialized(self);
        self.diagnostic = Some(diagnostic);
    }

    fn with_diagnostic(&mut self, f: impl FnOnce(&mut dyn Diagnostic, &Self)) {
        if let Some(mut diagnostic) = self.diagnostic.take() {
            f(diagnostic.as_mut(), self);
            self.diagnostic = Some(diagnostic);
        }
    }

    /// Loads a script into a new context with its own stack region.
    ///
    /// # Arguments
    ///
    /// * `script` - The script to run, either owned or already in an `Arc`
    /// * `rvcount` - Number of values the context must leave on its stack
    ///   when it returns, or -1 for any number
    /// * `initial_position` - Offset of the first instruction, at most the
    ///   script length
    ///
    /// # Returns
    ///
    /// An error if the position is outside the script or the invocation
    /// stack is full.
    pub fn load_script(
        &mut self,
        script: impl Into<Arc<Script>>,
        rvcount: i32,
        initial_position: usize,
    ) -> VmResult<()> {
        let script = script.into();
        let stack_base = self.evaluation_stack.total_len();
        self.open_context(script, rvcount, initial_position, stack_base)
    }

    fn open_context(
        &mut self,
        script: Arc<Script>,
        rvcount: i32,
        initial_position: usize,
        stack_base: usize,
    ) -> VmResult<()> {
        if initial_position > script.len() {
            return Err(VmError::invalid_operation_msg(format!(
                "Initial position {initial_position} is outside the script"
            )));
        }
        self.check_invocation_depth()?;
        let shared_index = self.shared_states.len();
        self.shared_states.push(SharedStates::new(stack_base));
        self.load_context(ExecutionContext::new(
            script,
            rvcount,
            initial_position,
            shared_index,
        ))
    }

    fn check_invocation_depth(&self) -> VmResult<()> {
        if self.invocation_stack.len() >= self.limits.max_invocation_stack_size {
            return Err(VmError::limit_exceeded(format!(
                "MaxInvocationStackSize exceed: {}",
                self.invocation_stack.len()
            )));
        }
        Ok(())
    }

    fn load_context(&mut self, context: ExecutionContext) -> VmResult<()> {
        self.check_invocation_depth()?;
        let base = self
            .shared_states
            .get(context.shared_index())
            .map(|shared| shared.stack_base)
            .unwrap_or(0);
        self.invocation_stack.push(context);
        self.evaluation_stack.set_base(base);
        self.with_diagnostic(|diagnostic, engine| {
            if let Some(context) = engine.invocation_stack.last() {
                diagnostic.context_loaded(context);
            }
        });
        Ok(())
    }

    /// Pops the current context and releases its slots. Stack items in its
    /// region are left in place.
    fn unload_context(&mut self) -> VmResult<ExecutionContext> {
        let mut context = self
            .invocation_stack
            .pop()
            .ok_or_else(|| VmError::invalid_operation_msg("No current context"))?;
        let (locals, arguments) = context.take_slots();
        for mut slot in [locals, arguments].into_iter().flatten() {
            slot.clear_references(&mut self.reference_counter);
        }
        if context.owns_shared_states() {
            if let Some(mut shared) = self.shared_states.pop() {
                if let Some(mut statics) = shared.static_fields.take() {
                    statics.clear_references(&mut self.reference_counter);
                }
            }
        }
        let base = self
            .invocation_stack
            .last()
            .and_then(|top| self.shared_states.get(top.shared_index()))
            .map(|shared| shared.stack_base)
            .unwrap_or(0);
        self.evaluation_stack.set_base(base);
        if let Some(mut diagnostic) = self.diagnostic.take() {
            diagnostic.context_unloaded(&context);
            self.diagnostic = Some(diagnostic);
        }
        Ok(context)
    }

    /// Runs until the engine halts or faults. A BREAK state is resumed.
    ///
    /// # Returns
    ///
    /// The final state, `HALT` or `FAULT`. On `FAULT` the error is kept in
    /// [`fault_exception`](Self::fault_exception) and the invocation stack
    /// is left as it was when the fault happened.
    ///
    /// # Examples
    ///
    /// ```
    /// use contract_vm::{ExecutionEngine, OpCode, Script, VMState};
    ///
    /// let script = vec![OpCode::PUSH1 as u8, OpCode::PUSH0 as u8, OpCode::DIV as u8];
    /// let mut engine = ExecutionEngine::new();
    /// engine.load_script(Script::from(script), -1, 0).unwrap();
    ///
    /// assert_eq!(engine.execute(), VMState::FAULT);
    /// assert!(engine.fault_exception().is_some());
    /// assert_eq!(engine.invocation_stack().len(), 1);
    /// ```
    pub fn execute(&mut self) -> VMState {
        if self.state == VMState::BREAK {
            self.set_state(VMState::NONE);
        }
        while self.state == VMState::NONE {
            // Faults are recorded in the state.
            let _ = self.execute_next();
        }
        self.state
    }

    /// Executes one instruction, then pauses in BREAK unless the engine
    /// reached a terminal state.
    pub fn step(&mut self) -> VMState {
        if self.state.is_terminal() {
            return self.state;
        }
        if self.execute_next().is_ok() && !self.state.is_terminal() {
            self.set_state(VMState::BREAK);
        }
        self.state
    }

    /// Executes the next instruction. A fault moves the engine to FAULT and
    /// is also returned.
    pub fn execute_next(&mut self) -> VmResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        match self.execute_instruction() {
            Ok(()) => Ok(()),
            Err(error) => {
                self.on_fault(error.clone());
                Err(error)
            }
        }
    }

    fn execute_instruction(&mut self) -> VmResult<()> {
        let Some(context) = self.invocation_stack.last() else {
            self.set_state(VMState::HALT);
            return Ok(());
        };
        let instruction = context.current_instruction()?;
        let context_index = self.invocation_stack.len() - 1;

        self.pre_execute_instruction(&instruction)?;
        log::trace!(
            "execute 0x{:02X} at {}",
            instruction.opcode,
            instruction.pointer
        );

        self.is_jumping = false;
        let handler = self.jump_table.handler(instruction.opcode);
        match handler(self, &instruction) {
            Ok(()) => {}
            Err(error) if error.is_catchable(self.limits.catch_engine_exceptions) => {
                let message = error.message();
                self.execute_throw(StackItem::from_byte_string(message.into_bytes()))?;
            }
            Err(error) => return Err(error),
        }

        self.post_execute_instruction(&instruction)?;

        if !self.is_jumping {
            if let Some(context) = self.invocation_stack.get_mut(context_index) {
                context.set_instruction_pointer(instruction.next_position());
            }
        }
        self.is_jumping = false;
        Ok(())
    }

    fn pre_execute_instruction(&mut self, instruction: &Instruction) -> VmResult<()> {
        let price = fee::byte_price(instruction.opcode).saturating_mul(self.limits.exec_fee_factor);
        self.add_fee(price)?;
        self.with_diagnostic(|diagnostic, _| diagnostic.pre_execute_instruction(instruction));
        Ok(())
    }

    fn post_execute_instruction(&mut self, instruction: &Instruction) -> VmResult<()> {
        let count = self.reference_counter.check_zero_referred();
        if count > self.limits.max_stack_size {
            return Err(VmError::limit_exceeded(format!(
                "MaxStackSize exceed: {count}/{}",
                self.limits.max_stack_size
            )));
        }
        self.with_diagnostic(|diagnostic, _| diagnostic.post_execute_instruction(instruction));
        Ok(())
    }

    fn on_fault(&mut self, error: VmError) {
        log::debug!("vm fault: {error}");
        self.fault_exception = Some(error);
        self.set_state(VMState::FAULT);
    }

    /// Charges `amount` against the fee budget.
    pub fn add_fee(&mut self, amount: u64) -> VmResult<()> {
        self.gas_consumed = self.gas_consumed.saturating_add(amount);
        if self.gas_consumed > self.limits.fee_budget {
            return Err(VmError::InsufficientFee {
                consumed: self.gas_consumed,
                budget: self.limits.fee_budget,
            });
        }
        Ok(())
    }

    /// Pushes an item onto the current context's stack.
    pub fn push(&mut self, item: StackItem) {
        self.evaluation_stack.push(item, &mut self.reference_counter);
    }

    /// Pops an item from the current context's stack.
    pub fn pop(&mut self) -> VmResult<StackItem> {
        self.evaluation_stack.pop(&mut self.reference_counter)
    }

    /// Returns the item `n` positions below the top of the current context's stack.
    pub fn peek(&self, n: usize) -> VmResult<&StackItem> {
        self.evaluation_stack.peek(n)
    }

    pub(crate) fn pop_integer(&mut self) -> VmResult<BigInt> {
        self.pop()?.get_integer()
    }

    pub(crate) fn pop_bool(&mut self) -> VmResult<bool> {
        self.pop()?.get_boolean()
    }

    /// Pops an integer that must fit in an `i32`.
    pub(crate) fn pop_i32(&mut self) -> VmResult<i32> {
        let value = self.pop_integer()?;
        i32::try_from(&value).map_err(|_| {
            VmError::invalid_operation_msg(format!("The value {value} is out of range"))
        })
    }

    /// Pops a non-negative count or index.
    pub(crate) fn pop_usize(&mut self) -> VmResult<usize> {
        let value = self.pop_i32()?;
        usize::try_from(value).map_err(|_| {
            VmError::invalid_operation_msg(format!("The value {value} is out of range"))
        })
    }

    /// Pushes an integer after checking its width.
    pub(crate) fn push_integer(&mut self, value: BigInt) -> VmResult<()> {
        integer::check_size(&value)?;
        self.push(StackItem::Integer(value));
        Ok(())
    }

    /// Resolves a relative offset against the current instruction pointer.
    /// The target may be the end of the script, which PUSHA, CALL and the
    /// TRY family accept.
    pub(crate) fn resolve_target(&self, offset: i64) -> VmResult<usize> {
        let context = self.context()?;
        let target = context.instruction_pointer() as i64 + offset;
        usize::try_from(target)
            .ok()
            .filter(|target| *target <= context.script().len())
            .ok_or_else(|| VmError::bad_script(format!("Jump target {target} is out of range")))
    }

    /// Moves the instruction pointer for a JMP-family branch. The target must
    /// lie inside the script.
    pub(crate) fn execute_jump(&mut self, position: usize) -> VmResult<()> {
        let context = self.context_mut()?;
        if position >= context.script().len() {
            return Err(VmError::bad_script(format!(
                "Jump target {position} is out of range"
            )));
        }
        context.set_instruction_pointer(position);
        self.is_jumping = true;
        Ok(())
    }

    pub(crate) fn execute_jump_offset(&mut self, offset: i64) -> VmResult<()> {
        let position = self.resolve_target(offset)?;
        self.execute_jump(position)
    }

    /// Calls `position` in the current script. The callee shares the
    /// caller's static fields and stack region.
    pub(crate) fn execute_call(&mut self, position: usize) -> VmResult<()> {
        let context = self.context()?;
        if position > context.script().len() {
            return Err(VmError::bad_script(format!(
                "Call target {position} is out of range"
            )));
        }
        let callee = context.clone_at(position);
        self.load_context(callee)
    }

    /// Calls a registered method token, moving its arguments into a new
    /// stack region.
    pub(crate) fn execute_call_token(&mut self, index: u16) -> VmResult<()> {
        let token = self
            .method_tokens
            .get(&index)
            .cloned()
            .ok_or_else(|| VmError::Throw(format!("Method token {index} is not registered")))?;
        if token.offset > token.script.len() {
            return Err(VmError::Throw(format!(
                "Method token {index} points outside its script"
            )));
        }
        let parameters = usize::from(token.parameters_count);
        let available = self.evaluation_stack.len();
        if parameters > available {
            return Err(VmError::stack_underflow_msg(parameters, available));
        }
        let stack_base = self.evaluation_stack.total_len() - parameters;
        self.open_context(token.script, token.rvcount, token.offset, stack_base)
    }

    /// Dispatches a syscall through the interop service.
    pub(crate) fn execute_syscall(&mut self, id: u32) -> VmResult<()> {
        let descriptor = self.interop_service.get(id).ok_or_else(|| {
            VmError::invalid_operation_msg(format!("Syscall 0x{id:08x} is not registered"))
        })?;
        let (price, handler) = (descriptor.price, descriptor.handler);
        log::trace!("syscall {}", descriptor.name);
        self.add_fee(price.saturating_mul(self.limits.exec_fee_factor))?;
        handler(self)
    }

    /// Returns from the current context.
    pub(crate) fn execute_ret(&mut self) -> VmResult<()> {
        let context = self.context()?;
        if context.owns_shared_states() {
            let visible = self.evaluation_stack.len();
            let rvcount = context.rvcount();
            if rvcount >= 0 && visible != rvcount as usize {
                return Err(VmError::invalid_operation_msg(format!(
                    "RVCount doesn't match with EvaluationStack: {visible}/{rvcount}"
                )));
            }
            if self.invocation_stack.len() == 1 {
                self.evaluation_stack
                    .move_to(&mut self.result_stack, visible)?;
            }
        }
        self.unload_context()?;
        if self.invocation_stack.is_empty() {
            self.set_state(VMState::HALT);
        }
        self.is_jumping = true;
        Ok(())
    }

    pub(crate) fn slot(&self, kind: SlotKind) -> VmResult<&Slot> {
        let context = self.context()?;
        let slot = match kind {
            SlotKind::Static => self
                .shared_states
                .get(context.shared_index())
                .and_then(|shared| shared.static_fields.as_ref()),
            SlotKind::Local => context.local_variables(),
            SlotKind::Argument => context.arguments(),
        };
        slot.ok_or_else(|| VmError::invalid_operation_msg(format!("{kind:?} slot is not initialized")))
    }

    /// Pushes the item stored at `index` of a slot.
    pub(crate) fn load_slot(&mut self, kind: SlotKind, index: usize) -> VmResult<()> {
        let item = self.slot(kind)?.get(index)?.clone();
        self.push(item);
        Ok(())
    }

    /// Pops an item into position `index` of a slot.
    pub(crate) fn store_slot(&mut self, kind: SlotKind, index: usize) -> VmResult<()> {
        self.slot(kind)?.get(index)?;
        let item = self.pop()?;
        let context = self
            .invocation_stack
            .last_mut()
            .ok_or_else(|| VmError::invalid_operation_msg("No current context"))?;
        let slot = match kind {
            SlotKind::Static => self
                .shared_states
                .get_mut(context.shared_index())
                .and_then(|shared| shared.static_fields.as_mut()),
            SlotKind::Local => context.local_variables_mut(),
            SlotKind::Argument => context.arguments_mut(),
        };
        let slot = slot.ok_or_else(|| {
            VmError::invalid_operation_msg(format!("{kind:?} slot is not initialized"))
        })?;
        slot.set(index, item, &mut self.reference_counter)
    }

    pub(crate) fn init_static_slot(&mut self, count: usize) -> VmResult<()> {
        let shared_index = self.context()?.shared_index();
        let shared = self
            .shared_states
            .get_mut(shared_index)
            .ok_or_else(|| VmError::invalid_operation_msg("No shared states"))?;
        if shared.static_fields.is_some() {
            return Err(VmError::invalid_operation_msg(
                "INITSSLOT cannot be executed twice",
            ));
        }
        shared.static_fields = Some(Slot::with_count(count, &mut self.reference_counter));
        Ok(())
    }

    pub(crate) fn init_slot(&mut self, locals: usize, arguments: usize) -> VmResult<()> {
        if self.context()?.has_slots() {
            return Err(VmError::invalid_operation_msg(
                "INITSLOT cannot be executed twice",
            ));
        }
        let locals = (locals > 0).then(|| Slot::with_count(locals, &mut self.reference_counter));
        let arguments = if arguments > 0 {
            let mut items = Vec::with_capacity(arguments);
            for _ in 0..arguments {
                items.push(self.pop()?);
            }
            Some(Slot::new(items, &mut self.reference_counter))
        } else {
            None
        };
        self.context_mut()?.set_slots(locals, arguments);
        Ok(())
    }

    /// Pushes a try entry for the current instruction.
    pub(crate) fn execute_try(&mut self, catch_offset: i32, finally_offset: i32) -> VmResult<()> {
        if catch_offset == 0 && finally_offset == 0 {
            return Err(VmError::invalid_operation_msg(
                "Both catch and finally offsets cannot be 0",
            ));
        }
        if self.context()?.try_stack().len() >= self.limits.max_try_nesting_depth {
            return Err(VmError::limit_exceeded("MaxTryNestingDepth exceed"));
        }
        let catch_pointer = match catch_offset {
            0 => None,
            offset => Some(self.resolve_target(i64::from(offset))?),
        };
        let finally_pointer = match finally_offset {
            0 => None,
            offset => Some(self.resolve_target(i64::from(offset))?),
        };
        let stack_depth = self.evaluation_stack.total_len();
        self.context_mut()?.push_try(ExceptionHandlingContext::new(
            catch_pointer,
            finally_pointer,
            stack_depth,
        ));
        Ok(())
    }

    /// Leaves the current try or catch block.
    pub(crate) fn execute_end_try(&mut self, end_offset: i32) -> VmResult<()> {
        let end_pointer = self.resolve_target(i64::from(end_offset))?;
        let context = self.context_mut()?;
        let entry = context.try_stack_last_mut()?;
        if entry.state() == ExceptionHandlingState::Finally {
            return Err(VmError::invalid_operation_msg(
                "The opcode ENDTRY can't be executed in a FINALLY block.",
            ));
        }
        match entry.finally_pointer() {
            Some(finally_pointer) => {
                entry.set_state(ExceptionHandlingState::Finally);
                entry.set_end_pointer(end_pointer);
                context.set_instruction_pointer(finally_pointer);
            }
            None => {
                context.pop_try();
                context.set_instruction_pointer(end_pointer);
            }
        }
        self.is_jumping = true;
        Ok(())
    }

    /// Leaves a finally block, resuming the pending jump or exception.
    pub(crate) fn execute_end_finally(&mut self) -> VmResult<()> {
        let entry = self.context_mut()?.pop_try().ok_or_else(|| {
            VmError::invalid_operation_msg("The corresponding TRY block cannot be found.")
        })?;
        if self.uncaught_exception.is_some() {
            return self.handle_exception();
        }
        let end_pointer = entry
            .end_pointer()
            .ok_or_else(|| VmError::invalid_operation_msg("The finally block has no end"))?;
        self.context_mut()?.set_instruction_pointer(end_pointer);
        self.is_jumping = true;
        Ok(())
    }

    /// Raises `exception` and unwinds to the nearest handler.
    pub fn execute_throw(&mut self, exception: StackItem) -> VmResult<()> {
        self.reference_counter.add_stack_reference(&exception, 1);
        if let Some(previous) = self.uncaught_exception.replace(exception) {
            self.reference_counter.remove_stack_reference(&previous);
        }
        self.handle_exception()
    }

    /// Unwinds the try stacks from the current context downwards.
    pub(crate) fn handle_exception(&mut self) -> VmResult<()> {
        let mut unload = 0;
        for index in (0..self.invocation_stack.len()).rev() {
            loop {
                let context = &mut self.invocation_stack[index];
                let Some(entry) = context.try_stack().last() else {
                    break;
                };
                let state = entry.state();
                if state == ExceptionHandlingState::Finally
                    || (state == ExceptionHandlingState::Catch && !entry.has_finally())
                {
                    context.pop_try();
                    continue;
                }

                for _ in 0..unload {
                    self.unload_context()?;
                }
                return self.enter_handler();
            }
            unload += 1;
        }

        let message = self
            .uncaught_exception
            .as_ref()
            .map(|item| self.describe(item))
            .unwrap_or_default();
        log::warn!("unhandled exception: {message}");
        Err(VmError::Unhandled(message))
    }

    /// Transfers control to the catch or finally block of the current
    /// context's innermost try entry.
    fn enter_handler(&mut self) -> VmResult<()> {
        let context = self.context_mut()?;
        let entry = context.try_stack_last_mut()?;
        let depth = entry.stack_depth();
        let catching = entry.state() == ExceptionHandlingState::Try && entry.has_catch();
        let target = if catching {
            entry.set_state(ExceptionHandlingState::Catch);
            entry.catch_pointer()
        } else {
            entry.set_state(ExceptionHandlingState::Finally);
            entry.finally_pointer()
        };
        let target =
            target.ok_or_else(|| VmError::invalid_operation_msg("The try block has no handler"))?;
        context.set_instruction_pointer(target);

        self.evaluation_stack
            .truncate(depth, &mut self.reference_counter);
        if catching {
            if let Some(exception) = self.uncaught_exception.take() {
                self.push(exception.clone());
                self.reference_counter.remove_stack_reference(&exception);
            }
        }
        self.is_jumping = true;
        Ok(())
    }

    fn describe(&self, item: &StackItem) -> String {
        match item {
            StackItem::ByteString(_) | StackItem::Buffer(_) => item
                .get_span(&self.reference_counter)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default(),
            StackItem::Integer(value) => value.to_string(),
            other => other.stack_item_type().to_string(),
        }
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("state", &self.state)
            .field("invocation_stack", &self.invocation_stack.len())
            .field("evaluation_stack", &self.evaluation_stack.total_len())
            .field("result_stack", &self.result_stack.len())
            .field("gas_consumed", &self.gas_consumed)
            .finish()
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        if let Some(mut diagnostic) = self.diagnostic.take() {
            diagnostic.disposed();
        }
    }
}
