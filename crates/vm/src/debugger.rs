//! Debugger for the virtual machine.
//!
//! The debugger drives an engine one instruction at a time and pauses in the
//! BREAK state when execution reaches a breakpoint. Breakpoints are checked
//! after each instruction, so one set on the very first instruction of the
//! entry script is only hit when control comes back to it.
//!
//! Breakpoints belong to a script instance, not to its bytes: two loaded
//! copies of the same code keep separate breakpoints.

use crate::execution_engine::ExecutionEngine;
use crate::script::Script;
use crate::vm_state::VMState;
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

/// Breakpoint positions of one script instance. The `Arc` keeps the address
/// used as the map key alive.
struct ScriptBreakPoints {
    _script: Arc<Script>,
    positions: HashSet<usize>,
}

/// Drives an [`ExecutionEngine`] with breakpoints and stepping.
pub struct Debugger<'a> {
    engine: &'a mut ExecutionEngine,
    break_points: HashMap<usize, ScriptBreakPoints>,
}

fn script_key(script: &Arc<Script>) -> usize {
    Arc::as_ptr(script) as usize
}

impl<'a> Debugger<'a> {
    /// Creates a debugger for the engine.
    pub fn new(engine: &'a mut ExecutionEngine) -> Self {
        Self {
            engine,
            break_points: HashMap::new(),
        }
    }

    /// Gets the execution engine.
    pub fn engine(&self) -> &ExecutionEngine {
        self.engine
    }

    /// Adds a breakpoint at `position` of the given script instance.
    ///
    /// # Arguments
    ///
    /// * `script` - The loaded script, as shared with the engine
    /// * `position` - Instruction pointer to pause at
    pub fn add_break_point(&mut self, script: &Arc<Script>, position: usize) {
        self.break_points
            .entry(script_key(script))
            .or_insert_with(|| ScriptBreakPoints {
                _script: script.clone(),
                positions: HashSet::new(),
            })
            .positions
            .insert(position);
    }

    /// Removes a breakpoint. Returns false if none was set there.
    pub fn remove_break_point(&mut self, script: &Arc<Script>, position: usize) -> bool {
        let key = script_key(script);
        let Some(entry) = self.break_points.get_mut(&key) else {
            return false;
        };
        let removed = entry.positions.remove(&position);
        if entry.positions.is_empty() {
            self.break_points.remove(&key);
        }
        removed
    }

    /// Number of breakpoints currently set.
    pub fn break_point_count(&self) -> usize {
        self.break_points
            .values()
            .map(|entry| entry.positions.len())
            .sum()
    }

    /// Runs until the engine halts, faults or reaches a breakpoint.
    pub fn execute(&mut self) -> VMState {
        if self.engine.state() == VMState::BREAK {
            self.engine.set_state(VMState::NONE);
        }
        while self.engine.state() == VMState::NONE {
            self.execute_and_check_break_points();
        }
        self.engine.state()
    }

    fn execute_and_check_break_points(&mut self) {
        // Faults are recorded in the engine state.
        let _ = self.engine.execute_next();
        if self.engine.state() != VMState::NONE {
            return;
        }
        let hit = self.engine.current_context().map_or(false, |context| {
            self.break_points
                .get(&script_key(context.script()))
                .map_or(false, |entry| {
                    entry.positions.contains(&context.instruction_pointer())
                })
        });
        if hit {
            log::debug!("break point hit");
            self.engine.set_state(VMState::BREAK);
        }
    }

    /// Executes exactly one instruction, entering calls.
    pub fn step_into(&mut self) -> VMState {
        if self.engine.state().is_terminal() {
            return self.engine.state();
        }
        self.engine.set_state(VMState::NONE);
        let _ = self.engine.execute_next();
        self.pause()
    }

    /// Runs until the current context returns to its caller.
    pub fn step_out(&mut self) -> VMState {
        if self.engine.state() == VMState::BREAK {
            self.engine.set_state(VMState::NONE);
        }
        let depth = self.engine.invocation_stack().len();
        while self.engine.state() == VMState::NONE
            && self.engine.invocation_stack().len() >= depth
        {
            self.execute_and_check_break_points();
        }
        self.pause()
    }

    /// Executes one instruction in the current context, running any call it
    /// makes to completion.
    pub fn step_over(&mut self) -> VMState {
        if self.engine.state().is_terminal() {
            return self.engine.state();
        }
        self.engine.set_state(VMState::NONE);
        let depth = self.engine.invocation_stack().len();
        loop {
            self.execute_and_check_break_points();
            if self.engine.state() != VMState::NONE
                || self.engine.invocation_stack().len() <= depth
            {
                break;
            }
        }
        self.pause()
    }

    fn pause(&mut self) -> VMState {
        if self.engine.state() == VMState::NONE {
            self.engine.set_state(VMState::BREAK);
        }
        self.engine.state()
    }
}
