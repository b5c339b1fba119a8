//! Exception handling context module for the virtual machine.
//!
//! One entry of a context's try stack, created by TRY and updated as the
//! engine moves through the protected, catch and finally blocks.

/// The block an exception handling context is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionHandlingState {
    /// Inside the protected block.
    #[default]
    Try,
    /// Inside the catch block.
    Catch,
    /// Inside the finally block.
    Finally,
}

/// Represents an entry of the try stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandlingContext {
    catch_pointer: Option<usize>,
    finally_pointer: Option<usize>,
    end_pointer: Option<usize>,
    state: ExceptionHandlingState,
    stack_depth: usize,
}

impl ExceptionHandlingContext {
    /// Creates a context in the `Try` state. `stack_depth` is the total depth
    /// of the evaluation stack when the TRY executed.
    pub fn new(
        catch_pointer: Option<usize>,
        finally_pointer: Option<usize>,
        stack_depth: usize,
    ) -> Self {
        Self {
            catch_pointer,
            finally_pointer,
            end_pointer: None,
            state: ExceptionHandlingState::Try,
            stack_depth,
        }
    }

    /// Start of the catch block, if any.
    pub fn catch_pointer(&self) -> Option<usize> {
        self.catch_pointer
    }

    /// Start of the finally block, if any.
    pub fn finally_pointer(&self) -> Option<usize> {
        self.finally_pointer
    }

    /// Where execution continues after the finally block.
    pub fn end_pointer(&self) -> Option<usize> {
        self.end_pointer
    }

    /// Records where execution continues once the finally block ends.
    pub fn set_end_pointer(&mut self, end_pointer: usize) {
        self.end_pointer = Some(end_pointer);
    }

    /// The block currently executing.
    pub fn state(&self) -> ExceptionHandlingState {
        self.state
    }

    /// Moves the entry into another block.
    pub fn set_state(&mut self, state: ExceptionHandlingState) {
        self.state = state;
    }

    /// Evaluation stack depth to restore when entering catch or finally.
    pub fn stack_depth(&self) -> usize {
        self.stack_depth
    }

    /// Returns true if the TRY declared a catch block.
    pub fn has_catch(&self) -> bool {
        self.catch_pointer.is_some()
    }

    /// Returns true if the TRY declared a finally block.
    pub fn has_finally(&self) -> bool {
        self.finally_pointer.is_some()
    }
}
