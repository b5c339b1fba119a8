//! Error module for the virtual machine.
//!
//! This module provides the error type used by every component of the engine
//! together with the fault taxonomy the engine uses to decide whether an error
//! can be handled by a TRY block.

use thiserror::Error;

/// The category a fault belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Unmapped opcode byte or malformed operand.
    InvalidOpcode,
    /// Underflow, wrong arity or operand type mismatch.
    StackFault,
    /// A configured limit was exceeded.
    ResourceFault,
    /// Division by zero or an integer outside the permitted width.
    ArithmeticFault,
    /// Raised by the program itself (THROW, ASSERT, CALLT).
    UserRaised,
    /// ABORT or ABORTMSG.
    UserAborted,
}

/// Errors raised while decoding or executing a script.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The opcode byte has no handler.
    #[error("Invalid opcode: 0x{0:02X}")]
    InvalidOpcode(u8),

    /// The script failed decoding or validation.
    #[error("Bad script: {0}")]
    BadScript(String),

    /// Not enough items are visible on the evaluation stack.
    #[error("Stack underflow: requested {requested}, available {available}")]
    StackUnderflow {
        /// Number of items the operation needed
        requested: usize,
        /// Number of items visible to the current context
        available: usize,
    },

    /// An operand has the wrong type.
    #[error("Invalid type: expected {expected}, found {found}")]
    InvalidType {
        /// The type the operation expected
        expected: String,
        /// The type that was found
        found: String,
    },

    /// A generic invalid operation.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An index is outside the bounds of a container or byte string.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// A map lookup failed.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Attempt to mutate a read-only container.
    #[error("The container is read-only")]
    ReadOnly,

    /// A configured limit was exceeded.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// The fee budget is exhausted.
    #[error("Insufficient fee: consumed {consumed}, budget {budget}")]
    InsufficientFee {
        /// Fee consumed including the failing charge
        consumed: u64,
        /// Configured fee budget
        budget: u64,
    },

    /// Arithmetic overflow or an invalid numeric argument.
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// Division or modulo by zero.
    #[error("Division by zero")]
    DivisionByZero,

    /// A program-raised, catchable exception.
    #[error("{0}")]
    Throw(String),

    /// A program abort. Never catchable.
    #[error("{0}")]
    Abort(String),

    /// A thrown value reached the bottom of the invocation stack.
    #[error("An unhandled exception was thrown. {0}")]
    Unhandled(String),
}

impl VmError {
    /// Creates an invalid operation error.
    pub fn invalid_operation_msg<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Creates a stack underflow error.
    pub fn stack_underflow_msg(requested: usize, available: usize) -> Self {
        Self::StackUnderflow {
            requested,
            available,
        }
    }

    /// Creates an invalid type error.
    pub fn invalid_type_simple<E: Into<String>, F: Into<String>>(expected: E, found: F) -> Self {
        Self::InvalidType {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a bad script error.
    pub fn bad_script<S: Into<String>>(message: S) -> Self {
        Self::BadScript(message.into())
    }

    /// Creates an out of range error.
    pub fn out_of_range<S: Into<String>>(message: S) -> Self {
        Self::OutOfRange(message.into())
    }

    /// Creates a limit exceeded error.
    pub fn limit_exceeded<S: Into<String>>(message: S) -> Self {
        Self::LimitExceeded(message.into())
    }

    /// Creates an arithmetic error.
    pub fn arithmetic<S: Into<String>>(message: S) -> Self {
        Self::Arithmetic(message.into())
    }

    /// Maps the error onto the fault taxonomy.
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::InvalidOpcode(_) | Self::BadScript(_) => FaultKind::InvalidOpcode,
            Self::StackUnderflow { .. }
            | Self::InvalidType { .. }
            | Self::InvalidOperation(_)
            | Self::OutOfRange(_)
            | Self::KeyNotFound(_)
            | Self::ReadOnly => FaultKind::StackFault,
            Self::LimitExceeded(_) | Self::InsufficientFee { .. } => FaultKind::ResourceFault,
            Self::Arithmetic(_) | Self::DivisionByZero => FaultKind::ArithmeticFault,
            Self::Throw(_) | Self::Unhandled(_) => FaultKind::UserRaised,
            Self::Abort(_) => FaultKind::UserAborted,
        }
    }

    /// The message a catch block receives for this error: the bare text for
    /// variants that carry one, the display text otherwise.
    pub fn message(&self) -> String {
        match self {
            Self::BadScript(message)
            | Self::InvalidOperation(message)
            | Self::OutOfRange(message)
            | Self::KeyNotFound(message)
            | Self::LimitExceeded(message)
            | Self::Arithmetic(message)
            | Self::Throw(message)
            | Self::Abort(message)
            | Self::Unhandled(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns true if an enclosing TRY block may handle this error.
    ///
    /// `OutOfRange` and `KeyNotFound` are engine exceptions that only become
    /// catchable when `catch_engine_exceptions` is enabled.
    pub fn is_catchable(&self, catch_engine_exceptions: bool) -> bool {
        match self {
            Self::Throw(_) => true,
            Self::OutOfRange(_) | Self::KeyNotFound(_) => catch_engine_exceptions,
            _ => false,
        }
    }
}

/// Result type for VM operations.
pub type VmResult<T> = std::result::Result<T, VmError>;
