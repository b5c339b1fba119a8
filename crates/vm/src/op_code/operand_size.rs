//! Operand size information for opcodes.

/// The operand layout of an opcode: either a fixed number of bytes, or a
/// little-endian length prefix of the given width followed by that many bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandSize {
    /// The size of the operand, if fixed
    size: usize,

    /// The width of the length prefix, if variable
    size_prefix: usize,
}

impl OperandSize {
    /// An opcode without operand.
    pub const NONE: Self = Self {
        size: 0,
        size_prefix: 0,
    };

    /// Creates an operand size with a fixed size.
    pub const fn fixed(size: usize) -> Self {
        Self {
            size,
            size_prefix: 0,
        }
    }

    /// Creates an operand size with a length prefix.
    pub const fn prefix(size_prefix: usize) -> Self {
        Self {
            size: 0,
            size_prefix,
        }
    }

    /// Gets the fixed size of the operand.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Gets the width of the length prefix.
    pub const fn size_prefix(&self) -> usize {
        self.size_prefix
    }

    /// Checks if the operand has a fixed size.
    pub const fn has_fixed_size(&self) -> bool {
        self.size > 0
    }

    /// Checks if the operand has a length prefix.
    pub const fn has_size_prefix(&self) -> bool {
        self.size_prefix > 0
    }
}
