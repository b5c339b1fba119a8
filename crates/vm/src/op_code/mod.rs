//! OpCode module for the virtual machine.
//!
//! This module defines the instruction set and the operand layout of every
//! opcode.

mod operand_size;

pub use operand_size::OperandSize;

use crate::error::{VmError, VmResult};

#[cfg(feature = "serde-types")]
use serde::{Deserialize, Serialize};

macro_rules! define_op_codes {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)+) => {
        /// The instruction set of the virtual machine.
        #[repr(u8)]
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde-types", derive(Serialize, Deserialize))]
        pub enum OpCode {
            $($(#[$doc])* $name = $value,)+
        }

        impl OpCode {
            /// Every defined opcode in byte order.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$name,)+];

            /// Looks up the opcode for a byte, if one is defined.
            pub const fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(OpCode::$name),)+
                    _ => None,
                }
            }

            /// The mnemonic of the opcode.
            pub const fn name(self) -> &'static str {
                match self {
                    $(OpCode::$name => stringify!($name),)+
                }
            }
        }
    };
}

define_op_codes! {
    // Constants
    /// Pushes a 1-byte signed integer.
    PUSHINT8 = 0x00,
    /// Pushes a 2-byte signed integer.
    PUSHINT16 = 0x01,
    /// Pushes a 4-byte signed integer.
    PUSHINT32 = 0x02,
    /// Pushes an 8-byte signed integer.
    PUSHINT64 = 0x03,
    /// Pushes a 16-byte signed integer.
    PUSHINT128 = 0x04,
    /// Pushes a 32-byte signed integer.
    PUSHINT256 = 0x05,
    /// Pushes the boolean true.
    PUSHT = 0x08,
    /// Pushes the boolean false.
    PUSHF = 0x09,
    /// Pushes a pointer relative to the current instruction.
    PUSHA = 0x0A,
    /// Pushes null.
    PUSHNULL = 0x0B,
    /// Pushes data whose length is given by a 1-byte prefix.
    PUSHDATA1 = 0x0C,
    /// Pushes data whose length is given by a 2-byte prefix.
    PUSHDATA2 = 0x0D,
    /// Pushes data whose length is given by a 4-byte prefix.
    PUSHDATA4 = 0x0E,
    /// Pushes -1.
    PUSHM1 = 0x0F,
    PUSH0 = 0x10,
    PUSH1 = 0x11,
    PUSH2 = 0x12,
    PUSH3 = 0x13,
    PUSH4 = 0x14,
    PUSH5 = 0x15,
    PUSH6 = 0x16,
    PUSH7 = 0x17,
    PUSH8 = 0x18,
    PUSH9 = 0x19,
    PUSH10 = 0x1A,
    PUSH11 = 0x1B,
    PUSH12 = 0x1C,
    PUSH13 = 0x1D,
    PUSH14 = 0x1E,
    PUSH15 = 0x1F,
    PUSH16 = 0x20,

    // Flow control
    NOP = 0x21,
    JMP = 0x22,
    JMP_L = 0x23,
    JMPIF = 0x24,
    JMPIF_L = 0x25,
    JMPIFNOT = 0x26,
    JMPIFNOT_L = 0x27,
    JMPEQ = 0x28,
    JMPEQ_L = 0x29,
    JMPNE = 0x2A,
    JMPNE_L = 0x2B,
    JMPGT = 0x2C,
    JMPGT_L = 0x2D,
    JMPGE = 0x2E,
    JMPGE_L = 0x2F,
    JMPLT = 0x30,
    JMPLT_L = 0x31,
    JMPLE = 0x32,
    JMPLE_L = 0x33,
    CALL = 0x34,
    CALL_L = 0x35,
    /// Calls the pointer on top of the stack.
    CALLA = 0x36,
    /// Calls a method token by index.
    CALLT = 0x37,
    /// Faults the engine. Cannot be caught.
    ABORT = 0x38,
    ASSERT = 0x39,
    THROW = 0x3A,
    TRY = 0x3B,
    TRY_L = 0x3C,
    ENDTRY = 0x3D,
    ENDTRY_L = 0x3E,
    ENDFINALLY = 0x3F,
    RET = 0x40,
    SYSCALL = 0x41,

    // Stack
    DEPTH = 0x43,
    DROP = 0x45,
    NIP = 0x46,
    XDROP = 0x48,
    CLEAR = 0x49,
    DUP = 0x4A,
    OVER = 0x4B,
    PICK = 0x4D,
    TUCK = 0x4E,
    SWAP = 0x50,
    ROT = 0x51,
    ROLL = 0x52,
    REVERSE3 = 0x53,
    REVERSE4 = 0x54,
    REVERSEN = 0x55,

    // Slot
    INITSSLOT = 0x56,
    INITSLOT = 0x57,
    LDSFLD0 = 0x58,
    LDSFLD1 = 0x59,
    LDSFLD2 = 0x5A,
    LDSFLD3 = 0x5B,
    LDSFLD4 = 0x5C,
    LDSFLD5 = 0x5D,
    LDSFLD6 = 0x5E,
    LDSFLD = 0x5F,
    STSFLD0 = 0x60,
    STSFLD1 = 0x61,
    STSFLD2 = 0x62,
    STSFLD3 = 0x63,
    STSFLD4 = 0x64,
    STSFLD5 = 0x65,
    STSFLD6 = 0x66,
    STSFLD = 0x67,
    LDLOC0 = 0x68,
    LDLOC1 = 0x69,
    LDLOC2 = 0x6A,
    LDLOC3 = 0x6B,
    LDLOC4 = 0x6C,
    LDLOC5 = 0x6D,
    LDLOC6 = 0x6E,
    LDLOC = 0x6F,
    STLOC0 = 0x70,
    STLOC1 = 0x71,
    STLOC2 = 0x72,
    STLOC3 = 0x73,
    STLOC4 = 0x74,
    STLOC5 = 0x75,
    STLOC6 = 0x76,
    STLOC = 0x77,
    LDARG0 = 0x78,
    LDARG1 = 0x79,
    LDARG2 = 0x7A,
    LDARG3 = 0x7B,
    LDARG4 = 0x7C,
    LDARG5 = 0x7D,
    LDARG6 = 0x7E,
    LDARG = 0x7F,
    STARG0 = 0x80,
    STARG1 = 0x81,
    STARG2 = 0x82,
    STARG3 = 0x83,
    STARG4 = 0x84,
    STARG5 = 0x85,
    STARG6 = 0x86,
    STARG = 0x87,

    // Splice
    NEWBUFFER = 0x88,
    MEMCPY = 0x89,
    CAT = 0x8B,
    SUBSTR = 0x8C,
    LEFT = 0x8D,
    RIGHT = 0x8E,

    // Bitwise logic
    INVERT = 0x90,
    AND = 0x91,
    OR = 0x92,
    XOR = 0x93,
    EQUAL = 0x97,
    NOTEQUAL = 0x98,

    // Arithmetic
    SIGN = 0x99,
    ABS = 0x9A,
    NEGATE = 0x9B,
    INC = 0x9C,
    DEC = 0x9D,
    ADD = 0x9E,
    SUB = 0x9F,
    MUL = 0xA0,
    DIV = 0xA1,
    MOD = 0xA2,
    POW = 0xA3,
    SQRT = 0xA4,
    MODMUL = 0xA5,
    MODPOW = 0xA6,
    SHL = 0xA8,
    SHR = 0xA9,
    NOT = 0xAA,
    BOOLAND = 0xAB,
    BOOLOR = 0xAC,
    NZ = 0xB1,
    NUMEQUAL = 0xB3,
    NUMNOTEQUAL = 0xB4,
    LT = 0xB5,
    LE = 0xB6,
    GT = 0xB7,
    GE = 0xB8,
    MIN = 0xB9,
    MAX = 0xBA,
    WITHIN = 0xBB,

    // Compound types
    PACKMAP = 0xBE,
    PACKSTRUCT = 0xBF,
    PACK = 0xC0,
    UNPACK = 0xC1,
    NEWARRAY0 = 0xC2,
    NEWARRAY = 0xC3,
    NEWARRAY_T = 0xC4,
    NEWSTRUCT0 = 0xC5,
    NEWSTRUCT = 0xC6,
    NEWMAP = 0xC8,
    SIZE = 0xCA,
    HASKEY = 0xCB,
    KEYS = 0xCC,
    VALUES = 0xCD,
    PICKITEM = 0xCE,
    APPEND = 0xCF,
    SETITEM = 0xD0,
    REVERSEITEMS = 0xD1,
    REMOVE = 0xD2,
    CLEARITEMS = 0xD3,
    POPITEM = 0xD4,

    // Types
    ISNULL = 0xD8,
    ISTYPE = 0xD9,
    CONVERT = 0xDB,

    // Extensions
    /// Faults the engine with a message. Cannot be caught.
    ABORTMSG = 0xE0,
    ASSERTMSG = 0xE1,
}

impl OpCode {
    /// Gets the operand layout of the opcode.
    pub const fn operand_size(self) -> OperandSize {
        use OpCode::*;
        match self {
            PUSHINT8 | JMP | JMPIF | JMPIFNOT | JMPEQ | JMPNE | JMPGT | JMPGE | JMPLT | JMPLE
            | CALL | ENDTRY | INITSSLOT | LDSFLD | STSFLD | LDLOC | STLOC | LDARG | STARG
            | NEWARRAY_T | ISTYPE | CONVERT => OperandSize::fixed(1),
            PUSHINT16 | CALLT | TRY | INITSLOT => OperandSize::fixed(2),
            PUSHINT32 | PUSHA | JMP_L | JMPIF_L | JMPIFNOT_L | JMPEQ_L | JMPNE_L | JMPGT_L
            | JMPGE_L | JMPLT_L | JMPLE_L | CALL_L | ENDTRY_L | SYSCALL => OperandSize::fixed(4),
            PUSHINT64 | TRY_L => OperandSize::fixed(8),
            PUSHINT128 => OperandSize::fixed(16),
            PUSHINT256 => OperandSize::fixed(32),
            PUSHDATA1 => OperandSize::prefix(1),
            PUSHDATA2 => OperandSize::prefix(2),
            PUSHDATA4 => OperandSize::prefix(4),
            _ => OperandSize::NONE,
        }
    }

    /// Returns true for the relative jump family, excluding CALL.
    pub const fn is_jump(self) -> bool {
        let value = self as u8;
        value >= OpCode::JMP as u8 && value <= OpCode::JMPLE_L as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = VmError;

    fn try_from(value: u8) -> VmResult<Self> {
        Self::from_u8(value).ok_or(VmError::InvalidOpcode(value))
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_defined_byte() {
        for &op in OpCode::ALL {
            assert_eq!(OpCode::try_from(op as u8).unwrap(), op);
        }
        assert!(OpCode::try_from(0x06).is_err());
        assert!(OpCode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_operand_sizes() {
        assert_eq!(OpCode::PUSHINT256.operand_size().size(), 32);
        assert_eq!(OpCode::TRY_L.operand_size().size(), 8);
        assert_eq!(OpCode::PUSHDATA2.operand_size().size_prefix(), 2);
        assert!(!OpCode::ADD.operand_size().has_fixed_size());
        assert!(!OpCode::ADD.operand_size().has_size_prefix());
    }

    #[test]
    fn test_jump_family() {
        assert!(OpCode::JMP.is_jump());
        assert!(OpCode::JMPLE_L.is_jump());
        assert!(!OpCode::CALL.is_jump());
        assert!(!OpCode::NOP.is_jump());
    }
}
