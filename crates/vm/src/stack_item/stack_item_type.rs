//! Stack item type tags.

use crate::error::{VmError, VmResult};

#[cfg(feature = "serde-types")]
use serde::{Deserialize, Serialize};

/// The type tag of a stack item, as used by ISTYPE, CONVERT and NEWARRAY_T.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-types", derive(Serialize, Deserialize))]
pub enum StackItemType {
    /// Matches any type. Also the type of `Null`.
    Any = 0x00,
    Pointer = 0x10,
    Boolean = 0x20,
    Integer = 0x21,
    ByteString = 0x28,
    Buffer = 0x30,
    Array = 0x40,
    Struct = 0x41,
    Map = 0x48,
    InteropInterface = 0x60,
}

impl StackItemType {
    /// Looks up the type for a byte, if one is defined.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Any),
            0x10 => Some(Self::Pointer),
            0x20 => Some(Self::Boolean),
            0x21 => Some(Self::Integer),
            0x28 => Some(Self::ByteString),
            0x30 => Some(Self::Buffer),
            0x40 => Some(Self::Array),
            0x41 => Some(Self::Struct),
            0x48 => Some(Self::Map),
            0x60 => Some(Self::InteropInterface),
            _ => None,
        }
    }

    /// Returns true for Boolean, Integer and ByteString.
    pub const fn is_primitive(self) -> bool {
        matches!(self, Self::Boolean | Self::Integer | Self::ByteString)
    }

    /// Returns true for Array, Struct and Map.
    pub const fn is_compound(self) -> bool {
        matches!(self, Self::Array | Self::Struct | Self::Map)
    }
}

impl TryFrom<u8> for StackItemType {
    type Error = VmError;

    fn try_from(value: u8) -> VmResult<Self> {
        Self::from_u8(value)
            .ok_or_else(|| VmError::invalid_operation_msg(format!("Invalid type: {value}")))
    }
}

impl std::fmt::Display for StackItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
