//! Map keys.

use crate::error::{VmError, VmResult};
use crate::stack_item::integer;
use crate::stack_item::{StackItem, StackItemType};
use bytes::Bytes;
use num_bigint::BigInt;
use std::fmt;

/// A primitive value used as a map key.
///
/// Keys of different types never compare equal, so `1`, `true` and the byte
/// string `01` are three distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Boolean(bool),
    Integer(BigInt),
    ByteString(Bytes),
}

impl MapKey {
    /// The maximum size of a key in bytes.
    pub const MAX_SIZE: usize = 64;

    /// Converts a stack item into a key.
    pub fn from_item(item: &StackItem) -> VmResult<Self> {
        let key = match item {
            StackItem::Boolean(value) => Self::Boolean(*value),
            StackItem::Integer(value) => Self::Integer(value.clone()),
            StackItem::ByteString(value) => Self::ByteString(value.clone()),
            other => {
                return Err(VmError::invalid_type_simple(
                    "primitive type",
                    other.stack_item_type().to_string(),
                ))
            }
        };
        if key.size() > Self::MAX_SIZE {
            return Err(VmError::limit_exceeded(format!(
                "MaxKeySize exceed: {}",
                key.size()
            )));
        }
        Ok(key)
    }

    /// Converts the key back into a stack item.
    pub fn to_item(&self) -> StackItem {
        match self {
            Self::Boolean(value) => StackItem::Boolean(*value),
            Self::Integer(value) => StackItem::Integer(value.clone()),
            Self::ByteString(value) => StackItem::ByteString(value.clone()),
        }
    }

    /// The size of the key as seen by the SIZE opcode.
    pub fn size(&self) -> usize {
        match self {
            Self::Boolean(_) => 1,
            Self::Integer(value) => integer::byte_size(value),
            Self::ByteString(value) => value.len(),
        }
    }

    /// The type of the key.
    pub fn stack_item_type(&self) -> StackItemType {
        match self {
            Self::Boolean(_) => StackItemType::Boolean,
            Self::Integer(_) => StackItemType::Integer,
            Self::ByteString(_) => StackItemType::ByteString,
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::ByteString(value) => write!(f, "0x{}", hex::encode(value)),
        }
    }
}
