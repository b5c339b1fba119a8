//! Stack item implementation.
//!
//! This module provides the value type that circulates on the evaluation
//! stack and in slots, together with its conversion and equality rules.

use crate::error::{VmError, VmResult};
use crate::execution_engine_limits::ExecutionEngineLimits;
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::integer;
use crate::stack_item::{Container, ItemRef, Pointer, StackItemType};
use bytes::Bytes;
use num_bigint::BigInt;
use num_traits::{One, Zero};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// A trait for host objects that can be wrapped by a stack item.
pub trait InteropInterface: fmt::Debug + Send + Sync {
    /// Gets the type name of the interop interface.
    fn interface_type(&self) -> &str;

    /// Allows downcasting to concrete types.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Represents a value in the VM.
///
/// Primitive payloads are stored inline. Buffers, arrays, structs and maps are
/// handles into the engine's [`ReferenceCounter`], which owns their contents.
#[derive(Debug, Clone, Default)]
pub enum StackItem {
    /// The null value.
    #[default]
    Null,

    /// A boolean value.
    Boolean(bool),

    /// An integer of at most 32 bytes.
    Integer(BigInt),

    /// An immutable byte string.
    ByteString(Bytes),

    /// A mutable byte buffer.
    Buffer(ItemRef),

    /// An array compared by reference.
    Array(ItemRef),

    /// A struct compared by value.
    Struct(ItemRef),

    /// An ordered map with primitive keys.
    Map(ItemRef),

    /// A position in a script.
    Pointer(Pointer),

    /// An opaque host object.
    InteropInterface(Arc<dyn InteropInterface>),
}

impl StackItem {
    /// Creates a boolean stack item.
    pub fn from_bool(value: bool) -> Self {
        StackItem::Boolean(value)
    }

    /// Creates an integer stack item.
    pub fn from_int<T: Into<BigInt>>(value: T) -> Self {
        StackItem::Integer(value.into())
    }

    /// Creates a byte string stack item.
    pub fn from_byte_string<T: Into<Bytes>>(value: T) -> Self {
        StackItem::ByteString(value.into())
    }

    /// Creates a pointer stack item.
    pub fn from_pointer(pointer: Pointer) -> Self {
        StackItem::Pointer(pointer)
    }

    /// Creates an interop interface stack item.
    pub fn from_interface<T: InteropInterface + 'static>(value: T) -> Self {
        StackItem::InteropInterface(Arc::new(value))
    }

    /// Returns the type of the stack item.
    pub fn stack_item_type(&self) -> StackItemType {
        match self {
            StackItem::Null => StackItemType::Any,
            StackItem::Boolean(_) => StackItemType::Boolean,
            StackItem::Integer(_) => StackItemType::Integer,
            StackItem::ByteString(_) => StackItemType::ByteString,
            StackItem::Buffer(_) => StackItemType::Buffer,
            StackItem::Array(_) => StackItemType::Array,
            StackItem::Struct(_) => StackItemType::Struct,
            StackItem::Map(_) => StackItemType::Map,
            StackItem::Pointer(_) => StackItemType::Pointer,
            StackItem::InteropInterface(_) => StackItemType::InteropInterface,
        }
    }

    /// Checks if the stack item is null.
    pub fn is_null(&self) -> bool {
        matches!(self, StackItem::Null)
    }

    /// Returns the arena handle for buffers and compound items.
    pub fn tracked_ref(&self) -> Option<ItemRef> {
        match self {
            StackItem::Buffer(r) | StackItem::Array(r) | StackItem::Struct(r) | StackItem::Map(r) => {
                Some(*r)
            }
            _ => None,
        }
    }

    /// Converts the item to a boolean.
    pub fn get_boolean(&self) -> VmResult<bool> {
        match self {
            StackItem::Null => Ok(false),
            StackItem::Boolean(value) => Ok(*value),
            StackItem::Integer(value) => Ok(!value.is_zero()),
            StackItem::ByteString(bytes) => {
                if bytes.len() > integer::MAX_SIZE {
                    return Err(VmError::invalid_type_simple(
                        "Boolean",
                        format!("ByteString of {} bytes", bytes.len()),
                    ));
                }
                Ok(bytes.iter().any(|b| *b != 0))
            }
            _ => Ok(true),
        }
    }

    /// Converts the item to an integer.
    ///
    /// Only Boolean, Integer and ByteString items of at most 32 bytes convert.
    pub fn get_integer(&self) -> VmResult<BigInt> {
        match self {
            StackItem::Boolean(value) => Ok(if *value { BigInt::one() } else { BigInt::zero() }),
            StackItem::Integer(value) => Ok(value.clone()),
            StackItem::ByteString(bytes) => {
                if bytes.len() > integer::MAX_SIZE {
                    return Err(VmError::invalid_type_simple(
                        "Integer",
                        format!("ByteString of {} bytes", bytes.len()),
                    ));
                }
                Ok(integer::from_bytes(bytes))
            }
            other => Err(VmError::invalid_type_simple(
                "Integer",
                other.stack_item_type().to_string(),
            )),
        }
    }

    /// Gets the byte representation of a primitive item or a buffer.
    pub fn get_span<'a>(&'a self, rc: &'a ReferenceCounter) -> VmResult<Cow<'a, [u8]>> {
        match self {
            StackItem::Boolean(value) => Ok(Cow::Owned(vec![u8::from(*value)])),
            StackItem::Integer(value) => Ok(Cow::Owned(integer::to_bytes(value))),
            StackItem::ByteString(bytes) => Ok(Cow::Borrowed(bytes.as_ref())),
            StackItem::Buffer(r) => Ok(Cow::Borrowed(rc.buffer(*r)?)),
            other => Err(VmError::invalid_type_simple(
                "ByteString",
                other.stack_item_type().to_string(),
            )),
        }
    }

    /// Decodes the byte representation as strict UTF-8.
    pub fn get_string(&self, rc: &ReferenceCounter) -> VmResult<String> {
        let span = self.get_span(rc)?;
        String::from_utf8(span.into_owned())
            .map_err(|_| VmError::invalid_operation_msg("The value is not valid UTF-8"))
    }

    /// The size reported by the SIZE opcode.
    pub fn size(&self, rc: &ReferenceCounter) -> VmResult<usize> {
        match self {
            StackItem::Boolean(_) => Ok(1),
            StackItem::Integer(value) => Ok(integer::byte_size(value)),
            StackItem::ByteString(bytes) => Ok(bytes.len()),
            StackItem::Buffer(r) | StackItem::Array(r) | StackItem::Struct(r) | StackItem::Map(r) => {
                Ok(rc.container(*r)?.len())
            }
            other => Err(VmError::invalid_type_simple(
                "sized item",
                other.stack_item_type().to_string(),
            )),
        }
    }

    /// Converts the item to another type, allocating new containers in `rc`
    /// where the conversion requires one.
    pub fn convert_to(
        &self,
        target: StackItemType,
        rc: &mut ReferenceCounter,
    ) -> VmResult<StackItem> {
        let source = self.stack_item_type();
        if let StackItem::Null = self {
            return if target == StackItemType::Any {
                Err(invalid_cast(source, target))
            } else {
                Ok(StackItem::Null)
            };
        }
        if target == source {
            return Ok(self.clone());
        }
        match (self, target) {
            (_, StackItemType::Boolean) => Ok(StackItem::Boolean(self.get_boolean()?)),
            (
                StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
                StackItemType::Integer,
            ) => Ok(StackItem::Integer(self.get_integer()?)),
            (StackItem::Boolean(_) | StackItem::Integer(_), StackItemType::ByteString) => {
                Ok(StackItem::ByteString(Bytes::from(self.get_span(rc)?.into_owned())))
            }
            (
                StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
                StackItemType::Buffer,
            ) => {
                let data = self.get_span(rc)?.into_owned();
                Ok(rc.new_buffer(data))
            }
            (StackItem::Buffer(r), StackItemType::Integer) => {
                let data = rc.buffer(*r)?;
                if data.len() > integer::MAX_SIZE {
                    return Err(invalid_cast(source, target));
                }
                Ok(StackItem::Integer(integer::from_bytes(data)))
            }
            (StackItem::Buffer(r), StackItemType::ByteString) => {
                Ok(StackItem::ByteString(Bytes::copy_from_slice(rc.buffer(*r)?)))
            }
            (StackItem::Array(r), StackItemType::Struct) => {
                let items = rc.items(*r)?.to_vec();
                Ok(rc.new_struct(items))
            }
            (StackItem::Struct(r), StackItemType::Array) => {
                let items = rc.items(*r)?.to_vec();
                Ok(rc.new_array(items))
            }
            _ => Err(invalid_cast(source, target)),
        }
    }

    /// Compares two items following the VM equality rules.
    ///
    /// Byte strings compare by content against the comparable-size budget,
    /// structs compare by value, and every other container by identity.
    pub fn equals(
        &self,
        other: &StackItem,
        rc: &ReferenceCounter,
        limits: &ExecutionEngineLimits,
    ) -> VmResult<bool> {
        match self {
            StackItem::Struct(r) => struct_equals(*r, other, rc, limits),
            StackItem::ByteString(bytes) => {
                let mut budget = limits.max_comparable_size;
                byte_string_equals(bytes, other, &mut budget)
            }
            _ => Ok(self.shallow_equals(other)),
        }
    }

    /// Equality for everything except byte strings and structs.
    fn shallow_equals(&self, other: &StackItem) -> bool {
        match (self, other) {
            (StackItem::Null, StackItem::Null) => true,
            (StackItem::Boolean(a), StackItem::Boolean(b)) => a == b,
            (StackItem::Integer(a), StackItem::Integer(b)) => a == b,
            (StackItem::Buffer(a), StackItem::Buffer(b))
            | (StackItem::Array(a), StackItem::Array(b))
            | (StackItem::Struct(a), StackItem::Struct(b))
            | (StackItem::Map(a), StackItem::Map(b)) => a == b,
            (StackItem::Pointer(a), StackItem::Pointer(b)) => a == b,
            (StackItem::InteropInterface(a), StackItem::InteropInterface(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

fn invalid_cast(from: StackItemType, to: StackItemType) -> VmError {
    VmError::invalid_type_simple(to.to_string(), format!("{from} (not convertible)"))
}

fn byte_string_equals(bytes: &Bytes, other: &StackItem, budget: &mut usize) -> VmResult<bool> {
    if bytes.len() > *budget || *budget == 0 {
        return Err(VmError::limit_exceeded(
            "The operand exceeds the maximum comparable size",
        ));
    }
    let mut compared = 1;
    let result = match other {
        StackItem::ByteString(other) => {
            compared = bytes.len().max(other.len()).max(1);
            if other.len() > *budget {
                Err(VmError::limit_exceeded(
                    "The operand exceeds the maximum comparable size",
                ))
            } else {
                Ok(bytes == other)
            }
        }
        _ => Ok(false),
    };
    *budget = budget.saturating_sub(compared);
    result
}

/// Structural comparison with an explicit work list. Faults when more than
/// `max_stack_size` nodes or `max_comparable_size` bytes would be compared.
fn struct_equals(
    root: ItemRef,
    other: &StackItem,
    rc: &ReferenceCounter,
    limits: &ExecutionEngineLimits,
) -> VmResult<bool> {
    let mut pending: Vec<(StackItem, StackItem)> = vec![(StackItem::Struct(root), other.clone())];
    let mut nodes = limits.max_stack_size;
    let mut bytes_budget = limits.max_comparable_size;

    while let Some((a, b)) = pending.pop() {
        if nodes == 0 {
            return Err(VmError::limit_exceeded("Too many struct items to compare"));
        }
        nodes -= 1;

        if let StackItem::ByteString(bytes) = &a {
            if !byte_string_equals(bytes, &b, &mut bytes_budget)? {
                return Ok(false);
            }
            continue;
        }

        if bytes_budget == 0 {
            return Err(VmError::limit_exceeded("Too many struct items to compare"));
        }
        bytes_budget -= 1;

        match (&a, &b) {
            (StackItem::Struct(ra), StackItem::Struct(rb)) => {
                if ra == rb {
                    continue;
                }
                let left = rc.items(*ra)?;
                let right = rc.items(*rb)?;
                if left.len() != right.len() {
                    return Ok(false);
                }
                for (x, y) in left.iter().zip(right.iter()) {
                    pending.push((x.clone(), y.clone()));
                }
            }
            (StackItem::Struct(_), _) => return Ok(false),
            _ => {
                if !a.shallow_equals(&b) {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Identity comparison for handles, content comparison for primitives.
///
/// This does not follow structs into the reference counter; use
/// [`StackItem::equals`] for the VM equality rules.
impl PartialEq for StackItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StackItem::ByteString(a), StackItem::ByteString(b)) => a == b,
            _ => self.shallow_equals(other),
        }
    }
}

impl From<bool> for StackItem {
    fn from(value: bool) -> Self {
        StackItem::Boolean(value)
    }
}

impl From<BigInt> for StackItem {
    fn from(value: BigInt) -> Self {
        StackItem::Integer(value)
    }
}

impl From<i64> for StackItem {
    fn from(value: i64) -> Self {
        StackItem::Integer(BigInt::from(value))
    }
}

impl From<&str> for StackItem {
    fn from(value: &str) -> Self {
        StackItem::ByteString(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for StackItem {
    fn from(value: Vec<u8>) -> Self {
        StackItem::ByteString(Bytes::from(value))
    }
}

impl Container {
    /// Wraps a handle to this container in the matching stack item variant.
    pub fn wrap(&self, r: ItemRef) -> StackItem {
        match self {
            Container::Array(_) => StackItem::Array(r),
            Container::Struct(_) => StackItem::Struct(r),
            Container::Map(_) => StackItem::Map(r),
            Container::Buffer(_) => StackItem::Buffer(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_conversion() {
        assert!(!StackItem::Null.get_boolean().unwrap());
        assert!(StackItem::from_int(5).get_boolean().unwrap());
        assert!(!StackItem::from_int(0).get_boolean().unwrap());
        assert!(!StackItem::from_byte_string(vec![0u8, 0]).get_boolean().unwrap());
        assert!(StackItem::from_byte_string(vec![0u8, 1]).get_boolean().unwrap());
        assert!(StackItem::from_byte_string(vec![1u8; 33]).get_boolean().is_err());
    }

    #[test]
    fn test_integer_conversion() {
        assert_eq!(StackItem::from_bool(true).get_integer().unwrap(), BigInt::from(1));
        assert_eq!(
            StackItem::from_byte_string(vec![0xffu8]).get_integer().unwrap(),
            BigInt::from(-1)
        );
        assert!(StackItem::Null.get_integer().is_err());
        assert!(StackItem::from_byte_string(vec![1u8; 33]).get_integer().is_err());
    }

    #[test]
    fn test_byte_string_equality_budget() {
        let limits = ExecutionEngineLimits {
            max_comparable_size: 4,
            ..ExecutionEngineLimits::default()
        };
        let rc = ReferenceCounter::new();
        let a = StackItem::from_byte_string(vec![1u8, 2, 3]);
        let b = StackItem::from_byte_string(vec![1u8, 2, 3]);
        assert!(a.equals(&b, &rc, &limits).unwrap());
        let long = StackItem::from_byte_string(vec![1u8; 5]);
        assert!(long.equals(&b, &rc, &limits).is_err());
        assert!(!a.equals(&StackItem::from_int(1), &rc, &limits).unwrap());
    }

    #[test]
    fn test_convert_primitive() {
        let mut rc = ReferenceCounter::new();
        let item = StackItem::from_int(256);
        let converted = item.convert_to(StackItemType::ByteString, &mut rc).unwrap();
        assert!(matches!(&converted, StackItem::ByteString(b) if b.as_ref() == [0x00, 0x01]));
        assert!(StackItem::Null.convert_to(StackItemType::Any, &mut rc).is_err());
        assert!(StackItem::Null
            .convert_to(StackItemType::Integer, &mut rc)
            .unwrap()
            .is_null());
        assert!(StackItem::from_int(1).convert_to(StackItemType::Map, &mut rc).is_err());
    }
}
