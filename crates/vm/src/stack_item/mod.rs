//! Stack item module for the virtual machine.
//!
//! This module provides the value types used on the evaluation stack, in
//! slots and inside containers.

mod container;
pub mod integer;
mod map_key;
mod pointer;
#[allow(clippy::module_inception)]
mod stack_item;
mod stack_item_type;

pub use container::{Container, ItemRef};
pub use map_key::MapKey;
pub use pointer::Pointer;
pub use stack_item::{InteropInterface, StackItem};
pub use stack_item_type::StackItemType;
