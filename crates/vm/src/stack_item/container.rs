//! Container payloads.
//!
//! Arrays, structs, maps and buffers are stored in the reference counter's
//! arena and referenced from stack items through an [`ItemRef`] handle, so a
//! container that holds itself is just an edge in the graph.

use crate::stack_item::{MapKey, StackItem, StackItemType};
use indexmap::IndexMap;

/// A stable handle to a container stored in a
/// [`ReferenceCounter`](crate::reference_counter::ReferenceCounter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ItemRef {
    /// The arena slot of the handle.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// The payload of a tracked container.
#[derive(Debug, Clone)]
pub enum Container {
    Array(Vec<StackItem>),
    Struct(Vec<StackItem>),
    Map(IndexMap<MapKey, StackItem>),
    Buffer(Vec<u8>),
}

impl Container {
    /// The type of the container.
    pub fn stack_item_type(&self) -> StackItemType {
        match self {
            Self::Array(_) => StackItemType::Array,
            Self::Struct(_) => StackItemType::Struct,
            Self::Map(_) => StackItemType::Map,
            Self::Buffer(_) => StackItemType::Buffer,
        }
    }

    /// Number of elements, entries or bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Array(items) | Self::Struct(items) => items.len(),
            Self::Map(map) => map.len(),
            Self::Buffer(data) => data.len(),
        }
    }

    /// Returns true if the container holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of reference edges owned by the container. Each map entry owns
    /// two, one for the key and one for the value.
    pub fn sub_items_count(&self) -> usize {
        match self {
            Self::Array(items) | Self::Struct(items) => items.len(),
            Self::Map(map) => map.len() * 2,
            Self::Buffer(_) => 0,
        }
    }

    /// Child items that may themselves be containers.
    pub(crate) fn children(&self) -> Box<dyn Iterator<Item = &StackItem> + '_> {
        match self {
            Self::Array(items) | Self::Struct(items) => Box::new(items.iter()),
            Self::Map(map) => Box::new(map.values()),
            Self::Buffer(_) => Box::new(std::iter::empty()),
        }
    }
}
