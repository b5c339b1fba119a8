//! Slot storage for local variables, arguments and static fields.
//!
//! A slot is a fixed-size array of [`StackItem`]s. Every occupied position
//! holds one stack reference in the engine's [`ReferenceCounter`], so the
//! caller passes the counter to every operation that changes the content.

use crate::error::{VmError, VmResult};
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::StackItem;

/// Stores local variables, arguments or static fields for an execution context.
#[derive(Clone, Debug, Default)]
pub struct Slot {
    items: Vec<StackItem>,
}

impl Slot {
    /// Creates a slot populated with the provided items.
    pub fn new(items: Vec<StackItem>, rc: &mut ReferenceCounter) -> Self {
        for item in &items {
            rc.add_stack_reference(item, 1);
        }
        Self { items }
    }

    /// Creates a slot of `count` null items.
    pub fn with_count(count: usize, rc: &mut ReferenceCounter) -> Self {
        Self::new(vec![StackItem::Null; count], rc)
    }

    /// Returns the number of positions in the slot.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when the slot has no positions.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item at `index`.
    pub fn get(&self, index: usize) -> VmResult<&StackItem> {
        self.items
            .get(index)
            .ok_or_else(|| self.index_out_of_range(index))
    }

    /// Replaces the item stored at `index`.
    ///
    /// # Arguments
    ///
    /// * `index` - Position in the slot
    /// * `item` - The new value
    /// * `rc` - The counter that moves the stack reference from the old
    ///   value to the new one
    ///
    /// # Returns
    ///
    /// An invalid operation error if `index` is past the end of the slot.
    pub fn set(&mut self, index: usize, item: StackItem, rc: &mut ReferenceCounter) -> VmResult<()> {
        if index >= self.items.len() {
            return Err(self.index_out_of_range(index));
        }
        let slot = &mut self.items[index];
        rc.add_stack_reference(&item, 1);
        let old = std::mem::replace(slot, item);
        rc.remove_stack_reference(&old);
        Ok(())
    }

    /// Releases the stack references held by the slot.
    pub fn clear_references(&mut self, rc: &mut ReferenceCounter) {
        for item in self.items.drain(..) {
            rc.remove_stack_reference(&item);
        }
    }

    /// Returns an iterator over the contained items.
    pub fn iter(&self) -> impl Iterator<Item = &StackItem> {
        self.items.iter()
    }

    fn index_out_of_range(&self, index: usize) -> VmError {
        VmError::invalid_operation_msg(format!(
            "Index {index} out of range for slot of size {}",
            self.items.len()
        ))
    }
}
