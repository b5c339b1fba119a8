//! Evaluation stack module for the virtual machine.
//!
//! All contexts share one evaluation stack. A context only sees the items at
//! or above its base depth; indices passed to the operations here count from
//! the top of that visible region, so index 0 is the top item.

use crate::error::{VmError, VmResult};
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::StackItem;

/// Represents the evaluation stack in the VM.
#[derive(Debug, Default)]
pub struct EvaluationStack {
    /// The underlying stack storage
    stack: Vec<StackItem>,

    /// Depth below which items belong to a calling context
    base: usize,
}

impl EvaluationStack {
    /// Creates a new, empty evaluation stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// The depth at which the visible region starts.
    pub fn base(&self) -> usize {
        self.base
    }

    pub(crate) fn set_base(&mut self, base: usize) {
        self.base = base.min(self.stack.len());
    }

    /// Returns the number of visible items.
    pub fn len(&self) -> usize {
        self.stack.len() - self.base
    }

    /// Returns true if no item is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of items across every region.
    pub fn total_len(&self) -> usize {
        self.stack.len()
    }

    fn check(&self, requested: usize) -> VmResult<()> {
        let available = self.len();
        if requested > available {
            return Err(VmError::stack_underflow_msg(requested, available));
        }
        Ok(())
    }

    /// Pushes an item onto the stack.
    ///
    /// # Arguments
    ///
    /// * `item` - The item to push
    /// * `rc` - The counter that records the new stack reference
    pub fn push(&mut self, item: StackItem, rc: &mut ReferenceCounter) {
        rc.add_stack_reference(&item, 1);
        self.stack.push(item);
    }

    /// Pops the top item.
    ///
    /// # Arguments
    ///
    /// * `rc` - The counter that releases the stack reference
    ///
    /// # Returns
    ///
    /// The item, or a stack underflow if the visible region is empty.
    pub fn pop(&mut self, rc: &mut ReferenceCounter) -> VmResult<StackItem> {
        self.check(1)?;
        let item = self
            .stack
            .pop()
            .ok_or_else(|| VmError::stack_underflow_msg(1, 0))?;
        rc.remove_stack_reference(&item);
        Ok(item)
    }

    /// Returns the item `n` positions below the top without removing it.
    ///
    /// # Arguments
    ///
    /// * `n` - Distance from the top, 0 being the top item
    ///
    /// # Returns
    ///
    /// The item, or a stack underflow if fewer than `n + 1` items are
    /// visible.
    pub fn peek(&self, n: usize) -> VmResult<&StackItem> {
        self.check(n + 1)?;
        Ok(&self.stack[self.stack.len() - 1 - n])
    }

    /// Inserts an item so that it ends up `n` positions below the top.
    ///
    /// # Arguments
    ///
    /// * `n` - Final distance from the top, at most the visible length
    /// * `item` - The item to insert
    /// * `rc` - The counter that records the new stack reference
    pub fn insert(&mut self, n: usize, item: StackItem, rc: &mut ReferenceCounter) -> VmResult<()> {
        self.check(n)?;
        rc.add_stack_reference(&item, 1);
        let index = self.stack.len() - n;
        self.stack.insert(index, item);
        Ok(())
    }

    /// Removes the item `n` positions below the top.
    ///
    /// # Arguments
    ///
    /// * `n` - Distance from the top, 0 being the top item
    /// * `rc` - The counter that releases the stack reference
    ///
    /// # Returns
    ///
    /// The removed item.
    pub fn remove(&mut self, n: usize, rc: &mut ReferenceCounter) -> VmResult<StackItem> {
        self.check(n + 1)?;
        let index = self.stack.len() - 1 - n;
        let item = self.stack.remove(index);
        rc.remove_stack_reference(&item);
        Ok(item)
    }

    /// Reverses the order of the top `n` items.
    pub fn reverse(&mut self, n: usize) -> VmResult<()> {
        self.check(n)?;
        let start = self.stack.len() - n;
        self.stack[start..].reverse();
        Ok(())
    }

    /// Drops every visible item.
    pub fn clear(&mut self, rc: &mut ReferenceCounter) {
        self.truncate(self.base, rc);
    }

    /// Drops items until the total depth is `depth`.
    pub(crate) fn truncate(&mut self, depth: usize, rc: &mut ReferenceCounter) {
        while self.stack.len() > depth {
            if let Some(item) = self.stack.pop() {
                rc.remove_stack_reference(&item);
            }
        }
    }

    /// Moves the top `count` visible items onto `target`, preserving order.
    pub(crate) fn move_to(
        &mut self,
        target: &mut EvaluationStack,
        count: usize,
    ) -> VmResult<()> {
        self.check(count)?;
        let start = self.stack.len() - count;
        target.stack.extend(self.stack.drain(start..));
        Ok(())
    }

    /// Iterates the visible items from bottom to top.
    pub fn iter(&self) -> std::slice::Iter<'_, StackItem> {
        self.stack[self.base..].iter()
    }
}
