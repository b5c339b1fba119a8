//! Reference counter for the virtual machine.
//!
//! The reference counter owns every buffer, array, struct and map created
//! during execution. Containers live in an arena and are addressed through
//! [`ItemRef`] handles, so cyclic graphs are plain edges.
//!
//! `count()` is the number of stack references (evaluation stacks, slots and
//! the result stack) plus the number of container edges. A container that
//! loses its last stack reference is remembered as zero-referred; the next
//! call to [`ReferenceCounter::check_zero_referred`] marks everything
//! reachable from items that still have stack references and frees the rest,
//! cycles included.

use crate::error::{VmError, VmResult};
use crate::execution_engine_limits::ExecutionEngineLimits;
use crate::stack_item::{Container, ItemRef, MapKey, StackItem, StackItemType};
use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use std::collections::VecDeque;

#[derive(Debug)]
struct TrackedItem {
    container: Container,
    read_only: bool,
    stack_references: usize,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    item: Option<TrackedItem>,
}

/// Tracks references to stack items and owns all containers.
#[derive(Debug, Default)]
pub struct ReferenceCounter {
    entries: Vec<Entry>,
    free: Vec<u32>,
    zero_referred: HashSet<ItemRef>,
    references_count: usize,
}

impl ReferenceCounter {
    /// Creates a new, empty reference counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// The total number of stack references and container edges.
    pub fn count(&self) -> usize {
        self.references_count
    }

    /// The number of containers currently alive in the arena.
    pub fn tracked_count(&self) -> usize {
        self.entries.iter().filter(|e| e.item.is_some()).count()
    }

    /// Returns true if the handle still refers to a live container.
    pub fn contains(&self, r: ItemRef) -> bool {
        self.tracked(r).is_ok()
    }

    /// Number of stack references held by the container behind `r`.
    pub fn stack_references(&self, r: ItemRef) -> VmResult<usize> {
        Ok(self.tracked(r)?.stack_references)
    }

    fn tracked(&self, r: ItemRef) -> VmResult<&TrackedItem> {
        self.entries
            .get(r.index as usize)
            .filter(|e| e.generation == r.generation)
            .and_then(|e| e.item.as_ref())
            .ok_or_else(|| VmError::invalid_operation_msg("Dangling container reference"))
    }

    fn tracked_mut(&mut self, r: ItemRef) -> VmResult<&mut TrackedItem> {
        self.entries
            .get_mut(r.index as usize)
            .filter(|e| e.generation == r.generation)
            .and_then(|e| e.item.as_mut())
            .ok_or_else(|| VmError::invalid_operation_msg("Dangling container reference"))
    }

    fn writable(&mut self, r: ItemRef) -> VmResult<&mut TrackedItem> {
        let tracked = self.tracked_mut(r)?;
        if tracked.read_only {
            return Err(VmError::ReadOnly);
        }
        Ok(tracked)
    }

    fn allocate(&mut self, container: Container) -> StackItem {
        let item_type = container.stack_item_type();
        self.references_count += container.sub_items_count();
        let tracked = TrackedItem {
            container,
            read_only: false,
            stack_references: 0,
        };
        let r = match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.item = Some(tracked);
                ItemRef {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    item: Some(tracked),
                });
                ItemRef {
                    index,
                    generation: 0,
                }
            }
        };
        self.zero_referred.insert(r);
        match item_type {
            StackItemType::Array => StackItem::Array(r),
            StackItemType::Struct => StackItem::Struct(r),
            StackItemType::Map => StackItem::Map(r),
            _ => StackItem::Buffer(r),
        }
    }

    /// Creates an array holding `items`.
    pub fn new_array(&mut self, items: Vec<StackItem>) -> StackItem {
        self.allocate(Container::Array(items))
    }

    /// Creates a struct holding `items`.
    pub fn new_struct(&mut self, items: Vec<StackItem>) -> StackItem {
        self.allocate(Container::Struct(items))
    }

    /// Creates an empty map.
    pub fn new_map(&mut self) -> StackItem {
        self.allocate(Container::Map(IndexMap::new()))
    }

    /// Creates a buffer holding `data`.
    pub fn new_buffer(&mut self, data: Vec<u8>) -> StackItem {
        self.allocate(Container::Buffer(data))
    }

    /// Records `count` new stack references to `item`.
    pub fn add_stack_reference(&mut self, item: &StackItem, count: usize) {
        self.references_count += count;
        if let Some(r) = item.tracked_ref() {
            if let Ok(tracked) = self.tracked_mut(r) {
                tracked.stack_references += count;
                self.zero_referred.remove(&r);
            }
        }
    }

    /// Removes one stack reference to `item`.
    pub fn remove_stack_reference(&mut self, item: &StackItem) {
        self.references_count = self.references_count.saturating_sub(1);
        if let Some(r) = item.tracked_ref() {
            if let Ok(tracked) = self.tracked_mut(r) {
                tracked.stack_references = tracked.stack_references.saturating_sub(1);
                if tracked.stack_references == 0 {
                    self.zero_referred.insert(r);
                }
            }
        }
    }

    fn add_reference(&mut self, count: usize) {
        self.references_count += count;
    }

    fn remove_reference(&mut self, child: &StackItem) {
        self.references_count = self.references_count.saturating_sub(1);
        if let Some(r) = child.tracked_ref() {
            self.zero_referred.insert(r);
        }
    }

    /// Reclaims containers that are no longer reachable from any stack
    /// reference and returns the updated [`count`](Self::count).
    ///
    /// Does nothing unless some container lost its last stack reference or
    /// was created since the previous sweep.
    pub fn check_zero_referred(&mut self) -> usize {
        if self.zero_referred.is_empty() {
            return self.references_count;
        }
        self.zero_referred.clear();

        let mut marked = vec![false; self.entries.len()];
        let mut pending: Vec<ItemRef> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match &entry.item {
                Some(tracked) if tracked.stack_references > 0 => Some(ItemRef {
                    index: index as u32,
                    generation: entry.generation,
                }),
                _ => None,
            })
            .collect();

        while let Some(r) = pending.pop() {
            let slot = r.index as usize;
            if marked[slot] {
                continue;
            }
            marked[slot] = true;
            if let Ok(tracked) = self.tracked(r) {
                pending.extend(
                    tracked
                        .container
                        .children()
                        .filter_map(StackItem::tracked_ref)
                        .filter(|child| !marked[child.index as usize]),
                );
            }
        }

        let mut reclaimed = 0usize;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if marked[index] {
                continue;
            }
            if let Some(tracked) = entry.item.take() {
                self.references_count = self
                    .references_count
                    .saturating_sub(tracked.container.sub_items_count());
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(index as u32);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            log::trace!("reference counter reclaimed {reclaimed} containers");
        }
        self.references_count
    }

    /// Gets the container behind `r`.
    pub fn container(&self, r: ItemRef) -> VmResult<&Container> {
        Ok(&self.tracked(r)?.container)
    }

    /// Gets the elements of an array or struct.
    pub fn items(&self, r: ItemRef) -> VmResult<&[StackItem]> {
        match self.container(r)? {
            Container::Array(items) | Container::Struct(items) => Ok(items),
            other => Err(VmError::invalid_type_simple(
                "Array",
                other.stack_item_type().to_string(),
            )),
        }
    }

    /// Gets the entries of a map.
    pub fn map(&self, r: ItemRef) -> VmResult<&IndexMap<MapKey, StackItem>> {
        match self.container(r)? {
            Container::Map(map) => Ok(map),
            other => Err(VmError::invalid_type_simple(
                "Map",
                other.stack_item_type().to_string(),
            )),
        }
    }

    /// Gets the contents of a buffer.
    pub fn buffer(&self, r: ItemRef) -> VmResult<&[u8]> {
        match self.container(r)? {
            Container::Buffer(data) => Ok(data),
            other => Err(VmError::invalid_type_simple(
                "Buffer",
                other.stack_item_type().to_string(),
            )),
        }
    }

    /// Gets the contents of a buffer for writing.
    pub fn buffer_mut(&mut self, r: ItemRef) -> VmResult<&mut Vec<u8>> {
        match &mut self.writable(r)?.container {
            Container::Buffer(data) => Ok(data),
            other => Err(VmError::invalid_type_simple(
                "Buffer",
                other.stack_item_type().to_string(),
            )),
        }
    }

    /// Returns true if the container rejects mutation.
    pub fn is_read_only(&self, r: ItemRef) -> VmResult<bool> {
        Ok(self.tracked(r)?.read_only)
    }

    /// Marks the container as read-only or writable.
    pub fn set_read_only(&mut self, r: ItemRef, read_only: bool) -> VmResult<()> {
        self.tracked_mut(r)?.read_only = read_only;
        Ok(())
    }

    fn sequence_mut(&mut self, r: ItemRef) -> VmResult<&mut Vec<StackItem>> {
        match &mut self.writable(r)?.container {
            Container::Array(items) | Container::Struct(items) => Ok(items),
            other => Err(VmError::invalid_type_simple(
                "Array",
                other.stack_item_type().to_string(),
            )),
        }
    }

    fn map_mut(&mut self, r: ItemRef) -> VmResult<&mut IndexMap<MapKey, StackItem>> {
        match &mut self.writable(r)?.container {
            Container::Map(map) => Ok(map),
            other => Err(VmError::invalid_type_simple(
                "Map",
                other.stack_item_type().to_string(),
            )),
        }
    }

    /// Appends `item` to an array or struct.
    pub fn append(&mut self, r: ItemRef, item: StackItem) -> VmResult<()> {
        self.sequence_mut(r)?.push(item);
        self.add_reference(1);
        Ok(())
    }

    /// Replaces the element at `index` of an array or struct.
    pub fn set_item(&mut self, r: ItemRef, index: usize, item: StackItem) -> VmResult<()> {
        let items = self.sequence_mut(r)?;
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or_else(|| VmError::out_of_range(format!("The value {index} is out of range ({len}).")))?;
        let old = std::mem::replace(slot, item);
        self.remove_reference(&old);
        self.add_reference(1);
        Ok(())
    }

    /// Removes and returns the element at `index` of an array or struct.
    pub fn remove_at(&mut self, r: ItemRef, index: usize) -> VmResult<StackItem> {
        let items = self.sequence_mut(r)?;
        if index >= items.len() {
            return Err(VmError::invalid_operation_msg(format!(
                "The value {index} is out of range."
            )));
        }
        let old = items.remove(index);
        self.remove_reference(&old);
        Ok(old)
    }

    /// Removes and returns the last element of an array or struct.
    pub fn pop_item(&mut self, r: ItemRef) -> VmResult<StackItem> {
        let old = self
            .sequence_mut(r)?
            .pop()
            .ok_or_else(|| VmError::invalid_operation_msg("The array is empty."))?;
        self.remove_reference(&old);
        Ok(old)
    }

    /// Removes every element or entry of a compound item.
    pub fn clear_items(&mut self, r: ItemRef) -> VmResult<()> {
        let removed: Vec<StackItem> = match &mut self.writable(r)?.container {
            Container::Array(items) | Container::Struct(items) => items.drain(..).collect(),
            Container::Map(map) => map
                .drain(..)
                .flat_map(|(key, value)| [key.to_item(), value])
                .collect(),
            Container::Buffer(_) => {
                return Err(VmError::invalid_type_simple("compound type", "Buffer"))
            }
        };
        for item in &removed {
            self.remove_reference(item);
        }
        Ok(())
    }

    /// Reverses an array, struct or buffer in place.
    pub fn reverse_items(&mut self, r: ItemRef) -> VmResult<()> {
        match &mut self.writable(r)?.container {
            Container::Array(items) | Container::Struct(items) => items.reverse(),
            Container::Buffer(data) => data.reverse(),
            Container::Map(_) => return Err(VmError::invalid_type_simple("Array", "Map")),
        }
        Ok(())
    }

    /// Inserts or replaces a map entry.
    pub fn map_insert(&mut self, r: ItemRef, key: MapKey, value: StackItem) -> VmResult<()> {
        match self.map_mut(r)?.insert(key, value) {
            Some(old) => {
                self.remove_reference(&old);
                self.add_reference(1);
            }
            None => self.add_reference(2),
        }
        Ok(())
    }

    /// Removes a map entry, preserving the order of the remaining entries.
    pub fn map_remove(&mut self, r: ItemRef, key: &MapKey) -> VmResult<Option<StackItem>> {
        let removed = self.map_mut(r)?.shift_remove(key);
        if let Some(old) = &removed {
            self.references_count = self.references_count.saturating_sub(1);
            self.remove_reference(old);
        }
        Ok(removed)
    }

    /// Copies a container graph. Shared sub-containers are copied once and
    /// cycles are reproduced in the copy. With `as_immutable`, every copied
    /// container is read-only and buffers become byte strings.
    pub fn deep_copy(&mut self, item: &StackItem, as_immutable: bool) -> VmResult<StackItem> {
        let mut ref_map = HashMap::new();
        self.deep_copy_with(item, &mut ref_map, as_immutable)
    }

    /// [`deep_copy`](Self::deep_copy) with a caller-provided source-to-copy map.
    pub fn deep_copy_with(
        &mut self,
        item: &StackItem,
        ref_map: &mut HashMap<ItemRef, StackItem>,
        as_immutable: bool,
    ) -> VmResult<StackItem> {
        let Some(root) = item.tracked_ref() else {
            return Ok(item.clone());
        };

        let mut pending = vec![root];
        let mut discovered = Vec::new();
        while let Some(r) = pending.pop() {
            if ref_map.contains_key(&r) {
                continue;
            }
            let copy = match &self.tracked(r)?.container {
                Container::Buffer(data) if as_immutable => {
                    StackItem::ByteString(Bytes::copy_from_slice(data))
                }
                Container::Buffer(data) => {
                    let data = data.clone();
                    self.new_buffer(data)
                }
                Container::Array(items) => {
                    pending.extend(items.iter().filter_map(StackItem::tracked_ref));
                    self.new_array(Vec::new())
                }
                Container::Struct(items) => {
                    pending.extend(items.iter().filter_map(StackItem::tracked_ref));
                    self.new_struct(Vec::new())
                }
                Container::Map(map) => {
                    pending.extend(map.values().filter_map(StackItem::tracked_ref));
                    self.new_map()
                }
            };
            ref_map.insert(r, copy);
            discovered.push(r);
        }

        let resolve = |child: &StackItem, ref_map: &HashMap<ItemRef, StackItem>| match child
            .tracked_ref()
        {
            Some(r) => ref_map.get(&r).cloned().unwrap_or_else(|| child.clone()),
            None => child.clone(),
        };

        for source in discovered {
            let Some(target) = ref_map.get(&source).and_then(StackItem::tracked_ref) else {
                continue;
            };
            if !matches!(ref_map.get(&source), Some(StackItem::Buffer(_))) {
                match self.tracked(source)?.container.clone() {
                    Container::Array(items) | Container::Struct(items) => {
                        for child in &items {
                            let copy = resolve(child, ref_map);
                            self.append(target, copy)?;
                        }
                    }
                    Container::Map(map) => {
                        for (key, value) in &map {
                            let copy = resolve(value, ref_map);
                            self.map_insert(target, key.clone(), copy)?;
                        }
                    }
                    Container::Buffer(_) => {}
                }
            }
            self.set_read_only(target, as_immutable)?;
        }

        Ok(ref_map
            .get(&root)
            .cloned()
            .unwrap_or_else(|| item.clone()))
    }

    /// Copies a struct with value semantics: nested structs are copied,
    /// every other child is shared. Faults once more than
    /// `max_stack_size - 1` children would be copied, which bounds copies of
    /// self-containing structs.
    pub fn clone_struct(
        &mut self,
        item: &StackItem,
        limits: &ExecutionEngineLimits,
    ) -> VmResult<StackItem> {
        let StackItem::Struct(source) = item else {
            return Ok(item.clone());
        };
        let mut budget = limits.max_stack_size as i64 - 1;
        let result = self.new_struct(Vec::new());
        let mut queue = VecDeque::new();
        if let StackItem::Struct(target) = &result {
            queue.push_back((*target, *source));
        }
        while let Some((target, source)) = queue.pop_front() {
            let children = self.items(source)?.to_vec();
            for child in children {
                budget -= 1;
                if budget < 0 {
                    return Err(VmError::limit_exceeded(
                        "Beyond struct subitem clone limits",
                    ));
                }
                match child {
                    StackItem::Struct(nested) => {
                        let copy = self.new_struct(Vec::new());
                        if let StackItem::Struct(copy_ref) = &copy {
                            queue.push_back((*copy_ref, nested));
                        }
                        self.append(target, copy)?;
                    }
                    other => self.append(target, other)?,
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_references() {
        let mut rc = ReferenceCounter::new();
        let array = rc.new_array(vec![StackItem::from_int(1)]);
        assert_eq!(rc.count(), 1);
        rc.add_stack_reference(&array, 1);
        assert_eq!(rc.count(), 2);
        assert_eq!(rc.check_zero_referred(), 2);
        rc.remove_stack_reference(&array);
        assert_eq!(rc.check_zero_referred(), 0);
        assert_eq!(rc.tracked_count(), 0);
        assert!(!rc.contains(array.tracked_ref().unwrap()));
    }

    #[test]
    fn test_freed_slot_is_reused_with_new_generation() {
        let mut rc = ReferenceCounter::new();
        let first = rc.new_buffer(vec![1, 2, 3]);
        rc.check_zero_referred();
        let second = rc.new_buffer(vec![4]);
        let (a, b) = (first.tracked_ref().unwrap(), second.tracked_ref().unwrap());
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(rc.buffer(a).is_err());
        assert_eq!(rc.buffer(b).unwrap(), &[4]);
    }

    #[test]
    fn test_map_counts_keys_and_values() {
        let mut rc = ReferenceCounter::new();
        let map = rc.new_map();
        let r = map.tracked_ref().unwrap();
        rc.add_stack_reference(&map, 1);
        rc.map_insert(r, MapKey::Integer(1.into()), StackItem::from_int(2))
            .unwrap();
        assert_eq!(rc.count(), 3);
        rc.map_insert(r, MapKey::Integer(1.into()), StackItem::from_int(3))
            .unwrap();
        assert_eq!(rc.count(), 3);
        rc.map_remove(r, &MapKey::Integer(1.into())).unwrap();
        assert_eq!(rc.count(), 1);
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let mut rc = ReferenceCounter::new();
        let array = rc.new_array(Vec::new());
        let r = array.tracked_ref().unwrap();
        rc.set_read_only(r, true).unwrap();
        assert_eq!(rc.append(r, StackItem::Null), Err(VmError::ReadOnly));
    }
}
