//! Compound operations for the virtual machine.
//!
//! Arrays, structs, maps and buffers live in the reference counter, so
//! every handler reads and mutates them through it. Structs stored into a
//! container are copied first to keep their value semantics.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::{MapKey, StackItem, StackItemType};
use bytes::Bytes;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

/// Registers the compound operation handlers.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::PACKMAP, pack_map);
    jump_table.register(OpCode::PACKSTRUCT, pack_struct);
    jump_table.register(OpCode::PACK, pack);
    jump_table.register(OpCode::UNPACK, unpack);
    jump_table.register(OpCode::NEWARRAY0, new_array0);
    jump_table.register(OpCode::NEWARRAY, new_array);
    jump_table.register(OpCode::NEWARRAY_T, new_array_t);
    jump_table.register(OpCode::NEWSTRUCT0, new_struct0);
    jump_table.register(OpCode::NEWSTRUCT, new_struct);
    jump_table.register(OpCode::NEWMAP, new_map);
    jump_table.register(OpCode::SIZE, size);
    jump_table.register(OpCode::HASKEY, has_key);
    jump_table.register(OpCode::KEYS, keys);
    jump_table.register(OpCode::VALUES, values);
    jump_table.register(OpCode::PICKITEM, pick_item);
    jump_table.register(OpCode::APPEND, append);
    jump_table.register(OpCode::SETITEM, set_item);
    jump_table.register(OpCode::REVERSEITEMS, reverse_items);
    jump_table.register(OpCode::REMOVE, remove);
    jump_table.register(OpCode::CLEARITEMS, clear_items);
    jump_table.register(OpCode::POPITEM, pop_item);
}

/// Pops a Boolean, Integer or ByteString used as an index or map key.
fn pop_key(engine: &mut ExecutionEngine) -> VmResult<StackItem> {
    let key = engine.pop()?;
    if !key.stack_item_type().is_primitive() {
        return Err(VmError::invalid_type_simple(
            "primitive type",
            key.stack_item_type().to_string(),
        ));
    }
    Ok(key)
}

/// Pops an item count bounded by `limit`.
fn pop_count(engine: &mut ExecutionEngine, limit: usize) -> VmResult<usize> {
    let count = engine.pop_integer()?;
    count
        .to_usize()
        .filter(|count| *count <= limit)
        .ok_or_else(|| VmError::invalid_operation_msg(format!("The value {count} is out of range.")))
}

/// Converts a key into a container index, or `None` when it is negative or
/// too large to address anything.
fn to_index(key: &StackItem) -> VmResult<Option<usize>> {
    Ok(key.get_integer()?.to_usize())
}

fn index_out_of_range(index: &BigInt, length: usize) -> VmError {
    VmError::out_of_range(format!("The index {index} is out of range [0, {length})."))
}

/// Copies a struct about to be stored into a container.
fn own(engine: &mut ExecutionEngine, item: StackItem) -> VmResult<StackItem> {
    if let StackItem::Struct(_) = item {
        engine.reference_counter.clone_struct(&item, &engine.limits)
    } else {
        Ok(item)
    }
}

/// Implements the PACKMAP operation.
fn pack_map(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let available = engine.evaluation_stack.len().saturating_sub(1) / 2;
    let size = pop_count(engine, available)?;
    let map = engine.reference_counter.new_map();
    let Some(r) = map.tracked_ref() else {
        return Err(VmError::invalid_operation_msg("Map allocation failed"));
    };
    for _ in 0..size {
        let key = MapKey::from_item(&pop_key(engine)?)?;
        let value = engine.pop()?;
        engine.reference_counter.map_insert(r, key, value)?;
    }
    engine.push(map);
    Ok(())
}

fn pop_items(engine: &mut ExecutionEngine) -> VmResult<Vec<StackItem>> {
    let available = engine.evaluation_stack.len().saturating_sub(1);
    let size = pop_count(engine, available)?;
    let mut items = Vec::with_capacity(size);
    for _ in 0..size {
        items.push(engine.pop()?);
    }
    Ok(items)
}

/// Implements the PACKSTRUCT operation.
fn pack_struct(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let items = pop_items(engine)?;
    let item = engine.reference_counter.new_struct(items);
    engine.push(item);
    Ok(())
}

/// Implements the PACK operation. The top item becomes element 0.
fn pack(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let items = pop_items(engine)?;
    let item = engine.reference_counter.new_array(items);
    engine.push(item);
    Ok(())
}

/// Implements the UNPACK operation.
fn unpack(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let compound = engine.pop()?;
    let pushed: Vec<StackItem> = match &compound {
        StackItem::Map(r) => engine
            .reference_counter
            .map(*r)?
            .iter()
            .rev()
            .flat_map(|(key, value)| [value.clone(), key.to_item()])
            .collect(),
        StackItem::Array(r) | StackItem::Struct(r) => {
            engine.reference_counter.items(*r)?.iter().rev().cloned().collect()
        }
        other => {
            return Err(VmError::invalid_type_simple(
                "compound type",
                other.stack_item_type().to_string(),
            ))
        }
    };
    let count = match &compound {
        StackItem::Map(_) => pushed.len() / 2,
        _ => pushed.len(),
    };
    for item in pushed {
        engine.push(item);
    }
    engine.push(StackItem::from_int(count as u64));
    Ok(())
}

/// Implements the NEWARRAY0 operation.
fn new_array0(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let array = engine.reference_counter.new_array(Vec::new());
    engine.push(array);
    Ok(())
}

/// Implements the NEWARRAY operation.
fn new_array(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = pop_count(engine, engine.limits.max_stack_size)?;
    let array = engine.reference_counter.new_array(vec![StackItem::Null; n]);
    engine.push(array);
    Ok(())
}

/// Implements the NEWARRAY_T operation.
fn new_array_t(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let n = pop_count(engine, engine.limits.max_stack_size)?;
    let item_type = StackItemType::try_from(instruction.token_u8()?)?;
    let default = match item_type {
        StackItemType::Boolean => StackItem::from_bool(false),
        StackItemType::Integer => StackItem::from_int(0),
        StackItemType::ByteString => StackItem::ByteString(Bytes::new()),
        _ => StackItem::Null,
    };
    let array = engine.reference_counter.new_array(vec![default; n]);
    engine.push(array);
    Ok(())
}

/// Implements the NEWSTRUCT0 operation.
fn new_struct0(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.reference_counter.new_struct(Vec::new());
    engine.push(item);
    Ok(())
}

/// Implements the NEWSTRUCT operation.
fn new_struct(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = pop_count(engine, engine.limits.max_stack_size)?;
    let item = engine.reference_counter.new_struct(vec![StackItem::Null; n]);
    engine.push(item);
    Ok(())
}

/// Implements the NEWMAP operation.
fn new_map(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let map = engine.reference_counter.new_map();
    engine.push(map);
    Ok(())
}

/// Implements the SIZE operation.
fn size(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop()?;
    let size = x.size(&engine.reference_counter)?;
    engine.push(StackItem::from_int(size as u64));
    Ok(())
}

/// Implements the HASKEY operation.
fn has_key(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = pop_key(engine)?;
    let x = engine.pop()?;
    let result = match &x {
        StackItem::Map(r) => {
            let key = MapKey::from_item(&key)?;
            engine.reference_counter.map(*r)?.contains_key(&key)
        }
        StackItem::Array(_) | StackItem::Struct(_) | StackItem::Buffer(_) | StackItem::ByteString(_) => {
            let index = key.get_integer()?;
            if index.is_negative() {
                return Err(VmError::invalid_operation_msg(format!(
                    "The negative value {index} is invalid for OpCode.HASKEY."
                )));
            }
            let length = x.size(&engine.reference_counter)?;
            index.to_usize().map_or(false, |index| index < length)
        }
        other => {
            return Err(VmError::invalid_type_simple(
                "compound type or byte string",
                other.stack_item_type().to_string(),
            ))
        }
    };
    engine.push(StackItem::from_bool(result));
    Ok(())
}

/// Implements the KEYS operation.
fn keys(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let keys: Vec<StackItem> = match engine.pop()? {
        StackItem::Map(r) => engine
            .reference_counter
            .map(r)?
            .keys()
            .map(MapKey::to_item)
            .collect(),
        other => {
            return Err(VmError::invalid_type_simple(
                "Map",
                other.stack_item_type().to_string(),
            ))
        }
    };
    let array = engine.reference_counter.new_array(keys);
    engine.push(array);
    Ok(())
}

/// Implements the VALUES operation.
fn values(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let values: Vec<StackItem> = match engine.pop()? {
        StackItem::Array(r) | StackItem::Struct(r) => engine.reference_counter.items(r)?.to_vec(),
        StackItem::Map(r) => engine.reference_counter.map(r)?.values().cloned().collect(),
        other => {
            return Err(VmError::invalid_type_simple(
                "compound type",
                other.stack_item_type().to_string(),
            ))
        }
    };
    let mut owned = Vec::with_capacity(values.len());
    for value in values {
        owned.push(own(engine, value)?);
    }
    let array = engine.reference_counter.new_array(owned);
    engine.push(array);
    Ok(())
}

/// Implements the PICKITEM operation.
fn pick_item(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = pop_key(engine)?;
    let x = engine.pop()?;
    let item = match &x {
        StackItem::Map(r) => {
            let key = MapKey::from_item(&key)?;
            engine
                .reference_counter
                .map(*r)?
                .get(&key)
                .cloned()
                .ok_or_else(|| VmError::KeyNotFound(format!("Key {key} not found in Map.")))?
        }
        StackItem::Array(r) | StackItem::Struct(r) => {
            let items = engine.reference_counter.items(*r)?;
            to_index(&key)?
                .and_then(|index| items.get(index))
                .cloned()
                .ok_or_else(|| {
                    index_out_of_range(&key.get_integer().unwrap_or_default(), items.len())
                })?
        }
        StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_) | StackItem::Buffer(_) => {
            let bytes = x.get_span(&engine.reference_counter)?;
            let byte = to_index(&key)?
                .and_then(|index| bytes.get(index))
                .copied()
                .ok_or_else(|| {
                    index_out_of_range(&key.get_integer().unwrap_or_default(), bytes.len())
                })?;
            StackItem::from_int(byte)
        }
        other => {
            return Err(VmError::invalid_type_simple(
                "compound type or byte string",
                other.stack_item_type().to_string(),
            ))
        }
    };
    engine.push(item);
    Ok(())
}

/// Implements the APPEND operation.
fn append(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let new_item = engine.pop()?;
    let r = match engine.pop()? {
        StackItem::Array(r) | StackItem::Struct(r) => r,
        other => {
            return Err(VmError::invalid_type_simple(
                "Array",
                other.stack_item_type().to_string(),
            ))
        }
    };
    let new_item = own(engine, new_item)?;
    engine.reference_counter.append(r, new_item)
}

/// Implements the SETITEM operation.
fn set_item(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let value = engine.pop()?;
    let value = own(engine, value)?;
    let key = pop_key(engine)?;
    match engine.pop()? {
        StackItem::Map(r) => {
            let key = MapKey::from_item(&key)?;
            engine.reference_counter.map_insert(r, key, value)
        }
        StackItem::Array(r) | StackItem::Struct(r) => {
            let length = engine.reference_counter.items(r)?.len();
            let index = to_index(&key)?
                .filter(|index| *index < length)
                .ok_or_else(|| index_out_of_range(&key.get_integer().unwrap_or_default(), length))?;
            engine.reference_counter.set_item(r, index, value)
        }
        StackItem::Buffer(r) => {
            let buffer = engine.reference_counter.buffer_mut(r)?;
            let length = buffer.len();
            let index = to_index(&key)?
                .filter(|index| *index < length)
                .ok_or_else(|| index_out_of_range(&key.get_integer().unwrap_or_default(), length))?;
            let byte = value.get_integer()?;
            let byte = byte
                .to_i16()
                .filter(|b| (-128..=255).contains(b))
                .ok_or_else(|| {
                    VmError::invalid_operation_msg(format!(
                        "Overflow in SETITEM, {byte} is not a byte."
                    ))
                })?;
            buffer[index] = byte as u8;
            Ok(())
        }
        other => Err(VmError::invalid_type_simple(
            "compound type or Buffer",
            other.stack_item_type().to_string(),
        )),
    }
}

/// Implements the REVERSEITEMS operation.
fn reverse_items(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    match engine.pop()? {
        StackItem::Array(r) | StackItem::Struct(r) | StackItem::Buffer(r) => {
            engine.reference_counter.reverse_items(r)
        }
        other => Err(VmError::invalid_type_simple(
            "Array or Buffer",
            other.stack_item_type().to_string(),
        )),
    }
}

/// Implements the REMOVE operation.
fn remove(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = pop_key(engine)?;
    match engine.pop()? {
        StackItem::Map(r) => {
            let key = MapKey::from_item(&key)?;
            engine.reference_counter.map_remove(r, &key)?;
            Ok(())
        }
        StackItem::Array(r) | StackItem::Struct(r) => {
            let index = to_index(&key)?.ok_or_else(|| {
                VmError::invalid_operation_msg("The index is out of range.")
            })?;
            engine.reference_counter.remove_at(r, index)?;
            Ok(())
        }
        other => Err(VmError::invalid_type_simple(
            "compound type",
            other.stack_item_type().to_string(),
        )),
    }
}

/// Implements the CLEARITEMS operation.
fn clear_items(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    match engine.pop()? {
        StackItem::Array(r) | StackItem::Struct(r) | StackItem::Map(r) => {
            engine.reference_counter.clear_items(r)
        }
        other => Err(VmError::invalid_type_simple(
            "compound type",
            other.stack_item_type().to_string(),
        )),
    }
}

/// Implements the POPITEM operation.
fn pop_item(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let r = match engine.pop()? {
        StackItem::Array(r) | StackItem::Struct(r) => r,
        other => {
            return Err(VmError::invalid_type_simple(
                "Array",
                other.stack_item_type().to_string(),
            ))
        }
    };
    let item = engine.reference_counter.pop_item(r)?;
    engine.push(item);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use crate::script_builder::ScriptBuilder;
    use crate::vm_state::VMState;

    fn run(builder: &ScriptBuilder) -> ExecutionEngine {
        let mut engine = ExecutionEngine::new();
        engine
            .load_script(Script::from(builder.to_bytes()), -1, 0)
            .unwrap();
        engine.execute();
        engine
    }

    fn top_int(engine: &ExecutionEngine) -> BigInt {
        engine.result_stack().peek(0).unwrap().get_integer().unwrap()
    }

    #[test]
    fn test_pack_and_pick() {
        let mut builder = ScriptBuilder::new();
        builder
            .emit_push_int(30)
            .emit_push_int(20)
            .emit_push_int(10)
            .emit_push_int(3)
            .emit(OpCode::PACK)
            .emit_push_int(0)
            .emit(OpCode::PICKITEM);
        let engine = run(&builder);
        assert_eq!(engine.state(), VMState::HALT);
        assert_eq!(top_int(&engine), BigInt::from(10));
    }

    #[test]
    fn test_unpack_restores_order() {
        let mut builder = ScriptBuilder::new();
        builder
            .emit_push_int(2)
            .emit_push_int(1)
            .emit_push_int(2)
            .emit(OpCode::PACK)
            .emit(OpCode::UNPACK);
        let engine = run(&builder);
        let values: Vec<BigInt> = engine
            .result_stack()
            .iter()
            .map(|item| item.get_integer().unwrap())
            .collect();
        assert_eq!(values, vec![BigInt::from(2), BigInt::from(1), BigInt::from(2)]);
    }

    #[test]
    fn test_map_operations() {
        let mut builder = ScriptBuilder::new();
        builder
            .emit(OpCode::NEWMAP)
            .emit(OpCode::DUP)
            .emit_push_int(1)
            .emit_push_bytes(b"one")
            .emit(OpCode::SETITEM)
            .emit(OpCode::DUP)
            .emit_push_int(1)
            .emit(OpCode::HASKEY)
            .emit(OpCode::SWAP)
            .emit(OpCode::SIZE);
        let engine = run(&builder);
        assert_eq!(engine.state(), VMState::HALT);
        assert_eq!(top_int(&engine), BigInt::from(1));
        assert_eq!(
            engine.result_stack().peek(1).unwrap(),
            &StackItem::from_bool(true)
        );
    }

    #[test]
    fn test_missing_key_is_catchable() {
        // TRY around PICKITEM on an empty map.
        let mut builder = ScriptBuilder::new();
        builder
            .emit_raw(&[OpCode::TRY as u8, 0x07, 0x00])
            .emit(OpCode::NEWMAP)
            .emit_push_int(1)
            .emit(OpCode::PICKITEM)
            .emit(OpCode::RET)
            .emit(OpCode::DROP)
            .emit_push_int(9)
            .emit_raw(&[OpCode::ENDTRY as u8, 0x02])
            .emit(OpCode::RET);
        let engine = run(&builder);
        assert_eq!(engine.state(), VMState::HALT);
        assert_eq!(top_int(&engine), BigInt::from(9));
    }

    #[test]
    fn test_out_of_range_pick_faults_without_try() {
        let mut builder = ScriptBuilder::new();
        builder
            .emit(OpCode::NEWARRAY0)
            .emit_push_int(0)
            .emit(OpCode::PICKITEM);
        let engine = run(&builder);
        assert_eq!(engine.state(), VMState::FAULT);
        assert!(matches!(engine.fault_exception(), Some(VmError::Unhandled(_))));
    }

    #[test]
    fn test_append_copies_structs() {
        // NEWARRAY0, NEWSTRUCT0, DUP, ROT, SWAP, APPEND: the array holds a
        // copy, so appending to the original struct leaves it untouched.
        let mut builder = ScriptBuilder::new();
        builder
            .emit(OpCode::NEWARRAY0)
            .emit(OpCode::DUP)
            .emit(OpCode::NEWSTRUCT0)
            .emit(OpCode::TUCK)
            .emit(OpCode::APPEND)
            .emit_push_int(5)
            .emit(OpCode::APPEND)
            .emit_push_int(0)
            .emit(OpCode::PICKITEM)
            .emit(OpCode::SIZE);
        let engine = run(&builder);
        assert_eq!(engine.state(), VMState::HALT);
        assert_eq!(top_int(&engine), BigInt::from(0));
    }

    #[test]
    fn test_new_array_t_defaults() {
        let mut builder = ScriptBuilder::new();
        builder
            .emit_push_int(2)
            .emit_raw(&[OpCode::NEWARRAY_T as u8, StackItemType::Integer as u8])
            .emit_push_int(1)
            .emit(OpCode::PICKITEM);
        let engine = run(&builder);
        assert_eq!(top_int(&engine), BigInt::from(0));

        let mut builder = ScriptBuilder::new();
        builder
            .emit_push_int(2)
            .emit_raw(&[OpCode::NEWARRAY_T as u8, 0x99]);
        assert_eq!(run(&builder).state(), VMState::FAULT);
    }

    #[test]
    fn test_setitem_on_buffer() {
        let mut builder = ScriptBuilder::new();
        builder
            .emit_push_int(2)
            .emit(OpCode::NEWBUFFER)
            .emit(OpCode::DUP)
            .emit_push_int(1)
            .emit_push_int(-1)
            .emit(OpCode::SETITEM)
            .emit_push_int(1)
            .emit(OpCode::PICKITEM);
        let engine = run(&builder);
        assert_eq!(top_int(&engine), BigInt::from(255));
    }

    #[test]
    fn test_remove_out_of_range_is_not_catchable() {
        let mut builder = ScriptBuilder::new();
        builder
            .emit_raw(&[OpCode::TRY as u8, 0x07, 0x00])
            .emit(OpCode::NEWARRAY0)
            .emit_push_int(0)
            .emit(OpCode::REMOVE)
            .emit(OpCode::RET)
            .emit(OpCode::RET);
        let engine = run(&builder);
        assert_eq!(engine.state(), VMState::FAULT);
        assert!(matches!(
            engine.fault_exception(),
            Some(VmError::InvalidOperation(_))
        ));
    }
}
