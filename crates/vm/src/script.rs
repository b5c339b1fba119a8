//! Script module for the virtual machine.
//!
//! A script is an immutable byte buffer with an instruction cache. Only the
//! positions that are actually decoded get an entry, so the cache grows with
//! the number of instructions visited rather than with the script length.
//! The cache sits behind a lock, so a script can be shared between contexts
//! and threads through an `Arc`.

use crate::error::{VmError, VmResult};
use crate::instruction::Instruction;
use crate::op_code::OpCode;
use crate::stack_item::StackItemType;
use bytes::Bytes;
use hashbrown::HashMap;
use once_cell::sync::OnceCell;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Represents a script executed by the VM.
pub struct Script {
    value: Bytes,
    strict: bool,
    instructions: RwLock<HashMap<usize, Instruction>>,
    hash: OnceCell<[u8; 20]>,
}

impl Script {
    /// Creates a script.
    ///
    /// In strict mode every instruction is decoded and validated up front;
    /// otherwise instructions are decoded on first use.
    pub fn new<B: Into<Bytes>>(value: B, strict: bool) -> VmResult<Self> {
        let script = Self {
            strict,
            ..Self::new_relaxed(value)
        };
        if strict {
            script.validate()?;
        }
        Ok(script)
    }

    /// Creates a lazily decoded script. Decoding never fails up front.
    pub fn new_relaxed<B: Into<Bytes>>(value: B) -> Self {
        Self {
            value: value.into(),
            strict: false,
            instructions: RwLock::new(HashMap::new()),
            hash: OnceCell::new(),
        }
    }

    /// Returns true if the script was validated at construction.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// The script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// The length of the script in bytes.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Returns true if the script is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Gets the instruction at `ip`, decoding it on first access.
    ///
    /// # Arguments
    ///
    /// * `ip` - Byte offset of the instruction
    ///
    /// # Returns
    ///
    /// The decoded instruction. Operands share the script's buffer, so the
    /// returned copy is cheap. Decoding failures are not cached.
    pub fn get_instruction(&self, ip: usize) -> VmResult<Instruction> {
        if let Some(instruction) = self
            .instructions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ip)
        {
            return Ok(instruction.clone());
        }
        let instruction = Instruction::parse(&self.value, ip)?;
        self.instructions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(ip)
            .or_insert_with(|| instruction.clone());
        Ok(instruction)
    }

    /// Number of positions decoded so far.
    pub fn cached_instructions(&self) -> usize {
        self.instructions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// RIPEMD160 over SHA256 of the script bytes.
    pub fn hash(&self) -> &[u8; 20] {
        self.hash.get_or_init(|| {
            let sha = Sha256::digest(&self.value);
            Ripemd160::digest(sha).into()
        })
    }

    fn validate(&self) -> VmResult<()> {
        let mut boundaries = vec![false; self.value.len()];
        let mut ip = 0;
        while ip < self.value.len() {
            let instruction = self.get_instruction(ip)?;
            if instruction.op_code().is_none() {
                return Err(VmError::bad_script(format!(
                    "Undefined opcode 0x{:02X} at {ip}",
                    instruction.opcode
                )));
            }
            boundaries[ip] = true;
            ip = instruction.next_position();
        }

        let check_target = |ip: usize, offset: i64| -> VmResult<()> {
            let target = ip as i64 + offset;
            let valid = usize::try_from(target)
                .ok()
                .and_then(|t| boundaries.get(t).copied())
                .unwrap_or(false);
            if !valid {
                return Err(VmError::bad_script(format!(
                    "Invalid target {target} for instruction at {ip}"
                )));
            }
            Ok(())
        };

        ip = 0;
        while ip < self.value.len() {
            let instruction = self.get_instruction(ip)?;
            let Some(op) = instruction.op_code() else {
                break;
            };
            match op {
                OpCode::JMP
                | OpCode::JMPIF
                | OpCode::JMPIFNOT
                | OpCode::JMPEQ
                | OpCode::JMPNE
                | OpCode::JMPGT
                | OpCode::JMPGE
                | OpCode::JMPLT
                | OpCode::JMPLE
                | OpCode::CALL
                | OpCode::ENDTRY => check_target(ip, i64::from(instruction.token_i8()?))?,
                OpCode::PUSHA
                | OpCode::JMP_L
                | OpCode::JMPIF_L
                | OpCode::JMPIFNOT_L
                | OpCode::JMPEQ_L
                | OpCode::JMPNE_L
                | OpCode::JMPGT_L
                | OpCode::JMPGE_L
                | OpCode::JMPLT_L
                | OpCode::JMPLE_L
                | OpCode::CALL_L
                | OpCode::ENDTRY_L => check_target(ip, i64::from(instruction.token_i32()?))?,
                OpCode::TRY => {
                    check_target(ip, i64::from(instruction.token_i8()?))?;
                    check_target(ip, i64::from(instruction.token_i8_1()?))?;
                }
                OpCode::TRY_L => {
                    check_target(ip, i64::from(instruction.token_i32()?))?;
                    check_target(ip, i64::from(instruction.token_i32_1()?))?;
                }
                OpCode::NEWARRAY_T | OpCode::ISTYPE | OpCode::CONVERT => {
                    let tag = instruction.token_u8()?;
                    let item_type = StackItemType::from_u8(tag).ok_or_else(|| {
                        VmError::bad_script(format!("Invalid type 0x{tag:02X} at {ip}"))
                    })?;
                    if op != OpCode::NEWARRAY_T && item_type == StackItemType::Any {
                        return Err(VmError::bad_script(format!(
                            "{op} at {ip} cannot target type Any"
                        )));
                    }
                }
                _ => {}
            }
            ip = instruction.next_position();
        }
        Ok(())
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("value", &hex::encode(&self.value))
            .field("strict", &self.strict)
            .finish()
    }
}

impl From<Vec<u8>> for Script {
    fn from(value: Vec<u8>) -> Self {
        Self::new_relaxed(value)
    }
}

impl From<&[u8]> for Script {
    fn from(value: &[u8]) -> Self {
        Self::new_relaxed(Bytes::copy_from_slice(value))
    }
}
