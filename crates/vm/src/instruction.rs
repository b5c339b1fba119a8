//! Instruction module for the virtual machine.
//!
//! This module provides instruction representation and decoding.

use crate::error::{VmError, VmResult};
use crate::op_code::OpCode;
use bytes::Bytes;

/// Represents a decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The position of the instruction in the script
    pub pointer: usize,

    /// The raw opcode byte
    pub opcode: u8,

    /// The operand data, without any length prefix
    pub operand: Bytes,
}

impl Instruction {
    /// Decodes the instruction at `position` in `script`.
    ///
    /// Bytes that do not name an opcode decode as an instruction without an
    /// operand; executing one faults. Operands that run past the end of the
    /// script are rejected.
    pub fn parse(script: &Bytes, position: usize) -> VmResult<Self> {
        let opcode = *script.get(position).ok_or_else(|| {
            VmError::bad_script(format!("Instruction pointer {position} is out of range"))
        })?;
        let Some(op) = OpCode::from_u8(opcode) else {
            return Ok(Self {
                pointer: position,
                opcode,
                operand: Bytes::new(),
            });
        };

        let size = op.operand_size();
        let mut start = position + 1;
        let length = if size.has_size_prefix() {
            let prefix = size.size_prefix();
            let end = start + prefix;
            let raw = script.get(start..end).ok_or_else(|| {
                VmError::bad_script(format!("{op} at {position}: missing operand size prefix"))
            })?;
            start = end;
            match prefix {
                1 => raw[0] as usize,
                2 => u16::from_le_bytes([raw[0], raw[1]]) as usize,
                _ => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
            }
        } else {
            size.size()
        };

        let end = start
            .checked_add(length)
            .filter(|end| *end <= script.len())
            .ok_or_else(|| {
                VmError::bad_script(format!(
                    "{op} at {position}: operand of {length} bytes exceeds the script"
                ))
            })?;

        Ok(Self {
            pointer: position,
            opcode,
            operand: script.slice(start..end),
        })
    }

    /// The implicit RET executed when the instruction pointer reaches the end
    /// of a script.
    pub fn ret(position: usize) -> Self {
        Self {
            pointer: position,
            opcode: OpCode::RET as u8,
            operand: Bytes::new(),
        }
    }

    /// The opcode, if the byte names one.
    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::from_u8(self.opcode)
    }

    /// The encoded size of the instruction, including any size prefix.
    pub fn size(&self) -> usize {
        let prefix = self
            .op_code()
            .map(|op| op.operand_size().size_prefix())
            .unwrap_or(0);
        1 + prefix + self.operand.len()
    }

    /// The position of the following instruction.
    pub fn next_position(&self) -> usize {
        self.pointer + self.size()
    }

    fn operand_bytes<const N: usize>(&self, offset: usize) -> VmResult<[u8; N]> {
        self.operand
            .get(offset..offset + N)
            .and_then(|raw| raw.try_into().ok())
            .ok_or_else(|| {
                VmError::bad_script(format!(
                    "Operand of opcode 0x{:02X} is too short",
                    self.opcode
                ))
            })
    }

    /// First operand byte as a signed offset.
    pub fn token_i8(&self) -> VmResult<i8> {
        Ok(i8::from_le_bytes(self.operand_bytes::<1>(0)?))
    }

    /// Second operand byte as a signed offset.
    pub fn token_i8_1(&self) -> VmResult<i8> {
        Ok(i8::from_le_bytes(self.operand_bytes::<1>(1)?))
    }

    /// First four operand bytes as a signed offset.
    pub fn token_i32(&self) -> VmResult<i32> {
        Ok(i32::from_le_bytes(self.operand_bytes::<4>(0)?))
    }

    /// Operand bytes 4..8 as a signed offset.
    pub fn token_i32_1(&self) -> VmResult<i32> {
        Ok(i32::from_le_bytes(self.operand_bytes::<4>(4)?))
    }

    /// First operand byte.
    pub fn token_u8(&self) -> VmResult<u8> {
        Ok(self.operand_bytes::<1>(0)?[0])
    }

    /// Second operand byte.
    pub fn token_u8_1(&self) -> VmResult<u8> {
        Ok(self.operand_bytes::<1>(1)?[0])
    }

    /// First two operand bytes.
    pub fn token_u16(&self) -> VmResult<u16> {
        Ok(u16::from_le_bytes(self.operand_bytes::<2>(0)?))
    }

    /// First four operand bytes.
    pub fn token_u32(&self) -> VmResult<u32> {
        Ok(u32::from_le_bytes(self.operand_bytes::<4>(0)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed_operand() {
        let script = Bytes::from_static(&[OpCode::JMP_L as u8, 0xfe, 0xff, 0xff, 0xff]);
        let instruction = Instruction::parse(&script, 0).unwrap();
        assert_eq!(instruction.op_code(), Some(OpCode::JMP_L));
        assert_eq!(instruction.token_i32().unwrap(), -2);
        assert_eq!(instruction.size(), 5);
    }

    #[test]
    fn test_parse_prefixed_operand() {
        let script = Bytes::from_static(&[OpCode::PUSHDATA2 as u8, 0x02, 0x00, 0xaa, 0xbb]);
        let instruction = Instruction::parse(&script, 0).unwrap();
        assert_eq!(instruction.operand.as_ref(), &[0xaa, 0xbb]);
        assert_eq!(instruction.next_position(), 5);
    }

    #[test]
    fn test_truncated_operand_is_rejected() {
        let script = Bytes::from_static(&[OpCode::PUSHDATA1 as u8, 0x05, 0x01]);
        assert!(matches!(
            Instruction::parse(&script, 0),
            Err(VmError::BadScript(_))
        ));
        let script = Bytes::from_static(&[OpCode::PUSHINT16 as u8, 0x01]);
        assert!(Instruction::parse(&script, 0).is_err());
    }

    #[test]
    fn test_undefined_byte_decodes_without_operand() {
        let script = Bytes::from_static(&[0xff, 0x00]);
        let instruction = Instruction::parse(&script, 0).unwrap();
        assert_eq!(instruction.op_code(), None);
        assert_eq!(instruction.size(), 1);
    }
}
