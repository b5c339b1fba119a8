//! Script builder module for the virtual machine.
//!
//! This module provides a way to programmatically construct scripts. Pushes
//! always pick the shortest encoding.

use crate::error::{VmError, VmResult};
use crate::interop_service::interop_hash;
use crate::op_code::OpCode;
use crate::script::Script;
use crate::stack_item::integer;
use num_bigint::{BigInt, Sign};

/// Helps construct VM scripts programmatically.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    /// Creates a new script builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes emitted so far.
    pub fn len(&self) -> usize {
        self.script.len()
    }

    /// Returns true when nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    /// Emits an opcode without operand.
    pub fn emit(&mut self, opcode: OpCode) -> &mut Self {
        self.script.push(opcode as u8);
        self
    }

    /// Emits an opcode followed by its operand bytes.
    pub fn emit_with_operand(&mut self, opcode: OpCode, operand: &[u8]) -> &mut Self {
        self.script.push(opcode as u8);
        self.script.extend_from_slice(operand);
        self
    }

    /// Emits raw bytes.
    pub fn emit_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.script.extend_from_slice(bytes);
        self
    }

    /// Emits a push operation for an integer.
    pub fn emit_push_int(&mut self, value: i64) -> &mut Self {
        if (-1..=16).contains(&value) {
            let opcode = (OpCode::PUSH0 as i64 + value) as u8;
            self.script.push(opcode);
            return self;
        }
        let bytes = integer::to_bytes(&BigInt::from(value));
        self.emit_padded_int(&bytes, value < 0)
    }

    /// Emits a push operation for an arbitrary integer of at most 32 bytes.
    pub fn emit_push_bigint(&mut self, value: &BigInt) -> VmResult<&mut Self> {
        if let Ok(small) = i64::try_from(value) {
            return Ok(self.emit_push_int(small));
        }
        let bytes = integer::to_bytes(value);
        if bytes.len() > integer::MAX_SIZE {
            return Err(VmError::limit_exceeded(format!(
                "Integer of {} bytes cannot be pushed",
                bytes.len()
            )));
        }
        Ok(self.emit_padded_int(&bytes, value.sign() == Sign::Minus))
    }

    fn emit_padded_int(&mut self, bytes: &[u8], negative: bool) -> &mut Self {
        let (opcode, width) = match bytes.len() {
            0..=1 => (OpCode::PUSHINT8, 1),
            2 => (OpCode::PUSHINT16, 2),
            3..=4 => (OpCode::PUSHINT32, 4),
            5..=8 => (OpCode::PUSHINT64, 8),
            9..=16 => (OpCode::PUSHINT128, 16),
            _ => (OpCode::PUSHINT256, 32),
        };
        let fill = if negative { 0xFF } else { 0x00 };
        self.script.push(opcode as u8);
        self.script.extend_from_slice(bytes);
        self.script
            .extend(std::iter::repeat(fill).take(width - bytes.len()));
        self
    }

    /// Emits a push operation for a boolean.
    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value { OpCode::PUSHT } else { OpCode::PUSHF })
    }

    /// Emits PUSHDATA1, PUSHDATA2 or PUSHDATA4 depending on the data length.
    pub fn emit_push_bytes(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();
        if let Ok(len) = u8::try_from(len) {
            self.emit_with_operand(OpCode::PUSHDATA1, &[len]);
        } else if let Ok(len) = u16::try_from(len) {
            self.emit_with_operand(OpCode::PUSHDATA2, &len.to_le_bytes());
        } else {
            self.emit_with_operand(OpCode::PUSHDATA4, &(len as u32).to_le_bytes());
        }
        self.emit_raw(data)
    }

    /// Emits a push operation for a UTF-8 string.
    pub fn emit_push_string(&mut self, value: &str) -> &mut Self {
        self.emit_push_bytes(value.as_bytes())
    }

    /// Emits a jump or call. The short form is used when the offset fits in
    /// a signed byte and `opcode` is a short form.
    pub fn emit_jump(&mut self, opcode: OpCode, offset: i32) -> VmResult<&mut Self> {
        let code = opcode as u8;
        let is_branch = (OpCode::JMP as u8..=OpCode::JMPLE_L as u8).contains(&code)
            || opcode == OpCode::CALL
            || opcode == OpCode::CALL_L;
        if !is_branch {
            return Err(VmError::invalid_operation_msg(format!(
                "{opcode} is not a jump or call"
            )));
        }
        let short = code % 2 == 0;
        match i8::try_from(offset) {
            Ok(offset) if short => Ok(self.emit_with_operand(opcode, &offset.to_le_bytes())),
            _ => {
                let long = if short { code + 1 } else { code };
                self.script.push(long);
                self.script.extend_from_slice(&offset.to_le_bytes());
                Ok(self)
            }
        }
    }

    /// Emits a CALL to a relative offset.
    pub fn emit_call(&mut self, offset: i32) -> &mut Self {
        match i8::try_from(offset) {
            Ok(offset) => self.emit_with_operand(OpCode::CALL, &offset.to_le_bytes()),
            Err(_) => self.emit_with_operand(OpCode::CALL_L, &offset.to_le_bytes()),
        }
    }

    /// Emits a SYSCALL for the named interop service.
    pub fn emit_syscall(&mut self, name: &str) -> &mut Self {
        self.emit_syscall_id(interop_hash(name))
    }

    /// Emits a SYSCALL for a service id.
    pub fn emit_syscall_id(&mut self, id: u32) -> &mut Self {
        self.emit_with_operand(OpCode::SYSCALL, &id.to_le_bytes())
    }

    /// Returns a copy of the emitted bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.script.clone()
    }

    /// Builds an unvalidated script.
    pub fn to_script(&self) -> Script {
        Script::from(self.to_bytes())
    }

    /// Builds a script validated in strict mode.
    pub fn to_strict_script(&self) -> VmResult<Script> {
        Script::new(self.to_bytes(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_integers() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(-1).emit_push_int(0).emit_push_int(16);
        assert_eq!(
            builder.to_bytes(),
            vec![OpCode::PUSHM1 as u8, OpCode::PUSH0 as u8, OpCode::PUSH16 as u8]
        );
    }

    #[test]
    fn test_integer_widths() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(17);
        assert_eq!(builder.to_bytes(), vec![OpCode::PUSHINT8 as u8, 17]);

        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(-2);
        assert_eq!(builder.to_bytes(), vec![OpCode::PUSHINT8 as u8, 0xFE]);

        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(128);
        assert_eq!(builder.to_bytes(), vec![OpCode::PUSHINT16 as u8, 0x80, 0x00]);

        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(-70000);
        assert_eq!(
            builder.to_bytes(),
            vec![OpCode::PUSHINT32 as u8, 0x90, 0xEE, 0xFE, 0xFF]
        );

        let mut builder = ScriptBuilder::new();
        builder.emit_push_bigint(&(BigInt::from(1) << 100)).unwrap();
        assert_eq!(builder.len(), 17);
        assert_eq!(builder.to_bytes()[0], OpCode::PUSHINT128 as u8);

        let mut builder = ScriptBuilder::new();
        assert!(builder.emit_push_bigint(&(BigInt::from(1) << 256)).is_err());
    }

    #[test]
    fn test_push_bytes_prefixes() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_bytes(&[1, 2]);
        assert_eq!(builder.to_bytes(), vec![OpCode::PUSHDATA1 as u8, 2, 1, 2]);

        let mut builder = ScriptBuilder::new();
        builder.emit_push_bytes(&[0; 256]);
        assert_eq!(&builder.to_bytes()[..3], &[OpCode::PUSHDATA2 as u8, 0x00, 0x01]);
        assert_eq!(builder.len(), 259);
    }

    #[test]
    fn test_jumps() {
        let mut builder = ScriptBuilder::new();
        builder.emit_jump(OpCode::JMP, 5).unwrap();
        builder.emit_jump(OpCode::JMPIF, 300).unwrap();
        assert_eq!(
            builder.to_bytes(),
            vec![OpCode::JMP as u8, 5, OpCode::JMPIF_L as u8, 0x2C, 0x01, 0x00, 0x00]
        );
        assert!(builder.emit_jump(OpCode::NOP, 1).is_err());
    }

    #[test]
    fn test_syscall_uses_service_hash() {
        let mut builder = ScriptBuilder::new();
        builder.emit_syscall("System.Runtime.Log");
        let bytes = builder.to_bytes();
        assert_eq!(bytes[0], OpCode::SYSCALL as u8);
        assert_eq!(&bytes[1..], &interop_hash("System.Runtime.Log").to_le_bytes());
    }

    #[test]
    fn test_strict_script_rejects_bad_jump() {
        let mut builder = ScriptBuilder::new();
        builder.emit_jump(OpCode::JMP, 100).unwrap();
        assert!(builder.to_strict_script().is_err());
        assert!(!builder.to_script().is_strict());
    }
}
