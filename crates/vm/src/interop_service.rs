//! Interop service module for the virtual machine.
//!
//! SYSCALL carries a 4-byte interop id. The id of a method is the first four
//! bytes of the SHA256 digest of its name, read little-endian. Hosts register
//! handlers here and the engine dispatches SYSCALL through this registry.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use hashbrown::HashMap;
use sha2::{Digest, Sha256};

/// A function that implements a syscall.
pub type InteropMethod = fn(engine: &mut ExecutionEngine) -> VmResult<()>;

/// Represents an interop descriptor.
#[derive(Debug, Clone)]
pub struct InteropDescriptor {
    /// The name of the interop method
    pub name: String,

    /// The interop id derived from the name
    pub hash: u32,

    /// The price charged on top of the SYSCALL opcode price
    pub price: u64,

    /// The handler function
    pub handler: InteropMethod,
}

/// Computes the interop id of a method name.
pub fn interop_hash(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Registry of syscalls available to scripts.
#[derive(Debug, Clone, Default)]
pub struct InteropService {
    methods: HashMap<u32, InteropDescriptor>,
}

impl InteropService {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name` and returns its interop id.
    ///
    /// Registering a name twice replaces the earlier descriptor. Two names
    /// whose ids collide are rejected.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        price: u64,
        handler: InteropMethod,
    ) -> VmResult<u32> {
        let name = name.into();
        let hash = interop_hash(&name);
        if let Some(existing) = self.methods.get(&hash) {
            if existing.name != name {
                return Err(VmError::invalid_operation_msg(format!(
                    "Interop id 0x{hash:08x} of {name} is already used by {}",
                    existing.name
                )));
            }
        }
        log::debug!("registered syscall {name} as 0x{hash:08x}");
        self.methods.insert(
            hash,
            InteropDescriptor {
                name,
                hash,
                price,
                handler,
            },
        );
        Ok(hash)
    }

    /// Looks up a descriptor by interop id.
    pub fn get(&self, hash: u32) -> Option<&InteropDescriptor> {
        self.methods.get(&hash)
    }

    /// Looks up a descriptor by method name.
    pub fn get_by_name(&self, name: &str) -> Option<&InteropDescriptor> {
        self.get(interop_hash(name))
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns true if no method is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_engine: &mut ExecutionEngine) -> VmResult<()> {
        Ok(())
    }

    #[test]
    fn test_interop_hash() {
        let digest = Sha256::digest(b"System.Runtime.Log");
        assert_eq!(
            interop_hash("System.Runtime.Log").to_le_bytes(),
            [digest[0], digest[1], digest[2], digest[3]]
        );
    }

    #[test]
    fn test_register_and_lookup() {
        let mut service = InteropService::new();
        let id = service.register("Test.Noop", 16, noop).unwrap();
        assert_eq!(service.get(id).map(|d| d.price), Some(16));
        assert_eq!(service.get_by_name("Test.Noop").map(|d| d.hash), Some(id));
        assert!(service.get(id.wrapping_add(1)).is_none());
        service.register("Test.Noop", 32, noop).unwrap();
        assert_eq!(service.len(), 1);
    }
}
