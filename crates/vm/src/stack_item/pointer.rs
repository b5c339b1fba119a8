//! Pointer stack item.
//!
//! A pointer is an instruction position together with the script it was
//! created in. Two pointers are equal only if both the position and the script
//! identity match, so a pointer cannot be used to call into another script.

use crate::script::Script;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An instruction address inside a specific script.
#[derive(Debug, Clone)]
pub struct Pointer {
    script: Arc<Script>,
    position: usize,
}

impl Pointer {
    /// Creates a new pointer associated with the given script and position.
    #[must_use]
    pub fn new(script: Arc<Script>, position: usize) -> Self {
        Self { script, position }
    }

    /// Returns the script that owns this pointer.
    #[must_use]
    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    /// Returns the instruction position inside the script.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Returns true if the pointer was created in `script`.
    #[must_use]
    pub fn belongs_to(&self, script: &Arc<Script>) -> bool {
        Arc::ptr_eq(&self.script, script)
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && Arc::ptr_eq(&self.script, &other.script)
    }
}

impl Eq for Pointer {}

impl Hash for Pointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.script) as usize).hash(state);
        self.position.hash(state);
    }
}
