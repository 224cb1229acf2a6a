pub mod assembler;
pub mod bytecode;
pub mod disasm;
pub mod error;
pub mod ops;
pub mod threads;
mod value;
#[allow(clippy::module_inception)]
mod vm;

use std::sync::Arc;

pub use assembler::Assembler;
pub use error::{BuildError, DecodeError, Fault, ResultCode};
pub use ops::Op;
pub use threads::FutureCell;
pub use value::{Closure, Struct, Value};
pub use vm::{Outcome, Vm};

/// A finished program: instruction stream, string pool and entrypoint.
///
/// Immutable once built; executors share it through an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    code: Vec<u8>,
    strings: Vec<Arc<str>>,
    entry: u32,
}

impl Assembly {
    pub fn new(code: Vec<u8>, strings: Vec<Arc<str>>, entry: u32) -> Self {
        Self {
            code,
            strings,
            entry,
        }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn strings(&self) -> &[Arc<str>] {
        &self.strings
    }

    pub fn string(&self, id: u32) -> Option<&Arc<str>> {
        self.strings.get(id as usize)
    }

    /// Instruction offset execution starts at.
    pub fn entry(&self) -> u32 {
        self.entry
    }
}
