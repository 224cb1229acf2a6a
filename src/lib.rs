//! Kiln - a stack-based bytecode virtual machine
//!
//! This library provides the instruction set, assembler, disassembler,
//! on-disk container and the multi-threaded executor, plus the platform-call
//! boundary the executor talks to the host through.

pub mod asm;
pub mod config;
pub mod platform;
pub mod vm;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use platform::{MemoryPlatform, OsPlatform, PCall, Platform};
pub use vm::{Assembler, Assembly, Fault, Op, Outcome, ResultCode, Value, Vm};
