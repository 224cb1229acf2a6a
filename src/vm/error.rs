//! Error and result-code types shared by the assembler, decoder and executor.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Terminal result of an executor run.
///
/// Every non-`Ok` code ends the whole run; there is no recovery path inside
/// the executed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResultCode {
    Ok,
    InvalidAssembly,
    CallStackOverflow,
    EvalStackOverflow,
    EvalStackNotEmpty,
    DivByZero,
    AssertFailed,
    Fail,
}

impl ResultCode {
    /// Process exit status reported by the host for this code.
    pub fn exit_code(self) -> u8 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::InvalidAssembly => 1,
            ResultCode::CallStackOverflow => 2,
            ResultCode::EvalStackOverflow => 3,
            ResultCode::EvalStackNotEmpty => 4,
            ResultCode::DivByZero => 5,
            ResultCode::AssertFailed => 6,
            ResultCode::Fail => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ResultCode::Ok => "Ok",
            ResultCode::InvalidAssembly => "InvalidAssembly",
            ResultCode::CallStackOverflow => "CallStackOverflow",
            ResultCode::EvalStackOverflow => "EvalStackOverflow",
            ResultCode::EvalStackNotEmpty => "EvalStackNotEmpty",
            ResultCode::DivByZero => "DivByZero",
            ResultCode::AssertFailed => "AssertFailed",
            ResultCode::Fail => "Fail",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure while decoding an instruction stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("bad assembly: unknown opcode 0x{opcode:02x} at ip {ip}")]
    UnknownOpcode { ip: usize, opcode: u8 },
    #[error("bad assembly: truncated instruction at ip {ip}")]
    Truncated { ip: usize },
}

/// Failure while building an assembly. Construction stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("label '{0}' defined twice")]
    DuplicateLabel(String),
    #[error("label '{0}' referenced but never defined")]
    UnresolvedLabel(String),
    #[error("no entrypoint label set")]
    MissingEntry,
    #[error("assembler used after close")]
    Closed,
    #[error("{0} has no instruction-pointer operand")]
    NoTarget(&'static str),
    #[error("instruction stream exceeds the addressable range")]
    TooLarge,
}

/// A run-terminating condition raised by an executor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    #[error("invalid assembly at ip {ip}: {reason}")]
    InvalidAssembly { ip: u32, reason: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("call stack overflow (capacity {capacity})")]
    CallStackOverflow { capacity: usize },
    #[error("call stack overflow: local slots exhausted (capacity {capacity})")]
    LocalSlotsExhausted { capacity: usize },
    #[error("eval stack overflow (capacity {capacity})")]
    EvalStackOverflow { capacity: usize },
    #[error("eval stack not empty at ip {ip}: {extra} value(s) left behind")]
    EvalStackNotEmpty { ip: u32, extra: usize },
    #[error("division by zero at ip {ip}")]
    DivByZero { ip: u32 },
    #[error("assertion failed: {message}")]
    AssertFailed { message: String },
    #[error("fail: {message}")]
    Fail { message: String },
}

impl Fault {
    pub fn code(&self) -> ResultCode {
        match self {
            Fault::InvalidAssembly { .. } | Fault::Decode(_) => ResultCode::InvalidAssembly,
            Fault::CallStackOverflow { .. } | Fault::LocalSlotsExhausted { .. } => {
                ResultCode::CallStackOverflow
            }
            Fault::EvalStackOverflow { .. } => ResultCode::EvalStackOverflow,
            Fault::EvalStackNotEmpty { .. } => ResultCode::EvalStackNotEmpty,
            Fault::DivByZero { .. } => ResultCode::DivByZero,
            Fault::AssertFailed { .. } => ResultCode::AssertFailed,
            Fault::Fail { .. } => ResultCode::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            ResultCode::Ok,
            ResultCode::InvalidAssembly,
            ResultCode::CallStackOverflow,
            ResultCode::EvalStackOverflow,
            ResultCode::EvalStackNotEmpty,
            ResultCode::DivByZero,
            ResultCode::AssertFailed,
            ResultCode::Fail,
        ];
        let mut seen: Vec<u8> = codes.iter().map(|c| c.exit_code()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), codes.len());
        assert_eq!(ResultCode::Ok.exit_code(), 0);
    }

    #[test]
    fn test_decode_fault_is_invalid_assembly() {
        let fault: Fault = DecodeError::UnknownOpcode { ip: 3, opcode: 0xee }.into();
        assert_eq!(fault.code(), ResultCode::InvalidAssembly);
        assert!(fault.to_string().contains("0xee"));
    }

    #[test]
    fn test_local_slot_exhaustion_reports_slot_capacity() {
        let fault = Fault::LocalSlotsExhausted { capacity: 4 };
        assert_eq!(fault.code(), ResultCode::CallStackOverflow);
        assert!(fault.to_string().contains("local slots"));
        assert!(fault.to_string().contains("capacity 4"));
    }
}
