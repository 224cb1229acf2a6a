//! Host capabilities reachable from bytecode through `PCall`.
//!
//! The numeric codes are a stable wire contract: a code is never reused for a
//! different capability. Handlers report host failures as ordinary values
//! (usually `-1` or `""`), never as faults.

mod memory;
mod os;

pub use memory::MemoryPlatform;
pub use os::OsPlatform;

use crate::vm::Value;

/// Stream handle of standard input.
pub const STDIN: i32 = 0;
/// Stream handle of standard output.
pub const STDOUT: i32 = 1;
/// Stream handle of standard error.
pub const STDERR: i32 = 2;

/// `FileOpen` modes.
pub const MODE_READ: i32 = 0;
pub const MODE_WRITE: i32 = 1;
pub const MODE_APPEND: i32 = 2;

/// Argument kinds a platform call pops, in push order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Int,
    Str,
}

macro_rules! pcalls {
    ($($name:ident = $code:literal, [$($param:ident),*];)*) => {
        /// Platform-call codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PCall {
            $($name,)*
        }

        impl PCall {
            pub const ALL: &'static [PCall] = &[$(PCall::$name,)*];

            pub fn from_code(code: u32) -> Option<PCall> {
                match code {
                    $($code => Some(PCall::$name),)*
                    _ => None,
                }
            }

            pub fn code(self) -> u32 {
                match self {
                    $(PCall::$name => $code,)*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(PCall::$name => stringify!($name),)*
                }
            }

            /// Declared arguments, in the order they are pushed.
            pub fn params(self) -> &'static [Param] {
                match self {
                    $(PCall::$name => &[$(Param::$param),*],)*
                }
            }
        }
    };
}

pcalls! {
    StreamWrite = 0x01, [Int, Str];
    StreamReadLine = 0x02, [Int];
    StreamClose = 0x03, [Int];
    ProcessExit = 0x10, [Int];
    ProcessId = 0x11, [];
    ProcessArgCount = 0x12, [];
    ProcessArg = 0x13, [Int];
    TcpConnect = 0x20, [Str, Int];
    TcpListen = 0x21, [Int];
    TcpAccept = 0x22, [Int];
    ConsolePrint = 0x30, [Str];
    ConsoleReadLine = 0x31, [];
    TermIsTty = 0x38, [Int];
    TermSize = 0x39, [];
    TermRawMode = 0x3A, [Int];
    ClockNanos = 0x40, [];
    ClockUnixMillis = 0x41, [];
    EnvGet = 0x50, [Str];
    FileOpen = 0x60, [Str, Int];
    FileRemove = 0x61, [Str];
    FileExists = 0x62, [Str];
    Version = 0x70, [];
}

impl PCall {
    pub fn from_name(name: &str) -> Option<PCall> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    pub fn arity(self) -> usize {
        self.params().len()
    }

    /// Check `args` against the declared parameter kinds.
    pub fn check_args(self, args: &[Value]) -> Result<(), String> {
        let params = self.params();
        if args.len() != params.len() {
            return Err(format!(
                "{} takes {} argument(s), got {}",
                self.name(),
                params.len(),
                args.len()
            ));
        }
        for (i, (param, arg)) in params.iter().zip(args).enumerate() {
            let ok = match param {
                Param::Int => matches!(arg, Value::Int32(_)),
                Param::Str => matches!(arg, Value::StringRef(_)),
            };
            if !ok {
                return Err(format!(
                    "{} argument {}: expected {}, found {}",
                    self.name(),
                    i,
                    if *param == Param::Int { "int" } else { "string" },
                    arg.type_name()
                ));
            }
        }
        Ok(())
    }
}

/// Host capability provider.
///
/// `args` have already been checked against [`PCall::params`]. Every call
/// yields exactly one value.
pub trait Platform: Send + Sync {
    fn call(&self, pcall: PCall, args: &[Value]) -> Value;
}

/// Version string reported by `PCall::Version`.
pub fn version() -> &'static str {
    concat!("kiln ", env!("CARGO_PKG_VERSION"))
}

fn int_arg(args: &[Value], index: usize) -> i32 {
    args.get(index).and_then(Value::as_i32).unwrap_or(-1)
}

fn str_arg(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(Value::as_str).unwrap_or("")
}

fn term_size(cols: i32, rows: i32) -> Value {
    Value::make_struct(vec![Value::Int32(cols), Value::Int32(rows)])
}
