use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    MODE_APPEND, MODE_READ, MODE_WRITE, PCall, Platform, STDERR, STDIN, STDOUT, int_arg,
    str_arg, term_size, version,
};
use crate::vm::Value;

/// In-memory platform for tests and embedding.
///
/// Console output, environment, arguments and files live in memory. TCP is
/// unavailable and the clock is a deterministic counter.
#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    stdout: String,
    stderr: String,
    input: VecDeque<String>,
    env: HashMap<String, String>,
    args: Vec<String>,
    files: HashMap<String, String>,
    handles: HashMap<i32, OpenFile>,
    next_handle: i32,
    closed_std: [bool; 3],
    exit_code: Option<i32>,
    ticks: i64,
    raw_mode: bool,
}

struct OpenFile {
    path: String,
    mode: i32,
    /// Byte offset of the next unread line.
    cursor: usize,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(self, key: &str, value: &str) -> Self {
        self.lock().env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Queue lines for `ConsoleReadLine` and reads of stdin.
    pub fn with_input(self, text: &str) -> Self {
        self.lock()
            .input
            .extend(text.lines().map(str::to_string));
        self
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.lock()
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything written to stdout so far.
    pub fn console_output(&self) -> String {
        self.lock().stdout.clone()
    }

    pub fn error_output(&self) -> String {
        self.lock().stderr.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    /// Code passed to `ProcessExit`, if it was called.
    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code
    }

    pub fn raw_mode(&self) -> bool {
        self.lock().raw_mode
    }
}

impl MemoryState {
    fn write(&mut self, handle: i32, text: &str) -> i32 {
        match handle {
            STDOUT if !self.closed_std[1] => self.stdout.push_str(text),
            STDERR if !self.closed_std[2] => self.stderr.push_str(text),
            _ => {
                let Some(file) = self.handles.get(&handle) else {
                    return -1;
                };
                if file.mode == MODE_READ {
                    return -1;
                }
                self.files
                    .entry(file.path.clone())
                    .or_default()
                    .push_str(text);
            }
        }
        text.len() as i32
    }

    fn read_line(&mut self, handle: i32) -> String {
        if handle == STDIN {
            if self.closed_std[0] {
                return String::new();
            }
            return self.input.pop_front().unwrap_or_default();
        }
        let Some(file) = self.handles.get_mut(&handle) else {
            return String::new();
        };
        if file.mode != MODE_READ {
            return String::new();
        }
        let contents = self.files.get(&file.path).map(String::as_str).unwrap_or("");
        let rest = contents.get(file.cursor..).unwrap_or("");
        let (line, consumed) = match rest.find('\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        file.cursor += consumed;
        line.trim_end_matches('\r').to_string()
    }

    fn close(&mut self, handle: i32) -> i32 {
        if (STDIN..=STDERR).contains(&handle) {
            self.closed_std[handle as usize] = true;
            return 0;
        }
        if self.handles.remove(&handle).is_some() { 0 } else { -1 }
    }

    fn open(&mut self, path: &str, mode: i32) -> i32 {
        match mode {
            MODE_READ if !self.files.contains_key(path) => return -1,
            MODE_WRITE => {
                self.files.insert(path.to_string(), String::new());
            }
            MODE_APPEND => {
                self.files.entry(path.to_string()).or_default();
            }
            MODE_READ => {}
            _ => return -1,
        }
        let handle = self.next_handle.max(STDERR + 1);
        self.next_handle = handle + 1;
        self.handles.insert(
            handle,
            OpenFile {
                path: path.to_string(),
                mode,
                cursor: 0,
            },
        );
        handle
    }
}

impl Platform for MemoryPlatform {
    fn call(&self, pcall: PCall, args: &[Value]) -> Value {
        let mut state = self.lock();
        match pcall {
            PCall::StreamWrite => Value::Int32(state.write(int_arg(args, 0), str_arg(args, 1))),
            PCall::StreamReadLine => Value::string(&state.read_line(int_arg(args, 0))),
            PCall::StreamClose => Value::Int32(state.close(int_arg(args, 0))),
            PCall::ProcessExit => {
                let code = int_arg(args, 0);
                state.exit_code = Some(code);
                Value::Int32(code)
            }
            PCall::ProcessId => Value::Int32(1),
            PCall::ProcessArgCount => Value::Int32(state.args.len() as i32),
            PCall::ProcessArg => {
                let arg = usize::try_from(int_arg(args, 0))
                    .ok()
                    .and_then(|i| state.args.get(i));
                Value::string(arg.map(String::as_str).unwrap_or(""))
            }
            PCall::TcpConnect | PCall::TcpListen | PCall::TcpAccept => Value::Int32(-1),
            PCall::ConsolePrint => {
                state.stdout.push_str(str_arg(args, 0));
                state.stdout.push('\n');
                Value::Int32(0)
            }
            PCall::ConsoleReadLine => Value::string(&state.read_line(STDIN)),
            PCall::TermIsTty => Value::Int32(0),
            PCall::TermSize => term_size(80, 24),
            PCall::TermRawMode => {
                state.raw_mode = int_arg(args, 0) != 0;
                Value::Int32(0)
            }
            PCall::ClockNanos => {
                state.ticks += 1_000;
                Value::Int64(state.ticks)
            }
            PCall::ClockUnixMillis => Value::Int64(0),
            PCall::EnvGet => {
                let value = state.env.get(str_arg(args, 0));
                Value::string(value.map(String::as_str).unwrap_or(""))
            }
            PCall::FileOpen => Value::Int32(state.open(str_arg(args, 0), int_arg(args, 1))),
            PCall::FileRemove => {
                let removed = state.files.remove(str_arg(args, 0)).is_some();
                Value::Int32(if removed { 0 } else { -1 })
            }
            PCall::FileExists => Value::bool(state.files.contains_key(str_arg(args, 0))),
            PCall::Version => Value::string(version()),
        }
    }
}
