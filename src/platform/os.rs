use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crossterm::terminal;
use crossterm::tty::IsTty;
use tracing::debug;

use super::{
    MODE_APPEND, MODE_READ, MODE_WRITE, PCall, Platform, STDERR, STDIN, STDOUT, int_arg,
    str_arg, term_size, version,
};
use crate::vm::Value;

enum Handle {
    Reader(BufReader<File>),
    Writer(File),
    Tcp(BufReader<TcpStream>),
    Listener(TcpListener),
}

type Shared = Arc<Mutex<Handle>>;

/// Platform backed by the host process: std I/O, std::net and the terminal.
pub struct OsPlatform {
    args: Vec<String>,
    started: Instant,
    handles: Mutex<HashMap<i32, Shared>>,
    next_handle: AtomicI32,
}

impl OsPlatform {
    /// `args` are the program arguments visible through `ProcessArg`.
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            started: Instant::now(),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicI32::new(STDERR + 1),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<i32, Shared>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, handle: Handle) -> i32 {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.table().insert(id, Arc::new(Mutex::new(handle)));
        id
    }

    /// Look up a handle and release the table lock before it is used.
    fn handle(&self, id: i32) -> Option<Shared> {
        self.table().get(&id).cloned()
    }

    fn write(&self, id: i32, text: &str) -> io::Result<usize> {
        match id {
            STDOUT => {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes())?;
                out.flush()?;
            }
            STDERR => io::stderr().lock().write_all(text.as_bytes())?,
            _ => {
                let shared = self.handle(id).ok_or(io::ErrorKind::NotFound)?;
                let mut handle = lock(&shared);
                match &mut *handle {
                    Handle::Writer(file) => file.write_all(text.as_bytes())?,
                    Handle::Tcp(stream) => stream.get_mut().write_all(text.as_bytes())?,
                    _ => return Err(io::ErrorKind::Unsupported.into()),
                }
            }
        }
        Ok(text.len())
    }

    fn read_line(&self, id: i32) -> io::Result<String> {
        let mut line = String::new();
        if id == STDIN {
            io::stdin().lock().read_line(&mut line)?;
        } else {
            let shared = self.handle(id).ok_or(io::ErrorKind::NotFound)?;
            let mut handle = lock(&shared);
            match &mut *handle {
                Handle::Reader(reader) => reader.read_line(&mut line)?,
                Handle::Tcp(reader) => reader.read_line(&mut line)?,
                _ => return Err(io::ErrorKind::Unsupported.into()),
            };
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(line)
    }

    fn open(&self, path: &str, mode: i32) -> io::Result<i32> {
        let handle = match mode {
            MODE_READ => Handle::Reader(BufReader::new(File::open(path)?)),
            MODE_WRITE => Handle::Writer(File::create(path)?),
            MODE_APPEND => Handle::Writer(OpenOptions::new().create(true).append(true).open(path)?),
            _ => return Err(io::ErrorKind::InvalidInput.into()),
        };
        Ok(self.register(handle))
    }

    fn connect(&self, host: &str, port: i32) -> io::Result<i32> {
        let port = u16::try_from(port).map_err(|_| io::ErrorKind::InvalidInput)?;
        let stream = TcpStream::connect((host, port))?;
        Ok(self.register(Handle::Tcp(BufReader::new(stream))))
    }

    fn listen(&self, port: i32) -> io::Result<i32> {
        let port = u16::try_from(port).map_err(|_| io::ErrorKind::InvalidInput)?;
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        Ok(self.register(Handle::Listener(listener)))
    }

    fn accept(&self, id: i32) -> io::Result<i32> {
        let listener = {
            let shared = self.handle(id).ok_or(io::ErrorKind::NotFound)?;
            let handle = lock(&shared);
            match &*handle {
                Handle::Listener(listener) => listener.try_clone()?,
                _ => return Err(io::ErrorKind::Unsupported.into()),
            }
        };
        let (stream, peer) = listener.accept()?;
        debug!(%peer, "accepted connection");
        Ok(self.register(Handle::Tcp(BufReader::new(stream))))
    }

    fn is_tty(&self, id: i32) -> bool {
        match id {
            STDIN => io::stdin().is_tty(),
            STDOUT => io::stdout().is_tty(),
            STDERR => io::stderr().is_tty(),
            _ => false,
        }
    }
}

fn lock(shared: &Shared) -> MutexGuard<'_, Handle> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collapse a host result to the value-level failure convention.
fn status<T>(result: io::Result<T>, ok: impl FnOnce(T) -> i32) -> Value {
    match result {
        Ok(v) => Value::Int32(ok(v)),
        Err(e) => {
            debug!(error = %e, "platform call failed");
            Value::Int32(-1)
        }
    }
}

impl Platform for OsPlatform {
    fn call(&self, pcall: PCall, args: &[Value]) -> Value {
        match pcall {
            PCall::StreamWrite => status(self.write(int_arg(args, 0), str_arg(args, 1)), |n| {
                n as i32
            }),
            PCall::StreamReadLine => {
                Value::string(&self.read_line(int_arg(args, 0)).unwrap_or_default())
            }
            PCall::StreamClose => {
                let id = int_arg(args, 0);
                let removed = self.table().remove(&id).is_some();
                Value::Int32(if removed || (STDIN..=STDERR).contains(&id) { 0 } else { -1 })
            }
            PCall::ProcessExit => {
                let _ = io::stdout().flush();
                std::process::exit(int_arg(args, 0))
            }
            PCall::ProcessId => Value::Int32(std::process::id() as i32),
            PCall::ProcessArgCount => Value::Int32(self.args.len() as i32),
            PCall::ProcessArg => {
                let arg = usize::try_from(int_arg(args, 0))
                    .ok()
                    .and_then(|i| self.args.get(i));
                Value::string(arg.map(String::as_str).unwrap_or(""))
            }
            PCall::TcpConnect => status(self.connect(str_arg(args, 0), int_arg(args, 1)), |h| h),
            PCall::TcpListen => status(self.listen(int_arg(args, 0)), |h| h),
            PCall::TcpAccept => status(self.accept(int_arg(args, 0)), |h| h),
            PCall::ConsolePrint => {
                let mut out = io::stdout().lock();
                let _ = writeln!(out, "{}", str_arg(args, 0));
                let _ = out.flush();
                Value::Int32(0)
            }
            PCall::ConsoleReadLine => Value::string(&self.read_line(STDIN).unwrap_or_default()),
            PCall::TermIsTty => Value::bool(self.is_tty(int_arg(args, 0))),
            PCall::TermSize => match terminal::size() {
                Ok((cols, rows)) => term_size(cols as i32, rows as i32),
                Err(_) => term_size(-1, -1),
            },
            PCall::TermRawMode => {
                let result = if int_arg(args, 0) != 0 {
                    terminal::enable_raw_mode()
                } else {
                    terminal::disable_raw_mode()
                };
                status(result, |_| 0)
            }
            PCall::ClockNanos => Value::Int64(self.started.elapsed().as_nanos() as i64),
            PCall::ClockUnixMillis => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                Value::Int64(millis)
            }
            PCall::EnvGet => Value::string(&std::env::var(str_arg(args, 0)).unwrap_or_default()),
            PCall::FileOpen => status(self.open(str_arg(args, 0), int_arg(args, 1)), |h| h),
            PCall::FileRemove => status(fs::remove_file(str_arg(args, 0)), |_| 0),
            PCall::FileExists => Value::bool(Path::new(str_arg(args, 0)).exists()),
            PCall::Version => Value::string(version()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let path = Value::string(path.to_str().unwrap());
        let p = OsPlatform::new(vec![]);

        let h = p.call(PCall::FileOpen, &[path.clone(), Value::Int32(MODE_WRITE)]);
        assert!(h.as_i32().unwrap() > STDERR);
        assert_eq!(
            p.call(PCall::StreamWrite, &[h.clone(), Value::string("alpha\nbeta\n")]),
            Value::Int32(11)
        );
        assert_eq!(p.call(PCall::StreamClose, &[h]), Value::Int32(0));
        assert_eq!(p.call(PCall::FileExists, &[path.clone()]), Value::Int32(1));

        let r = p.call(PCall::FileOpen, &[path.clone(), Value::Int32(MODE_READ)]);
        assert_eq!(p.call(PCall::StreamReadLine, &[r.clone()]), Value::string("alpha"));
        assert_eq!(p.call(PCall::StreamReadLine, &[r.clone()]), Value::string("beta"));
        assert_eq!(p.call(PCall::StreamReadLine, &[r]), Value::string(""));

        assert_eq!(p.call(PCall::FileRemove, &[path.clone()]), Value::Int32(0));
        assert_eq!(p.call(PCall::FileExists, &[path]), Value::Int32(0));
    }

    #[test]
    fn test_missing_file_is_minus_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let p = OsPlatform::new(vec![]);
        let h = p.call(
            PCall::FileOpen,
            &[Value::string(path.to_str().unwrap()), Value::Int32(MODE_READ)],
        );
        assert_eq!(h, Value::Int32(-1));
        assert_eq!(p.call(PCall::StreamClose, &[Value::Int32(999)]), Value::Int32(-1));
    }

    #[test]
    fn test_tcp_loopback() {
        let p = OsPlatform::new(vec![]);
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port() as i32;
        drop(listener);

        let listener = p.call(PCall::TcpListen, &[Value::Int32(port)]);
        assert!(listener.as_i32().unwrap() > STDERR);

        let client = p.call(PCall::TcpConnect, &[Value::string("127.0.0.1"), Value::Int32(port)]);
        let server = p.call(PCall::TcpAccept, &[listener]);
        p.call(PCall::StreamWrite, &[client, Value::string("ping\n")]);
        assert_eq!(p.call(PCall::StreamReadLine, &[server]), Value::string("ping"));
    }

    #[test]
    fn test_args_and_clock() {
        let p = OsPlatform::new(vec!["x".to_string()]);
        assert_eq!(p.call(PCall::ProcessArgCount, &[]), Value::Int32(1));
        assert_eq!(p.call(PCall::ProcessArg, &[Value::Int32(0)]), Value::string("x"));
        let a = p.call(PCall::ClockNanos, &[]).as_i64().unwrap();
        let b = p.call(PCall::ClockNanos, &[]).as_i64().unwrap();
        assert!(b >= a);
    }
}
