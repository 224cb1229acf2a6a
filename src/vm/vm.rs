use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::RuntimeConfig;
use crate::platform::{PCall, Platform};
use crate::vm::error::{Fault, ResultCode};
use crate::vm::ops::Op;
use crate::vm::threads::{self, FutureCell};
use crate::vm::value::{Struct, Value};
use crate::vm::Assembly;

static NEXT_EXECUTOR_ID: AtomicUsize = AtomicUsize::new(0);

/// Result of running an assembly to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub code: ResultCode,
    /// Value returned by the outermost frame, when the run succeeded.
    pub value: Option<Value>,
    /// Description of the terminating fault, when it did not.
    pub message: Option<String>,
}

impl Outcome {
    fn from_result(result: Result<Value, Fault>) -> Self {
        match result {
            Ok(value) => Self {
                code: ResultCode::Ok,
                value: Some(value),
                message: None,
            },
            Err(fault) => Self {
                code: fault.code(),
                value: None,
                message: Some(match fault {
                    Fault::AssertFailed { message } | Fault::Fail { message } => message,
                    other => other.to_string(),
                }),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResultCode::Ok
    }
}

/// Host entry point: runs assemblies against a platform.
pub struct Vm {
    config: RuntimeConfig,
    platform: Arc<dyn Platform>,
}

impl Vm {
    pub fn new(config: RuntimeConfig, platform: Arc<dyn Platform>) -> Self {
        Self { config, platform }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run from the assembly's entrypoint and return its result value.
    pub fn execute(&self, assembly: &Arc<Assembly>) -> Result<Value, Fault> {
        self.execute_at(assembly, assembly.entry())
    }

    /// Run from an arbitrary instruction offset on a fresh executor.
    pub fn execute_at(&self, assembly: &Arc<Assembly>, entry: u32) -> Result<Value, Fault> {
        let ctx = Arc::new(Context {
            assembly: Arc::clone(assembly),
            platform: Arc::clone(&self.platform),
            config: self.config.clone(),
        });
        Executor::new(ctx).run(entry, Vec::new())
    }

    pub fn run(&self, assembly: &Arc<Assembly>) -> Outcome {
        let outcome = Outcome::from_result(self.execute(assembly));
        debug!(code = %outcome.code, "run finished");
        outcome
    }

    /// Run each entrypoint in order, stopping at the first non-`Ok` result.
    ///
    /// The outcome carries the last entrypoint's value.
    pub fn run_entrypoints(&self, assembly: &Arc<Assembly>, entries: &[u32]) -> Outcome {
        let mut last = None;
        for &entry in entries {
            match self.execute_at(assembly, entry) {
                Ok(value) => last = Some(value),
                Err(fault) => {
                    debug!(entry, code = %fault.code(), "entrypoint failed");
                    return Outcome::from_result(Err(fault));
                }
            }
        }
        Outcome {
            code: ResultCode::Ok,
            value: last,
            message: None,
        }
    }
}

/// State shared by an executor and every executor forked from it.
struct Context {
    assembly: Arc<Assembly>,
    platform: Arc<dyn Platform>,
    config: RuntimeConfig,
}

/// A call frame.
#[derive(Debug)]
struct Frame {
    /// Where the caller resumes; `None` for the outermost frame.
    return_ip: Option<u32>,
    /// Eval stack height below this frame's arguments.
    stack_base: usize,
    /// Start of this frame's region in the local-slot arena.
    locals_start: usize,
    locals_len: usize,
}

enum Flow {
    Continue,
    Exit(Value),
}

/// One interpreter instance with its own eval stack, call stack and locals.
struct Executor {
    ctx: Arc<Context>,
    id: usize,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    locals: Vec<Value>,
    /// Offset of the next instruction.
    ip: u32,
    /// Offset of the instruction being executed.
    at: u32,
    trace: bool,
}

impl Executor {
    fn new(ctx: Arc<Context>) -> Self {
        let trace = ctx.config.trace;
        Self {
            ctx,
            id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
            stack: Vec::new(),
            frames: Vec::new(),
            locals: Vec::new(),
            ip: 0,
            at: 0,
            trace,
        }
    }

    /// Run from `entry` with `args` already on the eval stack of the outermost frame.
    fn run(mut self, entry: u32, args: Vec<Value>) -> Result<Value, Fault> {
        if args.len() > self.ctx.config.eval_stack_capacity {
            return Err(Fault::EvalStackOverflow {
                capacity: self.ctx.config.eval_stack_capacity,
            });
        }
        self.stack = args;
        self.frames.push(Frame {
            return_ip: None,
            stack_base: 0,
            locals_start: 0,
            locals_len: 0,
        });
        self.ip = entry;
        debug!(executor = self.id, entry, "executor started");

        let ctx = Arc::clone(&self.ctx);
        let code = ctx.assembly.code();
        loop {
            self.at = self.ip;
            if self.at as usize >= code.len() {
                return Err(self.invalid("ran off the end of the instruction stream"));
            }
            let (op, next) = Op::decode(code, self.at as usize)?;
            self.ip = next as u32;
            if self.trace {
                trace!(
                    executor = self.id,
                    ip = self.at,
                    depth = self.frames.len(),
                    stack = self.stack.len(),
                    "{}",
                    op
                );
            }
            match self.step(op)? {
                Flow::Continue => {}
                Flow::Exit(value) => return Ok(value),
            }
        }
    }

    fn step(&mut self, op: Op) -> Result<Flow, Fault> {
        match op {
            // ========================================
            // Literals
            // ========================================
            Op::LoadLitInt(n) => self.push(Value::Int32(n))?,
            Op::LoadLitLong(n) => self.push(Value::Int64(n))?,
            Op::LoadLitFloat(f) => self.push(Value::Float32(f))?,
            Op::LoadLitString(id) => {
                let s = self.pool_string(id)?;
                self.push(Value::StringRef(s))?;
            }
            Op::LoadLitIp(ip) => self.push(Value::InstrPointer(ip))?,

            // ========================================
            // Frame locals
            // ========================================
            Op::Alloc(n) => self.alloc(n as usize)?,
            Op::Load(slot) => {
                let index = self.local_index(slot)?;
                let value = self.locals[index].clone();
                self.push(value)?;
            }
            Op::Store(slot) => {
                let index = self.local_index(slot)?;
                self.locals[index] = self.pop()?;
            }

            // ========================================
            // Stack management
            // ========================================
            Op::Dup => {
                let top = self.peek()?.clone();
                self.push(top)?;
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(b);
                self.stack.push(a);
            }

            // ========================================
            // Int32
            // ========================================
            Op::AddInt => self.int_op(i32::wrapping_add)?,
            Op::SubInt => self.int_op(i32::wrapping_sub)?,
            Op::MulInt => self.int_op(i32::wrapping_mul)?,
            Op::DivInt => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                if b == 0 {
                    return Err(Fault::DivByZero { ip: self.at });
                }
                self.push(Value::Int32(a.wrapping_div(b)))?;
            }
            Op::RemInt => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                if b == 0 {
                    return Err(Fault::DivByZero { ip: self.at });
                }
                self.push(Value::Int32(a.wrapping_rem(b)))?;
            }
            Op::NegInt => {
                let a = self.pop_int()?;
                self.push(Value::Int32(a.wrapping_neg()))?;
            }
            Op::AndInt => self.int_op(|a, b| a & b)?,
            Op::OrInt => self.int_op(|a, b| a | b)?,
            Op::XorInt => self.int_op(|a, b| a ^ b)?,
            Op::ShlInt => self.int_op(|a, b| a.wrapping_shl(b as u32))?,
            Op::ShrInt => self.int_op(|a, b| a.wrapping_shr(b as u32))?,
            Op::EqInt => self.int_cmp(|a, b| a == b)?,
            Op::NeInt => self.int_cmp(|a, b| a != b)?,
            Op::LtInt => self.int_cmp(|a, b| a < b)?,
            Op::LeInt => self.int_cmp(|a, b| a <= b)?,
            Op::GtInt => self.int_cmp(|a, b| a > b)?,
            Op::GeInt => self.int_cmp(|a, b| a >= b)?,

            // ========================================
            // Int64
            // ========================================
            Op::AddLong => self.long_op(i64::wrapping_add)?,
            Op::SubLong => self.long_op(i64::wrapping_sub)?,
            Op::MulLong => self.long_op(i64::wrapping_mul)?,
            Op::DivLong => {
                let b = self.pop_long()?;
                let a = self.pop_long()?;
                if b == 0 {
                    return Err(Fault::DivByZero { ip: self.at });
                }
                self.push(Value::Int64(a.wrapping_div(b)))?;
            }
            Op::RemLong => {
                let b = self.pop_long()?;
                let a = self.pop_long()?;
                if b == 0 {
                    return Err(Fault::DivByZero { ip: self.at });
                }
                self.push(Value::Int64(a.wrapping_rem(b)))?;
            }
            Op::NegLong => {
                let a = self.pop_long()?;
                self.push(Value::Int64(a.wrapping_neg()))?;
            }
            Op::EqLong => self.long_cmp(|a, b| a == b)?,
            Op::NeLong => self.long_cmp(|a, b| a != b)?,
            Op::LtLong => self.long_cmp(|a, b| a < b)?,
            Op::LeLong => self.long_cmp(|a, b| a <= b)?,
            Op::GtLong => self.long_cmp(|a, b| a > b)?,
            Op::GeLong => self.long_cmp(|a, b| a >= b)?,

            // ========================================
            // Float32
            // ========================================
            Op::AddFloat => self.float_op(|a, b| a + b)?,
            Op::SubFloat => self.float_op(|a, b| a - b)?,
            Op::MulFloat => self.float_op(|a, b| a * b)?,
            Op::DivFloat => self.float_op(|a, b| a / b)?,
            Op::NegFloat => {
                let a = self.pop_float()?;
                self.push(Value::Float32(-a))?;
            }
            Op::EqFloat => self.float_cmp(|a, b| a == b)?,
            Op::NeFloat => self.float_cmp(|a, b| a != b)?,
            Op::LtFloat => self.float_cmp(|a, b| a < b)?,
            Op::LeFloat => self.float_cmp(|a, b| a <= b)?,
            Op::GtFloat => self.float_cmp(|a, b| a > b)?,
            Op::GeFloat => self.float_cmp(|a, b| a >= b)?,

            // ========================================
            // Conversions and logic
            // ========================================
            Op::IntToLong => {
                let a = self.pop_int()?;
                self.push(Value::Int64(a as i64))?;
            }
            Op::LongToInt => {
                let a = self.pop_long()?;
                self.push(Value::Int32(a as i32))?;
            }
            Op::IntToFloat => {
                let a = self.pop_int()?;
                self.push(Value::Float32(a as f32))?;
            }
            Op::FloatToInt => {
                let a = self.pop_float()?;
                self.push(Value::Int32(a as i32))?;
            }
            Op::LongToFloat => {
                let a = self.pop_long()?;
                self.push(Value::Float32(a as f32))?;
            }
            Op::FloatToLong => {
                let a = self.pop_float()?;
                self.push(Value::Int64(a as i64))?;
            }
            Op::Not => {
                let a = self.pop_int()?;
                self.push(Value::bool(a == 0))?;
            }
            Op::EqValue => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::bool(a == b))?;
            }

            // ========================================
            // Strings
            // ========================================
            Op::ConcatString => {
                let b = self.pop_str()?;
                let a = self.pop_str()?;
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(&a);
                s.push_str(&b);
                self.push(Value::string(&s))?;
            }
            Op::LengthString => {
                let s = self.pop_str()?;
                self.push(Value::Int32(s.chars().count() as i32))?;
            }
            Op::EqString => {
                let b = self.pop_str()?;
                let a = self.pop_str()?;
                self.push(Value::bool(a == b))?;
            }
            Op::SliceString => {
                let end = self.pop_int()?;
                let start = self.pop_int()?;
                let s = self.pop_str()?;
                self.push(Value::string(&slice_chars(&s, start, end)))?;
            }
            Op::IntToString => {
                let a = self.pop_int()?;
                self.push(Value::string(&a.to_string()))?;
            }
            Op::LongToString => {
                let a = self.pop_long()?;
                self.push(Value::string(&a.to_string()))?;
            }
            Op::FloatToString => {
                let a = self.pop_float()?;
                self.push(Value::string(&Value::Float32(a).to_string()))?;
            }

            // ========================================
            // Structs, unions, closures
            // ========================================
            Op::MakeStruct(n) => {
                let fields = self.pop_n(n as usize)?;
                self.push(Value::make_struct(fields))?;
            }
            Op::LoadField(count, index) => {
                let value = self.pop()?;
                let field = value
                    .field(count, index)
                    .map_err(|reason| self.invalid(reason))?;
                self.push(field)?;
            }
            Op::StoreField(count, index) => {
                let value = self.pop()?;
                let target = self.pop()?;
                target
                    .store_field(count, index, value)
                    .map_err(|reason| self.invalid(reason))?;
            }
            Op::MakeUnion(tag) => {
                let payload = self.pop()?;
                self.push(Value::make_union(tag, payload))?;
            }
            Op::UnionTag => {
                let (tag, _) = self.pop_union()?;
                self.push(Value::Int32(tag))?;
            }
            Op::UnionIs(tag) => {
                let (actual, _) = self.pop_union()?;
                self.push(Value::bool(actual == tag as i32))?;
            }
            Op::UnionExtract(tag) => {
                let (actual, payload) = self.pop_union()?;
                if actual != tag as i32 {
                    return Err(Fault::AssertFailed {
                        message: format!("union tag mismatch: expected {}, found {}", tag, actual),
                    });
                }
                self.push(payload)?;
            }
            Op::MakeClosure(ip, n) => {
                let bound = self.pop_n(n as usize)?;
                self.push(Value::closure(ip, bound))?;
            }

            // ========================================
            // Control flow
            // ========================================
            Op::Jump(ip) => self.ip = ip,
            Op::JumpIf(ip) => {
                if self.pop_int()? != 0 {
                    self.ip = ip;
                }
            }
            Op::JumpIfNot(ip) => {
                if self.pop_int()? == 0 {
                    self.ip = ip;
                }
            }
            Op::Call(ip, argc) => self.call(ip, argc as usize)?,
            Op::CallTail(ip, argc) => self.tail_call(ip, argc as usize)?,
            Op::CallForked(ip, argc) => self.fork(ip, argc as usize)?,
            Op::CallDyn(argc) => {
                let (ip, argc) = self.resolve_callee(argc as usize)?;
                self.call(ip, argc)?;
            }
            Op::CallDynTail(argc) => {
                let (ip, argc) = self.resolve_callee(argc as usize)?;
                self.tail_call(ip, argc)?;
            }
            Op::CallForkedDyn(argc) => {
                let (ip, argc) = self.resolve_callee(argc as usize)?;
                self.fork(ip, argc)?;
            }
            Op::Ret => return self.ret(),

            // ========================================
            // Platform, futures, atomics
            // ========================================
            Op::PCall(code) => {
                let pcall = PCall::from_code(code)
                    .ok_or_else(|| self.invalid(format!("unknown platform call 0x{:02x}", code)))?;
                let args = self.pop_n(pcall.arity())?;
                pcall.check_args(&args).map_err(|reason| self.invalid(reason))?;
                let result = self.ctx.platform.call(pcall, &args);
                self.push(result)?;
            }
            Op::FutureWaitNano => {
                let nanos = self.pop_long()?;
                let future = self.pop_future()?;
                let done = future.wait_for(Duration::from_nanos(nanos.max(0) as u64));
                self.push(Value::bool(done))?;
            }
            Op::FutureBlock => {
                let future = self.pop_future()?;
                let value = future.block();
                self.push(value)?;
            }
            Op::CmpXchg(field) => {
                let new = self.pop()?;
                let expected = self.pop()?;
                let target = self.pop_struct()?;
                let swapped = target
                    .compare_exchange(field as usize, &expected, new)
                    .ok_or_else(|| self.invalid(format!("field {} out of range", field)))?;
                self.push(Value::bool(swapped))?;
            }
            Op::AtomicBlock(field) => {
                let wanted = self.pop()?;
                let target = self.pop_struct()?;
                if !target.wait_until(field as usize, &wanted) {
                    return Err(self.invalid(format!("field {} out of range", field)));
                }
            }

            // ========================================
            // Failure
            // ========================================
            Op::Assert(id) => {
                let message = self.pool_string(id)?;
                if self.pop_int()? == 0 {
                    return Err(Fault::AssertFailed {
                        message: message.to_string(),
                    });
                }
            }
            Op::Fail => {
                let message = self.pop_str()?;
                return Err(Fault::Fail {
                    message: message.to_string(),
                });
            }
        }
        Ok(Flow::Continue)
    }

    // ========================================
    // Calls
    // ========================================

    fn call(&mut self, ip: u32, argc: usize) -> Result<(), Fault> {
        let stack_base = self.args_base(argc)?;
        let capacity = self.ctx.config.call_stack_capacity;
        if self.frames.len() >= capacity {
            return Err(Fault::CallStackOverflow { capacity });
        }
        self.frames.push(Frame {
            return_ip: Some(self.ip),
            stack_base,
            locals_start: self.locals.len(),
            locals_len: 0,
        });
        self.ip = ip;
        Ok(())
    }

    /// Reuse the current frame: only the outgoing arguments may remain above its base.
    fn tail_call(&mut self, ip: u32, argc: usize) -> Result<(), Fault> {
        let args_base = self.args_base(argc)?;
        let frame = self.frame()?;
        if args_base != frame.stack_base {
            return Err(Fault::EvalStackNotEmpty {
                ip: self.at,
                extra: args_base - frame.stack_base,
            });
        }
        let locals_start = frame.locals_start;
        self.locals.truncate(locals_start);
        if let Some(frame) = self.frames.last_mut() {
            frame.locals_len = 0;
        }
        self.ip = ip;
        Ok(())
    }

    fn fork(&mut self, ip: u32, argc: usize) -> Result<(), Fault> {
        let args = self.pop_n(argc)?;
        let ctx = Arc::clone(&self.ctx);
        let future = threads::fork(move || Executor::new(ctx).run(ip, args))
            .map_err(|e| Fault::Fail {
                message: format!("failed to fork executor: {}", e),
            })?;
        self.push(Value::FutureRef(future))
    }

    /// Pop a callee and splice closure-bound values beneath the explicit arguments.
    ///
    /// Returns the entry ip and the effective argument count.
    fn resolve_callee(&mut self, argc: usize) -> Result<(u32, usize), Fault> {
        let callee = self.pop()?;
        let at = self.args_base(argc)?;
        match callee {
            Value::InstrPointer(ip) => Ok((ip, argc)),
            Value::Closure(closure) => {
                let capacity = self.ctx.config.eval_stack_capacity;
                if self.stack.len() + closure.bound.len() > capacity {
                    return Err(Fault::EvalStackOverflow { capacity });
                }
                self.stack.splice(at..at, closure.bound.iter().cloned());
                Ok((closure.ip, argc + closure.bound.len()))
            }
            other => Err(self.invalid(format!("cannot call {}", other.type_name()))),
        }
    }

    fn ret(&mut self) -> Result<Flow, Fault> {
        let result = self.pop()?;
        let frame = self.frames.pop().ok_or_else(|| self.invalid("no frame to return from"))?;
        if self.stack.len() != frame.stack_base {
            return Err(Fault::EvalStackNotEmpty {
                ip: self.at,
                extra: self.stack.len() - frame.stack_base,
            });
        }
        self.locals.truncate(frame.locals_start);
        match frame.return_ip {
            None => Ok(Flow::Exit(result)),
            Some(ip) => {
                self.ip = ip;
                self.stack.push(result);
                Ok(Flow::Continue)
            }
        }
    }

    // ========================================
    // Locals
    // ========================================

    fn alloc(&mut self, n: usize) -> Result<(), Fault> {
        let capacity = self.ctx.config.local_slot_capacity;
        if self.locals.len() + n > capacity {
            return Err(Fault::LocalSlotsExhausted { capacity });
        }
        self.locals.resize(self.locals.len() + n, Value::UNIT);
        if let Some(frame) = self.frames.last_mut() {
            frame.locals_len += n;
        }
        Ok(())
    }

    fn local_index(&self, slot: u32) -> Result<usize, Fault> {
        let frame = self.frame()?;
        let slot = slot as usize;
        if slot >= frame.locals_len {
            return Err(self.invalid(format!(
                "local slot {} out of range ({} allocated)",
                slot, frame.locals_len
            )));
        }
        Ok(frame.locals_start + slot)
    }

    // ========================================
    // Eval stack
    // ========================================

    fn frame(&self) -> Result<&Frame, Fault> {
        self.frames
            .last()
            .ok_or_else(|| self.invalid("no active frame"))
    }

    fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.stack_base)
    }

    fn invalid(&self, reason: impl Into<String>) -> Fault {
        Fault::InvalidAssembly {
            ip: self.at,
            reason: reason.into(),
        }
    }

    fn push(&mut self, value: Value) -> Result<(), Fault> {
        let capacity = self.ctx.config.eval_stack_capacity;
        if self.stack.len() >= capacity {
            return Err(Fault::EvalStackOverflow { capacity });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        if self.stack.len() <= self.base() {
            return Err(self.invalid("eval stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| self.invalid("eval stack underflow"))
    }

    fn peek(&self) -> Result<&Value, Fault> {
        if self.stack.len() <= self.base() {
            return Err(self.invalid("eval stack underflow"));
        }
        self.stack
            .last()
            .ok_or_else(|| self.invalid("eval stack underflow"))
    }

    /// Height of the stack below the top `argc` values of the current frame.
    fn args_base(&self, argc: usize) -> Result<usize, Fault> {
        match self.stack.len().checked_sub(argc) {
            Some(at) if at >= self.base() => Ok(at),
            _ => Err(self.invalid(format!("eval stack underflow: {} argument(s) expected", argc))),
        }
    }

    /// Pop the top `n` values, oldest first.
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Fault> {
        let at = self.args_base(n)?;
        Ok(self.stack.split_off(at))
    }

    fn mismatch(&self, expected: &str, found: &Value) -> Fault {
        self.invalid(format!("expected {}, found {}", expected, found.type_name()))
    }

    fn pop_int(&mut self) -> Result<i32, Fault> {
        match self.pop()? {
            Value::Int32(n) => Ok(n),
            other => Err(self.mismatch("int", &other)),
        }
    }

    fn pop_long(&mut self) -> Result<i64, Fault> {
        match self.pop()? {
            Value::Int64(n) => Ok(n),
            other => Err(self.mismatch("long", &other)),
        }
    }

    fn pop_float(&mut self) -> Result<f32, Fault> {
        match self.pop()? {
            Value::Float32(f) => Ok(f),
            other => Err(self.mismatch("float", &other)),
        }
    }

    fn pop_str(&mut self) -> Result<Arc<str>, Fault> {
        match self.pop()? {
            Value::StringRef(s) => Ok(s),
            other => Err(self.mismatch("string", &other)),
        }
    }

    fn pop_struct(&mut self) -> Result<Arc<Struct>, Fault> {
        match self.pop()? {
            Value::StructRef(s) => Ok(s),
            other => Err(self.mismatch("struct", &other)),
        }
    }

    fn pop_future(&mut self) -> Result<Arc<FutureCell>, Fault> {
        match self.pop()? {
            Value::FutureRef(f) => Ok(f),
            other => Err(self.mismatch("future", &other)),
        }
    }

    /// Pop a union as (tag, payload).
    fn pop_union(&mut self) -> Result<(i32, Value), Fault> {
        let value = self.pop()?;
        let tag = value.field(2, 0).map_err(|reason| self.invalid(reason))?;
        let payload = value.field(2, 1).map_err(|reason| self.invalid(reason))?;
        match tag {
            Value::Int32(tag) => Ok((tag, payload)),
            other => Err(self.mismatch("int union tag", &other)),
        }
    }

    fn pool_string(&self, id: u32) -> Result<Arc<str>, Fault> {
        self.ctx
            .assembly
            .string(id)
            .cloned()
            .ok_or_else(|| self.invalid(format!("string pool id {} out of range", id)))
    }

    fn int_op(&mut self, f: impl FnOnce(i32, i32) -> i32) -> Result<(), Fault> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Int32(f(a, b)))
    }

    fn int_cmp(&mut self, f: impl FnOnce(i32, i32) -> bool) -> Result<(), Fault> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::bool(f(a, b)))
    }

    fn long_op(&mut self, f: impl FnOnce(i64, i64) -> i64) -> Result<(), Fault> {
        let b = self.pop_long()?;
        let a = self.pop_long()?;
        self.push(Value::Int64(f(a, b)))
    }

    fn long_cmp(&mut self, f: impl FnOnce(i64, i64) -> bool) -> Result<(), Fault> {
        let b = self.pop_long()?;
        let a = self.pop_long()?;
        self.push(Value::bool(f(a, b)))
    }

    fn float_op(&mut self, f: impl FnOnce(f32, f32) -> f32) -> Result<(), Fault> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Value::Float32(f(a, b)))
    }

    fn float_cmp(&mut self, f: impl FnOnce(f32, f32) -> bool) -> Result<(), Fault> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Value::bool(f(a, b)))
    }
}

/// Characters `[start, end)` of `s`, with both bounds clamped to the string.
fn slice_chars(s: &str, start: i32, end: i32) -> String {
    let start = start.max(0) as usize;
    let end = end.max(0) as usize;
    if start >= end {
        return String::new();
    }
    s.chars().skip(start).take(end - start).collect()
}
