use std::collections::HashMap;
use std::sync::Arc;

use super::Assembly;
use super::error::BuildError;
use super::ops::{IP_PLACEHOLDER, Op};

/// Lazy cell state: closure stored, not yet evaluated.
pub const LAZY_IDLE: i32 = 0;
/// Lazy cell state: one executor is evaluating the closure.
pub const LAZY_COMPUTING: i32 = 1;
/// Lazy cell state: payload holds the memoized value.
pub const LAZY_DONE: i32 = 2;

const LAZY_STATE: u32 = 0;
const LAZY_PAYLOAD: u32 = 1;

/// Builds an [`Assembly`] by appending instructions sequentially.
///
/// Instruction-pointer operands may name labels that are defined later; they
/// are written as [`IP_PLACEHOLDER`] and patched by [`Assembler::close`].
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    strings: Vec<Arc<str>>,
    string_ids: HashMap<Arc<str>, u32>,
    labels: HashMap<String, u32>,
    /// (label, byte offset of the ip operand)
    fixups: Vec<(String, usize)>,
    entry: Option<String>,
    next_label: usize,
    closed: bool,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self) -> Result<(), BuildError> {
        if self.closed {
            Err(BuildError::Closed)
        } else {
            Ok(())
        }
    }

    /// Current write offset.
    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    /// Define `name` at the current offset.
    pub fn label(&mut self, name: &str) -> Result<(), BuildError> {
        self.check_open()?;
        if self.labels.contains_key(name) {
            return Err(BuildError::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), self.position());
        Ok(())
    }

    /// A label name not used by any other `fresh_label` call on this builder.
    pub fn fresh_label(&mut self, hint: &str) -> String {
        let name = format!(".{}{}", hint, self.next_label);
        self.next_label += 1;
        name
    }

    /// Set the label execution starts at.
    pub fn entry(&mut self, name: &str) -> Result<(), BuildError> {
        self.check_open()?;
        self.entry = Some(name.to_string());
        Ok(())
    }

    /// Intern a string literal, returning its pool id.
    pub fn string(&mut self, s: &str) -> Result<u32, BuildError> {
        self.check_open()?;
        if let Some(&id) = self.string_ids.get(s) {
            return Ok(id);
        }
        let id = self.strings.len() as u32;
        let s: Arc<str> = Arc::from(s);
        self.strings.push(Arc::clone(&s));
        self.string_ids.insert(s, id);
        Ok(id)
    }

    /// Append one instruction with its operands as given.
    pub fn emit(&mut self, op: Op) -> Result<(), BuildError> {
        self.check_open()?;
        if self.code.len() + op.encoded_len() > IP_PLACEHOLDER as usize {
            return Err(BuildError::TooLarge);
        }
        op.encode(&mut self.code);
        Ok(())
    }

    /// Append an ip-bearing instruction whose target is `label`.
    pub fn emit_to(&mut self, op: Op, label: &str) -> Result<(), BuildError> {
        let op = op
            .with_target(IP_PLACEHOLDER)
            .ok_or(BuildError::NoTarget(op.name()))?;
        let at = self.code.len() + 1;
        self.emit(op)?;
        self.fixups.push((label.to_string(), at));
        Ok(())
    }

    pub fn load_string(&mut self, s: &str) -> Result<(), BuildError> {
        let id = self.string(s)?;
        self.emit(Op::LoadLitString(id))
    }

    /// `Int32 cond →`; fails the run with `message` when cond is 0.
    pub fn assert(&mut self, message: &str) -> Result<(), BuildError> {
        let id = self.string(message)?;
        self.emit(Op::Assert(id))
    }

    /// `closure → cell`: wrap a zero-argument closure in an Idle lazy cell.
    pub fn make_lazy(&mut self) -> Result<(), BuildError> {
        self.emit(Op::LoadLitInt(LAZY_IDLE))?;
        self.emit(Op::Swap)?;
        self.emit(Op::MakeStruct(2))
    }

    /// `cell → value`: evaluate the cell at most once across all executors.
    ///
    /// The executor that moves the state Idle→Computing runs the closure,
    /// stores the result and publishes Computing→Done. Every other executor
    /// parks on the state field until it reads Done.
    pub fn lazy_get(&mut self) -> Result<(), BuildError> {
        let wait = self.fresh_label("lazy_wait");
        let read = self.fresh_label("lazy_read");

        self.emit(Op::Dup)?;
        self.emit(Op::LoadLitInt(LAZY_IDLE))?;
        self.emit(Op::LoadLitInt(LAZY_COMPUTING))?;
        self.emit(Op::CmpXchg(LAZY_STATE))?;
        self.emit_to(Op::JumpIfNot(0), &wait)?;

        self.emit(Op::Dup)?;
        self.emit(Op::Dup)?;
        self.emit(Op::LoadField(2, LAZY_PAYLOAD))?;
        self.emit(Op::CallDyn(0))?;
        self.emit(Op::StoreField(2, LAZY_PAYLOAD))?;
        self.emit(Op::Dup)?;
        self.emit(Op::LoadLitInt(LAZY_COMPUTING))?;
        self.emit(Op::LoadLitInt(LAZY_DONE))?;
        self.emit(Op::CmpXchg(LAZY_STATE))?;
        self.emit(Op::Pop)?;
        self.emit_to(Op::Jump(0), &read)?;

        self.label(&wait)?;
        self.emit(Op::Dup)?;
        self.emit(Op::LoadLitInt(LAZY_DONE))?;
        self.emit(Op::AtomicBlock(LAZY_STATE))?;

        self.label(&read)?;
        self.emit(Op::LoadField(2, LAZY_PAYLOAD))
    }

    /// Patch every label reference and produce the finished assembly.
    ///
    /// The builder is closed afterwards, even when patching fails.
    pub fn close(&mut self) -> Result<Assembly, BuildError> {
        self.check_open()?;
        self.closed = true;

        for (label, at) in &self.fixups {
            let target = *self
                .labels
                .get(label)
                .ok_or_else(|| BuildError::UnresolvedLabel(label.clone()))?;
            self.code[*at..*at + 4].copy_from_slice(&target.to_le_bytes());
        }

        let entry_name = self.entry.as_ref().ok_or(BuildError::MissingEntry)?;
        let entry = *self
            .labels
            .get(entry_name)
            .ok_or_else(|| BuildError::UnresolvedLabel(entry_name.clone()))?;

        Ok(Assembly::new(
            std::mem::take(&mut self.code),
            std::mem::take(&mut self.strings),
            entry,
        ))
    }
}
