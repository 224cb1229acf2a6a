//! Line-oriented textual assembly (`.kasm`).
//!
//! ```text
//! ; comments run to end of line
//! .entry main
//! main:
//!     LoadLitString "hello"
//!     PCall ConsolePrint
//!     Ret
//! ```
//!
//! Each line holds an optional `label:` and an optional instruction. Operands
//! follow the instruction's encoding order: integers for numeric operands,
//! label names for instruction pointers, string literals for pool ids. `PCall`
//! also accepts a platform-call name.

mod lexer;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

pub use lexer::{Lexer, Span, Token, TokenKind};

use crate::platform::PCall;
use crate::vm::ops::{Operand, Op};
use crate::vm::{Assembler, Assembly, BuildError};

/// A textual assembly error with its source position.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{span}: {message}")]
pub struct AsmError {
    pub span: Span,
    pub message: String,
}

impl AsmError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Assemble `.kasm` source into an [`Assembly`].
pub fn assemble(source: &str) -> Result<Assembly, AsmError> {
    let tokens = Lexer::new(source).scan_tokens()?;
    let mut parser = Parser::new(tokens);
    parser.parse()?;
    parser.finish()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    asm: Assembler,
    /// First reference of each label, for unresolved-label diagnostics.
    references: HashMap<String, Span>,
    entry_span: Option<Span>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            asm: Assembler::new(),
            references: HashMap::new(),
            entry_span: None,
        }
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn parse(&mut self) -> Result<(), AsmError> {
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Eof => return Ok(()),
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Ident(name) if self.peek_kind_at(1) == Some(&TokenKind::Colon) => {
                    self.advance();
                    self.advance();
                    self.asm
                        .label(&name)
                        .map_err(|e| AsmError::new(token.span, e.to_string()))?;
                }
                TokenKind::Directive(directive) => {
                    self.advance();
                    self.directive(&directive, token.span)?;
                    self.end_of_line()?;
                }
                TokenKind::Ident(mnemonic) => {
                    self.advance();
                    self.instruction(&mnemonic, token.span)?;
                    self.end_of_line()?;
                }
                other => {
                    return Err(AsmError::new(
                        token.span,
                        format!("expected label or instruction, found {}", describe(&other)),
                    ));
                }
            }
        }
    }

    fn end_of_line(&mut self) -> Result<(), AsmError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Newline | TokenKind::Eof => Ok(()),
            other => Err(AsmError::new(
                token.span,
                format!("unexpected {} after instruction", describe(&other)),
            )),
        }
    }

    fn directive(&mut self, name: &str, span: Span) -> Result<(), AsmError> {
        match name {
            "entry" => {
                let label = self.label_operand()?;
                self.entry_span = Some(span);
                self.asm
                    .entry(&label)
                    .map_err(|e| AsmError::new(span, e.to_string()))
            }
            _ => Err(AsmError::new(span, format!("unknown directive '.{}'", name))),
        }
    }

    fn label_operand(&mut self) -> Result<String, AsmError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Ident(name) => {
                self.references.entry(name.clone()).or_insert(token.span);
                Ok(name)
            }
            other => Err(AsmError::new(
                token.span,
                format!("expected label, found {}", describe(&other)),
            )),
        }
    }

    fn instruction(&mut self, mnemonic: &str, span: Span) -> Result<(), AsmError> {
        let template = Op::from_name(mnemonic)
            .ok_or_else(|| AsmError::new(span, format!("unknown instruction '{}'", mnemonic)))?;

        let mut buf = vec![template.opcode()];
        let mut target = None;
        for operand in template.operands() {
            match operand {
                Operand::Ip => {
                    target = Some(self.label_operand()?);
                    buf.extend_from_slice(&0u32.to_le_bytes());
                }
                Operand::Str => {
                    let token = self.advance();
                    let TokenKind::Str(s) = token.kind else {
                        return Err(AsmError::new(token.span, "expected string literal"));
                    };
                    let id = self
                        .asm
                        .string(&s)
                        .map_err(|e| AsmError::new(token.span, e.to_string()))?;
                    buf.extend_from_slice(&id.to_le_bytes());
                }
                Operand::U32 if matches!(template, Op::PCall(_)) => {
                    let code = self.pcall_operand()?;
                    buf.extend_from_slice(&code.to_le_bytes());
                }
                Operand::U8 => {
                    let n = self.int_operand(0, u8::MAX as i64)?;
                    buf.push(n as u8);
                }
                Operand::U32 => {
                    let n = self.int_operand(0, u32::MAX as i64)?;
                    buf.extend_from_slice(&(n as u32).to_le_bytes());
                }
                Operand::I32 => {
                    let n = self.int_operand(i32::MIN as i64, u32::MAX as i64)?;
                    buf.extend_from_slice(&(n as i32).to_le_bytes());
                }
                Operand::I64 => {
                    let n = self.int_operand(i64::MIN, i64::MAX)?;
                    buf.extend_from_slice(&n.to_le_bytes());
                }
                Operand::F32 => {
                    let token = self.advance();
                    let f = match token.kind {
                        TokenKind::Float(f) => f as f32,
                        TokenKind::Int(n) => n as f32,
                        other => {
                            return Err(AsmError::new(
                                token.span,
                                format!("expected float, found {}", describe(&other)),
                            ));
                        }
                    };
                    buf.extend_from_slice(&f.to_le_bytes());
                }
            }
        }

        let (op, _) =
            Op::decode(&buf, 0).map_err(|e| AsmError::new(span, e.to_string()))?;
        let result = match target {
            Some(label) => self.asm.emit_to(op, &label),
            None => self.asm.emit(op),
        };
        result.map_err(|e| AsmError::new(span, e.to_string()))
    }

    fn int_operand(&mut self, min: i64, max: i64) -> Result<i64, AsmError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Int(n) if (min..=max).contains(&n) => Ok(n),
            TokenKind::Int(n) => Err(AsmError::new(
                token.span,
                format!("operand {} out of range {}..={}", n, min, max),
            )),
            other => Err(AsmError::new(
                token.span,
                format!("expected integer, found {}", describe(&other)),
            )),
        }
    }

    fn pcall_operand(&mut self) -> Result<u32, AsmError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                PCall::from_name(&name)
                    .map(PCall::code)
                    .ok_or_else(|| AsmError::new(token.span, format!("unknown platform call '{}'", name)))
            }
            _ => Ok(self.int_operand(0, u32::MAX as i64)? as u32),
        }
    }

    fn finish(mut self) -> Result<Assembly, AsmError> {
        let end = self.peek().span;
        self.asm.close().map_err(|e| {
            let span = match &e {
                BuildError::UnresolvedLabel(name) => {
                    self.references.get(name).copied().unwrap_or(end)
                }
                BuildError::MissingEntry => end,
                _ => self.entry_span.unwrap_or(end),
            };
            AsmError::new(span, e.to_string())
        })
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("'{}'", name),
        TokenKind::Directive(name) => format!("'.{}'", name),
        TokenKind::Int(n) => format!("integer {}", n),
        TokenKind::Float(f) => format!("float {}", f),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Eof => "end of file".to_string(),
    }
}
