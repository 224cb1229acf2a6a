use std::fmt;

use serde::Serialize;

use super::error::DecodeError;

/// Placeholder written for an instruction-pointer operand until its label is patched.
pub const IP_PLACEHOLDER: u32 = 0xFFFF_FFFF;

/// Operand kinds of the instruction encoding. All multi-byte operands are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    U8,
    U32,
    I32,
    I64,
    F32,
    /// Instruction offset, patched from a label.
    Ip,
    /// String-pool id.
    Str,
}

impl Operand {
    pub fn width(self) -> usize {
        match self {
            Operand::U8 => 1,
            Operand::U32 | Operand::I32 | Operand::F32 | Operand::Ip | Operand::Str => 4,
            Operand::I64 => 8,
        }
    }
}

/// Instructions of the kiln VM.
///
/// Booleans are `Int32` 0/1. Every instruction with an instruction-pointer
/// operand carries it first, directly after the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "op", content = "args")]
pub enum Op {
    // ========================================
    // Literals
    // ========================================
    LoadLitInt(i32),
    LoadLitLong(i64),
    LoadLitFloat(f32),
    LoadLitString(u32),
    LoadLitIp(u32),

    // ========================================
    // Frame locals
    // ========================================
    Alloc(u32),
    Load(u32),
    Store(u32),

    // ========================================
    // Stack management
    // ========================================
    Dup,
    Pop,
    Swap,

    // ========================================
    // Int32
    // ========================================
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    RemInt,
    NegInt,
    AndInt,
    OrInt,
    XorInt,
    ShlInt,
    ShrInt,
    EqInt,
    NeInt,
    LtInt,
    LeInt,
    GtInt,
    GeInt,

    // ========================================
    // Int64
    // ========================================
    AddLong,
    SubLong,
    MulLong,
    DivLong,
    RemLong,
    NegLong,
    EqLong,
    NeLong,
    LtLong,
    LeLong,
    GtLong,
    GeLong,

    // ========================================
    // Float32
    // ========================================
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    NegFloat,
    EqFloat,
    NeFloat,
    LtFloat,
    LeFloat,
    GtFloat,
    GeFloat,

    // ========================================
    // Conversions and logic
    // ========================================
    IntToLong,
    LongToInt,
    IntToFloat,
    FloatToInt,
    LongToFloat,
    FloatToLong,
    Not,
    EqValue,

    // ========================================
    // Strings
    // ========================================
    ConcatString,
    LengthString,
    EqString,
    SliceString,
    IntToString,
    LongToString,
    FloatToString,

    // ========================================
    // Structs, unions, closures
    // ========================================
    MakeStruct(u32),
    LoadField(u32, u32), // (field_count, index)
    StoreField(u32, u32), // (field_count, index)
    MakeUnion(u32),
    UnionTag,
    UnionIs(u32),
    UnionExtract(u32),
    MakeClosure(u32, u32), // (ip, bound_count)

    // ========================================
    // Control flow
    // ========================================
    Jump(u32),
    JumpIf(u32),
    JumpIfNot(u32),
    Call(u32, u8), // (ip, argc)
    CallTail(u32, u8),
    CallForked(u32, u8),
    CallDyn(u8), // (argc); callee popped from the top
    CallDynTail(u8),
    CallForkedDyn(u8),
    Ret,

    // ========================================
    // Platform, futures, atomics
    // ========================================
    PCall(u32),
    FutureWaitNano,
    FutureBlock,
    CmpXchg(u32),
    AtomicBlock(u32),

    // ========================================
    // Failure
    // ========================================
    Assert(u32), // message pool id
    Fail,
}

// Opcode bytes
const OP_LOAD_LIT_INT: u8 = 0x01;
const OP_LOAD_LIT_LONG: u8 = 0x02;
const OP_LOAD_LIT_FLOAT: u8 = 0x03;
const OP_LOAD_LIT_STRING: u8 = 0x04;
const OP_LOAD_LIT_IP: u8 = 0x05;
const OP_ALLOC: u8 = 0x08;
const OP_LOAD: u8 = 0x09;
const OP_STORE: u8 = 0x0A;
const OP_DUP: u8 = 0x0C;
const OP_POP: u8 = 0x0D;
const OP_SWAP: u8 = 0x0E;
const OP_ADD_INT: u8 = 0x10;
const OP_SUB_INT: u8 = 0x11;
const OP_MUL_INT: u8 = 0x12;
const OP_DIV_INT: u8 = 0x13;
const OP_REM_INT: u8 = 0x14;
const OP_NEG_INT: u8 = 0x15;
const OP_AND_INT: u8 = 0x16;
const OP_OR_INT: u8 = 0x17;
const OP_XOR_INT: u8 = 0x18;
const OP_SHL_INT: u8 = 0x19;
const OP_SHR_INT: u8 = 0x1A;
const OP_EQ_INT: u8 = 0x1B;
const OP_NE_INT: u8 = 0x1C;
const OP_LT_INT: u8 = 0x1D;
const OP_LE_INT: u8 = 0x1E;
const OP_GT_INT: u8 = 0x1F;
const OP_GE_INT: u8 = 0x20;
const OP_ADD_LONG: u8 = 0x28;
const OP_SUB_LONG: u8 = 0x29;
const OP_MUL_LONG: u8 = 0x2A;
const OP_DIV_LONG: u8 = 0x2B;
const OP_REM_LONG: u8 = 0x2C;
const OP_NEG_LONG: u8 = 0x2D;
const OP_EQ_LONG: u8 = 0x2E;
const OP_NE_LONG: u8 = 0x2F;
const OP_LT_LONG: u8 = 0x30;
const OP_LE_LONG: u8 = 0x31;
const OP_GT_LONG: u8 = 0x32;
const OP_GE_LONG: u8 = 0x33;
const OP_ADD_FLOAT: u8 = 0x38;
const OP_SUB_FLOAT: u8 = 0x39;
const OP_MUL_FLOAT: u8 = 0x3A;
const OP_DIV_FLOAT: u8 = 0x3B;
const OP_NEG_FLOAT: u8 = 0x3C;
const OP_EQ_FLOAT: u8 = 0x3D;
const OP_NE_FLOAT: u8 = 0x3E;
const OP_LT_FLOAT: u8 = 0x3F;
const OP_LE_FLOAT: u8 = 0x40;
const OP_GT_FLOAT: u8 = 0x41;
const OP_GE_FLOAT: u8 = 0x42;
const OP_INT_TO_LONG: u8 = 0x48;
const OP_LONG_TO_INT: u8 = 0x49;
const OP_INT_TO_FLOAT: u8 = 0x4A;
const OP_FLOAT_TO_INT: u8 = 0x4B;
const OP_LONG_TO_FLOAT: u8 = 0x4C;
const OP_FLOAT_TO_LONG: u8 = 0x4D;
const OP_NOT: u8 = 0x4E;
const OP_EQ_VALUE: u8 = 0x4F;
const OP_CONCAT_STRING: u8 = 0x50;
const OP_LENGTH_STRING: u8 = 0x51;
const OP_EQ_STRING: u8 = 0x52;
const OP_SLICE_STRING: u8 = 0x53;
const OP_INT_TO_STRING: u8 = 0x54;
const OP_LONG_TO_STRING: u8 = 0x55;
const OP_FLOAT_TO_STRING: u8 = 0x56;
const OP_MAKE_STRUCT: u8 = 0x58;
const OP_LOAD_FIELD: u8 = 0x59;
const OP_STORE_FIELD: u8 = 0x5A;
const OP_MAKE_UNION: u8 = 0x5B;
const OP_UNION_TAG: u8 = 0x5C;
const OP_UNION_IS: u8 = 0x5D;
const OP_UNION_EXTRACT: u8 = 0x5E;
const OP_MAKE_CLOSURE: u8 = 0x5F;
const OP_JUMP: u8 = 0x60;
const OP_JUMP_IF: u8 = 0x61;
const OP_JUMP_IF_NOT: u8 = 0x62;
const OP_CALL: u8 = 0x68;
const OP_CALL_TAIL: u8 = 0x69;
const OP_CALL_FORKED: u8 = 0x6A;
const OP_CALL_DYN: u8 = 0x6B;
const OP_CALL_DYN_TAIL: u8 = 0x6C;
const OP_CALL_FORKED_DYN: u8 = 0x6D;
const OP_RET: u8 = 0x6E;
const OP_PCALL: u8 = 0x70;
const OP_FUTURE_WAIT_NANO: u8 = 0x74;
const OP_FUTURE_BLOCK: u8 = 0x75;
const OP_CMP_XCHG: u8 = 0x78;
const OP_ATOMIC_BLOCK: u8 = 0x79;
const OP_ASSERT: u8 = 0x7C;
const OP_FAIL: u8 = 0x7D;

impl Op {
    pub fn opcode(&self) -> u8 {
        match self {
            Op::LoadLitInt(_) => OP_LOAD_LIT_INT,
            Op::LoadLitLong(_) => OP_LOAD_LIT_LONG,
            Op::LoadLitFloat(_) => OP_LOAD_LIT_FLOAT,
            Op::LoadLitString(_) => OP_LOAD_LIT_STRING,
            Op::LoadLitIp(_) => OP_LOAD_LIT_IP,
            Op::Alloc(_) => OP_ALLOC,
            Op::Load(_) => OP_LOAD,
            Op::Store(_) => OP_STORE,
            Op::Dup => OP_DUP,
            Op::Pop => OP_POP,
            Op::Swap => OP_SWAP,
            Op::AddInt => OP_ADD_INT,
            Op::SubInt => OP_SUB_INT,
            Op::MulInt => OP_MUL_INT,
            Op::DivInt => OP_DIV_INT,
            Op::RemInt => OP_REM_INT,
            Op::NegInt => OP_NEG_INT,
            Op::AndInt => OP_AND_INT,
            Op::OrInt => OP_OR_INT,
            Op::XorInt => OP_XOR_INT,
            Op::ShlInt => OP_SHL_INT,
            Op::ShrInt => OP_SHR_INT,
            Op::EqInt => OP_EQ_INT,
            Op::NeInt => OP_NE_INT,
            Op::LtInt => OP_LT_INT,
            Op::LeInt => OP_LE_INT,
            Op::GtInt => OP_GT_INT,
            Op::GeInt => OP_GE_INT,
            Op::AddLong => OP_ADD_LONG,
            Op::SubLong => OP_SUB_LONG,
            Op::MulLong => OP_MUL_LONG,
            Op::DivLong => OP_DIV_LONG,
            Op::RemLong => OP_REM_LONG,
            Op::NegLong => OP_NEG_LONG,
            Op::EqLong => OP_EQ_LONG,
            Op::NeLong => OP_NE_LONG,
            Op::LtLong => OP_LT_LONG,
            Op::LeLong => OP_LE_LONG,
            Op::GtLong => OP_GT_LONG,
            Op::GeLong => OP_GE_LONG,
            Op::AddFloat => OP_ADD_FLOAT,
            Op::SubFloat => OP_SUB_FLOAT,
            Op::MulFloat => OP_MUL_FLOAT,
            Op::DivFloat => OP_DIV_FLOAT,
            Op::NegFloat => OP_NEG_FLOAT,
            Op::EqFloat => OP_EQ_FLOAT,
            Op::NeFloat => OP_NE_FLOAT,
            Op::LtFloat => OP_LT_FLOAT,
            Op::LeFloat => OP_LE_FLOAT,
            Op::GtFloat => OP_GT_FLOAT,
            Op::GeFloat => OP_GE_FLOAT,
            Op::IntToLong => OP_INT_TO_LONG,
            Op::LongToInt => OP_LONG_TO_INT,
            Op::IntToFloat => OP_INT_TO_FLOAT,
            Op::FloatToInt => OP_FLOAT_TO_INT,
            Op::LongToFloat => OP_LONG_TO_FLOAT,
            Op::FloatToLong => OP_FLOAT_TO_LONG,
            Op::Not => OP_NOT,
            Op::EqValue => OP_EQ_VALUE,
            Op::ConcatString => OP_CONCAT_STRING,
            Op::LengthString => OP_LENGTH_STRING,
            Op::EqString => OP_EQ_STRING,
            Op::SliceString => OP_SLICE_STRING,
            Op::IntToString => OP_INT_TO_STRING,
            Op::LongToString => OP_LONG_TO_STRING,
            Op::FloatToString => OP_FLOAT_TO_STRING,
            Op::MakeStruct(_) => OP_MAKE_STRUCT,
            Op::LoadField(_, _) => OP_LOAD_FIELD,
            Op::StoreField(_, _) => OP_STORE_FIELD,
            Op::MakeUnion(_) => OP_MAKE_UNION,
            Op::UnionTag => OP_UNION_TAG,
            Op::UnionIs(_) => OP_UNION_IS,
            Op::UnionExtract(_) => OP_UNION_EXTRACT,
            Op::MakeClosure(_, _) => OP_MAKE_CLOSURE,
            Op::Jump(_) => OP_JUMP,
            Op::JumpIf(_) => OP_JUMP_IF,
            Op::JumpIfNot(_) => OP_JUMP_IF_NOT,
            Op::Call(_, _) => OP_CALL,
            Op::CallTail(_, _) => OP_CALL_TAIL,
            Op::CallForked(_, _) => OP_CALL_FORKED,
            Op::CallDyn(_) => OP_CALL_DYN,
            Op::CallDynTail(_) => OP_CALL_DYN_TAIL,
            Op::CallForkedDyn(_) => OP_CALL_FORKED_DYN,
            Op::Ret => OP_RET,
            Op::PCall(_) => OP_PCALL,
            Op::FutureWaitNano => OP_FUTURE_WAIT_NANO,
            Op::FutureBlock => OP_FUTURE_BLOCK,
            Op::CmpXchg(_) => OP_CMP_XCHG,
            Op::AtomicBlock(_) => OP_ATOMIC_BLOCK,
            Op::Assert(_) => OP_ASSERT,
            Op::Fail => OP_FAIL,
        }
    }

    /// Returns the mnemonic used by the disassembler and the text assembler.
    pub fn name(&self) -> &'static str {
        match self {
            Op::LoadLitInt(_) => "LoadLitInt",
            Op::LoadLitLong(_) => "LoadLitLong",
            Op::LoadLitFloat(_) => "LoadLitFloat",
            Op::LoadLitString(_) => "LoadLitString",
            Op::LoadLitIp(_) => "LoadLitIp",
            Op::Alloc(_) => "Alloc",
            Op::Load(_) => "Load",
            Op::Store(_) => "Store",
            Op::Dup => "Dup",
            Op::Pop => "Pop",
            Op::Swap => "Swap",
            Op::AddInt => "AddInt",
            Op::SubInt => "SubInt",
            Op::MulInt => "MulInt",
            Op::DivInt => "DivInt",
            Op::RemInt => "RemInt",
            Op::NegInt => "NegInt",
            Op::AndInt => "AndInt",
            Op::OrInt => "OrInt",
            Op::XorInt => "XorInt",
            Op::ShlInt => "ShlInt",
            Op::ShrInt => "ShrInt",
            Op::EqInt => "EqInt",
            Op::NeInt => "NeInt",
            Op::LtInt => "LtInt",
            Op::LeInt => "LeInt",
            Op::GtInt => "GtInt",
            Op::GeInt => "GeInt",
            Op::AddLong => "AddLong",
            Op::SubLong => "SubLong",
            Op::MulLong => "MulLong",
            Op::DivLong => "DivLong",
            Op::RemLong => "RemLong",
            Op::NegLong => "NegLong",
            Op::EqLong => "EqLong",
            Op::NeLong => "NeLong",
            Op::LtLong => "LtLong",
            Op::LeLong => "LeLong",
            Op::GtLong => "GtLong",
            Op::GeLong => "GeLong",
            Op::AddFloat => "AddFloat",
            Op::SubFloat => "SubFloat",
            Op::MulFloat => "MulFloat",
            Op::DivFloat => "DivFloat",
            Op::NegFloat => "NegFloat",
            Op::EqFloat => "EqFloat",
            Op::NeFloat => "NeFloat",
            Op::LtFloat => "LtFloat",
            Op::LeFloat => "LeFloat",
            Op::GtFloat => "GtFloat",
            Op::GeFloat => "GeFloat",
            Op::IntToLong => "IntToLong",
            Op::LongToInt => "LongToInt",
            Op::IntToFloat => "IntToFloat",
            Op::FloatToInt => "FloatToInt",
            Op::LongToFloat => "LongToFloat",
            Op::FloatToLong => "FloatToLong",
            Op::Not => "Not",
            Op::EqValue => "EqValue",
            Op::ConcatString => "ConcatString",
            Op::LengthString => "LengthString",
            Op::EqString => "EqString",
            Op::SliceString => "SliceString",
            Op::IntToString => "IntToString",
            Op::LongToString => "LongToString",
            Op::FloatToString => "FloatToString",
            Op::MakeStruct(_) => "MakeStruct",
            Op::LoadField(_, _) => "LoadField",
            Op::StoreField(_, _) => "StoreField",
            Op::MakeUnion(_) => "MakeUnion",
            Op::UnionTag => "UnionTag",
            Op::UnionIs(_) => "UnionIs",
            Op::UnionExtract(_) => "UnionExtract",
            Op::MakeClosure(_, _) => "MakeClosure",
            Op::Jump(_) => "Jump",
            Op::JumpIf(_) => "JumpIf",
            Op::JumpIfNot(_) => "JumpIfNot",
            Op::Call(_, _) => "Call",
            Op::CallTail(_, _) => "CallTail",
            Op::CallForked(_, _) => "CallForked",
            Op::CallDyn(_) => "CallDyn",
            Op::CallDynTail(_) => "CallDynTail",
            Op::CallForkedDyn(_) => "CallForkedDyn",
            Op::Ret => "Ret",
            Op::PCall(_) => "PCall",
            Op::FutureWaitNano => "FutureWaitNano",
            Op::FutureBlock => "FutureBlock",
            Op::CmpXchg(_) => "CmpXchg",
            Op::AtomicBlock(_) => "AtomicBlock",
            Op::Assert(_) => "Assert",
            Op::Fail => "Fail",
        }
    }

    /// Operand shape, in encoding order.
    pub fn operands(&self) -> &'static [Operand] {
        match self {
            Op::LoadLitInt(_) => &[Operand::I32],
            Op::LoadLitLong(_) => &[Operand::I64],
            Op::LoadLitFloat(_) => &[Operand::F32],
            Op::LoadLitString(_) | Op::Assert(_) => &[Operand::Str],
            Op::LoadLitIp(_) | Op::Jump(_) | Op::JumpIf(_) | Op::JumpIfNot(_) => &[Operand::Ip],
            Op::Alloc(_)
            | Op::Load(_)
            | Op::Store(_)
            | Op::MakeStruct(_)
            | Op::MakeUnion(_)
            | Op::UnionIs(_)
            | Op::UnionExtract(_)
            | Op::PCall(_)
            | Op::CmpXchg(_)
            | Op::AtomicBlock(_) => &[Operand::U32],
            Op::LoadField(_, _) | Op::StoreField(_, _) => &[Operand::U32, Operand::U32],
            Op::MakeClosure(_, _) => &[Operand::Ip, Operand::U32],
            Op::Call(_, _) | Op::CallTail(_, _) | Op::CallForked(_, _) => {
                &[Operand::Ip, Operand::U8]
            }
            Op::CallDyn(_) | Op::CallDynTail(_) | Op::CallForkedDyn(_) => &[Operand::U8],
            _ => &[],
        }
    }

    /// Encoded size in bytes, opcode included.
    pub fn encoded_len(&self) -> usize {
        1 + self.operands().iter().map(|o| o.width()).sum::<usize>()
    }

    /// The instruction-pointer operand, if this instruction has one.
    pub fn target(&self) -> Option<u32> {
        match self {
            Op::LoadLitIp(ip)
            | Op::Jump(ip)
            | Op::JumpIf(ip)
            | Op::JumpIfNot(ip)
            | Op::MakeClosure(ip, _)
            | Op::Call(ip, _)
            | Op::CallTail(ip, _)
            | Op::CallForked(ip, _) => Some(*ip),
            _ => None,
        }
    }

    /// Same instruction with its instruction-pointer operand replaced.
    pub fn with_target(self, target: u32) -> Option<Op> {
        let op = match self {
            Op::LoadLitIp(_) => Op::LoadLitIp(target),
            Op::Jump(_) => Op::Jump(target),
            Op::JumpIf(_) => Op::JumpIf(target),
            Op::JumpIfNot(_) => Op::JumpIfNot(target),
            Op::MakeClosure(_, n) => Op::MakeClosure(target, n),
            Op::Call(_, argc) => Op::Call(target, argc),
            Op::CallTail(_, argc) => Op::CallTail(target, argc),
            Op::CallForked(_, argc) => Op::CallForked(target, argc),
            _ => return None,
        };
        Some(op)
    }

    /// Append the encoding of this instruction to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.opcode());
        match *self {
            Op::LoadLitInt(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Op::LoadLitLong(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Op::LoadLitFloat(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Op::LoadLitString(n)
            | Op::LoadLitIp(n)
            | Op::Alloc(n)
            | Op::Load(n)
            | Op::Store(n)
            | Op::MakeStruct(n)
            | Op::MakeUnion(n)
            | Op::UnionIs(n)
            | Op::UnionExtract(n)
            | Op::Jump(n)
            | Op::JumpIf(n)
            | Op::JumpIfNot(n)
            | Op::PCall(n)
            | Op::CmpXchg(n)
            | Op::AtomicBlock(n)
            | Op::Assert(n) => buf.extend_from_slice(&n.to_le_bytes()),
            Op::LoadField(a, b) | Op::StoreField(a, b) | Op::MakeClosure(a, b) => {
                buf.extend_from_slice(&a.to_le_bytes());
                buf.extend_from_slice(&b.to_le_bytes());
            }
            Op::Call(ip, argc) | Op::CallTail(ip, argc) | Op::CallForked(ip, argc) => {
                buf.extend_from_slice(&ip.to_le_bytes());
                buf.push(argc);
            }
            Op::CallDyn(argc) | Op::CallDynTail(argc) | Op::CallForkedDyn(argc) => buf.push(argc),
            _ => {}
        }
    }

    /// Decode the instruction starting at `ip`, returning it and the offset of the next one.
    pub fn decode(code: &[u8], ip: usize) -> Result<(Op, usize), DecodeError> {
        let mut r = Reader { code, start: ip, pos: ip };
        let tag = r.u8()?;
        let op = match tag {
            OP_LOAD_LIT_INT => Op::LoadLitInt(r.i32()?),
            OP_LOAD_LIT_LONG => Op::LoadLitLong(r.i64()?),
            OP_LOAD_LIT_FLOAT => Op::LoadLitFloat(r.f32()?),
            OP_LOAD_LIT_STRING => Op::LoadLitString(r.u32()?),
            OP_LOAD_LIT_IP => Op::LoadLitIp(r.u32()?),
            OP_ALLOC => Op::Alloc(r.u32()?),
            OP_LOAD => Op::Load(r.u32()?),
            OP_STORE => Op::Store(r.u32()?),
            OP_DUP => Op::Dup,
            OP_POP => Op::Pop,
            OP_SWAP => Op::Swap,
            OP_ADD_INT => Op::AddInt,
            OP_SUB_INT => Op::SubInt,
            OP_MUL_INT => Op::MulInt,
            OP_DIV_INT => Op::DivInt,
            OP_REM_INT => Op::RemInt,
            OP_NEG_INT => Op::NegInt,
            OP_AND_INT => Op::AndInt,
            OP_OR_INT => Op::OrInt,
            OP_XOR_INT => Op::XorInt,
            OP_SHL_INT => Op::ShlInt,
            OP_SHR_INT => Op::ShrInt,
            OP_EQ_INT => Op::EqInt,
            OP_NE_INT => Op::NeInt,
            OP_LT_INT => Op::LtInt,
            OP_LE_INT => Op::LeInt,
            OP_GT_INT => Op::GtInt,
            OP_GE_INT => Op::GeInt,
            OP_ADD_LONG => Op::AddLong,
            OP_SUB_LONG => Op::SubLong,
            OP_MUL_LONG => Op::MulLong,
            OP_DIV_LONG => Op::DivLong,
            OP_REM_LONG => Op::RemLong,
            OP_NEG_LONG => Op::NegLong,
            OP_EQ_LONG => Op::EqLong,
            OP_NE_LONG => Op::NeLong,
            OP_LT_LONG => Op::LtLong,
            OP_LE_LONG => Op::LeLong,
            OP_GT_LONG => Op::GtLong,
            OP_GE_LONG => Op::GeLong,
            OP_ADD_FLOAT => Op::AddFloat,
            OP_SUB_FLOAT => Op::SubFloat,
            OP_MUL_FLOAT => Op::MulFloat,
            OP_DIV_FLOAT => Op::DivFloat,
            OP_NEG_FLOAT => Op::NegFloat,
            OP_EQ_FLOAT => Op::EqFloat,
            OP_NE_FLOAT => Op::NeFloat,
            OP_LT_FLOAT => Op::LtFloat,
            OP_LE_FLOAT => Op::LeFloat,
            OP_GT_FLOAT => Op::GtFloat,
            OP_GE_FLOAT => Op::GeFloat,
            OP_INT_TO_LONG => Op::IntToLong,
            OP_LONG_TO_INT => Op::LongToInt,
            OP_INT_TO_FLOAT => Op::IntToFloat,
            OP_FLOAT_TO_INT => Op::FloatToInt,
            OP_LONG_TO_FLOAT => Op::LongToFloat,
            OP_FLOAT_TO_LONG => Op::FloatToLong,
            OP_NOT => Op::Not,
            OP_EQ_VALUE => Op::EqValue,
            OP_CONCAT_STRING => Op::ConcatString,
            OP_LENGTH_STRING => Op::LengthString,
            OP_EQ_STRING => Op::EqString,
            OP_SLICE_STRING => Op::SliceString,
            OP_INT_TO_STRING => Op::IntToString,
            OP_LONG_TO_STRING => Op::LongToString,
            OP_FLOAT_TO_STRING => Op::FloatToString,
            OP_MAKE_STRUCT => Op::MakeStruct(r.u32()?),
            OP_LOAD_FIELD => {
                let count = r.u32()?;
                let index = r.u32()?;
                Op::LoadField(count, index)
            }
            OP_STORE_FIELD => {
                let count = r.u32()?;
                let index = r.u32()?;
                Op::StoreField(count, index)
            }
            OP_MAKE_UNION => Op::MakeUnion(r.u32()?),
            OP_UNION_TAG => Op::UnionTag,
            OP_UNION_IS => Op::UnionIs(r.u32()?),
            OP_UNION_EXTRACT => Op::UnionExtract(r.u32()?),
            OP_MAKE_CLOSURE => {
                let target = r.u32()?;
                let bound = r.u32()?;
                Op::MakeClosure(target, bound)
            }
            OP_JUMP => Op::Jump(r.u32()?),
            OP_JUMP_IF => Op::JumpIf(r.u32()?),
            OP_JUMP_IF_NOT => Op::JumpIfNot(r.u32()?),
            OP_CALL => {
                let target = r.u32()?;
                Op::Call(target, r.u8()?)
            }
            OP_CALL_TAIL => {
                let target = r.u32()?;
                Op::CallTail(target, r.u8()?)
            }
            OP_CALL_FORKED => {
                let target = r.u32()?;
                Op::CallForked(target, r.u8()?)
            }
            OP_CALL_DYN => Op::CallDyn(r.u8()?),
            OP_CALL_DYN_TAIL => Op::CallDynTail(r.u8()?),
            OP_CALL_FORKED_DYN => Op::CallForkedDyn(r.u8()?),
            OP_RET => Op::Ret,
            OP_PCALL => Op::PCall(r.u32()?),
            OP_FUTURE_WAIT_NANO => Op::FutureWaitNano,
            OP_FUTURE_BLOCK => Op::FutureBlock,
            OP_CMP_XCHG => Op::CmpXchg(r.u32()?),
            OP_ATOMIC_BLOCK => Op::AtomicBlock(r.u32()?),
            OP_ASSERT => Op::Assert(r.u32()?),
            OP_FAIL => Op::Fail,
            _ => return Err(DecodeError::UnknownOpcode { ip, opcode: tag }),
        };
        Ok((op, r.pos))
    }

    /// Look up an instruction by mnemonic. Operands are zeroed.
    pub fn from_name(name: &str) -> Option<Op> {
        let mut scratch = [0u8; 16];
        (0..=u8::MAX).find_map(|tag| {
            scratch[0] = tag;
            match Op::decode(&scratch, 0) {
                Ok((op, _)) if op.name() == name => Some(op),
                _ => None,
            }
        })
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match *self {
            Op::LoadLitInt(v) => write!(f, " {}", v),
            Op::LoadLitLong(v) => write!(f, " {}", v),
            Op::LoadLitFloat(v) => write!(f, " {:?}", v),
            Op::LoadLitString(id) | Op::Assert(id) => write!(f, " #{}", id),
            Op::LoadLitIp(ip) | Op::Jump(ip) | Op::JumpIf(ip) | Op::JumpIfNot(ip) => {
                write!(f, " @{}", ip)
            }
            Op::Alloc(n)
            | Op::Load(n)
            | Op::Store(n)
            | Op::MakeStruct(n)
            | Op::MakeUnion(n)
            | Op::UnionIs(n)
            | Op::UnionExtract(n)
            | Op::PCall(n)
            | Op::CmpXchg(n)
            | Op::AtomicBlock(n) => write!(f, " {}", n),
            Op::LoadField(count, index) | Op::StoreField(count, index) => {
                write!(f, " {} {}", count, index)
            }
            Op::MakeClosure(ip, n) => write!(f, " @{} {}", ip, n),
            Op::Call(ip, argc) | Op::CallTail(ip, argc) | Op::CallForked(ip, argc) => {
                write!(f, " @{} {}", ip, argc)
            }
            Op::CallDyn(argc) | Op::CallDynTail(argc) | Op::CallForkedDyn(argc) => {
                write!(f, " {}", argc)
            }
            _ => Ok(()),
        }
    }
}

struct Reader<'a> {
    code: &'a [u8],
    start: usize,
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos.checked_add(N);
        let bytes = end
            .and_then(|end| self.code.get(self.pos..end))
            .ok_or(DecodeError::Truncated { ip: self.start })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos += N;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take()?))
    }
}
