//! On-disk container for an [`Assembly`].
//!
//! Binary format:
//! - Magic: "KILN" (4 bytes)
//! - Version: u32 (little-endian)
//! - String pool: count + (length + UTF-8 bytes) per string
//! - Entrypoint: u32 instruction offset
//! - Code: length + instruction bytes

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use super::Assembly;
use super::disasm::disassemble;
use super::error::DecodeError;

/// Magic bytes for kiln bytecode files
pub const MAGIC: &[u8; 4] = b"KILN";

/// Current container format version
pub const VERSION: u32 = 1;

/// Error type for container operations
#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("invalid magic number")]
    InvalidMagic,
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// True when `data` starts with the container magic.
pub fn is_bytecode(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Serialize an assembly to bytes.
pub fn serialize(assembly: &Assembly) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + assembly.code().len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());

    buf.extend_from_slice(&(assembly.strings().len() as u32).to_le_bytes());
    for s in assembly.strings() {
        buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    buf.extend_from_slice(&assembly.entry().to_le_bytes());

    buf.extend_from_slice(&(assembly.code().len() as u32).to_le_bytes());
    buf.extend_from_slice(assembly.code());
    buf
}

/// Deserialize an assembly from bytes.
pub fn deserialize(data: &[u8]) -> Result<Assembly, BytecodeError> {
    let mut cursor = io::Cursor::new(data);
    read_assembly(&mut cursor)
}

pub fn write_assembly<W: Write>(w: &mut W, assembly: &Assembly) -> io::Result<()> {
    w.write_all(&serialize(assembly))
}

/// Read an assembly and check that its instruction stream decodes.
pub fn read_assembly<R: Read>(r: &mut R) -> Result<Assembly, BytecodeError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| BytecodeError::UnexpectedEof)?;
    if &magic != MAGIC {
        return Err(BytecodeError::InvalidMagic);
    }

    let version = read_u32(r)?;
    if version != VERSION {
        return Err(BytecodeError::UnsupportedVersion(version));
    }

    let string_count = read_u32(r)? as usize;
    let mut strings = Vec::new();
    for _ in 0..string_count {
        strings.push(Arc::from(read_string(r)?));
    }

    let entry = read_u32(r)?;
    let code = read_bytes(r)?;

    let assembly = Assembly::new(code, strings, entry);
    disassemble(&assembly)?;
    Ok(assembly)
}

pub fn save(path: &Path, assembly: &Assembly) -> Result<(), BytecodeError> {
    let mut file = fs::File::create(path)?;
    write_assembly(&mut file, assembly)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<Assembly, BytecodeError> {
    let data = fs::read(path)?;
    deserialize(&data)
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, BytecodeError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|_| BytecodeError::UnexpectedEof)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>, BytecodeError> {
    let len = read_u32(r)? as u64;
    let mut buf = Vec::new();
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(BytecodeError::UnexpectedEof);
    }
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R) -> Result<String, BytecodeError> {
    let buf = read_bytes(r)?;
    String::from_utf8(buf).map_err(|_| BytecodeError::InvalidUtf8)
}
