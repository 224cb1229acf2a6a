//! Decoding an assembly back into instruction records, for diagnostics.

use serde::Serialize;

use super::Assembly;
use super::error::DecodeError;
use super::ops::Op;

/// One decoded instruction and the offset it starts at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instr {
    pub ip: u32,
    #[serde(flatten)]
    pub op: Op,
}

/// Decode the whole instruction stream, in order.
///
/// Each instruction consumes exactly its declared operand width; the first
/// unknown opcode or truncated operand aborts the decode.
pub fn disassemble(assembly: &Assembly) -> Result<Vec<Instr>, DecodeError> {
    let code = assembly.code();
    let mut instrs = Vec::new();
    let mut ip = 0;
    while ip < code.len() {
        let (op, next) = Op::decode(code, ip)?;
        instrs.push(Instr { ip: ip as u32, op });
        ip = next;
    }
    Ok(instrs)
}

/// Machine-readable form of an assembly.
#[derive(Debug, Serialize)]
pub struct Listing<'a> {
    pub entry: u32,
    pub strings: Vec<&'a str>,
    pub code: Vec<Instr>,
}

impl<'a> Listing<'a> {
    pub fn new(assembly: &'a Assembly) -> Result<Self, DecodeError> {
        Ok(Self {
            entry: assembly.entry(),
            strings: assembly.strings().iter().map(|s| &**s).collect(),
            code: disassemble(assembly)?,
        })
    }
}

/// Human-readable listing of an assembly.
pub struct Disassembler<'a> {
    assembly: &'a Assembly,
    output: String,
}

impl<'a> Disassembler<'a> {
    pub fn new(assembly: &'a Assembly) -> Self {
        Self {
            assembly,
            output: String::new(),
        }
    }

    pub fn disassemble(&mut self) -> Result<&str, DecodeError> {
        let instrs = disassemble(self.assembly)?;

        let strings = self.assembly.strings();
        if !strings.is_empty() {
            self.output.push_str("== String Constants ==\n");
            for (i, s) in strings.iter().enumerate() {
                self.output
                    .push_str(&format!("  [{:04}] \"{}\"\n", i, escape(s)));
            }
            self.output.push('\n');
        }

        self.output.push_str(&format!(
            "== Code ({} bytes, entry @{}) ==\n",
            self.assembly.code().len(),
            self.assembly.entry()
        ));
        for instr in &instrs {
            let marker = if instr.ip == self.assembly.entry() { '>' } else { ' ' };
            self.output
                .push_str(&format!("{}{:04}: {}", marker, instr.ip, instr.op));
            self.annotate(&instr.op);
            self.output.push('\n');
        }

        Ok(&self.output)
    }

    fn annotate(&mut self, op: &Op) {
        match op {
            Op::LoadLitString(id) | Op::Assert(id) => match self.assembly.string(*id) {
                Some(s) => self.output.push_str(&format!(" ; \"{}\"", escape(s))),
                None => self.output.push_str(" ; <bad string id>"),
            },
            Op::PCall(code) => {
                if let Some(pcall) = crate::platform::PCall::from_code(*code) {
                    self.output.push_str(&format!(" ; {}", pcall.name()));
                }
            }
            _ => {}
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
        .replace('"', "\\\"")
}

/// Format an assembly as a human-readable listing.
pub fn format_assembly(assembly: &Assembly) -> Result<String, DecodeError> {
    let mut disassembler = Disassembler::new(assembly);
    Ok(disassembler.disassemble()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::assembler::Assembler;

    fn sample() -> Assembly {
        let mut asm = Assembler::new();
        asm.label("main").unwrap();
        asm.load_string("hi\n").unwrap();
        asm.emit(Op::PCall(0x30)).unwrap();
        asm.emit(Op::Pop).unwrap();
        asm.emit(Op::LoadLitInt(2)).unwrap();
        asm.emit(Op::LoadLitInt(3)).unwrap();
        asm.emit(Op::AddInt).unwrap();
        asm.emit(Op::Ret).unwrap();
        asm.entry("main").unwrap();
        asm.close().unwrap()
    }

    #[test]
    fn test_disassemble_offsets() {
        let instrs = disassemble(&sample()).unwrap();
        let ips: Vec<u32> = instrs.iter().map(|i| i.ip).collect();
        assert_eq!(ips, vec![0, 5, 10, 11, 16, 21, 22]);
        assert_eq!(instrs[5].op, Op::AddInt);
    }

    #[test]
    fn test_bad_opcode_is_reported() {
        let assembly = Assembly::new(vec![0x0C, 0xFE], vec![], 0);
        assert_eq!(
            disassemble(&assembly),
            Err(DecodeError::UnknownOpcode { ip: 1, opcode: 0xFE })
        );
    }

    #[test]
    fn test_human_listing() {
        let output = format_assembly(&sample()).unwrap();
        assert!(output.contains("== String Constants =="));
        assert!(output.contains("[0000] \"hi\\n\""));
        assert!(output.contains(">0000: LoadLitString #0 ; \"hi\\n\""));
        assert!(output.contains("PCall 48 ; ConsolePrint"));
        assert!(output.contains(" 0021: AddInt"));
    }

    #[test]
    fn test_json_listing() {
        let assembly = sample();
        let listing = Listing::new(&assembly).unwrap();
        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["entry"], 0);
        assert_eq!(json["strings"][0], "hi\n");
        assert_eq!(json["code"][3]["op"], "LoadLitInt");
        assert_eq!(json["code"][3]["args"], 2);
        assert_eq!(json["code"][5]["ip"], 21);
    }
}
