use std::fmt::Write;

use crate::bytecode::{BytecodeReader, Instruction};
use crate::vm::VmError;

#[derive(Debug, Clone, PartialEq)]
pub struct DisasmError {
    pub offset: usize,
    pub error: VmError,
}

impl std::fmt::Display for DisasmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "offset {}: {}", self.offset, self.error)
    }
}

impl std::error::Error for DisasmError {}

/// Decodes every record in `code`, paired with its byte offset.
pub fn decode_all(code: &[u8]) -> Result<Vec<(usize, Instruction)>, DisasmError> {
    let mut reader = BytecodeReader::new(code.to_vec());
    let mut out = Vec::new();
    loop {
        let offset = reader.position();
        match reader.read_instruction() {
            Ok(Some(instruction)) => out.push((offset, instruction)),
            Ok(None) => return Ok(out),
            Err(error) => return Err(DisasmError { offset, error }),
        }
    }
}

/// Renders `code` as an assembler-compatible listing, one record per line
/// followed by its offset as a comment.
pub fn disassemble(code: &[u8]) -> Result<String, DisasmError> {
    let mut out = String::new();
    for (offset, instruction) in decode_all(code)? {
        let text = instruction.to_string();
        let _ = writeln!(out, "{text:<24} # {offset:>6}");
    }
    Ok(out)
}
