use crate::bytecode::{OpCode, as_usize};

/// Emits bytecode records one opcode at a time.
pub struct BytecodeBuilder {
    code: Vec<u8>,
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    /// Byte offset of the next record, usable as a jump target.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    pub fn halt(&mut self) {
        self.opcode(OpCode::Halt);
    }

    pub fn capability(&mut self, name: &str) {
        self.opcode(OpCode::Capability);
        self.name(name);
    }

    pub fn capability_check(&mut self, name: &str) {
        self.opcode(OpCode::CapabilityCheck);
        self.name(name);
    }

    pub fn push(&mut self, value: f64) {
        self.opcode(OpCode::Push);
        self.float(value);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.opcode(OpCode::PushBytes);
        self.length(bytes.len());
        self.bytes(bytes);
    }

    pub fn jump(&mut self, conditional: bool, target: usize) {
        self.opcode(OpCode::Jump);
        self.boolean(conditional);
        self.length(target);
    }

    pub fn mem_load(&mut self, byte_mode: bool) {
        self.opcode(OpCode::MemLoad);
        self.boolean(byte_mode);
    }

    pub fn mem_store(&mut self, byte_mode: bool) {
        self.opcode(OpCode::MemStore);
        self.boolean(byte_mode);
    }

    /// Emits a bare opcode byte; enough on its own for `add`, `dup`, `memplz` and friends.
    pub fn opcode(&mut self, opcode: OpCode) {
        self.code.push(opcode as u8);
    }

    pub fn float(&mut self, value: f64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Encodes `value` as a double. Values above `MAX_SAFE_INTEGER` cannot be
    /// represented exactly and are rejected by the reader as `InvalidOperand`.
    pub fn uint(&mut self, value: u64) {
        self.float(value as f64);
    }

    pub fn byte(&mut self, value: u8) {
        self.code.push(value);
    }

    pub fn bytes(&mut self, values: &[u8]) {
        self.code.extend_from_slice(values);
    }

    pub fn boolean(&mut self, value: bool) {
        self.code.push(u8::from(value));
    }

    fn name(&mut self, name: &str) {
        self.length(name.len());
        self.bytes(name.as_bytes());
    }

    fn length(&mut self, len: usize) {
        self.uint(len as u64);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for AsmParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for AsmParseError {}

/// Assembles one-instruction-per-line source into bytecode.
///
/// Operands follow the opcode's record layout: `push 2.5`, `pushbytes 104 105`,
/// `jump true 42`, `memload byte`, `capability clock`. Jump targets are byte offsets.
pub fn assemble(source: &str) -> Result<Vec<u8>, AsmParseError> {
    let mut builder = BytecodeBuilder::new();

    for (line_idx, raw_line) in source.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = strip_comments(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let op = parts.next().ok_or_else(|| AsmParseError {
            line: line_no,
            message: "missing opcode".to_string(),
        })?;
        let opcode = OpCode::parse_mnemonic(op).ok_or_else(|| AsmParseError {
            line: line_no,
            message: format!("unknown opcode '{op}'"),
        })?;

        match opcode {
            OpCode::Push => {
                let token = next_token(&mut parts, line_no, "push literal")?;
                builder.push(parse_f64(token, line_no, "float literal")?);
            }
            OpCode::PushBytes => {
                let bytes = parts
                    .by_ref()
                    .map(|token| parse_u8(token, line_no))
                    .collect::<Result<Vec<u8>, _>>()?;
                builder.push_bytes(&bytes);
            }
            OpCode::Jump => {
                let conditional = parse_bool(
                    next_token(&mut parts, line_no, "jump condition flag")?,
                    line_no,
                )?;
                let target = next_token(&mut parts, line_no, "jump target")?;
                builder.jump(conditional, parse_target(target, line_no)?);
            }
            OpCode::MemLoad | OpCode::MemStore => {
                let mode = parse_mode(next_token(&mut parts, line_no, "access mode")?, line_no)?;
                if opcode == OpCode::MemLoad {
                    builder.mem_load(mode);
                } else {
                    builder.mem_store(mode);
                }
            }
            OpCode::Capability | OpCode::CapabilityCheck => {
                let name = next_token(&mut parts, line_no, "capability name")?;
                if opcode == OpCode::Capability {
                    builder.capability(name);
                } else {
                    builder.capability_check(name);
                }
            }
            other => builder.opcode(other),
        }

        if parts.next().is_some() {
            return Err(AsmParseError {
                line: line_no,
                message: "unexpected extra tokens".to_string(),
            });
        }
    }

    Ok(builder.finish())
}

fn strip_comments(line: &str) -> &str {
    let hash_idx = line.find('#');
    let slash_idx = line.find("//");
    match (hash_idx, slash_idx) {
        (Some(h), Some(s)) => &line[..h.min(s)],
        (Some(h), None) => &line[..h],
        (None, Some(s)) => &line[..s],
        (None, None) => line,
    }
}

fn next_token<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    line_no: usize,
    what: &str,
) -> Result<&'a str, AsmParseError> {
    parts.next().ok_or_else(|| AsmParseError {
        line: line_no,
        message: format!("missing {what}"),
    })
}

fn parse_u8(token: &str, line_no: usize) -> Result<u8, AsmParseError> {
    token.parse::<u8>().map_err(|_| AsmParseError {
        line: line_no,
        message: format!("invalid byte '{token}'"),
    })
}

fn parse_f64(token: &str, line_no: usize, what: &str) -> Result<f64, AsmParseError> {
    token.parse::<f64>().map_err(|_| AsmParseError {
        line: line_no,
        message: format!("invalid {what} '{token}'"),
    })
}

fn parse_target(token: &str, line_no: usize) -> Result<usize, AsmParseError> {
    let value = parse_f64(token, line_no, "jump target")?;
    as_usize(value, "jump target").map_err(|_| AsmParseError {
        line: line_no,
        message: format!("jump target '{token}' must be a non-negative byte offset"),
    })
}

fn parse_bool(token: &str, line_no: usize) -> Result<bool, AsmParseError> {
    match token {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(AsmParseError {
            line: line_no,
            message: format!("invalid boolean '{other}'"),
        }),
    }
}

fn parse_mode(token: &str, line_no: usize) -> Result<bool, AsmParseError> {
    match token {
        "byte" | "1" | "true" => Ok(true),
        "float" | "0" | "false" => Ok(false),
        other => Err(AsmParseError {
            line: line_no,
            message: format!("invalid access mode '{other}', expected 'byte' or 'float'"),
        }),
    }
}
