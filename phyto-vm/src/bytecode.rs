use crate::vm::{VmError, VmResult};

/// Largest integer a double holds exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Halt = 0x00,
    Capability = 0x01,
    CapabilityCheck = 0x02,
    Push = 0x03,
    PushBytes = 0x04,
    Pop = 0x05,
    Swap = 0x06,
    Dup = 0x07,
    Dup2 = 0x08,
    Over = 0x09,
    Select = 0x0A,
    Jump = 0x0B,
    MemPlz = 0x0C,
    MemCya = 0x0D,
    MemLoad = 0x0E,
    MemStore = 0x0F,
    Eq = 0x10,
    Lt = 0x11,
    Gt = 0x12,
    Lte = 0x13,
    Gte = 0x14,
    Nan = 0x15,
    Finite = 0x16,
    Positive = 0x17,
    Integer = 0x18,
    Not = 0x19,
    Truthy = 0x1A,
    Falsy = 0x1B,
    Abs = 0x1C,
    Sign = 0x1D,
    Min = 0x1E,
    Max = 0x1F,
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Rem = 0x24,
    Neg = 0x25,
    Floor = 0x26,
    Ceil = 0x27,
    Trunc = 0x28,
    Round = 0x29,
    Sqrt = 0x2A,
    Cbrt = 0x2B,
    MemCheck = 0x2C,
}

impl OpCode {
    pub const ALL: [OpCode; 45] = [
        OpCode::Halt,
        OpCode::Capability,
        OpCode::CapabilityCheck,
        OpCode::Push,
        OpCode::PushBytes,
        OpCode::Pop,
        OpCode::Swap,
        OpCode::Dup,
        OpCode::Dup2,
        OpCode::Over,
        OpCode::Select,
        OpCode::Jump,
        OpCode::MemPlz,
        OpCode::MemCya,
        OpCode::MemLoad,
        OpCode::MemStore,
        OpCode::Eq,
        OpCode::Lt,
        OpCode::Gt,
        OpCode::Lte,
        OpCode::Gte,
        OpCode::Nan,
        OpCode::Finite,
        OpCode::Positive,
        OpCode::Integer,
        OpCode::Not,
        OpCode::Truthy,
        OpCode::Falsy,
        OpCode::Abs,
        OpCode::Sign,
        OpCode::Min,
        OpCode::Max,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Rem,
        OpCode::Neg,
        OpCode::Floor,
        OpCode::Ceil,
        OpCode::Trunc,
        OpCode::Round,
        OpCode::Sqrt,
        OpCode::Cbrt,
        OpCode::MemCheck,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Halt => "halt",
            OpCode::Capability => "capability",
            OpCode::CapabilityCheck => "capabilitycheck",
            OpCode::Push => "push",
            OpCode::PushBytes => "pushbytes",
            OpCode::Pop => "pop",
            OpCode::Swap => "swap",
            OpCode::Dup => "dup",
            OpCode::Dup2 => "dup2",
            OpCode::Over => "over",
            OpCode::Select => "select",
            OpCode::Jump => "jump",
            OpCode::MemPlz => "memplz",
            OpCode::MemCya => "memcya",
            OpCode::MemLoad => "memload",
            OpCode::MemStore => "memstore",
            OpCode::Eq => "eq",
            OpCode::Lt => "lt",
            OpCode::Gt => "gt",
            OpCode::Lte => "lte",
            OpCode::Gte => "gte",
            OpCode::Nan => "nan",
            OpCode::Finite => "finite",
            OpCode::Positive => "positive",
            OpCode::Integer => "integer",
            OpCode::Not => "not",
            OpCode::Truthy => "truthy",
            OpCode::Falsy => "falsy",
            OpCode::Abs => "abs",
            OpCode::Sign => "sign",
            OpCode::Min => "min",
            OpCode::Max => "max",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Div => "div",
            OpCode::Rem => "rem",
            OpCode::Neg => "neg",
            OpCode::Floor => "floor",
            OpCode::Ceil => "ceil",
            OpCode::Trunc => "trunc",
            OpCode::Round => "round",
            OpCode::Sqrt => "sqrt",
            OpCode::Cbrt => "cbrt",
            OpCode::MemCheck => "memcheck",
        }
    }

    /// Mnemonics are case-sensitive.
    pub fn parse_mnemonic(op: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|opcode| opcode.mnemonic() == op)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One fully decoded record: the opcode plus everything it consumed from the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Halt,
    Capability(String),
    CapabilityCheck(String),
    Push(f64),
    PushBytes(Vec<u8>),
    Jump { conditional: bool, target: usize },
    MemLoad { byte_mode: bool },
    MemStore { byte_mode: bool },
    /// Opcodes that take no stream operands.
    Simple(OpCode),
}

impl Instruction {
    pub fn opcode(&self) -> OpCode {
        match self {
            Instruction::Halt => OpCode::Halt,
            Instruction::Capability(_) => OpCode::Capability,
            Instruction::CapabilityCheck(_) => OpCode::CapabilityCheck,
            Instruction::Push(_) => OpCode::Push,
            Instruction::PushBytes(_) => OpCode::PushBytes,
            Instruction::Jump { .. } => OpCode::Jump,
            Instruction::MemLoad { .. } => OpCode::MemLoad,
            Instruction::MemStore { .. } => OpCode::MemStore,
            Instruction::Simple(opcode) => *opcode,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Capability(name) | Instruction::CapabilityCheck(name) => {
                write!(f, "{} {name}", self.opcode())
            }
            Instruction::Push(value) => write!(f, "push {value:?}"),
            Instruction::PushBytes(bytes) => {
                f.write_str("pushbytes")?;
                for byte in bytes {
                    write!(f, " {byte}")?;
                }
                Ok(())
            }
            Instruction::Jump {
                conditional,
                target,
            } => write!(f, "jump {conditional} {target}"),
            Instruction::MemLoad { byte_mode } | Instruction::MemStore { byte_mode } => {
                let mode = if *byte_mode { "byte" } else { "float" };
                write!(f, "{} {mode}", self.opcode())
            }
            Instruction::Halt | Instruction::Simple(_) => write!(f, "{}", self.opcode()),
        }
    }
}

/// Validates that `value` is a non-negative integer a double represents exactly.
pub fn as_uint(value: f64, what: &'static str) -> VmResult<u64> {
    if value.fract() != 0.0 || !(0.0..=MAX_SAFE_INTEGER).contains(&value) {
        return Err(VmError::InvalidOperand(what));
    }
    Ok(value as u64)
}

pub fn as_usize(value: f64, what: &'static str) -> VmResult<usize> {
    let value = as_uint(value, what)?;
    usize::try_from(value).map_err(|_| VmError::InvalidOperand(what))
}

#[derive(Clone, Debug)]
pub struct BytecodeReader {
    code: Vec<u8>,
    position: usize,
}

impl BytecodeReader {
    pub fn new(code: Vec<u8>) -> Self {
        Self { code, position: 0 }
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.code.len()
    }

    pub fn read_opcode(&mut self) -> Option<u8> {
        let byte = self.code.get(self.position).copied()?;
        self.position += 1;
        Some(byte)
    }

    pub fn read_byte(&mut self) -> VmResult<u8> {
        let byte = self
            .code
            .get(self.position)
            .copied()
            .ok_or(VmError::UnexpectedEndOfStream)?;
        self.position += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, count: usize) -> VmResult<&[u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.code.len())
            .ok_or(VmError::UnexpectedEndOfStream)?;
        let bytes = &self.code[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn read_float(&mut self) -> VmResult<f64> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    pub fn read_uint(&mut self) -> VmResult<u64> {
        let value = self.read_float()?;
        as_uint(value, "unsigned integer operand")
    }

    pub fn read_bool(&mut self) -> VmResult<bool> {
        Ok(self.read_byte()? != 0)
    }

    /// Decodes the record at the cursor. The opcode byte must already be consumed.
    pub fn read_operands(&mut self, opcode: OpCode) -> VmResult<Instruction> {
        let instruction = match opcode {
            OpCode::Halt => Instruction::Halt,
            OpCode::Capability => Instruction::Capability(self.read_name()?),
            OpCode::CapabilityCheck => Instruction::CapabilityCheck(self.read_name()?),
            OpCode::Push => Instruction::Push(self.read_float()?),
            OpCode::PushBytes => {
                let len = self.read_length()?;
                Instruction::PushBytes(self.read_bytes(len)?.to_vec())
            }
            OpCode::Jump => {
                let conditional = self.read_bool()?;
                let target = self.read_uint()?;
                let target =
                    usize::try_from(target).map_err(|_| VmError::InvalidOperand("jump target"))?;
                Instruction::Jump {
                    conditional,
                    target,
                }
            }
            OpCode::MemLoad => Instruction::MemLoad {
                byte_mode: self.read_bool()?,
            },
            OpCode::MemStore => Instruction::MemStore {
                byte_mode: self.read_bool()?,
            },
            other => Instruction::Simple(other),
        };
        Ok(instruction)
    }

    /// Reads one whole record, opcode included. `Ok(None)` at end of stream.
    pub fn read_instruction(&mut self) -> VmResult<Option<Instruction>> {
        let Some(byte) = self.read_opcode() else {
            return Ok(None);
        };
        let opcode = OpCode::from_byte(byte).ok_or(VmError::UnknownOpcode(byte))?;
        self.read_operands(opcode).map(Some)
    }

    fn read_length(&mut self) -> VmResult<usize> {
        let len = self.read_uint()?;
        usize::try_from(len).map_err(|_| VmError::InvalidOperand("length operand"))
    }

    fn read_name(&mut self) -> VmResult<String> {
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| VmError::InvalidOperand("capability name"))
    }
}
