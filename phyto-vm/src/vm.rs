use tracing::{debug, trace, warn};

use crate::bytecode::{BytecodeReader, Instruction, OpCode};

mod capability;
mod diagnostics;
mod memory;
mod ops;
mod stack;

pub use capability::{Capability, CapabilityTable, StaticCapability};
pub use diagnostics::render_vm_error;
pub use memory::{Memory, PAGE_SIZE, Page, PageHandle};
pub use stack::OperandStack;

pub const DEFAULT_STACK_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    StackOverflow(usize),
    StackUnderflow,
    IndexOutOfRange(isize),
    PageNotFound(PageHandle),
    PageOutOfBounds {
        handle: PageHandle,
        address: usize,
        len: usize,
    },
    PageLimit(usize),
    UnknownOpcode(u8),
    InvalidOperand(&'static str),
    UnexpectedEndOfStream,
    NotImplemented(String),
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmError::StackOverflow(max) => write!(f, "stack overflow (max {max})"),
            VmError::StackUnderflow => write!(f, "stack underflow"),
            VmError::IndexOutOfRange(index) => write!(f, "stack index {index} out of range"),
            VmError::PageNotFound(handle) => write!(f, "memory page not found: {handle}"),
            VmError::PageOutOfBounds {
                handle,
                address,
                len,
            } => write!(
                f,
                "out of bounds access to page {handle}: {len} bytes at address {address}",
            ),
            VmError::PageLimit(max) => write!(f, "page limit reached (max {max})"),
            VmError::UnknownOpcode(opcode) => write!(f, "unknown opcode {opcode:#04x}"),
            VmError::InvalidOperand(what) => write!(f, "invalid operand: {what}"),
            VmError::UnexpectedEndOfStream => write!(f, "unexpected end of bytecode"),
            VmError::NotImplemented(name) => write!(f, "capability not implemented: '{name}'"),
        }
    }
}

impl std::error::Error for VmError {}

pub type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub stack_capacity: usize,
    /// Upper bound on simultaneously live pages; `None` means unbounded.
    pub max_pages: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            max_pages: None,
        }
    }
}

/// A single program instance, driven one instruction per `step`.
pub struct Vm {
    reader: BytecodeReader,
    stack: OperandStack,
    memory: Memory,
    capabilities: Option<CapabilityTable>,
    halted: bool,
    steps: u64,
}

impl Vm {
    pub fn new(code: Vec<u8>) -> Self {
        Self::with_config(code, VmConfig::default())
    }

    pub fn with_config(code: Vec<u8>, config: VmConfig) -> Self {
        Self {
            reader: BytecodeReader::new(code),
            stack: OperandStack::new(config.stack_capacity),
            memory: Memory::with_limit(config.max_pages),
            capabilities: None,
            halted: false,
            steps: 0,
        }
    }

    /// Installs the table consulted by `capability` and `capabilitycheck`.
    pub fn set_capabilities(&mut self, table: CapabilityTable) {
        self.capabilities = Some(table);
    }

    pub fn capabilities_mut(&mut self) -> Option<&mut CapabilityTable> {
        self.capabilities.as_mut()
    }

    /// Executes exactly one instruction.
    ///
    /// On error the cursor is rewound to the failing instruction and the stack
    /// and memory are left as they were before it.
    pub fn step(&mut self) -> VmResult<VmStatus> {
        if self.halted {
            return Ok(VmStatus::Halted);
        }
        if self.reader.is_at_end() {
            debug!(position = self.reader.position(), "end of bytecode, halting");
            self.halted = true;
            return Ok(VmStatus::Halted);
        }

        let start = self.reader.position();
        match self.decode_and_execute() {
            Ok(()) => {
                self.steps += 1;
                if self.halted {
                    debug!(position = start, steps = self.steps, "halted");
                    return Ok(VmStatus::Halted);
                }
                Ok(VmStatus::Running)
            }
            Err(err) => {
                self.reader.set_position(start);
                Err(err)
            }
        }
    }

    /// Steps until the machine halts or an instruction fails.
    pub fn run(&mut self) -> VmResult<VmStatus> {
        loop {
            if self.step_logged()? == VmStatus::Halted {
                return Ok(VmStatus::Halted);
            }
        }
    }

    /// Like `run`, but gives control back after `max_steps` instructions.
    pub fn run_with_limit(&mut self, max_steps: u64) -> VmResult<VmStatus> {
        for _ in 0..max_steps {
            if self.step_logged()? == VmStatus::Halted {
                return Ok(VmStatus::Halted);
            }
        }
        Ok(if self.halted {
            VmStatus::Halted
        } else {
            VmStatus::Running
        })
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    pub fn code(&self) -> &[u8] {
        self.reader.code()
    }

    /// Number of instructions executed successfully so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn stack(&self) -> &OperandStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut OperandStack {
        &mut self.stack
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Decodes the instruction at the cursor without executing it.
    pub fn peek_instruction(&self) -> VmResult<Option<Instruction>> {
        let mut reader = self.reader.clone();
        reader.read_instruction()
    }

    fn step_logged(&mut self) -> VmResult<VmStatus> {
        let position = self.reader.position();
        self.step().inspect_err(|err| {
            warn!(position, "step failed: {err}");
        })
    }

    fn decode_and_execute(&mut self) -> VmResult<()> {
        let position = self.reader.position();
        let Some(instruction) = self.reader.read_instruction()? else {
            self.halted = true;
            return Ok(());
        };
        trace!(position, op = %instruction, depth = self.stack.len(), "exec");
        self.execute(instruction)
    }

    fn jump_to(&mut self, target: usize) -> VmResult<()> {
        if target > self.reader.code().len() {
            return Err(VmError::InvalidOperand("jump target"));
        }
        self.reader.set_position(target);
        Ok(())
    }

    fn opcode_at(&self, position: usize) -> Option<OpCode> {
        self.reader
            .code()
            .get(position)
            .copied()
            .and_then(OpCode::from_byte)
    }
}
