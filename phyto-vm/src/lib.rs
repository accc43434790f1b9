pub mod assembler;
pub mod bytecode;
pub mod debugger;
pub mod disassembler;
#[cfg(feature = "cli")]
pub mod logging;
pub mod vm;

pub use assembler::{AsmParseError, BytecodeBuilder, assemble};
pub use bytecode::{BytecodeReader, Instruction, MAX_SAFE_INTEGER, OpCode};
pub use debugger::{DebugAction, Debugger};
pub use disassembler::{DisasmError, decode_all, disassemble};
pub use vm::{
    Capability, CapabilityTable, DEFAULT_STACK_CAPACITY, Memory, OperandStack, PAGE_SIZE, Page,
    PageHandle, StaticCapability, Vm, VmConfig, VmError, VmResult, VmStatus, render_vm_error,
};
