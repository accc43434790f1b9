#![allow(dead_code, unused_imports)]

pub use vm::{
    BytecodeBuilder, Capability, CapabilityTable, Memory, OpCode, OperandStack, Vm, VmConfig,
    VmError, VmStatus, assemble,
};

/// Assembles `source` and runs it to completion.
pub fn run_source(source: &str) -> Vm {
    let code = assemble(source).expect("assemble should succeed");
    let mut vm = Vm::new(code);
    let status = vm.run().expect("vm should run");
    assert_eq!(status, VmStatus::Halted);
    vm
}

/// Steps `vm` until a step fails, returning that error.
pub fn run_until_error(vm: &mut Vm) -> VmError {
    loop {
        match vm.step() {
            Ok(VmStatus::Running) => continue,
            Ok(VmStatus::Halted) => panic!("vm halted without error"),
            Err(err) => return err,
        }
    }
}

pub fn stack_of(vm: &Vm) -> Vec<f64> {
    vm.stack().as_slice().to_vec()
}

/// Pops two values and pushes their sum.
pub struct AddTwo;

impl Capability for AddTwo {
    fn invoke(&mut self, stack: &mut OperandStack, _memory: &Memory) -> Result<(), VmError> {
        let values = stack.pop_n(2)?;
        stack.push(values[0] + values[1])
    }
}

/// Counts how often it was called and pushes the running count.
pub struct Counter {
    pub calls: u32,
}

impl Capability for Counter {
    fn invoke(&mut self, stack: &mut OperandStack, _memory: &Memory) -> Result<(), VmError> {
        self.calls += 1;
        stack.push(f64::from(self.calls))
    }
}

/// Consumes its argument and then fails.
pub fn static_failing(stack: &mut OperandStack, _memory: &Memory) -> Result<(), VmError> {
    stack.pop()?;
    Err(VmError::InvalidOperand("rejected by host"))
}

pub fn static_page_count(stack: &mut OperandStack, memory: &Memory) -> Result<(), VmError> {
    stack.push(memory.live_pages() as f64)
}

/// Pops a page handle, pushes the page's first byte, then fails.
pub fn static_peek_then_fail(stack: &mut OperandStack, memory: &Memory) -> Result<(), VmError> {
    let handle = stack.pop()?;
    let first = memory.get(handle as u64)?.as_bytes()[0];
    stack.push(f64::from(first))?;
    Err(VmError::InvalidOperand("page rejected by host"))
}
