use std::collections::HashMap;

use super::memory::Memory;
use super::stack::OperandStack;
use super::VmResult;

/// A host-provided function the VM reaches through the `capability` opcode.
///
/// Arguments and results travel on the operand stack; the layout is up to the
/// handler. Pages are read-only to handlers. When a handler fails the VM
/// restores the operand stack, so a failed call leaves no trace.
pub trait Capability: Send {
    fn invoke(&mut self, stack: &mut OperandStack, memory: &Memory) -> VmResult<()>;
}

pub type StaticCapability = fn(&mut OperandStack, &Memory) -> VmResult<()>;

enum Handler {
    Dynamic(Box<dyn Capability>),
    Static(StaticCapability),
}

/// Name-keyed table of capabilities installed by the embedder.
#[derive(Default)]
pub struct CapabilityTable {
    handlers: HashMap<String, Handler>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `capability` under `name`, replacing any previous binding.
    pub fn register(&mut self, name: impl Into<String>, capability: Box<dyn Capability>) {
        self.handlers
            .insert(name.into(), Handler::Dynamic(capability));
    }

    pub fn register_static(&mut self, name: impl Into<String>, function: StaticCapability) {
        self.handlers.insert(name.into(), Handler::Static(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns `None` when nothing is registered under `name`.
    pub(super) fn invoke(
        &mut self,
        name: &str,
        stack: &mut OperandStack,
        memory: &Memory,
    ) -> Option<VmResult<()>> {
        let handler = self.handlers.get_mut(name)?;
        Some(match handler {
            Handler::Dynamic(capability) => capability.invoke(stack, memory),
            Handler::Static(function) => function(stack, memory),
        })
    }
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CapabilityTable")
            .field("names", &names)
            .finish()
    }
}
