use std::collections::BTreeSet;
use std::io::Write;

use crate::vm::{Vm, VmStatus, render_vm_error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugAction {
    Continue,
    Quit,
}

impl DebugAction {
    pub fn is_quit(self) -> bool {
        matches!(self, DebugAction::Quit)
    }
}

/// Offset breakpoints plus a small command language for driving a `Vm` by hand.
#[derive(Debug, Default)]
pub struct Debugger {
    breakpoints: BTreeSet<usize>,
}

impl Debugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_breakpoint(&mut self, offset: usize) {
        self.breakpoints.insert(offset);
    }

    pub fn remove_breakpoint(&mut self, offset: usize) -> bool {
        self.breakpoints.remove(&offset)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = usize> + '_ {
        self.breakpoints.iter().copied()
    }

    /// Steps until a breakpoint is reached, the machine halts or an instruction fails.
    /// The instruction under the cursor always runs, so continuing off a breakpoint works.
    pub fn resume(&self, vm: &mut Vm, out: &mut dyn Write) {
        loop {
            if !report_step(vm, out) {
                return;
            }
            if self.breakpoints.contains(&vm.position()) {
                let _ = writeln!(out, "breakpoint at {}", vm.position());
                return;
            }
        }
    }

    pub fn handle_command(&mut self, line: &str, vm: &mut Vm, out: &mut dyn Write) -> DebugAction {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return DebugAction::Continue;
        };
        match cmd {
            "q" | "quit" => return DebugAction::Quit,
            "s" | "step" => {
                let count = match parts.next().map(str::parse::<u64>) {
                    None => 1,
                    Some(Ok(count)) => count,
                    Some(Err(_)) => {
                        let _ = writeln!(out, "usage: step [count]");
                        return DebugAction::Continue;
                    }
                };
                for _ in 0..count {
                    if !report_step(vm, out) {
                        break;
                    }
                }
                print_where(vm, out);
            }
            "c" | "continue" => {
                self.resume(vm, out);
                print_where(vm, out);
            }
            "b" | "break" => match parts.next().map(str::parse::<usize>) {
                Some(Ok(offset)) => {
                    self.add_breakpoint(offset);
                    let _ = writeln!(out, "breakpoint set at {offset}");
                }
                _ => {
                    let _ = writeln!(out, "usage: break <offset>");
                }
            },
            "clear" => match parts.next().map(str::parse::<usize>) {
                Some(Ok(offset)) => {
                    if self.remove_breakpoint(offset) {
                        let _ = writeln!(out, "breakpoint cleared at {offset}");
                    } else {
                        let _ = writeln!(out, "no breakpoint at {offset}");
                    }
                }
                _ => {
                    let _ = writeln!(out, "usage: clear <offset>");
                }
            },
            "breaks" => {
                let offsets: Vec<usize> = self.breakpoints().collect();
                let _ = writeln!(out, "breakpoints: {offsets:?}");
            }
            "stack" => {
                let _ = writeln!(out, "stack: {:?}", vm.stack().as_slice());
            }
            "pages" => {
                let handles: Vec<u64> = vm.memory().pages().map(|page| page.handle()).collect();
                let _ = writeln!(out, "pages: {handles:?}");
            }
            "where" => print_where(vm, out),
            "help" => {
                let _ = writeln!(
                    out,
                    "commands: step [n], continue, break <offset>, clear <offset>, breaks, stack, pages, where, help, quit"
                );
            }
            _ => {
                let _ = writeln!(out, "unknown command '{cmd}'");
            }
        }
        DebugAction::Continue
    }
}

/// Runs one step and reports halts and failures. Returns whether stepping may go on.
fn report_step(vm: &mut Vm, out: &mut dyn Write) -> bool {
    match vm.step() {
        Ok(VmStatus::Running) => true,
        Ok(VmStatus::Halted) => {
            let _ = writeln!(out, "halted after {} step(s)", vm.steps());
            false
        }
        Err(err) => {
            let _ = writeln!(out, "{}", render_vm_error(vm, &err));
            false
        }
    }
}

fn print_where(vm: &Vm, out: &mut dyn Write) {
    if vm.is_halted() {
        return;
    }
    match vm.peek_instruction() {
        Ok(Some(instruction)) => {
            let _ = writeln!(out, "{:>6}: {instruction}", vm.position());
        }
        Ok(None) => {
            let _ = writeln!(out, "{:>6}: <end of bytecode>", vm.position());
        }
        Err(err) => {
            let _ = writeln!(out, "{:>6}: <{err}>", vm.position());
        }
    }
}
