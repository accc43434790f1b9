//! Instruction handlers.
//!
//! Every handler validates its inputs (stack depth, room for results, page
//! handles and ranges) before it pops or writes anything.

use crate::bytecode::{Instruction, OpCode, as_uint, as_usize};

use super::memory::PageHandle;
use super::{Vm, VmError, VmResult};

const FLOAT_WIDTH: usize = 8;

fn truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

fn sign(value: f64) -> f64 {
    if value.is_nan() || value == 0.0 {
        value
    } else {
        value.signum()
    }
}

fn min(lhs: f64, rhs: f64) -> f64 {
    if lhs.is_nan() || rhs.is_nan() {
        f64::NAN
    } else if lhs == rhs {
        if lhs.is_sign_negative() { lhs } else { rhs }
    } else {
        lhs.min(rhs)
    }
}

fn max(lhs: f64, rhs: f64) -> f64 {
    if lhs.is_nan() || rhs.is_nan() {
        f64::NAN
    } else if lhs == rhs {
        if lhs.is_sign_positive() { lhs } else { rhs }
    } else {
        lhs.max(rhs)
    }
}

fn handle_from(value: f64) -> VmResult<PageHandle> {
    as_uint(value, "page handle")
}

fn unary(opcode: OpCode) -> Option<fn(f64) -> f64> {
    let op: fn(f64) -> f64 = match opcode {
        OpCode::Nan => |v| flag(v.is_nan()),
        OpCode::Finite => |v| flag(v.is_finite()),
        OpCode::Positive => |v| flag(v > 0.0),
        OpCode::Integer => |v| flag(v.is_finite() && v.fract() == 0.0),
        OpCode::Not | OpCode::Falsy => |v| flag(!truthy(v)),
        OpCode::Truthy => |v| flag(truthy(v)),
        OpCode::Abs => f64::abs,
        OpCode::Sign => sign,
        OpCode::Neg => |v| -v,
        OpCode::Floor => f64::floor,
        OpCode::Ceil => f64::ceil,
        OpCode::Trunc => f64::trunc,
        OpCode::Round => f64::round,
        OpCode::Sqrt => f64::sqrt,
        OpCode::Cbrt => f64::cbrt,
        _ => return None,
    };
    Some(op)
}

fn binary(opcode: OpCode) -> Option<fn(f64, f64) -> f64> {
    let op: fn(f64, f64) -> f64 = match opcode {
        OpCode::Eq => |l, r| flag(l == r),
        OpCode::Lt => |l, r| flag(l < r),
        OpCode::Gt => |l, r| flag(l > r),
        OpCode::Lte => |l, r| flag(l <= r),
        OpCode::Gte => |l, r| flag(l >= r),
        OpCode::Min => min,
        OpCode::Max => max,
        OpCode::Add => |l, r| l + r,
        OpCode::Sub => |l, r| l - r,
        OpCode::Mul => |l, r| l * r,
        OpCode::Div => |l, r| l / r,
        OpCode::Rem => |l, r| l % r,
        _ => return None,
    };
    Some(op)
}

impl Vm {
    pub(super) fn execute(&mut self, instruction: Instruction) -> VmResult<()> {
        match instruction {
            Instruction::Halt => self.halted = true,
            Instruction::Capability(name) => self.op_capability(&name)?,
            Instruction::CapabilityCheck(name) => self.op_capability_check(&name)?,
            Instruction::Push(value) => self.stack.push(value)?,
            Instruction::PushBytes(bytes) => {
                let values: Vec<f64> = bytes.iter().map(|&byte| f64::from(byte)).collect();
                self.stack.push_n(&values)?;
            }
            Instruction::Jump {
                conditional,
                target,
            } => self.op_jump(conditional, target)?,
            Instruction::MemLoad { byte_mode } => self.op_mem_load(byte_mode)?,
            Instruction::MemStore { byte_mode } => self.op_mem_store(byte_mode)?,
            Instruction::Simple(opcode) => self.execute_simple(opcode)?,
        }
        Ok(())
    }

    fn execute_simple(&mut self, opcode: OpCode) -> VmResult<()> {
        if let Some(op) = unary(opcode) {
            let value = self.stack.pop()?;
            return self.stack.push(op(value));
        }
        if let Some(op) = binary(opcode) {
            self.stack.ensure_depth(2)?;
            let rhs = self.stack.pop()?;
            let lhs = self.stack.pop()?;
            return self.stack.push(op(lhs, rhs));
        }

        match opcode {
            OpCode::Pop => {
                self.stack.pop()?;
            }
            OpCode::Dup => {
                let top = self.stack.peek(-1)?;
                self.stack.push(top)?;
            }
            OpCode::Dup2 => {
                let under = self.stack.peek(-2)?;
                let top = self.stack.peek(-1)?;
                self.stack.push_n(&[top, under])?;
            }
            OpCode::Over => {
                let under = self.stack.peek(-2)?;
                self.stack.push(under)?;
            }
            OpCode::Swap => {
                let mut pair = self.stack.pop_n(2)?;
                pair.reverse();
                self.stack.push_n(&pair)?;
            }
            OpCode::Select => {
                self.stack.ensure_depth(3)?;
                let cond = self.stack.pop()?;
                let a = self.stack.pop()?;
                let b = self.stack.pop()?;
                self.stack.push(if truthy(cond) { a } else { b })?;
            }
            OpCode::MemPlz => {
                self.stack.ensure_room(1)?;
                let handle = self.memory.allocate()?;
                self.stack.push(handle as f64)?;
            }
            OpCode::MemCya => {
                let handle = handle_from(self.stack.peek(-1)?)?;
                self.stack.pop()?;
                self.memory.free(handle);
            }
            OpCode::MemCheck => {
                let value = self.stack.pop()?;
                let exists = handle_from(value).is_ok_and(|handle| self.memory.exists(handle));
                self.stack.push(flag(exists))?;
            }
            other => {
                // Every opcode with stream operands decodes to a dedicated variant.
                return Err(VmError::UnknownOpcode(other as u8));
            }
        }
        Ok(())
    }

    fn op_jump(&mut self, conditional: bool, target: usize) -> VmResult<()> {
        if target > self.reader.code().len() {
            return Err(VmError::InvalidOperand("jump target"));
        }
        if conditional && !truthy(self.stack.pop()?) {
            return Ok(());
        }
        self.jump_to(target)
    }

    /// Reads handle, address and length from the top three slots without popping.
    fn peek_access(&self, byte_mode: bool) -> VmResult<(PageHandle, usize, usize, usize)> {
        self.stack.ensure_depth(3)?;
        let handle = handle_from(self.stack.peek(-1)?)?;
        let address = as_usize(self.stack.peek(-2)?, "memory address")?;
        let len = as_usize(self.stack.peek(-3)?, "memory length")?;
        let count = if byte_mode {
            len
        } else {
            if len % FLOAT_WIDTH != 0 {
                return Err(VmError::InvalidOperand("float access length"));
            }
            len / FLOAT_WIDTH
        };
        self.memory.get(handle)?.check_range(address, len)?;
        Ok((handle, address, len, count))
    }

    fn op_mem_load(&mut self, byte_mode: bool) -> VmResult<()> {
        let (handle, address, len, count) = self.peek_access(byte_mode)?;
        self.stack.ensure_room(count.saturating_sub(3))?;

        let page = self.memory.get(handle)?;
        let values: Vec<f64> = if byte_mode {
            page.read_bytes(address, len)?
                .iter()
                .map(|&byte| f64::from(byte))
                .collect()
        } else {
            (0..count)
                .map(|index| page.read_f64(address + index * FLOAT_WIDTH))
                .collect::<VmResult<Vec<f64>>>()?
        };

        self.stack.pop_n(3)?;
        self.stack.push_n(&values)
    }

    fn op_mem_store(&mut self, byte_mode: bool) -> VmResult<()> {
        let (handle, address, _len, count) = self.peek_access(byte_mode)?;
        self.stack.ensure_depth(3 + count)?;

        let mut bytes = Vec::with_capacity(count * if byte_mode { 1 } else { FLOAT_WIDTH });
        for index in 0..count {
            let value = self.stack.peek(-4 - index as isize)?;
            if byte_mode {
                let byte = as_uint(value, "byte value")?;
                let byte = u8::try_from(byte).map_err(|_| VmError::InvalidOperand("byte value"))?;
                bytes.push(byte);
            } else {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        self.stack.pop_n(3 + count)?;
        self.memory.get_mut(handle)?.write_bytes(address, &bytes)
    }

    fn op_capability(&mut self, name: &str) -> VmResult<()> {
        let Some(table) = self.capabilities.as_mut() else {
            return Err(VmError::NotImplemented(name.to_string()));
        };
        let saved = self.stack.clone();
        match table.invoke(name, &mut self.stack, &self.memory) {
            None => Err(VmError::NotImplemented(name.to_string())),
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => {
                self.stack = saved;
                Err(err)
            }
        }
    }

    fn op_capability_check(&mut self, name: &str) -> VmResult<()> {
        let Some(table) = self.capabilities.as_ref() else {
            return Err(VmError::NotImplemented(name.to_string()));
        };
        let present = table.contains(name);
        self.stack.push(flag(present))
    }
}
