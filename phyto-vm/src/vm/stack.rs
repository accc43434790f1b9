use super::{VmError, VmResult};

/// Bounded LIFO of doubles shared by every instruction handler.
///
/// Multi-value operations are all-or-nothing: `push_n` checks capacity and
/// `pop_n` checks depth before touching the values.
#[derive(Clone, Debug)]
pub struct OperandStack {
    values: Vec<f64>,
    max: usize,
}

impl OperandStack {
    pub fn new(max: usize) -> Self {
        Self {
            values: Vec::new(),
            max,
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bottom-to-top view of the stack.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn top(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Fails unless `count` more values fit.
    pub fn ensure_room(&self, count: usize) -> VmResult<()> {
        if self.values.len().saturating_add(count) > self.max {
            return Err(VmError::StackOverflow(self.max));
        }
        Ok(())
    }

    /// Fails unless at least `count` values are present.
    pub fn ensure_depth(&self, count: usize) -> VmResult<()> {
        if self.values.len() < count {
            return Err(VmError::StackUnderflow);
        }
        Ok(())
    }

    pub fn push(&mut self, value: f64) -> VmResult<()> {
        self.ensure_room(1)?;
        self.values.push(value);
        Ok(())
    }

    /// Pushes `values` so that `values[0]` ends up on top.
    pub fn push_n(&mut self, values: &[f64]) -> VmResult<()> {
        self.ensure_room(values.len())?;
        self.values.extend(values.iter().rev());
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<f64> {
        self.values.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pops `count` values; the former top is `result[0]`.
    pub fn pop_n(&mut self, count: usize) -> VmResult<Vec<f64>> {
        self.ensure_depth(count)?;
        let split = self.values.len() - count;
        let mut popped = self.values.split_off(split);
        popped.reverse();
        Ok(popped)
    }

    /// Negative indices count from the top (`-1` is the top), others from the bottom.
    pub fn peek(&self, index: isize) -> VmResult<f64> {
        let resolved = if index < 0 {
            self.values.len().checked_sub(index.unsigned_abs())
        } else {
            Some(index as usize)
        };
        resolved
            .and_then(|slot| self.values.get(slot))
            .copied()
            .ok_or(VmError::IndexOutOfRange(index))
    }
}
