use crate::virtual_machine::memory::Memory;
use std::time::Duration;

/// Mutable state threaded through one transaction's run.
///
/// Holds the memory exclusively for the duration of the run; the memory
/// itself outlives the context and carries over to the next transaction.
pub struct Context<'a> {
    /// Chain memory shared by every transaction of the block.
    pub memory: &'a mut Memory,
    /// Operand stack, top at the end.
    pub stack: Vec<u64>,
    /// Index of the instruction to execute next.
    pub pc: usize,
    /// Upper bound for the SLEEP opcode's pause.
    pub(crate) sleep_bound: Duration,
}

impl<'a> Context<'a> {
    /// Creates a context with an empty stack and `pc = 0`.
    pub fn new(memory: &'a mut Memory) -> Self {
        Self {
            memory,
            stack: Vec::new(),
            pc: 0,
            sleep_bound: Duration::ZERO,
        }
    }

    /// Sets the SLEEP bound used by this context.
    pub fn with_sleep_bound(mut self, bound: Duration) -> Self {
        self.sleep_bound = bound;
        self
    }

    pub fn push(&mut self, value: u64) {
        self.stack.push(value);
    }

    /// Pops the top of the stack.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty. Programs are compiled so that this never
    /// happens; an empty pop is a broken program, not a runtime condition.
    pub fn pop(&mut self) -> u64 {
        match self.stack.pop() {
            Some(value) => value,
            None => panic!("pop from an empty stack"),
        }
    }

    /// Returns the top of the stack without removing it.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty, like [`Context::pop`].
    pub fn peek(&self) -> u64 {
        match self.stack.last() {
            Some(value) => *value,
            None => panic!("peek from an empty stack"),
        }
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    pub fn increment_pc(&mut self) {
        self.pc = self.pc.saturating_add(1);
    }
}
