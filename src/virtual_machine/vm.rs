//! Core virtual machine implementation.
//!
//! The VM executes a [`Program`](crate::virtual_machine::isa::Program) against one [`Context`]: it looks up each
//! instruction's mnemonic in a fixed dispatch table, runs the handler, then
//! advances the program counter. All arithmetic uses wrapping semantics.
//!
//! A failing handler stops the run immediately. Memory writes done by earlier
//! instructions of the same program stay in place.

use crate::virtual_machine::context::Context;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{self, Arg, Instruction, bytes, expect_arity, word};
use crate::virtual_machine::memory::Memory;
use rand::Rng;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

/// Default upper bound for the SLEEP opcode's pause.
pub const DEFAULT_SLEEP_BOUND: Duration = Duration::from_millis(5);

/// Handler signature shared by every opcode.
pub type OpHandler = fn(&mut Context<'_>, &[Arg]) -> Result<(), VMError>;

const OPCODES: &[(&str, OpHandler)] = &[
    (isa::LOAD, op_load),
    (isa::STOREI, op_storei),
    (isa::STORE, op_store),
    (isa::MALLOC, op_malloc),
    (isa::ADD, op_add),
    (isa::SUB, op_sub),
    (isa::MUL, op_mul),
    (isa::DIV, op_div),
    (isa::CMP, op_cmp),
    (isa::JMP, op_jmp),
    (isa::JEQ, op_jeq),
    (isa::PUSH, op_push),
    (isa::DUP, op_dup),
    (isa::SLEEP, op_sleep),
];

/// Returns the process-wide mnemonic to handler table.
fn opcode_table() -> &'static HashMap<&'static str, OpHandler> {
    static TABLE: OnceLock<HashMap<&'static str, OpHandler>> = OnceLock::new();
    TABLE.get_or_init(|| OPCODES.iter().copied().collect())
}

/// Converts a word to a program counter; values past `usize` end the program.
fn to_pc(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Decodes up to 8 bytes as a big-endian word, zero-filling the low bytes.
fn decode_word(chunk: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..chunk.len()].copy_from_slice(chunk);
    u64::from_be_bytes(buf)
}

/// Stack VM owning the chain memory of the block being executed.
///
/// Memory persists across [`VM::execute`] calls; each call gets a fresh
/// stack and program counter.
pub struct VM {
    memory: Memory,
    sleep_bound: Duration,
}

impl VM {
    /// Creates a VM whose memory is a copy of `state`, padded to at least 32 bytes.
    pub fn new(state: &[u8]) -> Self {
        Self {
            memory: Memory::new(state),
            sleep_bound: DEFAULT_SLEEP_BOUND,
        }
    }

    /// Sets the SLEEP bound; `Duration::ZERO` turns SLEEP into a no-op.
    pub fn with_sleep_bound(mut self, bound: Duration) -> Self {
        self.sleep_bound = bound;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn into_memory(self) -> Memory {
        self.memory
    }

    /// Executes `program` from `pc = 0` with an empty stack.
    ///
    /// Returns the final operand stack.
    pub fn execute(&mut self, program: &[Instruction]) -> Result<Vec<u64>, VMError> {
        let mut ctx = Context::new(&mut self.memory).with_sleep_bound(self.sleep_bound);
        Self::run(&mut ctx, program)?;
        Ok(ctx.stack)
    }

    /// Runs `program` on an existing context until `pc` leaves the program.
    ///
    /// On error, `ctx.pc` still points at the failing instruction.
    pub fn run(ctx: &mut Context<'_>, program: &[Instruction]) -> Result<(), VMError> {
        let table = opcode_table();
        while let Some(instruction) = program.get(ctx.pc) {
            let handler = table
                .get(instruction.name.as_str())
                .ok_or_else(|| VMError::UnknownOpcode(instruction.name.clone()))?;
            handler(ctx, &instruction.args)?;
            ctx.increment_pc();
        }
        Ok(())
    }
}

fn op_load(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::LOAD, args, 2)?;
    let offset = word(isa::LOAD, args, 0)?;
    let length = word(isa::LOAD, args, 1)?;
    let data = ctx.memory.read(offset, length)?;
    ctx.stack.extend(data.chunks(8).map(decode_word));
    Ok(())
}

fn op_storei(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::STOREI, args, 2)?;
    let offset = word(isa::STOREI, args, 0)?;
    let data = bytes(isa::STOREI, args, 1)?;
    ctx.memory.write(offset, data)
}

fn op_store(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::STORE, args, 1)?;
    let offset = word(isa::STORE, args, 0)?;
    let value = ctx.peek();
    ctx.memory.write(offset, &value.to_be_bytes())
}

fn op_malloc(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::MALLOC, args, 1)?;
    let size = word(isa::MALLOC, args, 0)?;
    let offset = ctx.memory.size() as u64;
    ctx.memory.ensure_capacity(offset, size)?;
    ctx.push(offset);
    Ok(())
}

/// Pops `a` then `b` and pushes `f(a, b)`.
fn binary(
    ctx: &mut Context<'_>,
    instruction: &'static str,
    args: &[Arg],
    f: fn(u64, u64) -> u64,
) -> Result<(), VMError> {
    expect_arity(instruction, args, 0)?;
    let a = ctx.pop();
    let b = ctx.pop();
    ctx.push(f(a, b));
    Ok(())
}

fn op_add(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    binary(ctx, isa::ADD, args, |a, b| a.wrapping_add(b))
}

fn op_sub(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    binary(ctx, isa::SUB, args, |a, b| b.wrapping_sub(a))
}

fn op_mul(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    binary(ctx, isa::MUL, args, |a, b| a.wrapping_mul(b))
}

fn op_div(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::DIV, args, 0)?;
    let a = ctx.pop();
    let b = ctx.pop();
    if a == 0 {
        return Err(VMError::DivisionByZero);
    }
    ctx.push(b / a);
    Ok(())
}

fn op_cmp(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    binary(ctx, isa::CMP, args, |a, b| (a < b) as u64)
}

fn op_jmp(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::JMP, args, 0)?;
    let target = ctx.peek();
    ctx.set_pc(to_pc(target));
    Ok(())
}

fn op_jeq(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::JEQ, args, 2)?;
    let target = word(isa::JEQ, args, 0)?;
    let constant = word(isa::JEQ, args, 1)?;
    if constant == ctx.peek() {
        ctx.set_pc(to_pc(target));
    }
    Ok(())
}

fn op_push(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::PUSH, args, 1)?;
    let value = word(isa::PUSH, args, 0)?;
    ctx.push(value);
    Ok(())
}

fn op_dup(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::DUP, args, 0)?;
    let top = ctx.peek();
    ctx.push(top);
    Ok(())
}

fn op_sleep(ctx: &mut Context<'_>, args: &[Arg]) -> Result<(), VMError> {
    expect_arity(isa::SLEEP, args, 0)?;
    let bound = u64::try_from(ctx.sleep_bound.as_micros()).unwrap_or(u64::MAX);
    if bound > 0 {
        let micros = rand::thread_rng().gen_range(0..=bound);
        std::thread::sleep(Duration::from_micros(micros));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
