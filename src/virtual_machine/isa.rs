//! Instruction set of the stack VM.
//!
//! An instruction is a mnemonic plus a variable-length argument list. The
//! operand stack holds unsigned 64-bit words; arithmetic wraps.
//!
//! | Mnemonic | Args | Effect |
//! |---|---|---|
//! | `LOAD` | offset, length | push big-endian words read from memory |
//! | `STORE` | offset | write top of stack (not popped) at offset |
//! | `STOREI` | offset, bytes | write raw bytes at offset |
//! | `MALLOC` | size | grow memory by size, push old size |
//! | `ADD` `SUB` `MUL` `DIV` | - | pop a, pop b, push b op a |
//! | `CMP` | - | pop a, pop b, push `a < b` |
//! | `JMP` | - | pc = top of stack |
//! | `JEQ` | target, constant | pc = target if top of stack == constant |
//! | `PUSH` | value | push value |
//! | `DUP` | - | push top of stack |
//! | `SLEEP` | - | pause for a bounded random duration |
//!
//! Jumps set `pc` and the interpreter then advances it by one, so execution
//! resumes at `target + 1`.

use crate::virtual_machine::errors::VMError;

pub const LOAD: &str = "LOAD";
pub const STORE: &str = "STORE";
pub const STOREI: &str = "STOREI";
pub const MALLOC: &str = "MALLOC";
pub const ADD: &str = "ADD";
pub const SUB: &str = "SUB";
pub const MUL: &str = "MUL";
pub const DIV: &str = "DIV";
pub const CMP: &str = "CMP";
pub const JMP: &str = "JMP";
pub const JEQ: &str = "JEQ";
pub const PUSH: &str = "PUSH";
pub const DUP: &str = "DUP";
pub const SLEEP: &str = "SLEEP";

/// Instruction argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    Word(u64),
    Bytes(Vec<u8>),
}

/// One opcode with its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub name: String,
    pub args: Vec<Arg>,
}

/// Ordered instruction sequence executed by one transaction.
pub type Program = Vec<Instruction>;

impl Instruction {
    pub fn new(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn load(offset: u64, length: u64) -> Self {
        Self::new(LOAD, vec![Arg::Word(offset), Arg::Word(length)])
    }

    pub fn store(offset: u64) -> Self {
        Self::new(STORE, vec![Arg::Word(offset)])
    }

    pub fn storei(offset: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(STOREI, vec![Arg::Word(offset), Arg::Bytes(bytes.into())])
    }

    pub fn malloc(size: u64) -> Self {
        Self::new(MALLOC, vec![Arg::Word(size)])
    }

    pub fn add() -> Self {
        Self::new(ADD, vec![])
    }

    pub fn sub() -> Self {
        Self::new(SUB, vec![])
    }

    pub fn mul() -> Self {
        Self::new(MUL, vec![])
    }

    pub fn div() -> Self {
        Self::new(DIV, vec![])
    }

    pub fn cmp() -> Self {
        Self::new(CMP, vec![])
    }

    pub fn jmp() -> Self {
        Self::new(JMP, vec![])
    }

    pub fn jeq(target: u64, constant: u64) -> Self {
        Self::new(JEQ, vec![Arg::Word(target), Arg::Word(constant)])
    }

    pub fn push(value: u64) -> Self {
        Self::new(PUSH, vec![Arg::Word(value)])
    }

    pub fn dup() -> Self {
        Self::new(DUP, vec![])
    }

    pub fn sleep() -> Self {
        Self::new(SLEEP, vec![])
    }
}

/// Checks that `args` has exactly `expected` entries.
pub(crate) fn expect_arity(
    instruction: &'static str,
    args: &[Arg],
    expected: usize,
) -> Result<(), VMError> {
    if args.len() != expected {
        return Err(VMError::ArityMismatch {
            instruction,
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

/// Returns argument `index` as a word.
pub(crate) fn word(instruction: &'static str, args: &[Arg], index: usize) -> Result<u64, VMError> {
    match args.get(index) {
        Some(Arg::Word(v)) => Ok(*v),
        Some(Arg::Bytes(_)) => Err(VMError::TypeMismatch {
            instruction,
            arg_index: index,
            expected: "word",
        }),
        None => Err(VMError::ArityMismatch {
            instruction,
            expected: index + 1,
            actual: args.len(),
        }),
    }
}

/// Returns argument `index` as a byte string.
pub(crate) fn bytes<'a>(
    instruction: &'static str,
    args: &'a [Arg],
    index: usize,
) -> Result<&'a [u8], VMError> {
    match args.get(index) {
        Some(Arg::Bytes(b)) => Ok(b.as_slice()),
        Some(Arg::Word(_)) => Err(VMError::TypeMismatch {
            instruction,
            arg_index: index,
            expected: "bytes",
        }),
        None => Err(VMError::ArityMismatch {
            instruction,
            expected: index + 1,
            actual: args.len(),
        }),
    }
}
