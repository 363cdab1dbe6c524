//! Stack virtual machine executing compiled transfer programs.
//!
//! Every transaction of a block runs against the same [`memory::Memory`],
//! owned by one [`vm::VM`]. A transaction gets a fresh [`context::Context`]
//! (empty stack, `pc = 0`) and is interpreted instruction by instruction
//! through a fixed mnemonic to handler table.
//!
//! # Modules
//!
//! - [`memory`]: growable, bounds-checked byte memory
//! - [`context`]: operand stack and program counter for one run
//! - [`isa`]: instructions, arguments and mnemonics
//! - [`vm`]: interpreter loop and opcode handlers
//! - [`errors`]: execution errors

pub mod context;
pub mod errors;
pub mod isa;
pub mod memory;
pub mod vm;
