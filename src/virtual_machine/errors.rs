/// Errors that can occur during VM execution.
///
/// All of them are local to one transaction: the committer drops the
/// offending transaction and keeps going with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VMError {
    /// Memory access past the current end of memory.
    #[error("memory access out of bounds: offset {offset} length {length} exceeds size {size}")]
    OutOfBounds {
        offset: u64,
        length: u64,
        size: usize,
    },
    /// Integer division with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,
    /// Opcode name not present in the dispatch table.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),
    /// Wrong number of arguments for an opcode.
    #[error("instruction {instruction} expected {expected} arguments but got {actual}")]
    ArityMismatch {
        instruction: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Argument has the wrong kind (word vs. byte string).
    #[error("instruction {instruction} expected argument {arg_index} to be {expected}")]
    TypeMismatch {
        instruction: &'static str,
        arg_index: usize,
        expected: &'static str,
    },
    /// Growing memory would exceed the hard memory cap.
    #[error("memory limit exceeded: requested {requested} bytes, max {max}")]
    MemoryLimit { requested: u64, max: usize },
}
