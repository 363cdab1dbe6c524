use crate::virtual_machine::errors::VMError;

/// Hard cap on memory growth.
pub const MAX_MEMORY_SIZE: usize = 64 * 1024 * 1024;

/// Smallest memory a VM ever starts with.
pub const MIN_MEMORY_SIZE: usize = 32;

/// Growable, byte-addressed chain memory.
///
/// Memory only grows through [`Memory::ensure_capacity`]; reads and writes
/// never allocate and fail with [`VMError::OutOfBounds`] past the current end.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Memory {
    cells: Vec<u8>,
}

impl Memory {
    /// Creates memory seeded with a copy of `state`, zero-padded to at least
    /// [`MIN_MEMORY_SIZE`] bytes.
    pub fn new(state: &[u8]) -> Self {
        let mut cells = vec![0u8; state.len().max(MIN_MEMORY_SIZE)];
        cells[..state.len()].copy_from_slice(state);
        Self { cells }
    }

    /// Validates `offset + length <= size` and returns the range as `usize`.
    fn range(&self, offset: u64, length: u64) -> Result<(usize, usize), VMError> {
        let oob = || VMError::OutOfBounds {
            offset,
            length,
            size: self.cells.len(),
        };
        let end = offset.checked_add(length).ok_or_else(oob)?;
        let end = usize::try_from(end).map_err(|_| oob())?;
        if end > self.cells.len() {
            return Err(oob());
        }
        // `offset <= end`, so it fits in usize too.
        Ok((offset as usize, end))
    }

    /// Grows memory so that `offset + size` bytes are addressable.
    ///
    /// Appends exactly the missing byte count (zeroed); does nothing if the
    /// range is already covered.
    pub fn ensure_capacity(&mut self, offset: u64, size: u64) -> Result<(), VMError> {
        let limit = || VMError::MemoryLimit {
            requested: offset.saturating_add(size),
            max: MAX_MEMORY_SIZE,
        };
        let bound = offset.checked_add(size).ok_or_else(limit)?;
        let bound = usize::try_from(bound).map_err(|_| limit())?;
        if bound > MAX_MEMORY_SIZE {
            return Err(limit());
        }
        if bound > self.cells.len() {
            self.cells.resize(bound, 0);
        }
        Ok(())
    }

    /// Returns a view of `length` bytes starting at `offset`.
    pub fn read(&self, offset: u64, length: u64) -> Result<&[u8], VMError> {
        let (start, end) = self.range(offset, length)?;
        Ok(&self.cells[start..end])
    }

    /// Writes `data` at `offset`.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), VMError> {
        let (start, end) = self.range(offset, data.len() as u64)?;
        self.cells[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Writes the first `n` bytes of `data` at `offset`.
    ///
    /// The bounds check covers all `n` bytes; when `data` is shorter than `n`
    /// only `data.len()` bytes are written.
    pub fn write_n(&mut self, offset: u64, n: u64, data: &[u8]) -> Result<(), VMError> {
        let (start, end) = self.range(offset, n)?;
        let count = (end - start).min(data.len());
        self.cells[start..start + count].copy_from_slice(&data[..count]);
        Ok(())
    }

    /// Writes a single byte at `index`.
    pub fn write_byte(&mut self, index: u64, byte: u8) -> Result<(), VMError> {
        let (start, _) = self.range(index, 1)?;
        self.cells[start] = byte;
        Ok(())
    }

    /// Returns an owned copy of `length` bytes starting at `offset`.
    pub fn copy_out(&self, offset: u64, length: u64) -> Result<Vec<u8>, VMError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        self.read(offset, length).map(<[u8]>::to_vec)
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.cells.len()
    }

    /// Full copy of memory for persistence.
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.clone()
    }

    /// Borrows the whole buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }
}
