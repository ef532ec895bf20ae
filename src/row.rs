use crate::codec::{pack_uint, unpack_uint};
use crate::error::{Error, Result};
use crate::types::{MAX_ROW_SIZE, VAR_SLOT_SIZE};

/// In-memory representation of one row
///
/// ```text
/// [ fixed region: one slot per column ][ variable region ............ ]
/// 0                                   fixed_region_size     current_row_size
/// ```
///
/// A variable column's fixed slot holds `pack_uint(offset, 2) ||
/// pack_uint(count, 1)`; the all-zero slot means missing.
#[derive(Debug, Clone)]
pub struct RowBuffer {
    data: Vec<u8>,
    fixed_region_size: usize,
}

impl RowBuffer {
    pub fn new(fixed_region_size: usize) -> Self {
        let mut data = Vec::with_capacity(fixed_region_size.max(256));
        data.resize(fixed_region_size, 0);
        RowBuffer { data, fixed_region_size }
    }

    pub fn fixed_region_size(&self) -> usize {
        self.fixed_region_size
    }

    pub fn current_row_size(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Zero the fixed region and drop the variable region
    pub fn reset(&mut self) {
        self.data.truncate(self.fixed_region_size);
        self.data.fill(0);
    }

    pub fn fixed(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    pub fn fixed_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.data[offset..offset + len]
    }

    /// Append bytes to the variable region, returning their offset
    pub fn append_variable(&mut self, bytes: &[u8]) -> Result<usize> {
        let offset = self.data.len();
        if offset + bytes.len() > MAX_ROW_SIZE {
            return Err(Error::RowOverflow(format!(
                "row of {} bytes exceeds maximum of {}",
                offset + bytes.len(),
                MAX_ROW_SIZE
            )));
        }
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    pub fn set_var_slot(&mut self, slot_offset: usize, var_offset: usize, count: usize) {
        let slot = &mut self.data[slot_offset..slot_offset + VAR_SLOT_SIZE];
        pack_uint(var_offset as u64, &mut slot[..2]);
        pack_uint(count as u64, &mut slot[2..]);
    }

    pub fn clear_var_slot(&mut self, slot_offset: usize) {
        self.data[slot_offset..slot_offset + VAR_SLOT_SIZE].fill(0);
    }

    /// Decode a variable slot; `None` for the all-zero missing slot
    pub fn var_slot(&self, slot_offset: usize) -> Option<(usize, usize)> {
        let slot = &self.data[slot_offset..slot_offset + VAR_SLOT_SIZE];
        if slot.iter().all(|&b| b == 0) {
            return None;
        }
        let count = unpack_uint(&slot[2..]).unwrap_or(0) as usize;
        let offset = if count == 0 {
            0
        } else {
            unpack_uint(&slot[..2]).unwrap_or(0) as usize
        };
        Some((offset, count))
    }

    /// Bytes of the variable region referenced by a slot
    pub fn variable(&self, offset: usize, len: usize) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        if offset < self.fixed_region_size || offset + len > self.data.len() {
            return Err(Error::backend(format!(
                "corrupt row: variable data [{}, {}) outside [{}, {})",
                offset,
                offset + len,
                self.fixed_region_size,
                self.data.len()
            )));
        }
        Ok(&self.data[offset..offset + len])
    }

    /// Row bytes following the row-id key, as stored in the data file
    pub fn body(&self, key_size: usize) -> &[u8] {
        &self.data[key_size..]
    }

    /// Replace the buffer contents with a stored row
    pub fn load(&mut self, key: &[u8], body: &[u8]) -> Result<()> {
        let size = key.len() + body.len();
        if size < self.fixed_region_size || size > MAX_ROW_SIZE {
            return Err(Error::backend(format!(
                "corrupt row: stored size {} outside [{}, {}]",
                size, self.fixed_region_size, MAX_ROW_SIZE
            )));
        }
        self.data.clear();
        self.data.extend_from_slice(key);
        self.data.extend_from_slice(body);
        Ok(())
    }

    /// Space left for the variable region
    pub fn remaining(&self) -> usize {
        MAX_ROW_SIZE - self.data.len()
    }
}
