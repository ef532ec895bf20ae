//! Cursor-backed row and key iterators
//!
//! All three iterators walk a half-open key range `[min, max)` and yield
//! `Result<Vec<Value>>`. They are single pass: once exhausted, or after an
//! error, they keep returning `None`.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::index::Index;
use crate::row::RowBuffer;
use crate::storage::Cursor;
use crate::table::Table;
use crate::types::Value;

/// True once `key` has moved past the exclusive upper bound `max`
///
/// Only the common prefix is compared, so a key that extends `max` is
/// still inside the range while a key equal to it is not.
pub(crate) fn exceeds(key: &[u8], max: &[u8]) -> bool {
    let n = key.len().min(max.len());
    match key[..n].cmp(&max[..n]) {
        Ordering::Less => false,
        Ordering::Greater => true,
        Ordering::Equal => key.len() == max.len(),
    }
}

#[derive(Debug, Default)]
struct KeyRange {
    min: Option<Vec<u8>>,
    max: Option<Vec<u8>>,
    started: bool,
    done: bool,
}

impl KeyRange {
    fn check_unstarted(&self) -> Result<()> {
        if self.started {
            return Err(Error::WrongMode("iterator bounds must be set before iteration starts".to_string()));
        }
        Ok(())
    }

    /// Step the cursor; `distinct` skips duplicates of the current key
    fn advance(&mut self, cursor: &mut Cursor<'_>, distinct: bool) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        let found = if !self.started {
            self.started = true;
            match &self.min {
                Some(min) => cursor.set_range(min)?,
                None => cursor.first()?,
            }
        } else if distinct {
            cursor.next_nodup()?
        } else {
            cursor.next()?
        };
        let past_max = match (&self.max, cursor.key()) {
            (Some(max), Some(key)) => exceeds(key, max),
            _ => false,
        };
        if !found || past_max {
            self.done = true;
            cursor.reset();
            return Ok(false);
        }
        Ok(true)
    }
}

fn yield_item<T>(done: &mut bool, step: Result<Option<T>>) -> Option<Result<T>> {
    match step {
        Ok(Some(item)) => Some(Ok(item)),
        Ok(None) => None,
        Err(e) => {
            *done = true;
            Some(Err(e))
        }
    }
}

/// Rows of a table in row-id order
pub struct TableRowIterator<'t> {
    table: &'t Table,
    cursor: Cursor<'t>,
    read_columns: Vec<usize>,
    range: KeyRange,
    row: RowBuffer,
}

impl<'t> TableRowIterator<'t> {
    pub(crate) fn new(table: &'t Table, read_columns: Vec<usize>) -> Result<Self> {
        Ok(TableRowIterator {
            table,
            cursor: table.primary()?.cursor(),
            read_columns,
            range: KeyRange::default(),
            row: table.scratch_row(),
        })
    }

    /// First row id to yield
    pub fn set_min(&mut self, row_id: u64) -> Result<()> {
        self.range.check_unstarted()?;
        self.range.min = Some(self.table.row_key(row_id)?);
        Ok(())
    }

    /// Row id at which to stop, exclusive
    pub fn set_max(&mut self, row_id: u64) -> Result<()> {
        self.range.check_unstarted()?;
        self.range.max = Some(self.table.row_key(row_id)?);
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if !self.range.advance(&mut self.cursor, false)? {
            return Ok(None);
        }
        let Some((key, record)) = self.cursor.current() else {
            return Ok(None);
        };
        self.table.load_record(key, record, &mut self.row)?;
        self.table.decode_row(&self.row, &self.read_columns).map(Some)
    }
}

impl Iterator for TableRowIterator<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.next_row();
        yield_item(&mut self.range.done, step)
    }
}

/// Rows of a table in the order of an index's composite keys
///
/// Rows sharing a key come out in row-id order.
pub struct IndexRowIterator<'a> {
    index: &'a Index<'a>,
    cursor: Cursor<'a>,
    read_columns: Vec<usize>,
    range: KeyRange,
    row: RowBuffer,
}

impl<'a> IndexRowIterator<'a> {
    pub(crate) fn new(index: &'a Index<'a>, read_columns: Vec<usize>) -> Result<Self> {
        Ok(IndexRowIterator {
            index,
            cursor: index.tree()?.cursor(),
            read_columns,
            range: KeyRange::default(),
            row: index.table().scratch_row(),
        })
    }

    /// Start at the first key `>=` the key of this value prefix
    pub fn set_min(&mut self, values: &[Value]) -> Result<()> {
        self.range.check_unstarted()?;
        self.range.min = Some(self.index.key_for(values)?);
        Ok(())
    }

    /// Stop at the key of this value prefix
    pub fn set_max(&mut self, values: &[Value]) -> Result<()> {
        self.range.check_unstarted()?;
        self.range.max = Some(self.index.key_for(values)?);
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if !self.range.advance(&mut self.cursor, false)? {
            return Ok(None);
        }
        let Some(row_key) = self.cursor.value() else {
            return Ok(None);
        };
        let table = self.index.table();
        table.load_row(row_key, &mut self.row)?;
        table.decode_row(&self.row, &self.read_columns).map(Some)
    }
}

impl Iterator for IndexRowIterator<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.next_row();
        yield_item(&mut self.range.done, step)
    }
}

/// Distinct composite keys of an index, parsed back into column values
pub struct IndexKeyIterator<'a> {
    index: &'a Index<'a>,
    cursor: Cursor<'a>,
    range: KeyRange,
}

impl<'a> IndexKeyIterator<'a> {
    pub(crate) fn new(index: &'a Index<'a>) -> Result<Self> {
        Ok(IndexKeyIterator {
            index,
            cursor: index.tree()?.cursor(),
            range: KeyRange::default(),
        })
    }

    pub fn set_min(&mut self, values: &[Value]) -> Result<()> {
        self.range.check_unstarted()?;
        self.range.min = Some(self.index.key_for(values)?);
        Ok(())
    }

    pub fn set_max(&mut self, values: &[Value]) -> Result<()> {
        self.range.check_unstarted()?;
        self.range.max = Some(self.index.key_for(values)?);
        Ok(())
    }

    /// Number of rows under the key most recently yielded
    pub fn row_count(&self) -> Result<u64> {
        self.cursor.count()
    }

    fn next_key(&mut self) -> Result<Option<Vec<Value>>> {
        if !self.range.advance(&mut self.cursor, true)? {
            return Ok(None);
        }
        let Some(key) = self.cursor.key() else {
            return Ok(None);
        };
        self.index.parse_key(key).map(Some)
    }
}

impl Iterator for IndexKeyIterator<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.next_key();
        yield_item(&mut self.range.done, step)
    }
}
