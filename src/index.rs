use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::column::Column;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::rows::{IndexKeyIterator, IndexRowIterator};
use crate::storage::catalog::{self, IndexMeta};
use crate::storage::{BTree, BTreeWriter, Cursor};
use crate::table::Table;
use crate::types::{Mode, Value};

enum IndexState {
    Closed,
    /// Open for write; the writer is consumed by `build`
    Write(Option<BTreeWriter>),
    Read(BTree),
}

/// Add one to `key` read as a big-endian integer, starting at its last
/// non-zero byte and carrying toward the front
///
/// Returns `None` when the carry runs off the front, meaning no key is
/// greater than every key with this prefix.
pub fn increment_key(key: &[u8]) -> Option<Vec<u8>> {
    let mut next = key.to_vec();
    let start = next.iter().rposition(|&b| b != 0).unwrap_or(next.len().checked_sub(1)?);
    for i in (0..=start).rev() {
        let (byte, carry) = next[i].overflowing_add(1);
        next[i] = byte;
        if !carry {
            return Some(next);
        }
    }
    None
}

/// A secondary index over one or more columns of a table
///
/// Keys are the concatenated sort-preserving encodings of the key columns,
/// each quantised by its bin width; the value of every entry is the packed
/// row id, so rows sharing a key are kept in row-id order.
pub struct Index<'t> {
    table: &'t Table,
    name: String,
    config: Config,
    key_columns: Vec<usize>,
    bin_widths: Vec<f64>,
    state: IndexState,
}

impl<'t> Index<'t> {
    pub fn new(table: &'t Table, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::Schema(format!("invalid index name '{}'", name)));
        }
        Ok(Index {
            table,
            name: name.to_string(),
            config: table.config().clone(),
            key_columns: Vec::new(),
            bin_widths: Vec::new(),
            state: IndexState::Closed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &'t Table {
        self.table
    }

    pub fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    pub fn bin_widths(&self) -> &[f64] {
        &self.bin_widths
    }

    pub fn mode(&self) -> Option<Mode> {
        match self.state {
            IndexState::Closed => None,
            IndexState::Write(_) => Some(Mode::Write),
            IndexState::Read(_) => Some(Mode::Read),
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, IndexState::Closed)
    }

    fn db_path(&self) -> PathBuf {
        self.table.homedir().join(format!("index_{}.db", self.name))
    }

    fn meta_path(&self) -> PathBuf {
        self.table.homedir().join(format!("index_{}.meta", self.name))
    }

    fn require_closed(&self, op: &str) -> Result<()> {
        if self.is_open() {
            return Err(Error::WrongMode(format!("{} must be called before index '{}' is opened", op, self.name)));
        }
        Ok(())
    }

    pub fn set_cache_size(&mut self, bytes: usize) -> Result<()> {
        self.require_closed("set_cache_size")?;
        self.config.cache_size = bytes;
        Ok(())
    }

    fn key_column(&self, i: usize) -> Result<&'t Column> {
        self.table.column_at(self.key_columns[i])
    }

    /// Append the column at `position` to the key
    pub fn add_key_column(&mut self, position: usize) -> Result<()> {
        self.require_closed("add_key_column")?;
        let column = self.table.column_at(position)?;
        if self.key_columns.contains(&position) {
            return Err(Error::DuplicateColumn(format!(
                "column '{}' is already part of index '{}'",
                column.name(),
                self.name
            )));
        }
        self.key_columns.push(position);
        self.bin_widths.clear();
        Ok(())
    }

    pub fn add_key_column_by_name(&mut self, name: &str) -> Result<()> {
        let position = self.table.column_position(name)?;
        self.add_key_column(position)
    }

    /// One bin width per key column; 0 keeps values exact
    pub fn set_bin_widths(&mut self, bin_widths: &[f64]) -> Result<()> {
        self.require_closed("set_bin_widths")?;
        if bin_widths.len() != self.key_columns.len() {
            return Err(Error::OutOfRange(format!(
                "index '{}' has {} key columns but {} bin widths were given",
                self.name,
                self.key_columns.len(),
                bin_widths.len()
            )));
        }
        for (i, &width) in bin_widths.iter().enumerate() {
            self.key_column(i)?.check_bin_width(width)?;
        }
        self.bin_widths = bin_widths.to_vec();
        Ok(())
    }

    fn effective_bin_widths(&self) -> Vec<f64> {
        if self.bin_widths.is_empty() {
            vec![0.0; self.key_columns.len()]
        } else {
            self.bin_widths.clone()
        }
    }

    pub fn open(&mut self, mode: Mode) -> Result<()> {
        if let Some(current) = self.mode() {
            return Err(Error::WrongMode(format!("index '{}' is already open for {}", self.name, current)));
        }
        match mode {
            Mode::Write => self.open_write(),
            Mode::Read => self.open_read(),
        }
    }

    fn open_write(&mut self) -> Result<()> {
        if self.key_columns.is_empty() {
            return Err(Error::Schema(format!("index '{}' has no key columns", self.name)));
        }
        self.bin_widths = self.effective_bin_widths();
        remove_if_exists(&self.meta_path())?;
        let writer = BTreeWriter::create(self.db_path(), &self.config, true)?;
        self.state = IndexState::Write(Some(writer));
        info!(index = %self.name, columns = ?self.key_columns, bin_widths = ?self.bin_widths, "opened index for write");
        Ok(())
    }

    fn open_read(&mut self) -> Result<()> {
        if self.table.mode() != Some(Mode::Read) {
            return Err(Error::WrongMode(format!(
                "index '{}' can only be read from a table open for read",
                self.name
            )));
        }
        let meta_path = self.meta_path();
        if !meta_path.exists() {
            return Err(Error::NotFound(format!("no index named '{}'", self.name)));
        }
        let meta: IndexMeta = catalog::read_meta(&meta_path)?;
        let key_columns: Vec<usize> = meta.key_columns.iter().map(|&p| p as usize).collect();
        if !self.key_columns.is_empty() && self.key_columns != key_columns {
            return Err(Error::Schema(format!(
                "declared key columns {:?} do not match stored key columns {:?} of index '{}'",
                self.key_columns, key_columns, self.name
            )));
        }
        if !self.bin_widths.is_empty() && self.bin_widths != meta.bin_widths {
            return Err(Error::Schema(format!(
                "declared bin widths {:?} do not match stored bin widths {:?} of index '{}'",
                self.bin_widths, meta.bin_widths, self.name
            )));
        }
        if meta.bin_widths.len() != key_columns.len() {
            return Err(Error::Schema(format!(
                "index '{}' stores {} bin widths for {} key columns",
                self.name,
                meta.bin_widths.len(),
                key_columns.len()
            )));
        }
        for (&position, &bin_width) in key_columns.iter().zip(&meta.bin_widths) {
            self.table.column_at(position)?.check_bin_width(bin_width)?;
        }
        let tree = BTree::open(self.db_path(), &self.config)?;
        if tree.len() != meta.num_entries {
            return Err(Error::backend(format!(
                "index '{}' holds {} entries but metadata records {}",
                self.name,
                tree.len(),
                meta.num_entries
            )));
        }
        self.key_columns = key_columns;
        self.bin_widths = meta.bin_widths;
        self.state = IndexState::Read(tree);
        debug!(index = %self.name, entries = meta.num_entries, "opened index for read");
        Ok(())
    }

    /// Populate the index from every row of the table
    ///
    /// `progress` receives the number of rows processed every `interval`
    /// rows; an error from it aborts the build. On any failure the index
    /// file is truncated and the index is left closed.
    pub fn build<F>(&mut self, mut progress: F, interval: u64) -> Result<u64>
    where
        F: FnMut(u64) -> Result<()>,
    {
        if interval == 0 {
            return Err(Error::OutOfRange("progress interval must be at least 1".to_string()));
        }
        match &self.state {
            IndexState::Write(Some(_)) => {}
            IndexState::Write(None) => {
                return Err(Error::WrongMode(format!("index '{}' has already been built", self.name)));
            }
            IndexState::Read(_) => {
                return Err(Error::WrongMode(format!("index '{}' is open for read", self.name)));
            }
            IndexState::Closed => {
                return Err(Error::Closed(format!("index '{}' is not open", self.name)));
            }
        }
        self.table.primary()?;
        let IndexState::Write(Some(mut writer)) = std::mem::replace(&mut self.state, IndexState::Write(None)) else {
            return Err(Error::WrongMode(format!("index '{}' is not open for write", self.name)));
        };
        info!(index = %self.name, rows = self.table.stats().num_rows, "building index");

        let entries = match self.collect_entries(&mut progress, interval) {
            Ok(entries) => entries,
            Err(e) => return Err(self.abort(writer, e)),
        };
        for (key, row_key) in &entries {
            if let Err(e) = writer.put(key, row_key) {
                return Err(self.abort(writer, e));
            }
        }
        let header = match writer.finish() {
            Ok(header) => header,
            Err(e) => {
                self.state = IndexState::Closed;
                return Err(e);
            }
        };
        let meta = IndexMeta {
            name: self.name.clone(),
            key_columns: self.key_columns.iter().map(|&p| p as u32).collect(),
            bin_widths: self.bin_widths.clone(),
            num_entries: header.num_entries,
        };
        catalog::write_meta(&self.meta_path(), &meta)?;
        info!(index = %self.name, rows = header.num_entries, pages = header.num_pages, "built index");
        Ok(header.num_entries)
    }

    /// Composite keys paired with their row keys, sorted
    fn collect_entries<F>(&self, progress: &mut F, interval: u64) -> Result<Vec<(Vec<u8>, Vec<u8>)>>
    where
        F: FnMut(u64) -> Result<()>,
    {
        let columns = (0..self.key_columns.len())
            .map(|i| self.key_column(i))
            .collect::<Result<Vec<_>>>()?;
        let primary = self.table.primary()?;
        let mut cursor = primary.cursor();
        let mut row = self.table.scratch_row();
        let mut entries = Vec::with_capacity(primary.len() as usize);
        let mut count = 0u64;
        while cursor.next()? {
            let Some((row_key, record)) = cursor.current() else {
                break;
            };
            self.table.load_record(row_key, record, &mut row)?;
            let mut key = Vec::new();
            for (column, &bin_width) in columns.iter().zip(&self.bin_widths) {
                column.append_key(&row, bin_width, &mut key)?;
            }
            entries.push((key, row_key.to_vec()));
            count += 1;
            if count % interval == 0 {
                debug!(index = %self.name, rows = count, "build progress");
                progress(count)?;
            }
        }
        entries.sort_unstable();
        Ok(entries)
    }

    fn abort(&mut self, writer: BTreeWriter, err: Error) -> Error {
        self.state = IndexState::Closed;
        if let Err(e) = writer.abort() {
            warn!(index = %self.name, error = %e, "failed to truncate index");
        }
        warn!(index = %self.name, error = %err, "index build failed, index truncated");
        err
    }

    pub(crate) fn tree(&self) -> Result<&BTree> {
        match &self.state {
            IndexState::Read(tree) => Ok(tree),
            IndexState::Write(_) => Err(Error::WrongMode(format!("index '{}' is open for write", self.name))),
            IndexState::Closed => Err(Error::Closed(format!("index '{}' is not open", self.name))),
        }
    }

    /// Composite key of a prefix of key-column values, after binning
    pub fn key_for(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() > self.key_columns.len() {
            return Err(Error::OutOfRange(format!(
                "index '{}' has {} key columns but {} values were given",
                self.name,
                self.key_columns.len(),
                values.len()
            )));
        }
        let bin_widths = self.effective_bin_widths();
        let mut key = Vec::new();
        for (i, value) in values.iter().enumerate() {
            self.key_column(i)?.append_key_value(value, bin_widths[i], &mut key)?;
        }
        Ok(key)
    }

    /// Values of the key columns encoded in a composite key
    pub fn parse_key(&self, key: &[u8]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.key_columns.len());
        let mut offset = 0;
        for i in 0..self.key_columns.len() {
            let (value, used) = self.key_column(i)?.parse_key(&key[offset..])?;
            values.push(value);
            offset += used;
        }
        if offset != key.len() {
            return Err(Error::backend(format!(
                "index '{}': {} trailing bytes in key",
                self.name,
                key.len() - offset
            )));
        }
        Ok(values)
    }

    /// Number of rows whose key starts with the key of `prefix`
    pub fn num_rows(&self, prefix: &[Value]) -> Result<u64> {
        let tree = self.tree()?;
        if prefix.is_empty() {
            return Ok(tree.len());
        }
        let key = self.key_for(prefix)?;
        let mut cursor = tree.cursor();
        let mut count = 0;
        let mut found = cursor.set_range(&key)?;
        while found && cursor.key().is_some_and(|k| k.starts_with(&key)) {
            count += cursor.count()?;
            found = cursor.next_nodup()?;
        }
        Ok(count)
    }

    fn row_at(&self, cursor: &Cursor<'_>) -> Result<Vec<Value>> {
        let row_key = cursor.value().ok_or_else(|| Error::backend("cursor is not positioned"))?;
        let mut row = self.table.scratch_row();
        self.table.load_row(row_key, &mut row)?;
        self.table.decode_row(&row, &self.table.all_positions())
    }

    fn not_found(&self, prefix: &[Value]) -> Error {
        let shown: Vec<String> = prefix.iter().map(Value::to_string).collect();
        Error::NotFound(format!("no rows in index '{}' with prefix ({})", self.name, shown.join(", ")))
    }

    /// First row, in key order, whose key starts with the key of `prefix`
    pub fn get_min(&self, prefix: &[Value]) -> Result<Vec<Value>> {
        let key = self.key_for(prefix)?;
        let mut cursor = self.tree()?.cursor();
        if !cursor.set_range(&key)? || !cursor.key().is_some_and(|k| k.starts_with(&key)) {
            return Err(self.not_found(prefix));
        }
        self.row_at(&cursor)
    }

    /// Last row, in key order, whose key starts with the key of `prefix`
    pub fn get_max(&self, prefix: &[Value]) -> Result<Vec<Value>> {
        let key = self.key_for(prefix)?;
        let mut cursor = self.tree()?.cursor();
        let positioned = match increment_key(&key) {
            Some(upper) if !key.is_empty() => {
                if cursor.set_range(&upper)? {
                    cursor.prev()?
                } else {
                    cursor.last()?
                }
            }
            _ => cursor.last()?,
        };
        if !positioned {
            return Err(self.not_found(prefix));
        }
        loop {
            match cursor.key() {
                Some(k) if k.starts_with(&key) => return self.row_at(&cursor),
                Some(k) if k < key.as_slice() => return Err(self.not_found(prefix)),
                Some(_) => {}
                None => return Err(self.not_found(prefix)),
            }
            if !cursor.prev()? {
                return Err(self.not_found(prefix));
            }
        }
    }

    /// Iterate rows in key order, yielding the columns at `read_columns`
    pub fn rows(&self, read_columns: &[usize]) -> Result<IndexRowIterator<'_>> {
        for &position in read_columns {
            self.table.column_at(position)?;
        }
        IndexRowIterator::new(self, read_columns.to_vec())
    }

    /// Iterate the distinct keys of the index
    pub fn keys(&self) -> Result<IndexKeyIterator<'_>> {
        IndexKeyIterator::new(self)
    }

    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, IndexState::Closed) {
            IndexState::Write(Some(writer)) => {
                let header = writer.finish()?;
                let meta = IndexMeta {
                    name: self.name.clone(),
                    key_columns: self.key_columns.iter().map(|&p| p as u32).collect(),
                    bin_widths: self.bin_widths.clone(),
                    num_entries: header.num_entries,
                };
                catalog::write_meta(&self.meta_path(), &meta)?;
                debug!(index = %self.name, "closed unbuilt index");
                Ok(())
            }
            IndexState::Write(None) | IndexState::Read(_) => {
                debug!(index = %self.name, "closed index");
                Ok(())
            }
            IndexState::Closed => Err(Error::Closed(format!("index '{}' is not open", self.name))),
        }
    }

    /// Remove the index's files from the table directory
    pub fn delete(&mut self) -> Result<()> {
        self.require_closed("delete")?;
        let meta_path = self.meta_path();
        let db_path = self.db_path();
        if !meta_path.exists() && !db_path.exists() {
            return Err(Error::NotFound(format!("no index named '{}'", self.name)));
        }
        remove_if_exists(&meta_path)?;
        remove_if_exists(&db_path)?;
        info!(index = %self.name, "deleted index");
        Ok(())
    }
}

impl Drop for Index<'_> {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!(index = %self.name, error = %e, "failed to close index");
            }
        }
    }
}

fn remove_if_exists(path: &std::path::Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
