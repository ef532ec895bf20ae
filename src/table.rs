use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codec::{pack_uint, unpack_uint};
use crate::column::Column;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::row::RowBuffer;
use crate::rows::TableRowIterator;
use crate::storage::catalog::{self, ColumnMeta, TableMeta};
use crate::storage::{BTree, BTreeWriter, DataFile};
use crate::types::{ElementType, Mode, NumElements, Value, MAX_ROW_SIZE, ROW_ID_COLUMN};

pub const PRIMARY_FILE: &str = "primary.db";
pub const DATA_FILE: &str = "data.bin";
pub const TABLE_META_FILE: &str = "table.meta";

/// Size of a primary record: pack_uint(offset, 8) || pack_uint(length, 2)
const RECORD_SIZE: usize = 10;

/// Row size statistics over all committed rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowStats {
    pub num_rows: u64,
    pub min_row_size: usize,
    pub max_row_size: usize,
    pub total_row_size: u64,
}

impl RowStats {
    fn record(&mut self, row_size: usize) {
        if self.num_rows == 0 {
            self.min_row_size = row_size;
            self.max_row_size = row_size;
        } else {
            self.min_row_size = self.min_row_size.min(row_size);
            self.max_row_size = self.max_row_size.max(row_size);
        }
        self.num_rows += 1;
        self.total_row_size += row_size as u64;
    }

    fn to_meta(self, columns: &[Column]) -> TableMeta {
        TableMeta {
            columns: columns.iter().map(ColumnMeta::from_column).collect(),
            num_rows: self.num_rows,
            min_row_size: self.min_row_size as u32,
            max_row_size: self.max_row_size as u32,
            total_row_size: self.total_row_size,
        }
    }
}

enum Store {
    Write {
        data: DataFile,
        primary: BTreeWriter,
        row: RowBuffer,
    },
    Read {
        data: DataFile,
        primary: BTree,
    },
}

/// An append-only table stored in its own directory
///
/// Rows are written once in WRITE mode and read any number of times after
/// the table is closed and reopened in READ mode. Column 0 is always the
/// row id, a single UINT assigned from 0 in commit order.
pub struct Table {
    homedir: PathBuf,
    config: Config,
    columns: Vec<Column>,
    fixed_region_size: usize,
    store: Option<Store>,
    next_row_id: u64,
    stats: RowStats,
}

impl Table {
    pub fn new<P: AsRef<Path>>(homedir: P) -> Self {
        Self::with_config(homedir, Config::default())
    }

    pub fn with_config<P: AsRef<Path>>(homedir: P, config: Config) -> Self {
        Table {
            homedir: homedir.as_ref().to_path_buf(),
            config,
            columns: Vec::new(),
            fixed_region_size: 0,
            store: None,
            next_row_id: 0,
            stats: RowStats::default(),
        }
    }

    pub fn homedir(&self) -> &Path {
        &self.homedir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> Option<Mode> {
        match self.store {
            Some(Store::Write { .. }) => Some(Mode::Write),
            Some(Store::Read { .. }) => Some(Mode::Read),
            None => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    fn require(&self, mode: Mode, op: &str) -> Result<()> {
        match self.mode() {
            Some(m) if m == mode => Ok(()),
            Some(m) => Err(Error::WrongMode(format!(
                "{} requires a table open for {}, but {} is open for {}",
                op,
                mode,
                self.homedir.display(),
                m
            ))),
            None => Err(Error::Closed(format!("{}: table {} is not open", op, self.homedir.display()))),
        }
    }

    /// Page cache budget for the primary B-tree; only before `open`
    pub fn set_cache_size(&mut self, bytes: usize) -> Result<()> {
        if self.is_open() {
            return Err(Error::WrongMode("cache size must be set before the table is opened".to_string()));
        }
        self.config.cache_size = bytes;
        Ok(())
    }

    /// Declare the next column
    ///
    /// Allowed while closed, or open for WRITE before the first commit.
    /// The first column must be the row id: a UINT with one element.
    pub fn add_column(
        &mut self,
        name: &str,
        description: &str,
        element_type: ElementType,
        element_size: usize,
        num_elements: NumElements,
    ) -> Result<()> {
        match self.mode() {
            None => {}
            Some(Mode::Write) if self.next_row_id == 0 => {}
            Some(Mode::Write) => {
                return Err(Error::WrongMode(format!(
                    "cannot add column '{}' after rows have been committed",
                    name
                )));
            }
            Some(Mode::Read) => {
                return Err(Error::WrongMode(format!("cannot add column '{}' to a table open for read", name)));
            }
        }
        if self.columns.iter().any(|c| c.name() == name) {
            return Err(Error::DuplicateColumn(name.to_string()));
        }
        let mut column = Column::new(name, description, element_type, element_size, num_elements)?;
        if self.columns.is_empty()
            && (element_type != ElementType::Uint || num_elements != NumElements::Fixed(1))
        {
            return Err(Error::Schema(format!(
                "column 0 ('{}') must be the row id: uint with 1 element",
                name
            )));
        }
        if self.fixed_region_size + column.fixed_size() > MAX_ROW_SIZE {
            return Err(Error::RowOverflow(format!(
                "column '{}' grows the fixed region to {} bytes, maximum is {}",
                name,
                self.fixed_region_size + column.fixed_size(),
                MAX_ROW_SIZE
            )));
        }
        column.set_layout(self.columns.len(), self.fixed_region_size);
        self.fixed_region_size += column.fixed_size();
        debug!(
            table = %self.homedir.display(),
            column = name,
            position = column.position(),
            offset = column.fixed_region_offset(),
            "added column"
        );
        self.columns.push(column);
        if let Some(Store::Write { row, .. }) = self.store.as_mut() {
            *row = RowBuffer::new(self.fixed_region_size);
        }
        Ok(())
    }

    /// Declare the row-id column with the given key width
    pub fn add_id_column(&mut self, element_size: usize) -> Result<()> {
        self.add_column(
            ROW_ID_COLUMN,
            "Primary key column",
            ElementType::Uint,
            element_size,
            NumElements::Fixed(1),
        )
    }

    pub fn add_uint_column(&mut self, name: &str, description: &str, element_size: usize, num_elements: NumElements) -> Result<()> {
        self.add_column(name, description, ElementType::Uint, element_size, num_elements)
    }

    pub fn add_int_column(&mut self, name: &str, description: &str, element_size: usize, num_elements: NumElements) -> Result<()> {
        self.add_column(name, description, ElementType::Int, element_size, num_elements)
    }

    pub fn add_float_column(&mut self, name: &str, description: &str, element_size: usize, num_elements: NumElements) -> Result<()> {
        self.add_column(name, description, ElementType::Float, element_size, num_elements)
    }

    pub fn add_char_column(&mut self, name: &str, description: &str, num_elements: NumElements) -> Result<()> {
        self.add_column(name, description, ElementType::Char, 1, num_elements)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| Error::NotFound(format!("no column named '{}'", name)))
    }

    pub fn column_position(&self, name: &str) -> Result<usize> {
        self.column(name).map(Column::position)
    }

    pub(crate) fn column_at(&self, position: usize) -> Result<&Column> {
        self.columns.get(position).ok_or_else(|| {
            Error::OutOfRange(format!(
                "column position {} out of range for a table of {} columns",
                position,
                self.columns.len()
            ))
        })
    }

    /// Width in bytes of the row-id key
    pub fn key_size(&self) -> usize {
        self.columns.first().map_or(0, Column::element_size)
    }

    pub fn fixed_region_size(&self) -> usize {
        self.fixed_region_size
    }

    pub fn open(&mut self, mode: Mode) -> Result<()> {
        if let Some(current) = self.mode() {
            return Err(Error::WrongMode(format!(
                "table {} is already open for {}",
                self.homedir.display(),
                current
            )));
        }
        match mode {
            Mode::Write => self.open_write(),
            Mode::Read => self.open_read(),
        }
    }

    fn open_write(&mut self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::Schema(format!(
                "table {} has no row id column",
                self.homedir.display()
            )));
        }
        fs::create_dir_all(&self.homedir)?;
        self.remove_index_files()?;
        let data = DataFile::create(self.homedir.join(DATA_FILE))?;
        let primary = BTreeWriter::create(self.homedir.join(PRIMARY_FILE), &self.config, false)?;
        self.next_row_id = 0;
        self.stats = RowStats::default();
        catalog::write_meta(&self.homedir.join(TABLE_META_FILE), &self.stats.to_meta(&self.columns))?;
        self.store = Some(Store::Write {
            data,
            primary,
            row: RowBuffer::new(self.fixed_region_size),
        });
        info!(table = %self.homedir.display(), columns = self.columns.len(), "opened table for write");
        Ok(())
    }

    fn open_read(&mut self) -> Result<()> {
        let meta_path = self.homedir.join(TABLE_META_FILE);
        if !meta_path.exists() {
            return Err(Error::NotFound(format!("no table in {}", self.homedir.display())));
        }
        let meta: TableMeta = catalog::read_meta(&meta_path)?;
        let mut columns = Vec::with_capacity(meta.columns.len());
        let mut fixed_region_size = 0;
        for (position, column_meta) in meta.columns.iter().enumerate() {
            let mut column = column_meta.to_column()?;
            column.set_layout(position, fixed_region_size);
            fixed_region_size += column.fixed_size();
            columns.push(column);
        }
        if !self.columns.is_empty() && self.columns != columns {
            return Err(Error::Schema(format!(
                "declared columns do not match the columns stored in {}",
                self.homedir.display()
            )));
        }
        if columns.is_empty() {
            return Err(Error::Schema(format!("table {} has no columns", self.homedir.display())));
        }
        let data = DataFile::open(self.homedir.join(DATA_FILE))?;
        let primary = BTree::open(self.homedir.join(PRIMARY_FILE), &self.config)?;
        if primary.len() != meta.num_rows {
            return Err(Error::backend(format!(
                "{} holds {} rows but metadata records {}",
                PRIMARY_FILE,
                primary.len(),
                meta.num_rows
            )));
        }
        self.columns = columns;
        self.fixed_region_size = fixed_region_size;
        self.stats = RowStats {
            num_rows: meta.num_rows,
            min_row_size: meta.min_row_size as usize,
            max_row_size: meta.max_row_size as usize,
            total_row_size: meta.total_row_size,
        };
        self.next_row_id = meta.num_rows;
        self.store = Some(Store::Read { data, primary });
        info!(
            table = %self.homedir.display(),
            rows = self.stats.num_rows,
            columns = self.columns.len(),
            "opened table for read"
        );
        Ok(())
    }

    fn write_row(&mut self, op: &str) -> Result<&mut RowBuffer> {
        self.require(Mode::Write, op)?;
        match self.store.as_mut() {
            Some(Store::Write { row, .. }) => Ok(row),
            _ => Err(Error::WrongMode(format!("{} requires a table open for write", op))),
        }
    }

    fn settable_column(&self, position: usize) -> Result<&Column> {
        if position == 0 {
            return Err(Error::Schema("the row id column is assigned on commit".to_string()));
        }
        self.column_at(position)
    }

    /// Set a column of the row being built
    pub fn insert_value(&mut self, position: usize, value: &Value) -> Result<()> {
        self.require(Mode::Write, "insert_value")?;
        let column = self.settable_column(position)?.clone();
        let row = self.write_row("insert_value")?;
        column.pack_into(value, row)?;
        Ok(())
    }

    /// Set a column from comma or semicolon delimited text
    pub fn insert_encoded(&mut self, position: usize, text: &[u8]) -> Result<()> {
        self.require(Mode::Write, "insert_encoded")?;
        let value = self.settable_column(position)?.parse_encoded(text)?;
        self.insert_value(position, &value)
    }

    /// Commit the row being built under the next row id
    pub fn commit_row(&mut self) -> Result<u64> {
        self.require(Mode::Write, "commit_row")?;
        let row_id = self.next_row_id;
        let id_column = self.column_at(0)?.clone();
        let key_size = id_column.element_size();
        let Some(Store::Write { data, primary, row }) = self.store.as_mut() else {
            return Err(Error::WrongMode("commit_row requires a table open for write".to_string()));
        };
        id_column.pack_into(&Value::Uint(row_id), row)?;
        let body = row.body(key_size);
        let offset = data.append(body)?;
        let mut record = [0u8; RECORD_SIZE];
        pack_uint(offset, &mut record[..8]);
        pack_uint(body.len() as u64, &mut record[8..]);
        primary.put(row.fixed(0, key_size), &record)?;
        self.stats.record(row.current_row_size());
        row.reset();
        self.next_row_id += 1;
        Ok(row_id)
    }

    /// Number of committed rows
    pub fn num_rows(&self) -> Result<u64> {
        match self.store.as_ref() {
            Some(Store::Write { .. }) => Ok(self.next_row_id),
            Some(Store::Read { primary, .. }) => {
                let mut cursor = primary.cursor();
                if !cursor.last()? {
                    return Ok(0);
                }
                let key = cursor.key().unwrap_or_default();
                let last = unpack_uint(key).ok_or_else(|| Error::backend("missing row id in primary key"))?;
                Ok(last + 1)
            }
            None => Err(Error::Closed(format!("num_rows: table {} is not open", self.homedir.display()))),
        }
    }

    pub fn stats(&self) -> RowStats {
        self.stats
    }

    pub(crate) fn primary(&self) -> Result<&BTree> {
        match self.store.as_ref() {
            Some(Store::Read { primary, .. }) => Ok(primary),
            Some(Store::Write { .. }) => Err(Error::WrongMode("rows can only be read from a table open for read".to_string())),
            None => Err(Error::Closed(format!("table {} is not open", self.homedir.display()))),
        }
    }

    fn data(&self) -> Result<&DataFile> {
        match self.store.as_ref() {
            Some(Store::Read { data, .. }) => Ok(data),
            Some(Store::Write { .. }) => Err(Error::WrongMode("rows can only be read from a table open for read".to_string())),
            None => Err(Error::Closed(format!("table {} is not open", self.homedir.display()))),
        }
    }

    /// Packed primary key of a row id
    pub fn row_key(&self, row_id: u64) -> Result<Vec<u8>> {
        let column = self.column_at(0)?;
        let mut key = vec![0u8; column.element_size()];
        column.codec().pack(&Value::Uint(row_id), &mut key, column.name())?;
        Ok(key)
    }

    /// Load the row stored under `key` with primary record `record` into `row`
    pub(crate) fn load_record(&self, key: &[u8], record: &[u8], row: &mut RowBuffer) -> Result<()> {
        if record.len() != RECORD_SIZE {
            return Err(Error::backend(format!("primary record of {} bytes", record.len())));
        }
        let offset = unpack_uint(&record[..8]).ok_or_else(|| Error::backend("missing offset in primary record"))?;
        let length = unpack_uint(&record[8..]).ok_or_else(|| Error::backend("missing length in primary record"))?;
        let mut body = vec![0u8; length as usize];
        self.data()?.read_at(offset, &mut body)?;
        row.load(key, &body)
    }

    /// Load the row with primary key `key` into `row`
    pub(crate) fn load_row(&self, key: &[u8], row: &mut RowBuffer) -> Result<()> {
        let record = self.primary()?.get(key)?.ok_or_else(|| {
            let id = unpack_uint(key).map_or_else(|| "NA".to_string(), |id| id.to_string());
            Error::NotFound(format!("no row with id {}", id))
        })?;
        self.load_record(key, &record, row)
    }

    pub(crate) fn decode_row(&self, row: &RowBuffer, positions: &[usize]) -> Result<Vec<Value>> {
        positions
            .iter()
            .map(|&position| self.column_at(position)?.extract(row))
            .collect()
    }

    pub(crate) fn all_positions(&self) -> Vec<usize> {
        (0..self.columns.len()).collect()
    }

    pub(crate) fn scratch_row(&self) -> RowBuffer {
        RowBuffer::new(self.fixed_region_size)
    }

    /// Values of every column of a committed row
    pub fn get_row(&self, row_id: u64) -> Result<Vec<Value>> {
        self.require(Mode::Read, "get_row")?;
        let key = self.row_key(row_id)?;
        let mut row = self.scratch_row();
        self.load_row(&key, &mut row)?;
        self.decode_row(&row, &self.all_positions())
    }

    /// Iterate rows in row-id order, yielding the columns at `read_columns`
    pub fn rows(&self, read_columns: &[usize]) -> Result<TableRowIterator<'_>> {
        self.require(Mode::Read, "rows")?;
        for &position in read_columns {
            self.column_at(position)?;
        }
        TableRowIterator::new(self, read_columns.to_vec())
    }

    /// Names of the indexes stored alongside this table
    pub fn index_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.homedir)? {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name
                .strip_prefix("index_")
                .and_then(|rest| rest.strip_suffix(".meta"))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Indexes over the previous contents are stale once the table is rewritten
    fn remove_index_files(&self) -> Result<()> {
        for entry in fs::read_dir(&self.homedir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(rest) = file_name.strip_prefix("index_") else {
                continue;
            };
            if rest.ends_with(".meta") || rest.ends_with(".db") {
                fs::remove_file(entry.path())?;
                warn!(table = %self.homedir.display(), file = file_name, "removed stale index file");
            }
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        match self.store.take() {
            Some(Store::Write { mut data, primary, .. }) => {
                data.flush()?;
                let header = primary.finish()?;
                catalog::write_meta(&self.homedir.join(TABLE_META_FILE), &self.stats.to_meta(&self.columns))?;
                info!(
                    table = %self.homedir.display(),
                    rows = self.stats.num_rows,
                    bytes = data.len(),
                    pages = header.num_pages,
                    min_row_size = self.stats.min_row_size,
                    max_row_size = self.stats.max_row_size,
                    "closed table"
                );
                Ok(())
            }
            Some(Store::Read { primary, .. }) => {
                let (hits, misses) = primary.cache_stats();
                debug!(table = %self.homedir.display(), hits, misses, "closed table");
                Ok(())
            }
            None => Err(Error::Closed(format!("table {} is not open", self.homedir.display()))),
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!(table = %self.homedir.display(), error = %e, "failed to close table");
            }
        }
    }
}
