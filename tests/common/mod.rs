#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use wormtable::{Config, ElementType, Index, Mode, NumElements, Table, Value};

/// Column declaration used by the helpers: name, type, element size, count
pub type ColumnDef<'a> = (&'a str, ElementType, usize, NumElements);

/// A table directory inside an isolated temp dir, removed on drop
pub struct TestTable {
    _dir: TempDir,
    path: PathBuf,
}

impl TestTable {
    /// Write a table with a 4 byte row id and the given columns, one
    /// committed row per entry of `rows` (values exclude the row id)
    pub fn new(columns: &[ColumnDef<'_>], rows: &[Vec<Value>]) -> Self {
        Self::with_config(Config::default(), columns, rows)
    }

    pub fn with_config(config: Config, columns: &[ColumnDef<'_>], rows: &[Vec<Value>]) -> Self {
        Self::build(config, 4, columns, rows)
    }

    /// Like `new` with a row id of `id_size` bytes
    pub fn with_id_size(id_size: usize, columns: &[ColumnDef<'_>], rows: &[Vec<Value>]) -> Self {
        Self::build(Config::default(), id_size, columns, rows)
    }

    fn build(config: Config, id_size: usize, columns: &[ColumnDef<'_>], rows: &[Vec<Value>]) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("table");
        let mut table = Table::with_config(&path, config);
        table.add_id_column(id_size).unwrap();
        for &(name, element_type, element_size, num_elements) in columns {
            table
                .add_column(name, "", element_type, element_size, num_elements)
                .unwrap();
        }
        table.open(Mode::Write).unwrap();
        for row in rows {
            for (i, value) in row.iter().enumerate() {
                table.insert_value(i + 1, value).unwrap();
            }
            table.commit_row().unwrap();
        }
        table.close().unwrap();
        TestTable { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the written table for read
    pub fn open(&self) -> Table {
        let mut table = Table::new(&self.path);
        table.open(Mode::Read).unwrap();
        table
    }
}

/// Build and close an index over the named columns, then reopen it for read
pub fn build_index<'t>(table: &'t Table, name: &str, columns: &[&str], bin_widths: &[f64]) -> Index<'t> {
    let mut index = Index::new(table, name).unwrap();
    for column in columns {
        index.add_key_column_by_name(column).unwrap();
    }
    if !bin_widths.is_empty() {
        index.set_bin_widths(bin_widths).unwrap();
    }
    index.open(Mode::Write).unwrap();
    index.build(|_| Ok(()), 1000).unwrap();
    index.close().unwrap();
    index.open(Mode::Read).unwrap();
    index
}

/// Collect an iterator of rows, failing the test on the first error
pub fn collect_rows<I>(rows: I) -> Vec<Vec<Value>>
where
    I: Iterator<Item = wormtable::Result<Vec<Value>>>,
{
    rows.map(|row| row.unwrap()).collect()
}

pub fn uint_rows(values: &[u64]) -> Vec<Vec<Value>> {
    values.iter().map(|&v| vec![Value::Uint(v)]).collect()
}
