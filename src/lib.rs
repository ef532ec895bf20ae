//! Write-once, read-many columnar tables
//!
//! A [`Table`] is written row by row in [`Mode::Write`], closed, and then
//! opened in [`Mode::Read`] for point lookups and scans. Secondary
//! [`Index`]es are built over a read-open table; their keys are byte
//! strings whose lexicographic order matches the order of the indexed
//! column values, so range scans, distinct-key enumeration, prefix counts
//! and min/max lookups are all B-tree cursor walks.

pub mod codec;
pub mod column;
pub mod config;
pub mod error;
pub mod index;
pub mod row;
pub mod rows;
pub mod storage;
pub mod table;
pub mod types;

pub use column::Column;
pub use config::Config;
pub use error::{Error, Result};
pub use index::Index;
pub use rows::{IndexKeyIterator, IndexRowIterator, TableRowIterator};
pub use table::{RowStats, Table};
pub use types::{ElementType, Mode, NumElements, Value, MAX_NUM_ELEMENTS, MAX_ROW_SIZE, ROW_ID_COLUMN};
