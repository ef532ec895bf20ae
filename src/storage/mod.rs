pub mod btree;
pub mod catalog;
pub mod files;

pub use btree::{BTree, BTreeWriter, Cursor};
pub use catalog::{ColumnMeta, IndexMeta, TableMeta};
pub use files::{DataFile, PageFile};

/// Compute simple checksum for page and metadata validation
pub(crate) fn compute_checksum(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, &byte| {
        acc.wrapping_mul(31).wrapping_add(byte as u64)
    })
}
