use std::fs;
use std::io::Write;
use std::path::Path;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::column::Column;
use crate::error::{Error, Result};
use crate::storage::compute_checksum;
use crate::types::{ElementType, NumElements};

/// Version written to every metadata file
pub const META_VERSION: u32 = 1;

const META_MAGIC: u32 = 0x5754_4d44; // "WTMD"

/// Persisted description of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct ColumnMeta {
    pub name: String,
    pub description: String,
    pub element_type: ElementType,
    pub element_size: u32,
    pub num_elements: NumElements,
}

impl ColumnMeta {
    pub fn from_column(column: &Column) -> Self {
        ColumnMeta {
            name: column.name().to_string(),
            description: column.description().to_string(),
            element_type: column.element_type(),
            element_size: column.element_size() as u32,
            num_elements: column.num_elements(),
        }
    }

    pub fn to_column(&self) -> Result<Column> {
        Column::new(
            &self.name,
            &self.description,
            self.element_type,
            self.element_size as usize,
            self.num_elements,
        )
    }
}

/// Contents of `table.meta`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TableMeta {
    pub columns: Vec<ColumnMeta>,
    pub num_rows: u64,
    pub min_row_size: u32,
    pub max_row_size: u32,
    pub total_row_size: u64,
}

/// Contents of `index_<name>.meta`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct IndexMeta {
    pub name: String,
    pub key_columns: Vec<u32>,
    pub bin_widths: Vec<f64>,
    pub num_entries: u64,
}

/// Header in front of every metadata body
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct MetaHeader {
    pub magic: u32,
    pub version: u32,
    /// Checksum of the encoded body
    pub checksum: u64,
}

/// Encode `meta` behind a checksummed header
pub fn serialize<T: Encode>(meta: &T) -> Result<Vec<u8>> {
    let body = bincode::encode_to_vec(meta, bincode::config::standard())?;
    let header = MetaHeader {
        magic: META_MAGIC,
        version: META_VERSION,
        checksum: compute_checksum(&body),
    };
    let mut result = bincode::encode_to_vec(&header, bincode::config::standard())?;
    result.extend_from_slice(&body);
    Ok(result)
}

pub fn deserialize<T: Decode<()>>(data: &[u8]) -> Result<T> {
    let (header, bytes_read): (MetaHeader, usize) =
        bincode::decode_from_slice(data, bincode::config::standard())?;
    if header.magic != META_MAGIC {
        return Err(Error::backend("not a metadata file"));
    }
    if header.version != META_VERSION {
        return Err(Error::backend(format!("unsupported metadata version {}", header.version)));
    }
    let body = &data[bytes_read..];
    let expected_checksum = compute_checksum(body);
    if header.checksum != expected_checksum {
        return Err(Error::backend(format!(
            "metadata checksum mismatch: expected {}, got {}",
            expected_checksum, header.checksum
        )));
    }
    let (meta, _): (T, usize) = bincode::decode_from_slice(body, bincode::config::standard())?;
    Ok(meta)
}

/// Write metadata through a temporary file and rename it into place
pub fn write_meta<T: Encode>(path: &Path, meta: &T) -> Result<()> {
    let bytes = serialize(meta)?;
    let tmp = path.with_extension("meta.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote metadata");
    Ok(())
}

pub fn read_meta<T: Decode<()>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    deserialize(&bytes).map_err(|e| match e {
        Error::Backend(msg) => Error::Backend(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table_meta() -> TableMeta {
        TableMeta {
            columns: vec![
                ColumnMeta {
                    name: "row_id".to_string(),
                    description: "Primary key column".to_string(),
                    element_type: ElementType::Uint,
                    element_size: 4,
                    num_elements: NumElements::Fixed(1),
                },
                ColumnMeta {
                    name: "name".to_string(),
                    description: String::new(),
                    element_type: ElementType::Char,
                    element_size: 1,
                    num_elements: NumElements::Var,
                },
            ],
            num_rows: 10,
            min_row_size: 7,
            max_row_size: 30,
            total_row_size: 150,
        }
    }

    #[test]
    fn test_table_meta_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.meta");
        write_meta(&path, &table_meta()).unwrap();
        let read: TableMeta = read_meta(&path).unwrap();
        assert_eq!(read, table_meta());
        assert!(!dir.path().join("table.meta.tmp").exists());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut bytes = serialize(&table_meta()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        let result: Result<TableMeta> = deserialize(&bytes);
        assert!(matches!(result, Err(Error::Backend(_))));
    }

    #[test]
    fn test_column_meta_rebuilds_column() {
        let meta = &table_meta().columns[1];
        let column = meta.to_column().unwrap();
        assert_eq!(column.name(), "name");
        assert!(column.num_elements().is_var());
        assert_eq!(ColumnMeta::from_column(&column), *meta);
    }
}
