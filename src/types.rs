use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Largest row, fixed plus variable region, in bytes
pub const MAX_ROW_SIZE: usize = 65535;
/// Largest element count of a variable column
pub const MAX_NUM_ELEMENTS: usize = 254;
/// Fixed-region bytes used by a variable column: 2 byte offset + 1 byte count
pub const VAR_SLOT_SIZE: usize = 3;
/// Name of the reserved column at position 0
pub const ROW_ID_COLUMN: &str = "row_id";

/// Element type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum ElementType {
    Uint,
    Int,
    Float,
    Char,
}

impl ElementType {
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Uint => "uint",
            ElementType::Int => "int",
            ElementType::Float => "float",
            ElementType::Char => "char",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "uint" => Some(ElementType::Uint),
            "int" => Some(ElementType::Int),
            "float" => Some(ElementType::Float),
            "char" => Some(ElementType::Char),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element count of a column: a fixed count in 1..=254, or variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum NumElements {
    Fixed(u8),
    Var,
}

impl NumElements {
    pub fn is_var(&self) -> bool {
        matches!(self, NumElements::Var)
    }

    /// Largest number of elements a value may hold
    pub fn max_elements(&self) -> usize {
        match self {
            NumElements::Fixed(n) => *n as usize,
            NumElements::Var => MAX_NUM_ELEMENTS,
        }
    }
}

impl fmt::Display for NumElements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumElements::Fixed(n) => write!(f, "{}", n),
            NumElements::Var => f.write_str("var"),
        }
    }
}

/// Open mode of a table or index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Write = 0,
    Read = 1,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Write => f.write_str("write"),
            Mode::Read => f.write_str("read"),
        }
    }
}

/// A single column value
///
/// Scalar columns (one element) use the scalar variants, multi-element
/// numeric columns use `Array`, and CHAR columns always use `Char`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Missing,
    Uint(u64),
    Int(i64),
    Float(f64),
    Char(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Uint(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Char(b) => Some(b),
            _ => None,
        }
    }

    /// Elements of this value: the array contents, or the value itself
    pub fn elements(&self) -> &[Value] {
        match self {
            Value::Array(items) => items,
            Value::Missing => &[],
            other => std::slice::from_ref(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => f.write_str("NA"),
            Value::Uint(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Char(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v as u64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Char(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Char(v.as_bytes().to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Missing)
    }
}
