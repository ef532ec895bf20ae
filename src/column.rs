use std::num::IntErrorKind;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::row::RowBuffer;
use crate::types::{ElementType, NumElements, Value, MAX_NUM_ELEMENTS, VAR_SLOT_SIZE};

/// A named, typed slot in every row of a table
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    description: String,
    num_elements: NumElements,
    position: usize,
    fixed_region_offset: usize,
    codec: Codec,
}

/// Element bytes of one value, ready to be placed into a row
enum Encoded {
    Missing,
    Elements { bytes: Vec<u8>, count: usize },
}

impl Column {
    pub fn new(
        name: &str,
        description: &str,
        element_type: ElementType,
        element_size: usize,
        num_elements: NumElements,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Schema("column name cannot be empty".to_string()));
        }
        let codec = Codec::new(element_type, element_size)
            .map_err(|e| Error::Schema(format!("column '{}': {}", name, e)))?;
        if let NumElements::Fixed(n) = num_elements {
            if n == 0 || n as usize > MAX_NUM_ELEMENTS {
                return Err(Error::Schema(format!(
                    "column '{}': number of elements must be in 1..={}",
                    name, MAX_NUM_ELEMENTS
                )));
            }
        }
        Ok(Column {
            name: name.to_string(),
            description: description.to_string(),
            num_elements,
            position: 0,
            fixed_region_offset: 0,
            codec,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn element_type(&self) -> ElementType {
        self.codec.element_type()
    }

    pub fn element_size(&self) -> usize {
        self.codec.element_size()
    }

    pub fn num_elements(&self) -> NumElements {
        self.num_elements
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn fixed_region_offset(&self) -> usize {
        self.fixed_region_offset
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub(crate) fn set_layout(&mut self, position: usize, fixed_region_offset: usize) {
        self.position = position;
        self.fixed_region_offset = fixed_region_offset;
    }

    /// Bytes this column occupies in the fixed region
    pub fn fixed_size(&self) -> usize {
        match self.num_elements {
            NumElements::Fixed(n) => n as usize * self.element_size(),
            NumElements::Var => VAR_SLOT_SIZE,
        }
    }

    fn is_char(&self) -> bool {
        self.codec == Codec::Char
    }

    fn encode(&self, value: &Value) -> Result<Encoded> {
        if value.is_missing() {
            return Ok(Encoded::Missing);
        }
        if self.is_char() {
            return self.encode_char(value);
        }
        let elements = value.elements();
        let max = self.num_elements.max_elements();
        if elements.len() > max {
            return Err(Error::TooManyElements(format!(
                "column '{}' holds at most {} elements, got {}",
                self.name,
                max,
                elements.len()
            )));
        }
        if let NumElements::Fixed(n) = self.num_elements {
            if elements.len() != n as usize {
                return Err(Error::OutOfRange(format!(
                    "column '{}' requires {} elements, got {}",
                    self.name,
                    n,
                    elements.len()
                )));
            }
        }
        let size = self.element_size();
        let mut bytes = vec![0u8; elements.len() * size];
        for (element, dest) in elements.iter().zip(bytes.chunks_exact_mut(size)) {
            if matches!(element, Value::Array(_)) {
                return Err(Error::OutOfRange(format!(
                    "column '{}' cannot hold nested arrays",
                    self.name
                )));
            }
            self.codec.pack(element, dest, &self.name)?;
        }
        Ok(Encoded::Elements { bytes, count: elements.len() })
    }

    fn encode_char(&self, value: &Value) -> Result<Encoded> {
        let bytes = value.as_bytes().ok_or_else(|| {
            Error::OutOfRange(format!("column '{}' of type char cannot hold {:?}", self.name, value))
        })?;
        let max = self.num_elements.max_elements();
        if bytes.len() > max {
            return Err(Error::OutOfRange(format!(
                "value of {} bytes too long for column '{}' (max {})",
                bytes.len(),
                self.name,
                max
            )));
        }
        let mut padded = bytes.to_vec();
        if let NumElements::Fixed(n) = self.num_elements {
            padded.resize(n as usize, 0);
        }
        let count = padded.len();
        Ok(Encoded::Elements { bytes: padded, count })
    }

    /// Place a value into the row, returning the number of variable bytes added
    pub(crate) fn pack_into(&self, value: &Value, row: &mut RowBuffer) -> Result<usize> {
        let encoded = self.encode(value)?;
        let offset = self.fixed_region_offset;
        match (self.num_elements, encoded) {
            (NumElements::Fixed(_), Encoded::Missing) => {
                row.fixed_mut(offset, self.fixed_size()).fill(0);
                Ok(0)
            }
            (NumElements::Fixed(_), Encoded::Elements { bytes, .. }) => {
                row.fixed_mut(offset, bytes.len()).copy_from_slice(&bytes);
                Ok(0)
            }
            (NumElements::Var, Encoded::Missing) => {
                row.clear_var_slot(offset);
                Ok(0)
            }
            (NumElements::Var, Encoded::Elements { bytes, count }) => {
                let var_offset = row.append_variable(&bytes).map_err(|e| match e {
                    Error::RowOverflow(msg) => {
                        Error::RowOverflow(format!("column '{}': {}", self.name, msg))
                    }
                    other => other,
                })?;
                row.set_var_slot(offset, var_offset, count);
                Ok(bytes.len())
            }
        }
    }

    /// Parse comma or semicolon delimited text into a value
    pub fn parse_encoded(&self, text: &[u8]) -> Result<Value> {
        if self.is_char() {
            return Ok(Value::Char(text.to_vec()));
        }
        let text = std::str::from_utf8(text).map_err(|_| {
            Error::Parse(format!("column '{}': input is not valid UTF-8", self.name))
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(Value::Missing);
        }
        let mut elements = Vec::new();
        for token in text.split([',', ';']) {
            if elements.len() == MAX_NUM_ELEMENTS {
                return Err(Error::TooManyElements(format!(
                    "column '{}' holds at most {} elements",
                    self.name, MAX_NUM_ELEMENTS
                )));
            }
            elements.push(self.parse_token(token.trim())?);
        }
        if self.num_elements == NumElements::Fixed(1) && elements.len() == 1 {
            return Ok(elements.remove(0));
        }
        Ok(Value::Array(elements))
    }

    fn parse_token(&self, token: &str) -> Result<Value> {
        let parse_err = || Error::Parse(format!("column '{}': cannot parse '{}'", self.name, token));
        let overflow = || Error::Overflow(format!("value {} out of range for column '{}'", token, self.name));
        match self.element_type() {
            ElementType::Uint => {
                if token.starts_with('-') && token.len() > 1 {
                    return Err(overflow());
                }
                token.parse::<u64>().map(Value::Uint).map_err(|e| match e.kind() {
                    IntErrorKind::PosOverflow => overflow(),
                    _ => parse_err(),
                })
            }
            ElementType::Int => token.parse::<i64>().map(Value::Int).map_err(|e| match e.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => overflow(),
                _ => parse_err(),
            }),
            ElementType::Float => token.parse::<f64>().map(Value::Float).map_err(|_| parse_err()),
            ElementType::Char => Ok(Value::Char(token.as_bytes().to_vec())),
        }
    }

    /// Raw element bytes of this column in a row; `None` when a variable
    /// column is missing
    fn raw<'a>(&self, row: &'a RowBuffer) -> Result<Option<(&'a [u8], usize)>> {
        match self.num_elements {
            NumElements::Fixed(n) => {
                Ok(Some((row.fixed(self.fixed_region_offset, self.fixed_size()), n as usize)))
            }
            NumElements::Var => match row.var_slot(self.fixed_region_offset) {
                None => Ok(None),
                Some((offset, count)) => {
                    let bytes = row.variable(offset, count * self.element_size())?;
                    Ok(Some((bytes, count)))
                }
            },
        }
    }

    /// Decode this column's value from a row
    pub(crate) fn extract(&self, row: &RowBuffer) -> Result<Value> {
        let Some((bytes, count)) = self.raw(row)? else {
            return Ok(Value::Missing);
        };
        Ok(self.decode_elements(bytes, count))
    }

    fn decode_elements(&self, bytes: &[u8], count: usize) -> Value {
        if self.is_char() {
            return match self.num_elements {
                NumElements::Fixed(_) => {
                    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                    if end == 0 {
                        Value::Missing
                    } else {
                        Value::Char(bytes[..end].to_vec())
                    }
                }
                NumElements::Var => Value::Char(bytes.to_vec()),
            };
        }
        let elements: Vec<Value> = bytes
            .chunks_exact(self.element_size())
            .take(count)
            .map(|chunk| self.codec.unpack(chunk))
            .collect();
        match self.num_elements {
            NumElements::Fixed(1) => elements.into_iter().next().unwrap_or(Value::Missing),
            NumElements::Fixed(_) if elements.iter().all(Value::is_missing) => Value::Missing,
            _ => Value::Array(elements),
        }
    }

    /// Quantise a value down to a multiple of `bin_width`
    pub fn truncate(&self, value: Value, bin_width: f64) -> Value {
        self.codec.truncate(value, bin_width)
    }

    pub fn check_bin_width(&self, bin_width: f64) -> Result<()> {
        self.codec.check_bin_width(bin_width, &self.name)
    }

    /// Append this column's composite key piece for the value stored in `row`
    pub(crate) fn append_key(&self, row: &RowBuffer, bin_width: f64, key: &mut Vec<u8>) -> Result<()> {
        let value = self.extract(row)?;
        self.append_key_value(&value, bin_width, key)
    }

    /// Append the composite key piece of `value` after applying the bin width.
    /// Variable columns are terminated by `element_size` zero bytes.
    pub(crate) fn append_key_value(&self, value: &Value, bin_width: f64, key: &mut Vec<u8>) -> Result<()> {
        let size = self.element_size();
        if self.is_char() {
            let encoded = self.encode_char_key(value)?;
            key.extend_from_slice(&encoded);
            if self.num_elements.is_var() {
                key.push(0);
            }
            return Ok(());
        }
        let value = self.truncate(value.clone(), bin_width);
        match self.num_elements {
            NumElements::Fixed(n) => {
                let start = key.len();
                key.resize(start + n as usize * size, 0);
                if !value.is_missing() {
                    let elements = value.elements();
                    if elements.len() != n as usize {
                        return Err(Error::OutOfRange(format!(
                            "column '{}' requires {} elements, got {}",
                            self.name,
                            n,
                            elements.len()
                        )));
                    }
                    for (element, dest) in elements.iter().zip(key[start..].chunks_exact_mut(size)) {
                        self.codec.pack(element, dest, &self.name)?;
                    }
                }
            }
            NumElements::Var => {
                for element in value.elements() {
                    if element.is_missing() {
                        return Err(Error::OutOfRange(format!(
                            "column '{}': missing elements cannot be indexed in a variable column",
                            self.name
                        )));
                    }
                    let start = key.len();
                    key.resize(start + size, 0);
                    self.codec.pack(element, &mut key[start..], &self.name)?;
                }
                key.resize(key.len() + size, 0);
            }
        }
        Ok(())
    }

    fn encode_char_key(&self, value: &Value) -> Result<Vec<u8>> {
        match self.encode_char_or_missing(value)? {
            // Variable: same key as the empty string
            Encoded::Missing => Ok(match self.num_elements {
                NumElements::Fixed(n) => vec![0u8; n as usize],
                NumElements::Var => Vec::new(),
            }),
            Encoded::Elements { bytes, .. } => {
                if self.num_elements.is_var() && bytes.contains(&0) {
                    return Err(Error::OutOfRange(format!(
                        "column '{}': values with embedded NUL bytes cannot be indexed",
                        self.name
                    )));
                }
                Ok(bytes)
            }
        }
    }

    fn encode_char_or_missing(&self, value: &Value) -> Result<Encoded> {
        if value.is_missing() {
            Ok(Encoded::Missing)
        } else {
            self.encode_char(value)
        }
    }

    /// Parse this column's piece at the front of a composite key, returning
    /// the value and the number of bytes consumed
    pub(crate) fn parse_key(&self, key: &[u8]) -> Result<(Value, usize)> {
        let size = self.element_size();
        let truncated = || Error::backend(format!("truncated index key for column '{}'", self.name));
        match self.num_elements {
            NumElements::Fixed(n) => {
                let len = n as usize * size;
                let bytes = key.get(..len).ok_or_else(truncated)?;
                Ok((self.decode_elements(bytes, n as usize), len))
            }
            NumElements::Var => {
                let mut count = 0;
                loop {
                    let start = count * size;
                    let chunk = key.get(start..start + size).ok_or_else(truncated)?;
                    if chunk.iter().all(|&b| b == 0) {
                        break;
                    }
                    count += 1;
                }
                let consumed = (count + 1) * size;
                let value = if count == 0 && !self.is_char() {
                    Value::Missing
                } else {
                    self.decode_elements(&key[..count * size], count)
                };
                Ok((value, consumed))
            }
        }
    }
}
