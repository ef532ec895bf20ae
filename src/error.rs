use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Operation not permitted in the handle's current open mode.
    WrongMode(String),
    /// Handle is closed.
    Closed(String),
    NotFound(String),
    /// Numeric value outside the column's domain.
    Overflow(String),
    OutOfRange(String),
    TooManyElements(String),
    /// Malformed encoded-text input.
    Parse(String),
    DuplicateColumn(String),
    /// Row would exceed MAX_ROW_SIZE.
    RowOverflow(String),
    InvalidBinWidth(String),
    Io(std::io::Error),
    /// Failure inside the B-tree store or its metadata.
    Backend(String),
    Schema(String),
}

impl Error {
    pub(crate) fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::WrongMode(msg) => write!(f, "Wrong mode: {}", msg),
            Error::Closed(msg) => write!(f, "Closed: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Overflow(msg) => write!(f, "Overflow: {}", msg),
            Error::OutOfRange(msg) => write!(f, "Out of range: {}", msg),
            Error::TooManyElements(msg) => write!(f, "Too many elements: {}", msg),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::DuplicateColumn(name) => write!(f, "Duplicate column: {}", name),
            Error::RowOverflow(msg) => write!(f, "Row overflow: {}", msg),
            Error::InvalidBinWidth(msg) => write!(f, "Invalid bin width: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Backend(msg) => write!(f, "Backend error: {}", msg),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Backend(format!("metadata encode failed: {}", err))
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::Backend(format!("metadata decode failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_column() {
        let err = Error::Overflow("value 300 out of range for column 'depth'".to_string());
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
