use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Range out of bounds: offset {offset}, length {length} (bound: {bound})")]
    OutOfRange { offset: u64, length: u64, bound: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Nothing to undo or redo")]
    EmptyStack,

    #[error("Document is closed")]
    Closed,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DocumentError {
    pub(crate) fn out_of_range(offset: u64, length: u64, bound: u64) -> Self {
        DocumentError::OutOfRange {
            offset,
            length,
            bound,
        }
    }

    /// True for failures a host may retry (source I/O), false for caller mistakes
    pub fn is_retryable(&self) -> bool {
        matches!(self, DocumentError::Io(_))
    }
}

impl From<toml::de::Error> for DocumentError {
    fn from(err: toml::de::Error) -> Self {
        DocumentError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for DocumentError {
    fn from(err: serde_json::Error) -> Self {
        DocumentError::Config(err.to_string())
    }
}

impl From<DocumentError> for std::io::Error {
    fn from(err: DocumentError) -> Self {
        use std::io::ErrorKind;
        match err {
            DocumentError::Io(e) => e,
            DocumentError::OutOfRange { .. } => std::io::Error::new(ErrorKind::UnexpectedEof, err),
            DocumentError::InvalidArgument(_) | DocumentError::Config(_) => {
                std::io::Error::new(ErrorKind::InvalidInput, err)
            }
            DocumentError::EmptyStack | DocumentError::Closed => {
                std::io::Error::new(ErrorKind::Other, err)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DocumentError>;
