use thiserror::Error;

/// Store error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate key: {0}")]
    DuplicateKey(i32),

    #[error("Key {0} not found")]
    NotFound(i32),

    #[error("Index corrupted: {0}")]
    CorruptIndex(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
