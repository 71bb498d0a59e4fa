use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Index {index} out of range, node count is {count}")]
    IndexOutOfRange { index: u64, count: u64 },

    #[error("{what} is too large: {count} exceeds the limit of {limit}")]
    TooLarge { what: &'static str, count: u64, limit: u64 },

    #[error("Malformed tree data: {0}")]
    Format(String),

    #[error("Unsupported format version {found}, max supported is {max}")]
    UnsupportedVersion { found: i32, max: i32 },

    #[error("Node payload size mismatch: file has {found} bytes, expected {expected}")]
    PayloadSize { found: i32, expected: usize },

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Tree mismatch: {0}")]
    Mismatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TreeResult<T> = Result<T, TreeError>;
