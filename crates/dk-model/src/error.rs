use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid GGUF magic: expected 'GGUF', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("missing metadata key: {0}")]
    MissingKey(String),
    #[error("type mismatch for key '{key}': expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: String,
        got: String,
    },
    #[error("unsupported GGUF type ID: {0}")]
    UnsupportedGgufType(u32),
    #[error("tensor not found: {0}")]
    TensorNotFound(String),
    #[error("tensor '{name}' has {got} elements, expected {expected}")]
    TensorShape {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("tensor '{0}' lies outside the file")]
    TensorOutOfBounds(String),
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("invalid hyperparameters: {0}")]
    InvalidConfig(String),
    #[error("tokenizer error: {0}")]
    TokenizerError(String),
    #[error("token id {token} out of range for vocabulary of {n_vocab}")]
    InvalidToken { token: i32, n_vocab: usize },
    #[error("KV cache overflow: {requested} positions requested, capacity {capacity}")]
    CacheOverflow { requested: usize, capacity: usize },
    #[error("KV cache allocation of {bytes} bytes failed")]
    CacheAlloc { bytes: usize },
    #[error("tensor error: {0}")]
    TensorError(#[from] dk_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
