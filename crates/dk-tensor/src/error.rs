use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error(
        "matmul dimension mismatch: a.len()={a_len} for [{m}x{k}], b.len()={b_len} for [{k}x{n}]"
    )]
    MatmulMismatch {
        m: usize,
        k: usize,
        n: usize,
        a_len: usize,
        b_len: usize,
    },
    #[error("{dtype} data truncated: need {needed} bytes, have {available}")]
    Truncated {
        dtype: String,
        needed: usize,
        available: usize,
    },
    #[error("thread pool: {0}")]
    ThreadPool(String),
    #[error("non-finite value produced by {0}")]
    NonFinite(&'static str),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
