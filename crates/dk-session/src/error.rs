use std::path::PathBuf;

use dk_model::{ModelError, VocabError};
use dk_sampler::SamplerError;
use thiserror::Error;

use crate::batch::BatchError;
use crate::{Pos, SeqId, Token};

/// Coarse classification of every failure the session layer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A file, allocation or other external resource was unavailable.
    Resource,
    /// A fixed-size buffer, batch or cache was too small; retry with more room.
    Capacity,
    /// The caller broke a documented precondition.
    Sequencing,
    /// The engine failed; the affected context cannot be used further.
    FatalInternal,
}

/// Why `Context::decode` refused or failed a batch.
///
/// Everything except `Compute` is detected before the context is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no KV cache slot: {n_past} cached + {n_tokens} new exceeds context of {n_ctx}")]
    NoKvSlot {
        n_past: usize,
        n_tokens: usize,
        n_ctx: usize,
    },
    #[error("empty batch")]
    EmptyBatch,
    #[error("batch of {n_tokens} tokens exceeds n_batch {n_batch}")]
    BatchTooLarge { n_tokens: usize, n_batch: usize },
    #[error("token {token} at batch index {index} is not in the vocabulary")]
    InvalidToken { index: usize, token: Token },
    #[error("batch index {index} uses sequence id {seq_id}; only sequence 0 is supported")]
    InvalidSequence { index: usize, seq_id: SeqId },
    #[error("batch index {index} has position {got}, expected {expected}")]
    InvalidPosition { index: usize, expected: Pos, got: Pos },
    #[error("context is poisoned by an earlier compute failure")]
    Poisoned,
    #[error("forward pass failed: {0}")]
    Compute(String),
}

impl DecodeError {
    /// Integer status: positive for capacity, negative for invalid input
    /// (-1), a poisoned context (-2) or a compute failure (-3). Success is 0.
    pub fn code(&self) -> i32 {
        match self {
            DecodeError::NoKvSlot { .. } => 1,
            DecodeError::EmptyBatch
            | DecodeError::BatchTooLarge { .. }
            | DecodeError::InvalidToken { .. }
            | DecodeError::InvalidSequence { .. }
            | DecodeError::InvalidPosition { .. } => -1,
            DecodeError::Poisoned => -2,
            DecodeError::Compute(_) => -3,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::NoKvSlot { .. } | DecodeError::BatchTooLarge { .. } => ErrorKind::Capacity,
            DecodeError::EmptyBatch
            | DecodeError::InvalidToken { .. }
            | DecodeError::InvalidSequence { .. }
            | DecodeError::InvalidPosition { .. } => ErrorKind::Sequencing,
            DecodeError::Poisoned | DecodeError::Compute(_) => ErrorKind::FatalInternal,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load model from {}: {source}", .path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: ModelError,
    },
    #[error("failed to create context: {0}")]
    ContextCreate(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Vocab(#[from] VocabError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error("no logits for batch index {0}")]
    LogitsUnavailable(i32),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ModelLoad { .. } | Error::ContextCreate(_) => ErrorKind::Resource,
            Error::Decode(e) => e.kind(),
            Error::Batch(BatchError::Full { .. }) => ErrorKind::Capacity,
            Error::Batch(_) => ErrorKind::Sequencing,
            Error::Vocab(VocabError::BufferTooSmall { .. }) => ErrorKind::Capacity,
            Error::Vocab(_) => ErrorKind::Sequencing,
            Error::Sampler(_) | Error::LogitsUnavailable(_) => ErrorKind::Sequencing,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let overflow = DecodeError::NoKvSlot {
            n_past: 4,
            n_tokens: 2,
            n_ctx: 5,
        };
        assert_eq!(overflow.code(), 1);
        assert_eq!(overflow.kind(), ErrorKind::Capacity);
        assert_eq!(DecodeError::EmptyBatch.code(), -1);
        assert_eq!(DecodeError::Poisoned.code(), -2);
        assert_eq!(DecodeError::Compute("nan".into()).code(), -3);
        assert_eq!(Error::from(DecodeError::Poisoned).kind(), ErrorKind::FatalInternal);
    }

    #[test]
    fn test_kind_mapping() {
        let e = Error::from(VocabError::BufferTooSmall { required: 3 });
        assert_eq!(e.kind(), ErrorKind::Capacity);
        assert_eq!(Error::LogitsUnavailable(0).kind(), ErrorKind::Sequencing);
        let e = Error::ModelLoad {
            path: "missing.gguf".into(),
            source: ModelError::InvalidMagic(*b"nope"),
        };
        assert_eq!(e.kind(), ErrorKind::Resource);
        assert!(e.to_string().contains("missing.gguf"));
    }
}
