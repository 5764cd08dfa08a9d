//! `dk-session` - the public face of the decodekit engine.
//!
//! Load a GGUF model once, open any number of decode contexts over it,
//! feed them batches and pick tokens from their logits with a sampler chain:
//!
//! - `backend`: one-time process setup
//! - `model`: immutable weights, vocabulary and metadata (`Model`)
//! - `context`: a KV cache plus the outputs of the last decode (`Context`)
//! - `batch`: the tokens submitted to one decode call (`Batch`)
//! - `sample`: glue between a context's logits and a `SamplerChain`

pub mod backend;
pub mod batch;
pub mod context;
pub mod error;
pub mod model;
pub mod sample;

/// Absolute position of a token within its sequence.
pub type Pos = i32;
/// Sequence identifier. Only sequence 0 is supported.
pub type SeqId = i32;

pub use batch::{Batch, BatchError};
pub use context::{Context, ContextParams, MAX_CONTEXT_TOKENS};
pub use dk_model::tokenizer::{Token, TokenType, Tokenizer as Vocab, TokenizerKind, VocabError};
pub use dk_sampler as sampler;
pub use error::{DecodeError, Error, ErrorKind, Result};
pub use model::{Model, ModelParams};
pub use sample::sample;
