//! `dk-model` - the model half of the decodekit engine.
//!
//! - `gguf`: reading (mmap or buffered) and writing GGUF v3 files
//! - `llama`: LLaMA weights, hyperparameters, KV cache and forward pass
//! - `tokenizer`: vocabulary, SentencePiece / GPT-2 tokenization, piece rendering
//! - `synthetic`: tiny deterministic models for tests and demos

pub mod architecture;
pub mod error;
pub mod gguf;
pub mod llama;
pub mod synthetic;
pub mod tokenizer;

pub use architecture::{ForwardOutput, ModelArchitecture};
pub use error::{ModelError, Result};
pub use llama::{KvCache, LlamaModel};
pub use tokenizer::{Token, TokenType, Tokenizer, TokenizerKind, VocabError};
