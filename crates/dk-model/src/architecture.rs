use dk_tensor::ComputeBackend;

use crate::llama::KvCache;
use crate::tokenizer::Token;

/// Rows produced by one forward call, one per token whose output was requested.
#[derive(Debug, Clone, Default)]
pub struct ForwardOutput {
    /// `n_outputs * n_vocab` logits, in batch order.
    pub logits: Vec<f32>,
    /// `n_outputs * n_embd` final hidden states; empty unless requested.
    pub embeddings: Vec<f32>,
    pub n_outputs: usize,
}

/// A model architecture the session layer can drive step by step.
///
/// Implementations hold immutable weights only. All per-sequence state lives
/// in the `KvCache` the caller passes in, so one model can serve many caches
/// from many threads at once.
pub trait ModelArchitecture: Send + Sync {
    /// Run the forward pass for `tokens` occupying positions
    /// `start_pos..start_pos + tokens.len()`.
    ///
    /// `outputs[i]` marks whether the logits (and, with `want_embeddings`,
    /// the hidden state) of token `i` should be materialized.
    ///
    /// On success the cache length becomes `start_pos + tokens.len()`. On
    /// error the cache length is left untouched; rows past it may have been
    /// overwritten but are never read.
    fn forward(
        &self,
        cache: &mut KvCache,
        tokens: &[Token],
        start_pos: usize,
        outputs: &[bool],
        want_embeddings: bool,
        backend: &dyn ComputeBackend,
    ) -> crate::Result<ForwardOutput>;

    /// Allocate an empty cache able to hold `n_ctx` positions.
    fn new_cache(&self, n_ctx: usize) -> crate::Result<KvCache>;

    fn n_vocab(&self) -> usize;

    fn n_embd(&self) -> usize;

    fn n_layer(&self) -> usize;

    fn n_head(&self) -> usize;

    /// Context length the model was trained with.
    fn n_ctx_train(&self) -> usize;

    /// Total number of weight parameters.
    fn n_params(&self) -> usize;
}
