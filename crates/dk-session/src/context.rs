use std::time::Instant;

use dk_model::KvCache;
use dk_sampler::SamplingParams;
use dk_tensor::{ComputeBackend, CpuBackend};
use tracing::{debug, info, warn};

use crate::backend;
use crate::batch::{Batch, BatchError};
use crate::error::{DecodeError, Error, Result};
use crate::model::Model;
use crate::{Pos, Token};

/// Largest context a `Context` will allocate, in positions.
pub const MAX_CONTEXT_TOKENS: usize = 1 << 20;

/// Options for `Context::new`.
#[derive(Debug, Clone)]
pub struct ContextParams {
    /// KV cache capacity in positions; 0 uses the model's training length.
    pub n_ctx: usize,
    /// Most tokens accepted by one `decode`; clamped to `n_ctx`.
    pub n_batch: usize,
    /// Threads per matrix product; 0 uses the detected parallelism.
    pub n_threads: usize,
    /// Keep the final hidden state of flagged tokens.
    pub embeddings: bool,
    /// Seed of the draw stage in `Context::sampling_params`.
    pub seed: u32,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 512,
            n_batch: 512,
            n_threads: 4,
            embeddings: false,
            seed: 0,
        }
    }
}

/// A decoding session over a borrowed `Model`.
///
/// Owns the KV cache for its single sequence and the outputs of the most
/// recent successful `decode`. One context serves one thread at a time;
/// several contexts may share a model across threads.
pub struct Context<'m> {
    model: &'m Model,
    backend: Box<dyn ComputeBackend>,
    cache: KvCache,
    n_batch: usize,
    embeddings: bool,
    seed: u32,
    logits: Vec<f32>,
    embd: Vec<f32>,
    /// Batch index -> output row of the last decode.
    output_ids: Vec<Option<usize>>,
    n_outputs: usize,
    poisoned: bool,
}

impl<'m> Context<'m> {
    /// Create a context that runs on the CPU backend.
    pub fn new(model: &'m Model, params: ContextParams) -> Result<Context<'m>> {
        let n_threads = match params.n_threads {
            0 => backend::init().n_threads_available,
            n => n,
        };
        let backend =
            CpuBackend::with_threads(n_threads).map_err(|e| Error::ContextCreate(e.to_string()))?;
        Self::with_backend(model, params, Box::new(backend))
    }

    /// Create a context that runs its forward passes on `backend`.
    /// `params.n_threads` is ignored; the backend decides its own budget.
    pub fn with_backend(
        model: &'m Model,
        params: ContextParams,
        backend: Box<dyn ComputeBackend>,
    ) -> Result<Context<'m>> {
        let n_ctx = match params.n_ctx {
            0 => model.n_ctx_train(),
            n => n,
        };
        if n_ctx == 0 {
            return Err(Error::ContextCreate("context length is zero".to_string()));
        }
        if n_ctx > MAX_CONTEXT_TOKENS {
            return Err(Error::ContextCreate(format!(
                "context length {n_ctx} exceeds the maximum of {MAX_CONTEXT_TOKENS}"
            )));
        }
        if params.n_batch == 0 {
            return Err(Error::ContextCreate("batch size is zero".to_string()));
        }
        let n_batch = params.n_batch.min(n_ctx);
        if n_ctx > model.n_ctx_train() {
            warn!(
                n_ctx,
                n_ctx_train = model.n_ctx_train(),
                "context is longer than the model was trained for"
            );
        }

        let cache = model
            .arch()
            .new_cache(n_ctx)
            .map_err(|e| Error::ContextCreate(e.to_string()))?;
        let cache_bytes =
            KvCache::bytes_for(cache.n_layers(), cache.kv_dim(), n_ctx).unwrap_or(usize::MAX);

        info!(
            n_ctx,
            n_batch,
            n_threads = backend.n_threads(),
            backend = backend.name(),
            cache_bytes,
            "context created"
        );

        Ok(Context {
            model,
            backend,
            cache,
            n_batch,
            embeddings: params.embeddings,
            seed: params.seed,
            logits: Vec::new(),
            embd: Vec::new(),
            output_ids: Vec::new(),
            n_outputs: 0,
            poisoned: false,
        })
    }

    /// Run `batch` through the model and append it to the cache.
    ///
    /// Every check happens before the context changes, so a refused batch
    /// leaves it exactly as it was. A failure inside the forward pass keeps
    /// the cache length and the previous outputs, but poisons the context:
    /// every later `decode` returns `DecodeError::Poisoned`.
    pub fn decode(&mut self, batch: &Batch) -> std::result::Result<(), DecodeError> {
        if self.poisoned {
            return Err(DecodeError::Poisoned);
        }
        let n_tokens = batch.len();
        if n_tokens == 0 {
            return Err(DecodeError::EmptyBatch);
        }
        if n_tokens > self.n_batch {
            return Err(DecodeError::BatchTooLarge {
                n_tokens,
                n_batch: self.n_batch,
            });
        }
        let n_past = self.cache.len();
        let n_ctx = self.cache.capacity();
        if n_past + n_tokens > n_ctx {
            warn!(n_past, n_tokens, n_ctx, "no KV cache slot for batch");
            return Err(DecodeError::NoKvSlot {
                n_past,
                n_tokens,
                n_ctx,
            });
        }
        self.validate(batch, n_past)?;

        let start = Instant::now();
        let out = match self.model.arch().forward(
            &mut self.cache,
            batch.tokens(),
            n_past,
            batch.logits(),
            self.embeddings,
            self.backend.as_ref(),
        ) {
            Ok(out) => out,
            Err(e) => {
                self.poisoned = true;
                warn!(n_past, n_tokens, error = %e, "forward pass failed; context poisoned");
                return Err(DecodeError::Compute(e.to_string()));
            }
        };

        self.output_ids.clear();
        let mut row = 0;
        for &want in batch.logits() {
            self.output_ids.push(want.then_some(row));
            row += usize::from(want);
        }
        self.n_outputs = out.n_outputs;
        self.logits = out.logits;
        self.embd = out.embeddings;

        debug!(
            n_tokens,
            n_past = self.cache.len(),
            n_outputs = self.n_outputs,
            elapsed_us = start.elapsed().as_micros() as u64,
            "decoded batch"
        );
        Ok(())
    }

    /// Per-token checks: known token, sequence 0 only, contiguous positions.
    fn validate(&self, batch: &Batch, n_past: usize) -> std::result::Result<(), DecodeError> {
        let n_vocab = self.model.n_vocab();
        for (index, (&token, &pos)) in batch.tokens().iter().zip(batch.positions()).enumerate() {
            if token < 0 || token as usize >= n_vocab {
                return Err(DecodeError::InvalidToken { index, token });
            }
            match batch.seq_ids(index) {
                Some(ids) if !ids.is_empty() && ids.iter().all(|&s| s == 0) => {}
                Some(ids) => {
                    let seq_id = ids.iter().copied().find(|&s| s != 0).unwrap_or(-1);
                    return Err(DecodeError::InvalidSequence { index, seq_id });
                }
                None => return Err(DecodeError::InvalidSequence { index, seq_id: -1 }),
            }
            // n_past + index < n_ctx <= MAX_CONTEXT_TOKENS, so this fits.
            let expected = (n_past + index) as Pos;
            if pos != expected {
                return Err(DecodeError::InvalidPosition {
                    index,
                    expected,
                    got: pos,
                });
            }
        }
        Ok(())
    }

    /// Forget every cached position. The allocation is kept.
    pub fn clear_cache(&mut self) {
        let n_past = self.cache.len();
        self.cache.clear();
        debug!(n_past, "KV cache cleared");
    }

    /// A batch of `tokens` continuing this context's sequence, wanting
    /// logits for the last token only.
    pub fn make_single_sequence_batch(
        &self,
        tokens: &[Token],
    ) -> std::result::Result<Batch, BatchError> {
        let start = Pos::try_from(self.n_past()).map_err(|_| BatchError::PositionOverflow)?;
        Batch::single_sequence(tokens, start)
    }

    /// Decode a prompt of any length as consecutive `n_batch`-sized batches.
    /// Only the final token asks for logits, so afterwards
    /// `get_logits_ith(-1)` is the prediction for the next token.
    ///
    /// Capacity and token ids are checked for the whole prompt first, so a
    /// refused prompt leaves the cache untouched.
    pub fn decode_prompt(&mut self, tokens: &[Token]) -> Result<()> {
        if self.poisoned {
            return Err(DecodeError::Poisoned.into());
        }
        if tokens.is_empty() {
            return Err(DecodeError::EmptyBatch.into());
        }
        let n_past = self.cache.len();
        let n_ctx = self.cache.capacity();
        if n_past + tokens.len() > n_ctx {
            return Err(DecodeError::NoKvSlot {
                n_past,
                n_tokens: tokens.len(),
                n_ctx,
            }
            .into());
        }
        let n_vocab = self.model.n_vocab();
        if let Some((index, &token)) =
            tokens.iter().enumerate().find(|&(_, &t)| t < 0 || t as usize >= n_vocab)
        {
            return Err(DecodeError::InvalidToken { index, token }.into());
        }

        let n_chunks = tokens.len().div_ceil(self.n_batch);
        for (i, chunk) in tokens.chunks(self.n_batch).enumerate() {
            let start = Pos::try_from(self.n_past()).map_err(|_| BatchError::PositionOverflow)?;
            let positions = (0..chunk.len())
                .map(|j| Pos::try_from(j).ok().and_then(|j| start.checked_add(j)))
                .collect::<Option<Vec<Pos>>>()
                .ok_or(BatchError::PositionOverflow)?;
            let mut logits = vec![false; chunk.len()];
            if i + 1 == n_chunks {
                if let Some(last) = logits.last_mut() {
                    *last = true;
                }
            }
            let batch = Batch::from_parts(
                chunk.to_vec(),
                positions,
                vec![1; chunk.len()],
                vec![vec![0]; chunk.len()],
                logits,
            )?;
            self.decode(&batch)?;
        }
        debug!(n_tokens = tokens.len(), n_chunks, n_past = self.n_past(), "decoded prompt");
        Ok(())
    }

    /// Every output row of the last decode, `n_outputs * n_vocab` values.
    /// `None` before the first successful decode.
    pub fn get_logits(&self) -> Option<&[f32]> {
        (self.n_outputs > 0).then_some(self.logits.as_slice())
    }

    /// Logits for batch index `i` of the last decode. Negative `i` counts
    /// back from the last output row (-1 is the last).
    pub fn get_logits_ith(&self, i: i32) -> Option<&[f32]> {
        let row = self.output_row(i)?;
        let n_vocab = self.model.n_vocab();
        self.logits.get(row * n_vocab..(row + 1) * n_vocab)
    }

    /// Embeddings of every output row. Only kept when the context was
    /// created with `embeddings: true`.
    pub fn get_embeddings(&self) -> Option<&[f32]> {
        (!self.embd.is_empty()).then_some(self.embd.as_slice())
    }

    pub fn get_embeddings_ith(&self, i: i32) -> Option<&[f32]> {
        let row = self.output_row(i)?;
        let n_embd = self.model.n_embd();
        self.embd.get(row * n_embd..(row + 1) * n_embd)
    }

    fn output_row(&self, i: i32) -> Option<usize> {
        if i < 0 {
            let back = i.unsigned_abs() as usize;
            self.n_outputs.checked_sub(back)
        } else {
            self.output_ids.get(i as usize).copied().flatten()
        }
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    pub fn n_ctx(&self) -> usize {
        self.cache.capacity()
    }

    pub fn n_batch(&self) -> usize {
        self.n_batch
    }

    pub fn n_threads(&self) -> usize {
        self.backend.n_threads()
    }

    /// Concurrent sequences supported. Always 1.
    pub fn n_seq_max(&self) -> usize {
        1
    }

    /// Positions currently held in the KV cache.
    pub fn n_past(&self) -> usize {
        self.cache.len()
    }

    /// Output rows produced by the last successful decode.
    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// The default sampling knobs with the final draw seeded from this
    /// context, ready for `SamplerChain::from_params`.
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            seed: self.seed,
            ..SamplingParams::default()
        }
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("n_ctx", &self.n_ctx())
            .field("n_past", &self.n_past())
            .field("n_batch", &self.n_batch)
            .field("backend", &self.backend)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
