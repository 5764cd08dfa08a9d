pub mod config;
pub mod kv_cache;
pub mod layers;

pub use config::LlamaConfig;
pub use kv_cache::KvCache;
pub use layers::{LlamaLayer, LlamaWeights};

use dk_tensor::{ComputeBackend, TensorError};
use tracing::debug;

use crate::architecture::{ForwardOutput, ModelArchitecture};
use crate::error::{ModelError, Result};
use crate::gguf::reader::GgufFile;
use crate::tokenizer::Token;

/// A LLaMA transformer with weights dequantized to f32.
///
/// The model itself is immutable; attention state lives in the `KvCache`
/// handed to `forward`.
#[derive(Debug)]
pub struct LlamaModel {
    pub config: LlamaConfig,
    pub weights: LlamaWeights,
    tied_output: bool,
}

impl LlamaModel {
    /// Parse the configuration and load every weight tensor.
    pub fn from_gguf(gguf: &GgufFile) -> Result<LlamaModel> {
        let config = LlamaConfig::from_gguf(&gguf.metadata)?;
        let tied_output = gguf.tensor_info("output.weight").is_none();
        let weights = LlamaWeights::from_gguf(gguf, &config)?;
        debug!(
            n_layers = config.n_layers,
            n_embd = config.n_embd,
            n_heads = config.n_heads,
            n_kv_heads = config.n_kv_heads,
            n_vocab = config.n_vocab,
            tied_output,
            "loaded llama weights"
        );
        Ok(LlamaModel {
            config,
            weights,
            tied_output,
        })
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    /// One transformer block for the token at `pos`. Writes the token's
    /// key/value row into `cache` and attends over rows `0..=pos`.
    fn block(
        &self,
        layer_idx: usize,
        hidden: Vec<f32>,
        pos: usize,
        cache: &mut KvCache,
        backend: &dyn ComputeBackend,
    ) -> Result<Vec<f32>> {
        let cfg = &self.config;
        let layer = &self.weights.layers[layer_idx];
        let (n_embd, head_dim) = (cfg.n_embd, cfg.head_dim);
        let q_dim = cfg.n_heads * head_dim;
        let kv_dim = cfg.kv_dim();
        let heads_per_kv = cfg.n_heads / cfg.n_kv_heads;

        let normed = backend.rms_norm(&hidden, &layer.attn_norm, cfg.norm_eps, n_embd)?;

        // GGUF matrices are [out, in] row-major, so W @ x is matmul(W, x, out, in, 1).
        let q = backend.matmul(&layer.wq, &normed, q_dim, n_embd, 1)?;
        let k = backend.matmul(&layer.wk, &normed, kv_dim, n_embd, 1)?;
        let v = backend.matmul(&layer.wv, &normed, kv_dim, n_embd, 1)?;
        let (q, k) =
            backend.rope(&q, &k, head_dim, pos, cfg.n_heads, cfg.n_kv_heads, cfg.rope_theta)?;

        cache.write(layer_idx, pos, &k, &v)?;
        let n_pos = pos + 1;
        let keys = cache.keys(layer_idx, n_pos);
        let values = cache.values(layer_idx, n_pos);

        let scale = 1.0 / (head_dim as f32).sqrt();
        let mut attn = vec![0.0f32; q_dim];
        let mut scores = vec![0.0f32; n_pos];
        for h in 0..cfg.n_heads {
            let kv_off = (h / heads_per_kv) * head_dim;
            let q_head = &q[h * head_dim..(h + 1) * head_dim];
            // only rows <= pos are visible, which is the causal mask
            for (s, score) in scores.iter_mut().enumerate() {
                let k_row = &keys[s * kv_dim + kv_off..s * kv_dim + kv_off + head_dim];
                *score = q_head.iter().zip(k_row).map(|(a, b)| a * b).sum::<f32>() * scale;
            }
            let probs = backend.softmax(&scores, n_pos)?;
            let out = &mut attn[h * head_dim..(h + 1) * head_dim];
            for (s, &p) in probs.iter().enumerate() {
                let v_row = &values[s * kv_dim + kv_off..s * kv_dim + kv_off + head_dim];
                for (o, &x) in out.iter_mut().zip(v_row) {
                    *o += p * x;
                }
            }
        }

        let attn_out = backend.matmul(&layer.wo, &attn, n_embd, q_dim, 1)?;
        let hidden = backend.add(&hidden, &attn_out)?;

        // SwiGLU feed-forward: down(silu(gate(x)) * up(x))
        let normed = backend.rms_norm(&hidden, &layer.ffn_norm, cfg.norm_eps, n_embd)?;
        let gate = backend.matmul(&layer.ffn_gate, &normed, cfg.n_ff, n_embd, 1)?;
        let up = backend.matmul(&layer.ffn_up, &normed, cfg.n_ff, n_embd, 1)?;
        let gated = backend.mul(&backend.silu(&gate)?, &up)?;
        let ffn_out = backend.matmul(&layer.ffn_down, &gated, n_embd, cfg.n_ff, 1)?;
        Ok(backend.add(&hidden, &ffn_out)?)
    }
}

impl ModelArchitecture for LlamaModel {
    fn forward(
        &self,
        cache: &mut KvCache,
        tokens: &[Token],
        start_pos: usize,
        outputs: &[bool],
        want_embeddings: bool,
        backend: &dyn ComputeBackend,
    ) -> Result<ForwardOutput> {
        let cfg = &self.config;
        if tokens.is_empty() {
            return Err(ModelError::Other("no tokens to process".to_string()));
        }
        if outputs.len() != tokens.len() {
            return Err(ModelError::Other(format!(
                "{} output flags for {} tokens",
                outputs.len(),
                tokens.len()
            )));
        }
        if start_pos != cache.len() {
            return Err(ModelError::Other(format!(
                "batch starts at position {} but the cache holds {}",
                start_pos,
                cache.len()
            )));
        }
        let end = start_pos + tokens.len();
        if end > cache.capacity() {
            return Err(ModelError::CacheOverflow {
                requested: end,
                capacity: cache.capacity(),
            });
        }
        if let Some(&bad) = tokens.iter().find(|&&t| t < 0 || t as usize >= cfg.n_vocab) {
            return Err(ModelError::InvalidToken {
                token: bad,
                n_vocab: cfg.n_vocab,
            });
        }

        let n_outputs = outputs.iter().filter(|&&o| o).count();
        let mut out = ForwardOutput {
            logits: Vec::with_capacity(n_outputs * cfg.n_vocab),
            embeddings: Vec::new(),
            n_outputs,
        };
        if want_embeddings {
            out.embeddings.reserve(n_outputs * cfg.n_embd);
        }

        for (i, (&token, &want)) in tokens.iter().zip(outputs).enumerate() {
            let pos = start_pos + i;
            let row = token as usize * cfg.n_embd;
            let mut hidden = self.weights.token_embd[row..row + cfg.n_embd].to_vec();
            for layer_idx in 0..cfg.n_layers {
                hidden = self.block(layer_idx, hidden, pos, cache, backend)?;
            }
            if !want {
                continue;
            }

            let normed =
                backend.rms_norm(&hidden, &self.weights.output_norm, cfg.norm_eps, cfg.n_embd)?;
            let logits = backend.matmul(&self.weights.output, &normed, cfg.n_vocab, cfg.n_embd, 1)?;
            if logits.iter().any(|x| !x.is_finite()) {
                return Err(TensorError::NonFinite("logits").into());
            }
            out.logits.extend_from_slice(&logits);
            if want_embeddings {
                out.embeddings.extend_from_slice(&normed);
            }
        }

        cache.commit(end)?;
        Ok(out)
    }

    fn new_cache(&self, n_ctx: usize) -> Result<KvCache> {
        KvCache::new(self.config.n_layers, self.config.kv_dim(), n_ctx)
    }

    fn n_vocab(&self) -> usize {
        self.config.n_vocab
    }

    fn n_embd(&self) -> usize {
        self.config.n_embd
    }

    fn n_layer(&self) -> usize {
        self.config.n_layers
    }

    fn n_head(&self) -> usize {
        self.config.n_heads
    }

    fn n_ctx_train(&self) -> usize {
        self.config.n_ctx_train
    }

    fn n_params(&self) -> usize {
        self.weights.n_params(self.tied_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticLlama;
    use dk_tensor::CpuBackend;

    fn model(spec: &SyntheticLlama) -> LlamaModel {
        let file = GgufFile::from_bytes(spec.build().unwrap()).unwrap();
        LlamaModel::from_gguf(&file).unwrap()
    }

    #[test]
    fn test_forward_shapes_and_commit() {
        let spec = SyntheticLlama::default();
        let m = model(&spec);
        let backend = CpuBackend::with_threads(2).unwrap();
        let mut cache = m.new_cache(16).unwrap();

        let out = m
            .forward(&mut cache, &[1, 270, 280], 0, &[false, true, true], true, &backend)
            .unwrap();
        assert_eq!(out.n_outputs, 2);
        assert_eq!(out.logits.len(), 2 * spec.n_vocab());
        assert_eq!(out.embeddings.len(), 2 * spec.n_embd);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_incremental_matches_batched() {
        let m = model(&SyntheticLlama::default());
        let backend = CpuBackend::with_threads(1).unwrap();
        let tokens = [1, 262, 275, 285];

        let mut batched = m.new_cache(8).unwrap();
        let all = m
            .forward(&mut batched, &tokens, 0, &[false, false, false, true], false, &backend)
            .unwrap();

        let mut stepped = m.new_cache(8).unwrap();
        let mut last = Vec::new();
        for (i, &t) in tokens.iter().enumerate() {
            last = m.forward(&mut stepped, &[t], i, &[true], false, &backend).unwrap().logits;
        }
        for (a, b) in all.logits.iter().zip(&last) {
            approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_failed_forward_leaves_cache_length() {
        let m = model(&SyntheticLlama::default());
        let backend = CpuBackend::new();
        let mut cache = m.new_cache(4).unwrap();
        m.forward(&mut cache, &[1, 2], 0, &[false, true], false, &backend).unwrap();

        let err = m.forward(&mut cache, &[5, 6, 7], 2, &[false; 3], false, &backend).unwrap_err();
        assert!(matches!(err, ModelError::CacheOverflow { requested: 5, capacity: 4 }));
        let err = m.forward(&mut cache, &[5, -1], 2, &[false; 2], false, &backend).unwrap_err();
        assert!(matches!(err, ModelError::InvalidToken { token: -1, .. }));
        let err = m.forward(&mut cache, &[5], 1, &[true], false, &backend).unwrap_err();
        assert!(matches!(err, ModelError::Other(_)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_tied_output_shares_embedding() {
        let tied = SyntheticLlama {
            tie_output: true,
            ..Default::default()
        };
        let m = model(&tied);
        assert_eq!(m.weights.output, m.weights.token_embd);
        let untied = model(&SyntheticLlama::default());
        assert_eq!(untied.n_params(), m.n_params() + untied.weights.output.len());
    }
}
