use tracing::debug;

use crate::error::{ModelError, Result};
use crate::gguf::reader::GgufFile;
use super::config::LlamaConfig;

/// Weight tensors for one transformer block, dequantized to row-major f32.
/// Projection matrices are `[out_dim, in_dim]`.
#[derive(Debug)]
pub struct LlamaLayer {
    pub attn_norm: Vec<f32>,
    /// `[n_heads * head_dim, n_embd]`
    pub wq: Vec<f32>,
    /// `[kv_dim, n_embd]`
    pub wk: Vec<f32>,
    /// `[kv_dim, n_embd]`
    pub wv: Vec<f32>,
    /// `[n_embd, n_heads * head_dim]`
    pub wo: Vec<f32>,
    pub ffn_norm: Vec<f32>,
    /// `[n_ff, n_embd]`
    pub ffn_gate: Vec<f32>,
    /// `[n_ff, n_embd]`
    pub ffn_up: Vec<f32>,
    /// `[n_embd, n_ff]`
    pub ffn_down: Vec<f32>,
}

#[derive(Debug)]
pub struct LlamaWeights {
    /// `[n_vocab, n_embd]`
    pub token_embd: Vec<f32>,
    pub output_norm: Vec<f32>,
    /// `[n_vocab, n_embd]`; a copy of `token_embd` when the file ties them.
    pub output: Vec<f32>,
    pub layers: Vec<LlamaLayer>,
}

/// Load a tensor and check it has exactly `dims` (GGML order, innermost first).
fn load(gguf: &GgufFile, name: &str, dims: &[usize]) -> Result<Vec<f32>> {
    let info = gguf
        .tensor_info(name)
        .ok_or_else(|| ModelError::TensorNotFound(name.to_string()))?;
    let expected: usize = dims.iter().product();
    let shape_ok = info.dims.len() == dims.len()
        && info.dims.iter().zip(dims).all(|(&a, &b)| a as usize == b);
    if !shape_ok {
        return Err(ModelError::TensorShape {
            name: name.to_string(),
            expected,
            got: info.numel(),
        });
    }
    gguf.tensor_f32(name)
}

impl LlamaWeights {
    /// Load every weight named by the GGUF LLaMA layout:
    /// `token_embd.weight`, `output_norm.weight`, optional `output.weight`,
    /// and `blk.{i}.{attn_norm,attn_q,attn_k,attn_v,attn_output,ffn_norm,
    /// ffn_gate,ffn_up,ffn_down}.weight`.
    pub fn from_gguf(gguf: &GgufFile, cfg: &LlamaConfig) -> Result<LlamaWeights> {
        let (n_embd, n_ff, n_vocab) = (cfg.n_embd, cfg.n_ff, cfg.n_vocab);
        let q_dim = cfg.n_heads * cfg.head_dim;
        let kv_dim = cfg.kv_dim();

        let token_embd = load(gguf, "token_embd.weight", &[n_embd, n_vocab])?;
        let output_norm = load(gguf, "output_norm.weight", &[n_embd])?;
        let output = if gguf.tensor_info("output.weight").is_some() {
            load(gguf, "output.weight", &[n_embd, n_vocab])?
        } else {
            debug!("output.weight absent, tying to token_embd");
            token_embd.clone()
        };

        let mut layers = Vec::with_capacity(cfg.n_layers);
        for i in 0..cfg.n_layers {
            let name = |part: &str| format!("blk.{}.{}.weight", i, part);
            layers.push(LlamaLayer {
                attn_norm: load(gguf, &name("attn_norm"), &[n_embd])?,
                wq: load(gguf, &name("attn_q"), &[n_embd, q_dim])?,
                wk: load(gguf, &name("attn_k"), &[n_embd, kv_dim])?,
                wv: load(gguf, &name("attn_v"), &[n_embd, kv_dim])?,
                wo: load(gguf, &name("attn_output"), &[q_dim, n_embd])?,
                ffn_norm: load(gguf, &name("ffn_norm"), &[n_embd])?,
                ffn_gate: load(gguf, &name("ffn_gate"), &[n_embd, n_ff])?,
                ffn_up: load(gguf, &name("ffn_up"), &[n_embd, n_ff])?,
                ffn_down: load(gguf, &name("ffn_down"), &[n_ff, n_embd])?,
            });
        }

        Ok(LlamaWeights {
            token_embd,
            output_norm,
            output,
            layers,
        })
    }

    /// Parameter count as stored in the file (tied output counted once).
    pub fn n_params(&self, tied: bool) -> usize {
        let per_layer: usize = self
            .layers
            .iter()
            .map(|l| {
                l.attn_norm.len()
                    + l.wq.len()
                    + l.wk.len()
                    + l.wv.len()
                    + l.wo.len()
                    + l.ffn_norm.len()
                    + l.ffn_gate.len()
                    + l.ffn_up.len()
                    + l.ffn_down.len()
            })
            .sum();
        let output = if tied { 0 } else { self.output.len() };
        self.token_embd.len() + self.output_norm.len() + output + per_layer
    }
}
