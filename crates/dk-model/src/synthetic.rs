//! Small deterministic LLaMA models for tests and demos.
//!
//! The weights are smooth functions of their index, so every run produces
//! the same logits; the vocabulary is a SentencePiece table with byte
//! fallback, so any UTF-8 text round-trips.

use std::path::Path;

use crate::error::Result;
use crate::gguf::GgufBuilder;

/// Word pieces appended after `<unk>`, `<s>`, `</s>` and the 256 byte pieces.
const PIECES: &[&str] = &[
    "▁", "a", "d", "e", "h", "i", "l", "n", "o", "r", "s", "t", "w", "he", "ll", "or", "▁t",
    "▁a", "▁w", "▁h", "llo", "ello", "hello", "▁the", "▁and", "▁hello", "▁world", "ld",
];

/// Shape of a synthetic model.
#[derive(Debug, Clone)]
pub struct SyntheticLlama {
    pub n_embd: usize,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub n_layers: usize,
    pub n_ff: usize,
    pub n_ctx_train: usize,
    /// Extra `<extra_N>` pieces, to grow the vocabulary.
    pub n_extra_tokens: usize,
    /// Omit `output.weight` so the output head reuses `token_embd`.
    pub tie_output: bool,
}

impl Default for SyntheticLlama {
    fn default() -> Self {
        Self {
            n_embd: 16,
            n_heads: 4,
            n_kv_heads: 2,
            n_layers: 2,
            n_ff: 32,
            n_ctx_train: 64,
            n_extra_tokens: 0,
            tie_output: false,
        }
    }
}

fn pattern(n: usize, salt: usize) -> Vec<f32> {
    let freq = 0.61 + 0.17 * salt as f32;
    (0..n)
        .map(|i| ((i as f32 + 1.0) * freq).sin() * 0.4)
        .collect()
}

impl SyntheticLlama {
    /// All vocabulary texts, in id order.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = vec!["<unk>".to_string(), "<s>".to_string(), "</s>".to_string()];
        tokens.extend((0..=255u8).map(|b| format!("<0x{:02X}>", b)));
        tokens.extend(PIECES.iter().map(|s| s.to_string()));
        tokens.extend((0..self.n_extra_tokens).map(|i| format!("<extra_{}>", i)));
        tokens
    }

    pub fn n_vocab(&self) -> usize {
        3 + 256 + PIECES.len() + self.n_extra_tokens
    }

    pub fn builder(&self) -> GgufBuilder {
        let tokens = self.tokens();
        let n_vocab = tokens.len();
        // longer pieces merge first
        let scores: Vec<f32> = tokens.iter().map(|t| t.chars().count() as f32).collect();
        let types: Vec<i32> = (0..n_vocab)
            .map(|i| match i {
                0 => 2,
                1 | 2 => 3,
                3..=258 => 6,
                _ => 1,
            })
            .collect();

        let (e, ff) = (self.n_embd as u64, self.n_ff as u64);
        let q = e;
        let kv = (self.n_kv_heads * (self.n_embd / self.n_heads)) as u64;
        let v = n_vocab as u64;

        let mut b = GgufBuilder::new()
            .add_string("general.architecture", "llama")
            .add_string("general.name", "synthetic")
            .add_u32("llama.context_length", self.n_ctx_train as u32)
            .add_u32("llama.embedding_length", self.n_embd as u32)
            .add_u32("llama.block_count", self.n_layers as u32)
            .add_u32("llama.feed_forward_length", self.n_ff as u32)
            .add_u32("llama.attention.head_count", self.n_heads as u32)
            .add_u32("llama.attention.head_count_kv", self.n_kv_heads as u32)
            .add_f32("llama.attention.layer_norm_rms_epsilon", 1e-5)
            .add_f32("llama.rope.freq_base", 10000.0)
            .add_string("tokenizer.ggml.model", "llama")
            .add_string_array("tokenizer.ggml.tokens", &tokens)
            .add_f32_array("tokenizer.ggml.scores", &scores)
            .add_i32_array("tokenizer.ggml.token_type", &types)
            .add_u32("tokenizer.ggml.unknown_token_id", 0)
            .add_u32("tokenizer.ggml.bos_token_id", 1)
            .add_u32("tokenizer.ggml.eos_token_id", 2)
            .add_bool("tokenizer.ggml.add_bos_token", true)
            .add_bool("tokenizer.ggml.add_eos_token", false);

        let tensor = |b: GgufBuilder, name: &str, dims: &[u64], salt: usize| {
            let n = dims.iter().product::<u64>() as usize;
            b.add_tensor_f32(name, dims, &pattern(n, salt))
        };
        let ones =
            |b: GgufBuilder, name: &str| b.add_tensor_f32(name, &[e], &vec![1.0; e as usize]);

        b = tensor(b, "token_embd.weight", &[e, v], 0);
        b = ones(b, "output_norm.weight");
        if !self.tie_output {
            b = tensor(b, "output.weight", &[e, v], 1);
        }
        for i in 0..self.n_layers {
            let salt = 2 + i * 8;
            let name = |part: &str| format!("blk.{}.{}.weight", i, part);
            b = ones(b, &name("attn_norm"));
            b = tensor(b, &name("attn_q"), &[e, q], salt);
            b = tensor(b, &name("attn_k"), &[e, kv], salt + 1);
            b = tensor(b, &name("attn_v"), &[e, kv], salt + 2);
            b = tensor(b, &name("attn_output"), &[q, e], salt + 3);
            b = ones(b, &name("ffn_norm"));
            b = tensor(b, &name("ffn_gate"), &[e, ff], salt + 4);
            b = tensor(b, &name("ffn_up"), &[e, ff], salt + 5);
            b = tensor(b, &name("ffn_down"), &[ff, e], salt + 6);
        }
        b
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        self.builder().build()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        self.builder().write_to(path)
    }
}
