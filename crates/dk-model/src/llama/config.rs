use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

/// Hyperparameters of a LLaMA model, parsed from GGUF metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct LlamaConfig {
    pub n_vocab: usize,
    pub n_embd: usize,
    /// Query heads.
    pub n_heads: usize,
    /// Key/value heads; fewer than `n_heads` under grouped-query attention.
    pub n_kv_heads: usize,
    pub n_layers: usize,
    /// Feed-forward intermediate width.
    pub n_ff: usize,
    pub norm_eps: f32,
    /// Context length the model was trained with.
    pub n_ctx_train: usize,
    pub rope_theta: f32,
    pub head_dim: usize,
}

impl LlamaConfig {
    /// Parse from GGUF metadata.
    ///
    /// Keys read (all under the `llama.` prefix unless noted):
    /// - `embedding_length`, `attention.head_count`, `block_count`,
    ///   `feed_forward_length`, `context_length`
    /// - `attention.head_count_kv` (defaults to `head_count`)
    /// - `attention.layer_norm_rms_epsilon` (defaults to 1e-5)
    /// - `rope.freq_base` (defaults to 10000)
    /// - vocab size from the length of `tokenizer.ggml.tokens`
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<LlamaConfig> {
        let arch = metadata.get_string("general.architecture")?;
        if arch != "llama" {
            return Err(ModelError::UnsupportedArchitecture(arch.to_string()));
        }

        let n_embd = metadata.get_u32("llama.embedding_length")? as usize;
        let n_heads = metadata.get_u32("llama.attention.head_count")? as usize;
        let n_kv_heads = match metadata.get_u32("llama.attention.head_count_kv") {
            Ok(n) => n as usize,
            Err(ModelError::MissingKey(_)) => n_heads,
            Err(e) => return Err(e),
        };
        let n_layers = metadata.get_u32("llama.block_count")? as usize;
        let n_ff = metadata.get_u32("llama.feed_forward_length")? as usize;
        let n_ctx_train = metadata.get_u32("llama.context_length")? as usize;
        let norm_eps = metadata
            .get_f32("llama.attention.layer_norm_rms_epsilon")
            .unwrap_or(1e-5);
        let rope_theta = metadata.get_f32("llama.rope.freq_base").unwrap_or(10000.0);

        let n_vocab = match metadata.get("tokenizer.ggml.tokens") {
            Some(crate::gguf::GgufMetadataValue::Array(_, tokens)) => tokens.len(),
            _ => return Err(ModelError::MissingKey("tokenizer.ggml.tokens".to_string())),
        };

        let config = LlamaConfig {
            n_vocab,
            n_embd,
            n_heads,
            n_kv_heads,
            n_layers,
            n_ff,
            norm_eps,
            n_ctx_train,
            rope_theta,
            head_dim: if n_heads == 0 { 0 } else { n_embd / n_heads },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(ModelError::InvalidConfig(msg));
        if self.n_vocab == 0 || self.n_embd == 0 || self.n_layers == 0 || self.n_ff == 0 {
            return bad(format!(
                "zero dimension (n_vocab={}, n_embd={}, n_layers={}, n_ff={})",
                self.n_vocab, self.n_embd, self.n_layers, self.n_ff
            ));
        }
        if self.n_heads == 0 || self.n_embd % self.n_heads != 0 {
            return bad(format!("n_embd {} not divisible by n_heads {}", self.n_embd, self.n_heads));
        }
        if self.head_dim % 2 != 0 {
            return bad(format!("head_dim {} must be even for RoPE", self.head_dim));
        }
        if self.n_kv_heads == 0 || self.n_heads % self.n_kv_heads != 0 {
            return bad(format!(
                "n_heads {} not a multiple of n_kv_heads {}",
                self.n_heads, self.n_kv_heads
            ));
        }
        Ok(())
    }

    /// Width of one cached key (or value) row.
    pub fn kv_dim(&self) -> usize {
        self.n_kv_heads * self.head_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::GgufMetadataValue;

    fn metadata(pairs: &[(&str, GgufMetadataValue)]) -> GgufMetadata {
        let mut meta = GgufMetadata::default();
        meta.entries
            .insert("general.architecture".into(), GgufMetadataValue::String("llama".into()));
        meta.entries.insert(
            "tokenizer.ggml.tokens".into(),
            GgufMetadataValue::Array(8, vec![GgufMetadataValue::String("a".into()); 10]),
        );
        for (k, v) in [
            ("llama.embedding_length", 16u32),
            ("llama.attention.head_count", 4),
            ("llama.block_count", 2),
            ("llama.feed_forward_length", 32),
            ("llama.context_length", 128),
        ] {
            meta.entries.insert(k.into(), GgufMetadataValue::U32(v));
        }
        for (k, v) in pairs {
            meta.entries.insert(k.to_string(), v.clone());
        }
        meta
    }

    #[test]
    fn test_defaults_for_optional_keys() {
        let cfg = LlamaConfig::from_gguf(&metadata(&[])).unwrap();
        assert_eq!(cfg.n_vocab, 10);
        assert_eq!(cfg.n_kv_heads, 4);
        assert_eq!(cfg.head_dim, 4);
        assert_eq!(cfg.rope_theta, 10000.0);
        assert_eq!(cfg.kv_dim(), 16);
    }

    #[test]
    fn test_grouped_query_heads() {
        let cfg = LlamaConfig::from_gguf(&metadata(&[(
            "llama.attention.head_count_kv",
            GgufMetadataValue::U32(2),
        )]))
        .unwrap();
        assert_eq!(cfg.n_kv_heads, 2);
        assert_eq!(cfg.kv_dim(), 8);

        let err = LlamaConfig::from_gguf(&metadata(&[(
            "llama.attention.head_count_kv",
            GgufMetadataValue::U32(3),
        )]))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfig(_)));
    }

    #[test]
    fn test_wrong_architecture() {
        let err = LlamaConfig::from_gguf(&metadata(&[(
            "general.architecture",
            GgufMetadataValue::String("falcon".into()),
        )]))
        .unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedArchitecture(a) if a == "falcon"));
    }
}
