use std::path::{Path, PathBuf};
use std::time::Instant;

use dk_model::gguf::{GgufFile, GgufMetadata, OpenOptions};
use dk_model::{LlamaModel, ModelArchitecture, ModelError, Tokenizer};
use tracing::info;

use crate::backend;
use crate::context::ContextParams;
use crate::error::{Error, Result};

/// Load-time options.
///
/// `n_ctx`, `n_batch`, `n_threads` and `seed` are hints carried into
/// `Model::context_params`; the context decides its real sizes.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub seed: u32,
    pub n_ctx: usize,
    pub n_batch: usize,
    pub n_threads: usize,
    /// Map the file instead of reading it.
    pub use_mmap: bool,
    /// Pin the mapping in RAM while weights are loaded.
    pub use_mlock: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            seed: 0,
            n_ctx: 2048,
            n_batch: 512,
            n_threads: 4,
            use_mmap: true,
            use_mlock: false,
        }
    }
}

/// Immutable weights, vocabulary and metadata of a loaded model.
///
/// A `Model` is `Send + Sync`; any number of contexts on any threads may
/// borrow it at once.
pub struct Model {
    arch: Box<dyn ModelArchitecture>,
    vocab: Tokenizer,
    metadata: GgufMetadata,
    arch_name: String,
    params: ModelParams,
    path: Option<PathBuf>,
}

impl Model {
    /// Load a GGUF file. Initializes the backend if nobody has yet.
    pub fn load(path: impl AsRef<Path>, params: ModelParams) -> Result<Model> {
        let path = path.as_ref();
        let start = Instant::now();
        backend::init();

        let load_err = |source: ModelError| Error::ModelLoad {
            path: path.to_path_buf(),
            source,
        };
        let options = OpenOptions {
            use_mmap: params.use_mmap,
            use_mlock: params.use_mlock,
        };
        let file = GgufFile::open_with(path, options).map_err(load_err)?;
        let mut model = Self::from_gguf(&file, params).map_err(load_err)?;
        model.path = Some(path.to_path_buf());

        info!(
            path = %path.display(),
            arch = %model.arch_name,
            n_vocab = model.n_vocab(),
            n_layer = model.n_layer(),
            n_params = model.n_params(),
            mapped = file.is_mapped(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(model)
    }

    /// Load from a GGUF image already in memory.
    pub fn load_from_bytes(bytes: Vec<u8>, params: ModelParams) -> Result<Model> {
        backend::init();
        let load_err = |source: ModelError| Error::ModelLoad {
            path: PathBuf::from("<memory>"),
            source,
        };
        let file = GgufFile::from_bytes(bytes).map_err(load_err)?;
        Self::from_gguf(&file, params).map_err(load_err)
    }

    fn from_gguf(file: &GgufFile, params: ModelParams) -> dk_model::Result<Model> {
        let arch_name = file.metadata.get_string("general.architecture")?.to_string();
        let vocab = Tokenizer::from_gguf(&file.metadata)?;
        let arch: Box<dyn ModelArchitecture> = match arch_name.as_str() {
            "llama" => Box::new(LlamaModel::from_gguf(file)?),
            other => return Err(ModelError::UnsupportedArchitecture(other.to_string())),
        };
        if arch.n_vocab() != vocab.n_tokens() {
            return Err(ModelError::InvalidConfig(format!(
                "output head has {} rows but the vocabulary has {} tokens",
                arch.n_vocab(),
                vocab.n_tokens()
            )));
        }
        Ok(Model {
            arch,
            vocab,
            metadata: file.metadata.clone(),
            arch_name,
            params,
            path: None,
        })
    }

    pub(crate) fn arch(&self) -> &dyn ModelArchitecture {
        self.arch.as_ref()
    }

    pub fn vocab(&self) -> &Tokenizer {
        &self.vocab
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Context parameters seeded from this model's load-time hints.
    pub fn context_params(&self) -> ContextParams {
        ContextParams {
            n_ctx: self.params.n_ctx,
            n_batch: self.params.n_batch,
            n_threads: self.params.n_threads,
            seed: self.params.seed,
            ..ContextParams::default()
        }
    }

    pub fn n_vocab(&self) -> usize {
        self.arch.n_vocab()
    }

    pub fn n_embd(&self) -> usize {
        self.arch.n_embd()
    }

    pub fn n_layer(&self) -> usize {
        self.arch.n_layer()
    }

    pub fn n_head(&self) -> usize {
        self.arch.n_head()
    }

    pub fn n_ctx_train(&self) -> usize {
        self.arch.n_ctx_train()
    }

    pub fn n_params(&self) -> usize {
        self.arch.n_params()
    }

    /// Short human-readable summary, e.g. `llama 6.74B params`.
    pub fn desc(&self) -> String {
        let n = self.n_params() as f64;
        let size = if n >= 1e9 {
            format!("{:.2}B", n / 1e9)
        } else if n >= 1e6 {
            format!("{:.2}M", n / 1e6)
        } else {
            format!("{:.2}K", n / 1e3)
        };
        format!("{} {} params", self.arch_name, size)
    }

    /// A metadata value rendered as text, for scalar and string keys.
    pub fn meta_str(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)? {
            dk_model::gguf::GgufMetadataValue::Array(..) => None,
            v => Some(v.to_string()),
        }
    }

    /// Metadata keys, sorted.
    pub fn meta_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.metadata.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("arch", &self.arch_name)
            .field("n_vocab", &self.n_vocab())
            .field("n_embd", &self.n_embd())
            .field("n_layer", &self.n_layer())
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dk_model::synthetic::SyntheticLlama;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_model_is_send_sync() {
        assert_send_sync::<Model>();
    }

    #[test]
    fn test_accessors() {
        let spec = SyntheticLlama::default();
        let model = Model::load_from_bytes(spec.build().unwrap(), ModelParams::default()).unwrap();
        assert!(backend::is_initialized());
        assert_eq!(model.n_vocab(), spec.n_vocab());
        assert_eq!(model.n_embd(), spec.n_embd);
        assert_eq!(model.n_layer(), spec.n_layers);
        assert_eq!(model.n_head(), spec.n_heads);
        assert_eq!(model.n_ctx_train(), spec.n_ctx_train);
        assert_eq!(model.meta_str("general.name").as_deref(), Some("synthetic"));
        assert_eq!(model.meta_str("llama.block_count").as_deref(), Some("2"));
        assert_eq!(model.meta_str("tokenizer.ggml.tokens"), None);
        assert!(model.desc().starts_with("llama "));
        assert!(model.meta_keys().contains(&"general.architecture"));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = Model::load("/nonexistent/model.gguf", ModelParams::default()).unwrap_err();
        assert!(matches!(err, Error::ModelLoad { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Resource);
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let bytes = b"not a gguf file at all".to_vec();
        let err = Model::load_from_bytes(bytes, ModelParams::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::ModelLoad {
                source: ModelError::InvalidMagic(_),
                ..
            }
        ));
    }

    #[test]
    fn test_context_params_follow_hints() {
        let model = Model::load_from_bytes(SyntheticLlama::default().build().unwrap(), ModelParams {
            n_ctx: 32,
            n_batch: 8,
            seed: 9,
            ..Default::default()
        })
        .unwrap();
        let cp = model.context_params();
        assert_eq!((cp.n_ctx, cp.n_batch, cp.seed), (32, 8, 9));
    }
}
