use dk_session::{ContextParams, ModelParams};

/// Token id as seen from C.
pub type DkToken = i32;

/// Status codes returned by the FFI functions that report one.
///
/// `dk_decode` is the exception: it returns the decode status integer
/// directly (0 ok, 1 no KV slot, -1 invalid batch, -2 poisoned, -3 compute).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorModelLoad = 2,
    ErrorContextCreate = 3,
    /// The output buffer was too small; the required length was written to
    /// the length out-parameter.
    ErrorBufferTooSmall = 4,
    ErrorBatch = 5,
    ErrorLogitsUnavailable = 6,
    ErrorDecode = 7,
    ErrorInternal = 8,
}

/// Load-time options; see `dk_model_default_params`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DkModelParams {
    pub seed: u32,
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: u32,
    pub use_mmap: bool,
    pub use_mlock: bool,
}

impl From<ModelParams> for DkModelParams {
    fn from(p: ModelParams) -> Self {
        Self {
            seed: p.seed,
            n_ctx: saturating_u32(p.n_ctx),
            n_batch: saturating_u32(p.n_batch),
            n_threads: saturating_u32(p.n_threads),
            use_mmap: p.use_mmap,
            use_mlock: p.use_mlock,
        }
    }
}

impl From<DkModelParams> for ModelParams {
    fn from(p: DkModelParams) -> Self {
        Self {
            seed: p.seed,
            n_ctx: p.n_ctx as usize,
            n_batch: p.n_batch as usize,
            n_threads: p.n_threads as usize,
            use_mmap: p.use_mmap,
            use_mlock: p.use_mlock,
        }
    }
}

/// Context options; see `dk_context_default_params`. Zero `n_ctx` and
/// `n_threads` pick the model's training length and the detected thread
/// count.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DkContextParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: u32,
    pub embeddings: bool,
    pub seed: u32,
}

impl From<ContextParams> for DkContextParams {
    fn from(p: ContextParams) -> Self {
        Self {
            n_ctx: saturating_u32(p.n_ctx),
            n_batch: saturating_u32(p.n_batch),
            n_threads: saturating_u32(p.n_threads),
            embeddings: p.embeddings,
            seed: p.seed,
        }
    }
}

impl From<DkContextParams> for ContextParams {
    fn from(p: DkContextParams) -> Self {
        Self {
            n_ctx: p.n_ctx as usize,
            n_batch: p.n_batch as usize,
            n_threads: p.n_threads as usize,
            embeddings: p.embeddings,
            seed: p.seed,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DkSamplerChainParams {
    /// Skip sample counting and timing.
    pub no_perf: bool,
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
