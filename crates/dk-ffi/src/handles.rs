//! Opaque handle types. C sees only pointers to these.

use dk_session::sampler::{Sampler, SamplerChain};
use dk_session::{Batch, Context, Model};

/// A loaded model. Free with `dk_model_free` after every context created
/// from it has been freed.
pub struct DkModel {
    pub(crate) inner: Model,
}

/// A decode context. Borrows the `DkModel` it was created from; the model
/// must outlive it.
pub struct DkContext {
    pub(crate) inner: Context<'static>,
}

pub struct DkBatch {
    pub(crate) inner: Batch,
}

pub struct DkSamplerChain {
    pub(crate) inner: SamplerChain,
}

/// A single sampler stage not yet added to a chain.
pub struct DkSampler {
    pub(crate) inner: Box<dyn Sampler>,
}
