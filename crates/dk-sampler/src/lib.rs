//! `dk-sampler` - composable next-token selection.
//!
//! A `SamplerChain` owns an ordered list of `Sampler` stages. Each stage
//! narrows or rescales a `TokenDataArray`; a selection stage (`dist`,
//! `greedy`) picks the token. Constructors below return boxed stages ready
//! for `SamplerChain::add`.

pub mod error;
pub mod greedy;
pub mod params;
pub mod penalties;
pub mod sampler;
pub mod temperature;
pub mod top_k;
pub mod top_p;

pub use error::{Result, SamplerError};
pub use greedy::{Dist, Greedy, DEFAULT_SEED};
pub use params::SamplingParams;
pub use penalties::Penalties;
pub use sampler::{
    Sampler, SamplerChain, SamplerChainParams, SamplerPerf, Token, TokenData, TokenDataArray,
};
pub use temperature::Temperature;
pub use top_k::TopK;
pub use top_p::TopP;

pub fn top_k(k: i32) -> Box<dyn Sampler> {
    Box::new(TopK::new(k))
}

pub fn top_p(p: f32, min_keep: usize) -> Box<dyn Sampler> {
    Box::new(TopP::new(p, min_keep))
}

pub fn temperature(t: f32) -> Box<dyn Sampler> {
    Box::new(Temperature::new(t))
}

/// Final weighted draw; see `Dist`.
pub fn dist(seed: u32) -> Box<dyn Sampler> {
    Box::new(Dist::new(seed))
}

pub fn greedy() -> Box<dyn Sampler> {
    Box::new(Greedy::new())
}

pub fn penalties(last_n: usize, repeat_penalty: f32) -> Box<dyn Sampler> {
    Box::new(Penalties::new(last_n, repeat_penalty))
}
