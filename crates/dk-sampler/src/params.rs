use crate::greedy::{Dist, Greedy};
use crate::penalties::Penalties;
use crate::sampler::{SamplerChain, SamplerChainParams};
use crate::temperature::Temperature;
use crate::top_k::TopK;
use crate::top_p::TopP;

/// The usual generation knobs, turned into a chain by
/// `SamplerChain::from_params`.
#[derive(Debug, Clone)]
pub struct SamplingParams {
    /// Seed for the final draw. Defaults to 0, so an untouched default
    /// chain is reproducible; `DEFAULT_SEED` draws from OS entropy.
    pub seed: u32,
    /// `<= 0` switches the final stage to greedy selection.
    pub temp: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_keep: usize,
    pub repeat_penalty: f32,
    /// How many recent tokens the repetition penalty looks at.
    pub repeat_last_n: usize,
    pub no_perf: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            seed: 0,
            temp: 0.7,
            top_k: 40,
            top_p: 0.9,
            min_keep: 1,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            no_perf: false,
        }
    }
}

impl SamplerChain {
    /// penalties → top_k → top_p → temperature → dist, or greedy in place
    /// of temperature and dist when `temp <= 0`.
    pub fn from_params(params: &SamplingParams) -> SamplerChain {
        let mut chain = SamplerChain::new(SamplerChainParams {
            no_perf: params.no_perf,
        });
        if params.repeat_penalty != 1.0 && params.repeat_last_n > 0 {
            chain.add(Box::new(Penalties::new(params.repeat_last_n, params.repeat_penalty)));
        }
        if params.temp <= 0.0 {
            chain.add(Box::new(Greedy::new()));
            return chain;
        }
        chain.add(Box::new(TopK::new(params.top_k)));
        chain.add(Box::new(TopP::new(params.top_p, params.min_keep)));
        chain.add(Box::new(Temperature::new(params.temp)));
        chain.add(Box::new(Dist::new(params.seed)));
        chain
    }
}
