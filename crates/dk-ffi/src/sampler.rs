//! Sampler chain functions.

use dk_session::sampler::{self as smp, SamplerChain, SamplerChainParams};

use crate::catch_panic;
use crate::error::{report, set_last_error};
use crate::handles::{DkContext, DkSampler, DkSamplerChain};
use crate::types::{DkSamplerChainParams, DkStatus, DkToken};

fn stage(inner: Box<dyn smp::Sampler>) -> *mut DkSampler {
    Box::into_raw(Box::new(DkSampler { inner }))
}

#[no_mangle]
pub extern "C" fn dk_sampler_chain_default_params() -> DkSamplerChainParams {
    DkSamplerChainParams::default()
}

/// An empty chain. Free with `dk_sampler_chain_free`.
#[no_mangle]
pub extern "C" fn dk_sampler_chain_init(params: DkSamplerChainParams) -> *mut DkSamplerChain {
    let inner = SamplerChain::new(SamplerChainParams {
        no_perf: params.no_perf,
    });
    Box::into_raw(Box::new(DkSamplerChain { inner }))
}

/// The usual pipeline (penalties, top_k, top_p, temperature, dist) with
/// default knobs and the draw seeded from the `seed` `ctx` was created with.
/// Null if `ctx` is null. Free with `dk_sampler_chain_free`.
///
/// # Safety
/// `ctx` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_sampler_chain_init_from_context(
    ctx: *const DkContext,
) -> *mut DkSamplerChain {
    let Some(ctx) = ctx.as_ref() else {
        set_last_error("ctx is null");
        return std::ptr::null_mut();
    };
    let inner = SamplerChain::from_params(&ctx.inner.sampling_params());
    Box::into_raw(Box::new(DkSamplerChain { inner }))
}

/// Append `smpl` to `chain`. The chain takes ownership of the stage, which
/// must not be freed or added again. On a null chain the stage is freed.
///
/// # Safety
/// Both pointers must be live handles or null.
#[no_mangle]
pub unsafe extern "C" fn dk_sampler_chain_add(
    chain: *mut DkSamplerChain,
    smpl: *mut DkSampler,
) -> DkStatus {
    if smpl.is_null() {
        set_last_error("sampler is null");
        return DkStatus::ErrorInvalidArgument;
    }
    let smpl = Box::from_raw(smpl);
    match chain.as_mut() {
        Some(chain) => {
            chain.inner.add(smpl.inner);
            DkStatus::Ok
        }
        None => {
            set_last_error("chain is null");
            DkStatus::ErrorInvalidArgument
        }
    }
}

/// Number of stages in `chain`.
///
/// # Safety
/// `chain` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_sampler_chain_n(chain: *const DkSamplerChain) -> i32 {
    chain.as_ref().map_or(0, |c| c.inner.len() as i32)
}

#[no_mangle]
pub extern "C" fn dk_sampler_init_top_k(k: i32) -> *mut DkSampler {
    stage(smp::top_k(k))
}

#[no_mangle]
pub extern "C" fn dk_sampler_init_top_p(p: f32, min_keep: usize) -> *mut DkSampler {
    stage(smp::top_p(p, min_keep))
}

#[no_mangle]
pub extern "C" fn dk_sampler_init_temp(t: f32) -> *mut DkSampler {
    stage(smp::temperature(t))
}

/// Weighted draw; `0xFFFFFFFF` seeds every draw from OS entropy.
#[no_mangle]
pub extern "C" fn dk_sampler_init_dist(seed: u32) -> *mut DkSampler {
    stage(smp::dist(seed))
}

#[no_mangle]
pub extern "C" fn dk_sampler_init_greedy() -> *mut DkSampler {
    stage(smp::greedy())
}

/// Repetition penalty over the last `last_n` accepted tokens.
#[no_mangle]
pub extern "C" fn dk_sampler_init_penalties(last_n: i32, repeat_penalty: f32) -> *mut DkSampler {
    stage(smp::penalties(usize::try_from(last_n).unwrap_or(0), repeat_penalty))
}

/// Free a stage that was never added to a chain.
///
/// # Safety
/// `smpl` must come from a `dk_sampler_init_*` function, or be null.
#[no_mangle]
pub unsafe extern "C" fn dk_sampler_free(smpl: *mut DkSampler) {
    if !smpl.is_null() {
        drop(Box::from_raw(smpl));
    }
}

/// Sample from the logits row `idx` of `ctx`'s last decode and write the
/// token to `*token_out`.
///
/// # Safety
/// Handles must be live; `token_out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn dk_sampler_sample(
    chain: *mut DkSamplerChain,
    ctx: *const DkContext,
    idx: i32,
    token_out: *mut DkToken,
) -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        let (Some(chain), Some(ctx)) = (chain.as_mut(), ctx.as_ref()) else {
            set_last_error("null argument");
            return DkStatus::ErrorInvalidArgument;
        };
        if token_out.is_null() {
            set_last_error("token_out is null");
            return DkStatus::ErrorInvalidArgument;
        }
        match dk_session::sample(&mut chain.inner, &ctx.inner, idx) {
            Ok(token) => {
                *token_out = token;
                DkStatus::Ok
            }
            Err(e) => report(&e),
        }
    })
}

/// Feed a token the chain did not sample itself (e.g. the prompt) to its
/// history-keeping stages.
///
/// # Safety
/// `chain` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_sampler_chain_accept(chain: *mut DkSamplerChain, token: DkToken) {
    if let Some(chain) = chain.as_mut() {
        chain.inner.accept(token);
    }
}

/// Clear the history of every stage.
///
/// # Safety
/// `chain` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_sampler_chain_reset(chain: *mut DkSamplerChain) {
    if let Some(chain) = chain.as_mut() {
        chain.inner.reset();
    }
}

/// Free a chain and every stage it owns.
///
/// # Safety
/// `chain` must come from `dk_sampler_chain_init`, or be null.
#[no_mangle]
pub unsafe extern "C" fn dk_sampler_chain_free(chain: *mut DkSamplerChain) {
    if !chain.is_null() {
        drop(Box::from_raw(chain));
    }
}

