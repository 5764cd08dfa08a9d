use dk_sampler::SamplerChain;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::Token;

/// Run `chain` over the logits row for batch index `idx` of the context's
/// last decode (negative `idx` counts back from the last output).
pub fn sample(chain: &mut SamplerChain, ctx: &Context<'_>, idx: i32) -> Result<Token> {
    let logits = ctx.get_logits_ith(idx).ok_or(Error::LogitsUnavailable(idx))?;
    Ok(chain.sample(logits)?)
}

#[cfg(test)]
mod tests {
    use dk_model::synthetic::SyntheticLlama;
    use dk_sampler::{greedy, SamplerChainParams};

    use super::*;
    use crate::{ContextParams, Model, ModelParams};

    #[test]
    fn test_sample_needs_flagged_row() {
        let bytes = SyntheticLlama::default().build().unwrap();
        let model = Model::load_from_bytes(bytes, ModelParams::default()).unwrap();
        let mut ctx = Context::new(&model, ContextParams {
            n_ctx: 8,
            ..Default::default()
        })
        .unwrap();
        let mut chain = SamplerChain::new(SamplerChainParams { no_perf: true }).with(greedy());

        assert!(matches!(sample(&mut chain, &ctx, -1), Err(Error::LogitsUnavailable(-1))));

        ctx.decode(&ctx.make_single_sequence_batch(&[1, 270, 280]).unwrap()).unwrap();
        assert!(matches!(sample(&mut chain, &ctx, 0), Err(Error::LogitsUnavailable(0))));

        let token = sample(&mut chain, &ctx, 2).unwrap();
        let row = ctx.get_logits_ith(2).unwrap();
        let best = row
            .iter()
            .enumerate()
            .fold(0, |best, (i, &x)| if x > row[best] { i } else { best });
        assert_eq!(token, best as Token);
        assert_eq!(sample(&mut chain, &ctx, -1).unwrap(), token);
    }
}
