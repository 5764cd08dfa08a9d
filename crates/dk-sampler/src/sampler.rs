use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Result, SamplerError};

/// Token identifier, as produced by the model's vocabulary.
pub type Token = i32;

/// A candidate token with its logit and (once computed) probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: Token,
    pub logit: f32,
    pub p: f32,
}

/// The candidate set a chain of stages narrows down.
#[derive(Debug, Clone, Default)]
pub struct TokenDataArray {
    pub data: Vec<TokenData>,
    /// Whether `data` is sorted by descending logit.
    pub sorted: bool,
    /// Index into `data` of the token a selection stage picked.
    pub selected: Option<usize>,
}

impl TokenDataArray {
    /// One candidate per logit, with `id` equal to its index.
    pub fn from_logits(logits: &[f32]) -> Self {
        Self {
            data: logits
                .iter()
                .enumerate()
                .map(|(i, &logit)| TokenData {
                    id: i as Token,
                    logit,
                    p: 0.0,
                })
                .collect(),
            sorted: false,
            selected: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stable descending sort by logit. Clears any selection.
    pub fn sort_by_logit(&mut self) {
        if !self.sorted {
            self.data.sort_by(|a, b| b.logit.total_cmp(&a.logit));
            self.sorted = true;
        }
        self.selected = None;
    }

    /// Sort, then fill `p` with the softmax of the logits.
    pub fn softmax(&mut self) {
        self.sort_by_logit();
        let Some(max) = self.data.first().map(|t| t.logit) else {
            return;
        };
        let mut sum = 0.0f32;
        for t in &mut self.data {
            t.p = (t.logit - max).exp();
            sum += t.p;
        }
        for t in &mut self.data {
            t.p /= sum;
        }
    }

    /// Keep the first `n` candidates. Clears any selection.
    pub fn truncate(&mut self, n: usize) {
        self.data.truncate(n);
        self.selected = None;
    }

    /// Index of the highest logit; the first one on ties.
    pub fn argmax(&self) -> Option<usize> {
        if self.sorted {
            return (!self.data.is_empty()).then_some(0);
        }
        let mut best: Option<usize> = None;
        for (i, t) in self.data.iter().enumerate() {
            if best.map_or(true, |b| t.logit > self.data[b].logit) {
                best = Some(i);
            }
        }
        best
    }

    pub fn selected_token(&self) -> Option<Token> {
        self.selected.and_then(|i| self.data.get(i)).map(|t| t.id)
    }
}

/// One stage of a sampling pipeline.
///
/// `apply` narrows, rescales or selects among the candidates. Stages that
/// keep history update it in `accept`, which the chain calls with every
/// token it returns.
pub trait Sampler: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, candidates: &mut TokenDataArray);

    /// Observe a token that was sampled or fed to the model.
    fn accept(&mut self, _token: Token) {}

    /// Drop any history.
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SamplerChainParams {
    /// Skip counting samples and timing them.
    pub no_perf: bool,
}

/// Counters kept by a chain unless `no_perf` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplerPerf {
    pub n_sample: u64,
    pub t_sample: Duration,
}

/// An ordered, owning list of stages run one after another.
pub struct SamplerChain {
    params: SamplerChainParams,
    stages: Vec<Box<dyn Sampler>>,
    perf: SamplerPerf,
}

impl SamplerChain {
    pub fn new(params: SamplerChainParams) -> Self {
        Self {
            params,
            stages: Vec::new(),
            perf: SamplerPerf::default(),
        }
    }

    /// Append a stage; it runs after every stage added before it.
    pub fn add(&mut self, stage: Box<dyn Sampler>) {
        self.stages.push(stage);
    }

    /// Builder-style `add`.
    #[must_use]
    pub fn with(mut self, stage: Box<dyn Sampler>) -> Self {
        self.add(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name())
    }

    /// Run every stage over `candidates` without selecting or accepting.
    pub fn apply(&self, candidates: &mut TokenDataArray) {
        for stage in &self.stages {
            stage.apply(candidates);
        }
    }

    /// Pick the next token from one row of logits.
    ///
    /// If no stage selected a token, the highest-logit remaining candidate
    /// is returned. The result is passed to `accept` before returning.
    pub fn sample(&mut self, logits: &[f32]) -> Result<Token> {
        let start = (!self.params.no_perf).then(Instant::now);

        let mut candidates = TokenDataArray::from_logits(logits);
        self.apply(&mut candidates);
        let token = match candidates.selected_token() {
            Some(t) => t,
            None => {
                let i = candidates.argmax().ok_or(SamplerError::EmptyCandidates)?;
                candidates.data[i].id
            }
        };
        self.accept(token);

        if let Some(start) = start {
            self.perf.n_sample += 1;
            self.perf.t_sample += start.elapsed();
        }
        trace!(token, remaining = candidates.len(), "sampled");
        Ok(token)
    }

    /// Tell every stage about `token`, e.g. prompt tokens for penalties.
    pub fn accept(&mut self, token: Token) {
        for stage in &mut self.stages {
            stage.accept(token);
        }
    }

    /// Clear the history of every stateful stage.
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    pub fn perf(&self) -> SamplerPerf {
        self.perf
    }

    pub fn reset_perf(&mut self) {
        self.perf = SamplerPerf::default();
    }
}

impl Default for SamplerChain {
    fn default() -> Self {
        Self::new(SamplerChainParams::default())
    }
}

impl std::fmt::Debug for SamplerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerChain")
            .field("stages", &self.stage_names().collect::<Vec<_>>())
            .field("params", &self.params)
            .finish()
    }
}
