use std::collections::VecDeque;

use crate::sampler::{Sampler, Token, TokenDataArray};

/// Repetition penalty over the last `last_n` accepted tokens.
///
/// A recently seen candidate has a positive logit divided by `penalty` and a
/// negative logit multiplied by it, once regardless of how often it was seen.
#[derive(Debug, Clone)]
pub struct Penalties {
    last_n: usize,
    penalty: f32,
    history: VecDeque<Token>,
}

impl Penalties {
    pub fn new(last_n: usize, penalty: f32) -> Self {
        Self {
            last_n,
            penalty,
            history: VecDeque::with_capacity(last_n.min(4096)),
        }
    }

    pub fn history(&self) -> impl Iterator<Item = Token> + '_ {
        self.history.iter().copied()
    }
}

impl Sampler for Penalties {
    fn name(&self) -> &str {
        "penalties"
    }

    fn apply(&self, candidates: &mut TokenDataArray) {
        if self.penalty == 1.0 || self.history.is_empty() {
            return;
        }
        for t in &mut candidates.data {
            if self.history.contains(&t.id) {
                if t.logit > 0.0 {
                    t.logit /= self.penalty;
                } else {
                    t.logit *= self.penalty;
                }
            }
        }
        candidates.sorted = false;
        candidates.selected = None;
    }

    fn accept(&mut self, token: Token) {
        if self.last_n == 0 {
            return;
        }
        if self.history.len() == self.last_n {
            self.history.pop_front();
        }
        self.history.push_back(token);
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}
