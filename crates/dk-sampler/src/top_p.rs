use crate::sampler::{Sampler, TokenDataArray};

/// Nucleus sampling: keeps the shortest prefix of the probability-sorted
/// candidates whose cumulative probability reaches `p`, but never fewer
/// than `min_keep` (or one). `p >= 1` leaves the candidates untouched.
#[derive(Debug, Clone)]
pub struct TopP {
    p: f32,
    min_keep: usize,
}

impl TopP {
    pub fn new(p: f32, min_keep: usize) -> Self {
        Self { p, min_keep }
    }
}

impl Sampler for TopP {
    fn name(&self) -> &str {
        "top_p"
    }

    fn apply(&self, candidates: &mut TokenDataArray) {
        if self.p >= 1.0 || candidates.is_empty() {
            return;
        }
        candidates.softmax();

        let min_keep = self.min_keep.max(1);
        let mut cumulative = 0.0f32;
        let mut keep = candidates.len();
        for (i, t) in candidates.data.iter().enumerate() {
            cumulative += t.p;
            if cumulative >= self.p && i + 1 >= min_keep {
                keep = i + 1;
                break;
            }
        }
        candidates.truncate(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logits_for(probs: &[f32]) -> Vec<f32> {
        probs.iter().map(|p| p.ln()).collect()
    }

    #[test]
    fn test_keeps_nucleus() {
        let mut c = TokenDataArray::from_logits(&logits_for(&[0.1, 0.5, 0.3, 0.1]));
        TopP::new(0.75, 1).apply(&mut c);
        let ids: Vec<i32> = c.data.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_min_keep() {
        let mut c = TokenDataArray::from_logits(&logits_for(&[0.9, 0.05, 0.05]));
        TopP::new(0.5, 2).apply(&mut c);
        assert_eq!(c.len(), 2);

        let mut c = TokenDataArray::from_logits(&logits_for(&[0.9, 0.05, 0.05]));
        TopP::new(0.0, 0).apply(&mut c);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_p_one_is_noop() {
        let mut c = TokenDataArray::from_logits(&[1.0, 5.0, 2.0]);
        TopP::new(1.0, 1).apply(&mut c);
        assert!(!c.sorted);
        assert_eq!(c.data.iter().map(|t| t.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
