use crate::sampler::{Sampler, TokenDataArray};

/// Keeps the `k` highest-logit candidates, sorted descending.
/// `k <= 0` leaves the candidates untouched.
#[derive(Debug, Clone)]
pub struct TopK {
    k: i32,
}

impl TopK {
    pub fn new(k: i32) -> Self {
        Self { k }
    }
}

impl Sampler for TopK {
    fn name(&self) -> &str {
        "top_k"
    }

    fn apply(&self, candidates: &mut TokenDataArray) {
        if self.k <= 0 {
            return;
        }
        candidates.sort_by_logit();
        candidates.truncate(self.k as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(c: &TokenDataArray) -> Vec<i32> {
        c.data.iter().map(|t| t.id).collect()
    }

    #[test]
    fn test_keeps_top_k() {
        let mut c = TokenDataArray::from_logits(&[0.5, 3.0, -1.0, 2.0]);
        TopK::new(2).apply(&mut c);
        assert_eq!(ids(&c), vec![1, 3]);
    }

    #[test]
    fn test_non_positive_k_is_noop() {
        let mut c = TokenDataArray::from_logits(&[0.5, 3.0]);
        TopK::new(0).apply(&mut c);
        TopK::new(-5).apply(&mut c);
        assert_eq!(ids(&c), vec![0, 1]);
    }

    #[test]
    fn test_k_larger_than_candidates() {
        let mut c = TokenDataArray::from_logits(&[0.5, 3.0]);
        TopK::new(10).apply(&mut c);
        assert_eq!(ids(&c), vec![1, 0]);
    }
}
