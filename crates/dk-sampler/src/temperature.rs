use crate::sampler::{Sampler, TokenDataArray};

/// Divides every logit by the temperature.
///
/// Higher temperatures flatten the distribution, lower ones sharpen it.
/// A temperature `<= 0` keeps only the highest-logit candidate.
#[derive(Debug, Clone)]
pub struct Temperature {
    t: f32,
}

impl Temperature {
    pub fn new(t: f32) -> Self {
        Self { t }
    }
}

impl Sampler for Temperature {
    fn name(&self) -> &str {
        "temperature"
    }

    fn apply(&self, candidates: &mut TokenDataArray) {
        if self.t <= 0.0 {
            if let Some(i) = candidates.argmax() {
                let best = candidates.data[i];
                candidates.data.clear();
                candidates.data.push(best);
                candidates.sorted = true;
                candidates.selected = None;
            }
            return;
        }
        for t in &mut candidates.data {
            t.logit /= self.t;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scales_logits() {
        let mut c = TokenDataArray::from_logits(&[1.0, -2.0]);
        Temperature::new(0.5).apply(&mut c);
        assert_relative_eq!(c.data[0].logit, 2.0);
        assert_relative_eq!(c.data[1].logit, -4.0);
    }

    #[test]
    fn test_zero_keeps_max() {
        let mut c = TokenDataArray::from_logits(&[1.0, 4.0, 2.0]);
        Temperature::new(0.0).apply(&mut c);
        assert_eq!(c.len(), 1);
        assert_eq!(c.data[0].id, 1);
    }
}
