use crate::core::{Result, SamplingError};
use rand::{distr::Distribution, SeedableRng};
use std::cmp::Ordering;

#[derive(Clone, PartialEq, Debug)]
pub enum Sampling {
    ArgMax,
    All { temperature: f64 },
    TopK { k: usize, temperature: f64 },
    TopP { p: f64, temperature: f64 },
    TopKThenTopP { k: usize, p: f64, temperature: f64 },
}

/// Weighted draw over a sparse `(token_id, weight)` snapshot.
///
/// One processor per request: it owns its RNG, so identical seeds and
/// identical inputs give identical draws.
pub struct LogitsProcessor {
    rng: rand::rngs::StdRng,
    seed: u64,
}

impl LogitsProcessor {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn get_strategy(temperature: f64, top_k: Option<usize>, top_p: Option<f64>) -> Sampling {
        let top_k = top_k.filter(|&k| k > 0);
        // p >= 1 keeps the whole distribution.
        let top_p = top_p.filter(|&p| p > 0.0 && p < 1.0);

        if temperature < 1e-7 {
            return Sampling::ArgMax;
        }
        match (top_k, top_p) {
            (None, None) => Sampling::All { temperature },
            (Some(k), None) => Sampling::TopK { k, temperature },
            (None, Some(p)) => Sampling::TopP { p, temperature },
            (Some(k), Some(p)) => Sampling::TopKThenTopP { k, p, temperature },
        }
    }

    /// The normalized distribution a draw would be taken from, sorted by
    /// weight (descending) then token id.
    pub fn prepare(weights: &[(u32, f64)], sampling: &Sampling) -> Result<Vec<(u32, f64)>> {
        let mut prs: Vec<(u32, f64)> = weights.iter().copied().filter(|(_, w)| *w > 0.0).collect();
        if prs.is_empty() {
            return Err(SamplingError::OracleMalformed(
                "no token with positive weight".to_string(),
            ));
        }
        sort_by_weight(&mut prs);

        match sampling {
            Sampling::ArgMax => return Ok(vec![(prs[0].0, 1.0)]),
            Sampling::All { temperature } => {
                apply_temperature(&mut prs, *temperature);
            }
            Sampling::TopK { k, temperature } => {
                apply_temperature(&mut prs, *temperature);
                prs.truncate(*k);
            }
            Sampling::TopP { p, temperature } => {
                apply_temperature(&mut prs, *temperature);
                normalize(&mut prs)?;
                truncate_top_p(&mut prs, *p);
            }
            Sampling::TopKThenTopP { k, p, temperature } => {
                apply_temperature(&mut prs, *temperature);
                prs.truncate(*k);
                normalize(&mut prs)?;
                truncate_top_p(&mut prs, *p);
            }
        }
        normalize(&mut prs)?;
        Ok(prs)
    }

    pub fn sample(&mut self, weights: &[(u32, f64)], sampling: &Sampling) -> Result<u32> {
        let prs = Self::prepare(weights, sampling)?;
        if let Sampling::ArgMax = sampling {
            return Ok(prs[0].0);
        }
        self.sample_multinomial(&prs)
    }

    fn sample_multinomial(&mut self, prs: &[(u32, f64)]) -> Result<u32> {
        let distr = rand::distr::weighted::WeightedIndex::new(prs.iter().map(|(_, w)| *w))
            .map_err(|e| SamplingError::OracleMalformed(e.to_string()))?;
        let index = distr.sample(&mut self.rng);
        Ok(prs[index].0)
    }
}

/// Highest weight first; equal weights by lowest token id.
pub fn sort_by_weight(prs: &mut [(u32, f64)]) {
    prs.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
}

/// `w^(1/temperature)`, computed relative to the largest weight in log space
/// so small temperatures do not underflow every entry to zero.
pub fn apply_temperature(prs: &mut [(u32, f64)], temperature: f64) {
    if temperature == 1.0 {
        return;
    }
    let max_log = prs
        .iter()
        .map(|(_, w)| w.ln())
        .fold(f64::NEG_INFINITY, f64::max);
    for (_, w) in prs.iter_mut() {
        *w = ((w.ln() - max_log) / temperature).exp();
    }
}

/// Scale weights to sum to one.
pub fn normalize(prs: &mut [(u32, f64)]) -> Result<()> {
    let total: f64 = prs.iter().map(|(_, w)| *w).sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(SamplingError::OracleMalformed(format!(
            "cannot renormalize weights summing to {total}"
        )));
    }
    for (_, w) in prs.iter_mut() {
        *w /= total;
    }
    Ok(())
}

// top-p sampling (or "nucleus sampling") keeps the smallest set of most likely tokens whose
// cumulative probability reaches top_p. Expects sorted, normalized input.
fn truncate_top_p(prs: &mut Vec<(u32, f64)>, top_p: f64) {
    let mut cumsum = 0.0;
    let mut keep = prs.len();
    for (i, (_, w)) in prs.iter().enumerate() {
        cumsum += w;
        if cumsum >= top_p {
            keep = i + 1;
            break;
        }
    }
    prs.truncate(keep);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(prs: &[(u32, f64)]) -> f64 {
        prs.iter().map(|(_, w)| w).sum()
    }

    #[test]
    fn test_strategy() {
        assert_eq!(LogitsProcessor::get_strategy(0.0, Some(5), None), Sampling::ArgMax);
        assert_eq!(
            LogitsProcessor::get_strategy(0.7, None, Some(1.0)),
            Sampling::All { temperature: 0.7 }
        );
        assert_eq!(
            LogitsProcessor::get_strategy(1.0, Some(4), Some(0.5)),
            Sampling::TopKThenTopP {
                k: 4,
                p: 0.5,
                temperature: 1.0
            }
        );
    }

    #[test]
    fn test_renormalized_sums_to_one() {
        let weights = vec![(3, 0.02), (7, 0.3), (1, 0.0001), (9, 0.11)];
        for sampling in [
            Sampling::All { temperature: 1.0 },
            Sampling::All { temperature: 0.3 },
            Sampling::All { temperature: 2.5 },
            Sampling::TopK { k: 2, temperature: 0.8 },
            Sampling::TopP { p: 0.6, temperature: 1.3 },
            Sampling::TopKThenTopP { k: 3, p: 0.9, temperature: 0.5 },
        ] {
            let prs = LogitsProcessor::prepare(&weights, &sampling).unwrap();
            assert!((sum(&prs) - 1.0).abs() < 1e-9, "{sampling:?}");
        }
    }

    #[test]
    fn test_temperature_semantics() {
        let weights = vec![(0, 0.2), (1, 0.8)];

        let prs = LogitsProcessor::prepare(&weights, &Sampling::All { temperature: 1.0 }).unwrap();
        assert_eq!(prs[0].0, 1);
        assert!((prs[0].1 - 0.8).abs() < 1e-12);

        // Squaring: 0.64 / (0.64 + 0.04)
        let prs = LogitsProcessor::prepare(&weights, &Sampling::All { temperature: 0.5 }).unwrap();
        assert!((prs[0].1 - 0.64 / 0.68).abs() < 1e-12);

        // Higher temperature flattens.
        let prs = LogitsProcessor::prepare(&weights, &Sampling::All { temperature: 4.0 }).unwrap();
        assert!(prs[0].1 < 0.8 && prs[0].1 > 0.5);

        // Near zero collapses onto the maximum without NaN.
        let prs = LogitsProcessor::prepare(&weights, &Sampling::All { temperature: 1e-4 }).unwrap();
        assert!((prs[0].1 - 1.0).abs() < 1e-9);
        assert_eq!(prs[1].1, 0.0);
    }

    #[test]
    fn test_top_k_and_top_p() {
        let weights = vec![(0, 0.1), (1, 0.4), (2, 0.3), (3, 0.2)];
        let prs =
            LogitsProcessor::prepare(&weights, &Sampling::TopK { k: 2, temperature: 1.0 }).unwrap();
        assert_eq!(prs.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);

        let prs =
            LogitsProcessor::prepare(&weights, &Sampling::TopP { p: 0.75, temperature: 1.0 })
                .unwrap();
        assert_eq!(prs.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_argmax_ties_pick_lowest_id() {
        let mut processor = LogitsProcessor::from_seed(0);
        let weights = vec![(9, 0.5), (4, 0.5), (1, 0.1)];
        assert_eq!(processor.sample(&weights, &Sampling::ArgMax).unwrap(), 4);
    }

    #[test]
    fn test_seeded_draws_repeat() {
        let weights = vec![(0, 0.25), (1, 0.25), (2, 0.25), (3, 0.25)];
        let sampling = Sampling::All { temperature: 1.0 };
        let draw = |seed| {
            let mut processor = LogitsProcessor::from_seed(seed);
            (0..32)
                .map(|_| processor.sample(&weights, &sampling).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
    }

    #[test]
    fn test_all_zero_rejected() {
        let err = LogitsProcessor::prepare(&[(0, 0.0)], &Sampling::All { temperature: 1.0 })
            .unwrap_err();
        assert!(matches!(err, SamplingError::OracleMalformed(_)));
    }
}
