//! Next-token probability oracles.
//!
//! The sampler only sees [`ProbabilityOracle`]. Two implementations sit behind
//! it: [`ExactOracle`] for models that report token log-probabilities and
//! [`ApproximateOracle`] for models that only return sampled continuations.

pub mod approximate;
pub mod exact;

pub use approximate::ApproximateOracle;
pub use exact::ExactOracle;

use crate::core::{Result, SamplingError};
use crate::utils::config::CandidateParams;
use std::collections::HashMap;
use std::future::Future;

/// Sparse next-token distribution: non-negative finite weights, at least one
/// strictly positive. Weights need not sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    weights: Vec<(u32, f64)>,
}

impl Distribution {
    /// Validates the weights. Repeated ids are merged by summing, keeping the
    /// position of the first occurrence.
    pub fn new(weights: Vec<(u32, f64)>) -> Result<Self> {
        let mut merged: Vec<(u32, f64)> = Vec::with_capacity(weights.len());
        let mut index: HashMap<u32, usize> = HashMap::with_capacity(weights.len());
        for (token, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(SamplingError::OracleMalformed(format!(
                    "token {token} has weight {weight}"
                )));
            }
            match index.get(&token) {
                Some(&i) => merged[i].1 += weight,
                None => {
                    index.insert(token, merged.len());
                    merged.push((token, weight));
                }
            }
        }
        if !merged.iter().any(|(_, w)| *w > 0.0) {
            return Err(SamplingError::OracleMalformed(
                "distribution has no positive weight".to_string(),
            ));
        }
        Ok(Self { weights: merged })
    }

    pub fn weights(&self) -> &[(u32, f64)] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weight_of(&self, token: u32) -> Option<f64> {
        self.weights
            .iter()
            .find(|(id, _)| *id == token)
            .map(|(_, w)| *w)
    }
}

/// Per-call hints. Oracles ignore what does not apply to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleParams {
    pub candidate_count: usize,
}

pub trait ProbabilityOracle: Send + Sync {
    /// Distribution over the next token given everything generated so far
    /// (request context plus emitted text). The sampler's only suspension
    /// point.
    fn next_token_distribution(
        &self,
        context: &str,
        params: &OracleParams,
    ) -> impl Future<Output = Result<Distribution>> + Send;
}

/// Transport errors reported by model-access collaborators.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<TransportError> for SamplingError {
    fn from(e: TransportError) -> Self {
        SamplingError::OracleUnavailable(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenLogprob {
    pub token: u32,
    /// Natural-log probability.
    pub logprob: f64,
}

/// A model that reports ranked `(token, logprob)` pairs for the next position.
pub trait LogprobTransport: Send + Sync {
    fn top_logprobs(
        &self,
        context: &str,
    ) -> impl Future<Output = std::result::Result<Vec<TokenLogprob>, TransportError>> + Send;
}

/// A model that reports no probabilities, only sampled continuations.
pub trait ContinuationTransport: Send + Sync {
    /// One request; returns the model's candidates ranked best first
    /// (commonly a single one).
    fn sample_continuations(
        &self,
        context: &str,
        params: &CandidateParams,
    ) -> impl Future<Output = std::result::Result<Vec<String>, TransportError>> + Send;
}
