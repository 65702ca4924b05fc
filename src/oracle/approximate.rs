//! Pseudo-distribution from repeated sampled continuations.
//!
//! For models that expose no token likelihoods, each step issues `K`
//! independent continuation requests for the same context, tokenizes the
//! leading characters of every returned candidate by longest match, and
//! counts votes per first token. A candidate at rank `j` within its own
//! response adds `decay^j`, so a response's top candidate counts fully.
//!
//! This is a heuristic estimate, not an inverse of the model's true
//! distribution. Its quality depends on `K` and on the diversity settings in
//! [`CandidateParams`].

use super::{ContinuationTransport, Distribution, OracleParams, ProbabilityOracle, TransportError};
use crate::core::trie::CharacterTrie;
use crate::core::{Result, SamplingError};
use crate::utils::config::{CandidateParams, EngineConfig};
use crate::utils::logits_processor::{normalize, sort_by_weight};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ApproximateOracle<T> {
    transport: T,
    trie: Arc<CharacterTrie>,
    decay: f64,
    candidate: CandidateParams,
}

impl<T: ContinuationTransport> ApproximateOracle<T> {
    pub fn new(transport: T, trie: Arc<CharacterTrie>, config: &EngineConfig) -> Self {
        Self {
            transport,
            trie,
            decay: config.candidate_decay,
            candidate: config.candidate.clone(),
        }
    }

    /// Fold candidate responses into a normalized pseudo-distribution, sorted
    /// by weight then lowest token id.
    pub fn aggregate(
        &self,
        responses: Vec<std::result::Result<Vec<String>, TransportError>>,
    ) -> Result<Distribution> {
        let requested = responses.len();
        let mut votes: HashMap<u32, f64> = HashMap::new();
        let mut failed = 0;
        let mut last_error = None;
        let mut candidates = 0;

        for response in responses {
            let texts = match response {
                Ok(texts) => texts,
                Err(e) => {
                    tracing::warn!("Candidate request failed: {e}");
                    failed += 1;
                    last_error = Some(e);
                    continue;
                }
            };
            for (rank, text) in texts.iter().enumerate() {
                match self.trie.longest_match(text) {
                    Some((token, _)) => {
                        *votes.entry(token).or_insert(0.0) += self.decay.powi(rank as i32);
                        candidates += 1;
                    }
                    None => {
                        let head: String = text.chars().take(10).collect();
                        tracing::debug!("Could not extract a token from candidate {head:?}");
                    }
                }
            }
        }

        if failed == requested {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidate requests issued".to_string());
            return Err(SamplingError::OracleUnavailable(format!(
                "all {requested} candidate requests failed: {reason}"
            )));
        }
        if votes.is_empty() {
            return Err(SamplingError::OracleMalformed(format!(
                "none of {} responses produced a tokenizable candidate",
                requested - failed
            )));
        }

        let mut weights: Vec<(u32, f64)> = votes.into_iter().collect();
        sort_by_weight(&mut weights);
        normalize(&mut weights)?;
        tracing::debug!(
            "Approximated distribution: {} tokens from {} candidates ({} requests failed)",
            weights.len(),
            candidates,
            failed
        );
        Distribution::new(weights)
    }
}

impl<T: ContinuationTransport> ProbabilityOracle for ApproximateOracle<T> {
    async fn next_token_distribution(
        &self,
        context: &str,
        params: &OracleParams,
    ) -> Result<Distribution> {
        let requests = (0..params.candidate_count.max(1))
            .map(|_| self.transport.sample_continuations(context, &self.candidate));
        let responses = join_all(requests).await;
        self.aggregate(responses)
    }
}
