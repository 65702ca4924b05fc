use super::{Distribution, LogprobTransport, OracleParams, ProbabilityOracle};
use crate::core::{Result, SamplingError};

/// Oracle over a model that reports next-token log-probabilities.
pub struct ExactOracle<T> {
    transport: T,
}

impl<T: LogprobTransport> ExactOracle<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: LogprobTransport> ProbabilityOracle for ExactOracle<T> {
    async fn next_token_distribution(
        &self,
        context: &str,
        _params: &OracleParams,
    ) -> Result<Distribution> {
        let ranked = self.transport.top_logprobs(context).await.map_err(|e| {
            tracing::warn!("Log-probability request failed: {e}");
            SamplingError::from(e)
        })?;
        if ranked.is_empty() {
            return Err(SamplingError::OracleMalformed(
                "model returned no log-probabilities".to_string(),
            ));
        }

        let mut weights = Vec::with_capacity(ranked.len());
        for entry in ranked {
            if entry.logprob.is_nan() || entry.logprob > 0.0 {
                return Err(SamplingError::OracleMalformed(format!(
                    "token {} has log-probability {}",
                    entry.token, entry.logprob
                )));
            }
            weights.push((entry.token, entry.logprob.exp()));
        }
        Distribution::new(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{TokenLogprob, TransportError};

    struct Fixed(std::result::Result<Vec<TokenLogprob>, TransportError>);

    impl LogprobTransport for Fixed {
        async fn top_logprobs(
            &self,
            _context: &str,
        ) -> std::result::Result<Vec<TokenLogprob>, TransportError> {
            self.0.clone()
        }
    }

    const PARAMS: OracleParams = OracleParams { candidate_count: 1 };

    fn lp(token: u32, logprob: f64) -> TokenLogprob {
        TokenLogprob { token, logprob }
    }

    #[tokio::test]
    async fn test_logprobs_become_linear_weights() {
        let oracle = ExactOracle::new(Fixed(Ok(vec![
            lp(3, 0.5f64.ln()),
            lp(1, 0.25f64.ln()),
            lp(8, f64::NEG_INFINITY),
        ])));
        let dist = oracle.next_token_distribution("ctx", &PARAMS).await.unwrap();
        assert!((dist.weight_of(3).unwrap() - 0.5).abs() < 1e-12);
        assert!((dist.weight_of(1).unwrap() - 0.25).abs() < 1e-12);
        assert_eq!(dist.weight_of(8), Some(0.0));
        // Ranked order is preserved.
        assert_eq!(dist.weights()[0].0, 3);
    }

    #[tokio::test]
    async fn test_transport_failure_is_unavailable() {
        let oracle = ExactOracle::new(Fixed(Err(TransportError::Closed)));
        let err = oracle.next_token_distribution("", &PARAMS).await.unwrap_err();
        assert!(matches!(err, SamplingError::OracleUnavailable(_)));
    }

    #[tokio::test]
    async fn test_malformed_responses() {
        for response in [
            vec![],
            vec![lp(0, f64::NAN)],
            vec![lp(0, 0.3)],
            vec![lp(0, f64::NEG_INFINITY)],
        ] {
            let oracle = ExactOracle::new(Fixed(Ok(response)));
            let err = oracle.next_token_distribution("", &PARAMS).await.unwrap_err();
            assert!(matches!(err, SamplingError::OracleMalformed(_)), "{err:?}");
        }
    }
}
