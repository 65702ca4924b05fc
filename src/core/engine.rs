//src/core/engine.rs
use super::sequence::{GenerationState, SamplerState};
use super::trie::CharacterTrie;
use super::vocab::Vocabulary;
use super::{FinishReason, GenerationOutput, Result, SamplingError};
use crate::oracle::{Distribution, OracleParams, ProbabilityOracle};
use crate::utils::config::{EngineConfig, SamplingParams};
use crate::utils::logits_processor::{LogitsProcessor, Sampling};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancels a running request before its next oracle call.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Prefix-constrained generation over a shared vocabulary and trie.
///
/// `&self` methods only; any number of requests may run concurrently, each
/// with its own [`GenerationState`] and RNG.
pub struct PrefixEngine<O> {
    vocab: Arc<Vocabulary>,
    trie: Arc<CharacterTrie>,
    oracle: O,
    config: EngineConfig,
}

impl<O: ProbabilityOracle> PrefixEngine<O> {
    pub fn new(
        vocab: Arc<Vocabulary>,
        trie: Arc<CharacterTrie>,
        oracle: O,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if trie.vocab_size() != vocab.len() {
            return Err(SamplingError::InvalidConfig(format!(
                "trie built for {} tokens but vocabulary has {}",
                trie.vocab_size(),
                vocab.len()
            )));
        }
        tracing::info!(
            "Prefix engine ready: {} tokens, {} trie nodes",
            vocab.len(),
            trie.node_count()
        );
        Ok(Self {
            vocab,
            trie,
            oracle,
            config,
        })
    }

    pub fn vocab(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn trie(&self) -> &Arc<CharacterTrie> {
        &self.trie
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generate text that, appended to `context`, begins with `prefix`.
    pub async fn generate_with_prefix(
        &self,
        context: &str,
        prefix: &str,
        params: &SamplingParams,
    ) -> Result<GenerationOutput> {
        self.generate_with_prefix_cancellable(context, prefix, params, &CancelHandle::default())
            .await
    }

    pub async fn generate_with_prefix_cancellable(
        &self,
        context: &str,
        prefix: &str,
        params: &SamplingParams,
        cancel: &CancelHandle,
    ) -> Result<GenerationOutput> {
        params.validate()?;
        let seed = params
            .seed
            .or(self.config.seed)
            .unwrap_or_else(rand::random);
        let mut processor = LogitsProcessor::from_seed(seed);
        let oracle_params = OracleParams {
            candidate_count: self.config.candidate_count_for(params, prefix),
        };
        let mut state = GenerationState::new(context, prefix);
        tracing::info!(
            "Generation started: prefix {:?}, seed {}, max_tokens {}",
            prefix,
            seed,
            params.max_tokens
        );

        match self
            .run(&mut state, params, &oracle_params, &mut processor, cancel)
            .await
        {
            Ok(finish_reason) => {
                state.status = SamplerState::Done(finish_reason);
                tracing::info!(
                    "Generation finished: {} tokens, {:?}",
                    state.num_tokens(),
                    finish_reason
                );
                Ok(GenerationOutput {
                    text: state.generated().to_string(),
                    token_ids: state.token_ids().to_vec(),
                    prefix_satisfied_at: state.prefix_satisfied_at().unwrap_or(0),
                    finish_reason,
                    seed,
                })
            }
            Err(e) => {
                state.status = SamplerState::Failed;
                tracing::warn!(
                    "Generation failed after {} tokens (remaining prefix {:?}): {e}",
                    state.num_tokens(),
                    state.remaining_prefix()
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        state: &mut GenerationState,
        params: &SamplingParams,
        oracle_params: &OracleParams,
        processor: &mut LogitsProcessor,
        cancel: &CancelHandle,
    ) -> Result<FinishReason> {
        let constrained = LogitsProcessor::get_strategy(params.temperature, None, None);
        let free = LogitsProcessor::get_strategy(params.temperature, params.top_k, params.top_p);

        loop {
            if state.num_tokens() >= params.max_tokens {
                if !state.is_satisfied() {
                    return Err(SamplingError::PrefixIncomplete {
                        remaining: state.remaining_prefix().to_string(),
                    });
                }
                return Ok(FinishReason::Length);
            }
            if cancel.is_cancelled() {
                return Err(SamplingError::Cancelled);
            }

            let prev_len = state.generated().len();
            if state.status == SamplerState::Constrained {
                self.constrained_step(state, params, oracle_params, processor, &constrained)
                    .await?;
            } else if let Some(reason) = self
                .free_step(state, params, oracle_params, processor, &free)
                .await?
            {
                return Ok(reason);
            }

            if state.stop_sequence_hit(&params.stop_sequences, prev_len) {
                return Ok(FinishReason::Stop);
            }
        }
    }

    async fn constrained_step(
        &self,
        state: &mut GenerationState,
        params: &SamplingParams,
        oracle_params: &OracleParams,
        processor: &mut LogitsProcessor,
        sampling: &Sampling,
    ) -> Result<()> {
        // Checked before the oracle call so a hopeless prefix costs nothing.
        let compatible = self
            .trie
            .viable_tokens(state.remaining_prefix(), &params.stop_token_ids);
        if compatible.is_empty() {
            return Err(SamplingError::UnsatisfiablePrefix {
                remaining: state.remaining_prefix().to_string(),
            });
        }
        let dist = self
            .oracle
            .next_token_distribution(state.full_text(), oracle_params)
            .await?;
        let prs = self.filter_compatible(
            &dist,
            state.remaining_prefix(),
            &compatible,
            params,
            sampling,
        )?;
        let token = processor.sample(&prs, &Sampling::All { temperature: 1.0 })?;
        let fragment = self.vocab.fragment_of(token)?;
        if !state.append(token, fragment) {
            // trie and state disagree about this fragment
            return Err(SamplingError::UnsatisfiablePrefix {
                remaining: state.remaining_prefix().to_string(),
            });
        }
        tracing::debug!(
            "Constrained step: token {} {:?}, remaining {:?}",
            token,
            fragment,
            state.remaining_prefix()
        );
        if state.is_satisfied() {
            state.status = SamplerState::Free;
            tracing::info!("Prefix satisfied after {} tokens", state.num_tokens());
        }
        Ok(())
    }

    async fn free_step(
        &self,
        state: &mut GenerationState,
        params: &SamplingParams,
        oracle_params: &OracleParams,
        processor: &mut LogitsProcessor,
        sampling: &Sampling,
    ) -> Result<Option<FinishReason>> {
        let dist = self
            .oracle
            .next_token_distribution(state.full_text(), oracle_params)
            .await?;
        let token = processor.sample(dist.weights(), sampling)?;
        if params.stop_token_ids.contains(&token) {
            return Ok(Some(FinishReason::StopToken));
        }
        let fragment = self.vocab.fragment_of(token)?;
        state.append(token, fragment);
        Ok(None)
    }

    /// Restrict `dist` to tokens that keep `remaining` reachable, then apply
    /// temperature and renormalize. The result sums to one.
    fn filter_compatible(
        &self,
        dist: &Distribution,
        remaining: &str,
        compatible: &super::trie::TokenSet,
        params: &SamplingParams,
        sampling: &Sampling,
    ) -> Result<Vec<(u32, f64)>> {
        let filtered: Vec<(u32, f64)> = dist
            .weights()
            .iter()
            .copied()
            .filter(|(id, w)| {
                *w > 0.0 && compatible.contains(id) && !params.stop_token_ids.contains(id)
            })
            .collect();
        if filtered.is_empty() {
            return Err(SamplingError::UnsatisfiablePrefix {
                remaining: remaining.to_string(),
            });
        }
        LogitsProcessor::prepare(&filtered, sampling)
    }

    /// The renormalized distribution a constrained step would draw from.
    pub fn constrained_distribution(
        &self,
        dist: &Distribution,
        remaining: &str,
        params: &SamplingParams,
    ) -> Result<Vec<(u32, f64)>> {
        let compatible = self.trie.viable_tokens(remaining, &params.stop_token_ids);
        let sampling = LogitsProcessor::get_strategy(params.temperature, None, None);
        self.filter_compatible(dist, remaining, &compatible, params, &sampling)
    }
}
