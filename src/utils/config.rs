// src/utils/config.rs
use crate::core::{Result, SamplingError};
use serde::{Deserialize, Serialize};

/// Per-request sampling settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SamplingParams {
    /// Applied as `weight^(1/temperature)`. Must be > 0.
    pub temperature: f64,
    pub max_tokens: usize,
    pub stop_sequences: Vec<String>,
    pub top_k: Option<usize>,
    /// Cumulative mass kept by nucleus sampling, in (0, 1].
    pub top_p: Option<f64>,
    /// Continuations requested per step from an approximate oracle.
    /// `None` falls back to the engine setting.
    pub candidate_count: Option<usize>,
    pub seed: Option<u64>,
    pub stop_token_ids: Vec<u32>,
}

impl SamplingParams {
    pub fn new(
        temperature: Option<f64>,
        max_tokens: Option<usize>,
        stop_sequences: Option<Vec<String>>,
        top_k: Option<usize>,
        top_p: Option<f64>,
        candidate_count: Option<usize>,
        seed: Option<u64>,
    ) -> Self {
        let default = Self::default();
        Self {
            temperature: temperature.unwrap_or(default.temperature),
            max_tokens: max_tokens.unwrap_or(default.max_tokens),
            stop_sequences: stop_sequences.unwrap_or_default(),
            top_k: top_k.or(default.top_k),
            top_p: top_p.or(default.top_p),
            candidate_count,
            seed,
            stop_token_ids: Vec::new(),
        }
    }

    /// Unmodified weights, no truncation.
    pub fn plain(max_tokens: usize, seed: u64) -> Self {
        Self {
            temperature: 1.0,
            max_tokens,
            stop_sequences: Vec::new(),
            top_k: None,
            top_p: None,
            candidate_count: None,
            seed: Some(seed),
            stop_token_ids: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(SamplingError::InvalidConfig(format!(
                "temperature must be > 0, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(SamplingError::InvalidConfig(
                "max_tokens must be > 0".to_string(),
            ));
        }
        if self.top_k == Some(0) {
            return Err(SamplingError::InvalidConfig("top_k must be > 0".to_string()));
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(SamplingError::InvalidConfig(format!(
                    "top_p must be in (0, 1], got {p}"
                )));
            }
        }
        if self.candidate_count == Some(0) {
            return Err(SamplingError::InvalidConfig(
                "candidate_count must be > 0".to_string(),
            ));
        }
        if self.stop_sequences.iter().any(|s| s.is_empty()) {
            return Err(SamplingError::InvalidConfig(
                "stop sequences must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
            stop_sequences: Vec::new(),
            top_k: Some(40),
            top_p: Some(0.9),
            candidate_count: None,
            seed: None,
            stop_token_ids: Vec::new(),
        }
    }
}

/// Diversity settings sent with every continuation request of an
/// approximate oracle. Candidate quality depends heavily on these.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CandidateParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
    pub max_output_tokens: usize,
}

impl Default for CandidateParams {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            top_p: 0.98,
            top_k: 60,
            max_output_tokens: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Used when a request carries no seed. `None` draws a fresh one.
    pub seed: Option<u64>,
    /// Base number of continuations per approximate-oracle step.
    pub candidate_count: usize,
    /// Scale the candidate count with prefix complexity when the request
    /// does not set one.
    pub adaptive_candidates: bool,
    /// Geometric decay per rank within one continuation response.
    pub candidate_decay: f64,
    pub candidate: CandidateParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            candidate_count: 10,
            adaptive_candidates: true,
            candidate_decay: (-0.5f64).exp(),
            candidate: CandidateParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.candidate_count == 0 {
            return Err(SamplingError::InvalidConfig(
                "engine candidate_count must be > 0".to_string(),
            ));
        }
        if !(self.candidate_decay > 0.0 && self.candidate_decay <= 1.0) {
            return Err(SamplingError::InvalidConfig(format!(
                "candidate_decay must be in (0, 1], got {}",
                self.candidate_decay
            )));
        }
        Ok(())
    }

    /// Candidate count for a request: explicit request value, else the base
    /// count, grown by up to ~2.5x for long prefixes or ones heavy in
    /// punctuation and whitespace.
    pub fn candidate_count_for(&self, params: &SamplingParams, prefix: &str) -> usize {
        if let Some(k) = params.candidate_count {
            return k;
        }
        if !self.adaptive_candidates {
            return self.candidate_count;
        }
        let length_factor = (prefix.chars().count() as f64 / 2.0).min(5.0);
        let special = prefix.chars().filter(|c| !c.is_alphanumeric()).count() as f64;
        let complexity = 1.0 + (length_factor + special) / 10.0;
        let scaled = (self.candidate_count as f64 * complexity) as usize;
        scaled.max(self.candidate_count)
    }
}
