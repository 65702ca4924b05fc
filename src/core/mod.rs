pub mod engine;
pub mod sequence;
pub mod trie;
pub mod vocab;

/// Errors surfaced by a generation request.
///
/// Every variant aborts the current request; no partial text is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("vocabulary is empty")]
    EmptyVocabulary,

    #[error("vocabulary table is not dense: token id {missing} is missing")]
    NonDenseVocabulary { missing: u32 },

    #[error("unknown token id {0}")]
    UnknownToken(u32),

    /// No token can extend the remaining required characters. Permanent.
    #[error("no token can extend the remaining prefix {remaining:?}")]
    UnsatisfiablePrefix { remaining: String },

    /// Transport or model failure. The caller may retry the whole request.
    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("oracle returned a malformed distribution: {0}")]
    OracleMalformed(String),

    #[error("token budget exhausted with {remaining:?} of the prefix still unmatched")]
    PrefixIncomplete { remaining: String },

    #[error("invalid sampling config: {0}")]
    InvalidConfig(String),

    #[error("generation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SamplingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FinishReason {
    /// A stop sequence appeared in the generated text.
    Stop,
    /// A configured stop token was sampled.
    StopToken,
    /// `max_tokens` reached.
    Length,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerationOutput {
    /// Text generated by this request, starting with the required prefix.
    pub text: String,
    pub token_ids: Vec<u32>,
    /// Number of emitted tokens at the point the prefix became satisfied.
    pub prefix_satisfied_at: usize,
    pub finish_reason: FinishReason,
    /// Seed actually used, so a run can be replayed.
    pub seed: u64,
}
