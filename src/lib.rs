pub mod core;
pub mod oracle;
pub mod utils;
pub use crate::core::engine::{CancelHandle, PrefixEngine};
pub use crate::core::trie::CharacterTrie;
pub use crate::core::vocab::Vocabulary;
pub use crate::core::{FinishReason, GenerationOutput, SamplingError};
pub use crate::oracle::{ApproximateOracle, Distribution, ExactOracle, ProbabilityOracle};
pub use crate::utils::config::{EngineConfig, SamplingParams};
