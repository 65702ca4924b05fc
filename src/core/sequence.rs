use super::FinishReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Part of the required prefix is still unmatched.
    Constrained,
    /// Prefix satisfied, sampling from the full distribution.
    Free,
    Done(FinishReason),
    Failed,
}

/// Request-scoped generation state. Text is only ever appended, so once the
/// prefix is matched it stays matched.
#[derive(Debug, Clone)]
pub struct GenerationState {
    /// Request context followed by everything emitted so far.
    text: String,
    context_len: usize,
    prefix: String,
    /// Bytes of `prefix` matched by the emitted text.
    matched: usize,
    token_ids: Vec<u32>,
    prefix_satisfied_at: Option<usize>,
    pub status: SamplerState,
}

impl GenerationState {
    pub fn new(context: &str, prefix: &str) -> Self {
        let mut state = Self {
            text: context.to_string(),
            context_len: context.len(),
            prefix: prefix.to_string(),
            matched: 0,
            token_ids: Vec::new(),
            prefix_satisfied_at: None,
            status: SamplerState::Constrained,
        };
        if prefix.is_empty() {
            state.prefix_satisfied_at = Some(0);
            state.status = SamplerState::Free;
        }
        state
    }

    /// What the oracle conditions on.
    pub fn full_text(&self) -> &str {
        &self.text
    }

    pub fn generated(&self) -> &str {
        &self.text[self.context_len..]
    }

    pub fn remaining_prefix(&self) -> &str {
        &self.prefix[self.matched..]
    }

    pub fn is_satisfied(&self) -> bool {
        self.matched == self.prefix.len()
    }

    pub fn token_ids(&self) -> &[u32] {
        &self.token_ids
    }

    pub fn num_tokens(&self) -> usize {
        self.token_ids.len()
    }

    pub fn prefix_satisfied_at(&self) -> Option<usize> {
        self.prefix_satisfied_at
    }

    /// Append a token, advancing the matched part of the prefix.
    ///
    /// Returns `false` (and leaves the state untouched) if `fragment` neither
    /// extends nor covers the remaining prefix.
    pub fn append(&mut self, token_id: u32, fragment: &str) -> bool {
        let remaining = self.remaining_prefix();
        if !remaining.is_empty() {
            if fragment.starts_with(remaining) {
                self.matched = self.prefix.len();
            } else if !fragment.is_empty() && remaining.starts_with(fragment) {
                self.matched += fragment.len();
            } else {
                return false;
            }
        }
        self.text.push_str(fragment);
        self.token_ids.push(token_id);
        if self.is_satisfied() && self.prefix_satisfied_at.is_none() {
            self.prefix_satisfied_at = Some(self.token_ids.len());
        }
        true
    }

    /// Whether a stop sequence ends within text appended after byte
    /// `prev_len` of the generated text. Occurrences lying wholly inside the
    /// required prefix are ignored.
    pub fn stop_sequence_hit(&self, stop_sequences: &[String], prev_len: usize) -> bool {
        let generated = self.generated();
        stop_sequences.iter().any(|stop| {
            let mut start = prev_len.saturating_sub(stop.len().saturating_sub(1));
            while !generated.is_char_boundary(start) {
                start -= 1;
            }
            generated[start..].match_indices(stop.as_str()).any(|(i, _)| {
                let end = start + i + stop.len();
                end > prev_len && end > self.prefix.len()
            })
        })
    }
}
