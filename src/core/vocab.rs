//! Token id to decoded text fragment table.
//!
//! Built once per tokenizer version and shared read-only (via `Arc`) by every
//! generation request.

use super::{Result, SamplingError};
use either::Either;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;

/// JSON vocabulary: either `["a", "b", ...]` or `{"0": "a", "1": "b", ...}`.
#[derive(Deserialize, Debug, Clone)]
struct VocabFile(
    #[serde(with = "either::serde_untagged")] Either<Vec<String>, HashMap<String, String>>,
);

#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// `fragments[token_id]` is the text that token decodes to in isolation.
    fragments: Vec<String>,
}

impl Vocabulary {
    /// Ids are the positions in `fragments`.
    pub fn new(fragments: Vec<String>) -> Result<Self> {
        if fragments.is_empty() {
            return Err(SamplingError::EmptyVocabulary);
        }
        Ok(Self { fragments })
    }

    /// Build from an id -> fragment table. Ids must cover `[0, N)` exactly.
    pub fn from_table<I, S>(table: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut entries: Vec<(u32, String)> =
            table.into_iter().map(|(id, s)| (id, s.into())).collect();
        if entries.is_empty() {
            return Err(SamplingError::EmptyVocabulary);
        }
        entries.sort_by_key(|(id, _)| *id);

        let mut fragments = Vec::with_capacity(entries.len());
        for (expected, (id, fragment)) in entries.into_iter().enumerate() {
            let expected = expected as u32;
            if id != expected {
                // Either a gap or a repeated id; both leave `expected` unassigned.
                return Err(SamplingError::NonDenseVocabulary { missing: expected });
            }
            fragments.push(fragment);
        }
        Self::new(fragments)
    }

    pub fn from_json_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let file: VocabFile = serde_json::from_reader(reader)?;
        let vocab = match file.0 {
            Either::Left(list) => Self::new(list)?,
            Either::Right(map) => {
                let mut table = Vec::with_capacity(map.len());
                for (id, fragment) in map {
                    let id: u32 = id
                        .parse()
                        .map_err(|_| anyhow::anyhow!("vocabulary key {id:?} is not a token id"))?;
                    table.push((id, fragment));
                }
                Self::from_table(table)?
            }
        };
        Ok(vocab)
    }

    /// Decode every id of a HuggingFace tokenizer in isolation.
    ///
    /// Ids that fail to decode get an empty fragment, which keeps the table
    /// dense.
    pub fn from_tokenizer(tokenizer: &tokenizers::Tokenizer) -> Result<Self> {
        let vocab_size = tokenizer.get_vocab_size(true) as u32;
        let fragments: Vec<String> = (0..vocab_size)
            .into_par_iter()
            .map(|id| tokenizer.decode(&[id], false).unwrap_or_default())
            .collect();
        tracing::info!("Vocabulary decoded from tokenizer: {} tokens", fragments.len());
        Self::new(fragments)
    }

    pub fn fragment_of(&self, token_id: u32) -> Result<&str> {
        self.fragments
            .get(token_id as usize)
            .map(String::as_str)
            .ok_or(SamplingError::UnknownToken(token_id))
    }

    /// Concatenate the fragments of `token_ids`.
    pub fn decode(&self, token_ids: &[u32]) -> Result<String> {
        let mut text = String::new();
        for &id in token_ids {
            text.push_str(self.fragment_of(id)?);
        }
        Ok(text)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.fragments
            .iter()
            .enumerate()
            .map(|(id, s)| (id as u32, s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": null,
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"def": 0, "fact": 1, "(": 2, "[UNK]": 3},
            "unk_token": "[UNK]"
        }
    }"#;

    #[test]
    fn test_from_tokenizer_keeps_ids_dense() {
        let tokenizer = tokenizers::Tokenizer::from_str(WORD_LEVEL).unwrap();
        let vocab = Vocabulary::from_tokenizer(&tokenizer).unwrap();
        assert_eq!(vocab.len(), 4);
        let fragments: Vec<(u32, &str)> = vocab.iter().collect();
        assert_eq!(
            fragments,
            vec![(0, "def"), (1, "fact"), (2, "("), (3, "[UNK]")]
        );
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(
            Vocabulary::new(vec![]).unwrap_err(),
            SamplingError::EmptyVocabulary
        );
        let empty: Vec<(u32, String)> = vec![];
        assert_eq!(
            Vocabulary::from_table(empty).unwrap_err(),
            SamplingError::EmptyVocabulary
        );
    }

    #[test]
    fn test_fragment_lookup() {
        let vocab = Vocabulary::from_table(vec![(1, "f"), (0, "de"), (2, "fact")]).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.fragment_of(0).unwrap(), "de");
        assert_eq!(vocab.fragment_of(2).unwrap(), "fact");
        assert_eq!(
            vocab.fragment_of(3).unwrap_err(),
            SamplingError::UnknownToken(3)
        );
    }

    #[test]
    fn test_gap_rejected() {
        let err = Vocabulary::from_table(vec![(0, "a"), (2, "b")]).unwrap_err();
        assert_eq!(err, SamplingError::NonDenseVocabulary { missing: 1 });

        let err = Vocabulary::from_table(vec![(0, "a"), (0, "b")]).unwrap_err();
        assert_eq!(err, SamplingError::NonDenseVocabulary { missing: 1 });
    }

    #[test]
    fn test_duplicate_fragments_kept() {
        let vocab = Vocabulary::new(vec!["ab".into(), "ab".into(), "".into()]).unwrap();
        assert_eq!(vocab.fragment_of(0).unwrap(), "ab");
        assert_eq!(vocab.fragment_of(1).unwrap(), "ab");
        assert_eq!(vocab.fragment_of(2).unwrap(), "");
    }

    #[test]
    fn test_decode() {
        let vocab = Vocabulary::new(vec!["de".into(), "f".into(), " fact".into()]).unwrap();
        assert_eq!(vocab.decode(&[0, 1, 2]).unwrap(), "def fact");
        assert_eq!(
            vocab.decode(&[0, 9]).unwrap_err(),
            SamplingError::UnknownToken(9)
        );
    }

    #[test]
    fn test_json_list_and_map() {
        let vocab = Vocabulary::from_json_reader(r#"["a", "bc", " "]"#.as_bytes()).unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.fragment_of(1).unwrap(), "bc");

        let vocab =
            Vocabulary::from_json_reader(r#"{"1": "bc", "0": "a"}"#.as_bytes()).unwrap();
        assert_eq!(vocab.fragment_of(0).unwrap(), "a");
        assert_eq!(vocab.fragment_of(1).unwrap(), "bc");

        assert!(Vocabulary::from_json_reader(r#"{"x": "a"}"#.as_bytes()).is_err());
    }
}
