pub mod config;
pub mod logits_processor;
use crate::core::trie::CharacterTrie;
use crate::core::vocab::Vocabulary;
use std::path::Path;
use std::sync::Arc;

/// Load a vocabulary from either a HuggingFace `tokenizer.json` or a plain
/// JSON fragment table.
pub fn load_vocabulary(path: &Path) -> anyhow::Result<Vocabulary> {
    let is_tokenizer = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with("tokenizer.json"));
    if is_tokenizer {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer {}: {e}", path.display()))?;
        return Ok(Vocabulary::from_tokenizer(&tokenizer)?);
    }
    let file = std::fs::File::open(path)?;
    let vocab = Vocabulary::from_json_reader(std::io::BufReader::new(file))?;
    tracing::info!("Vocabulary loaded from {}: {} tokens", path.display(), vocab.len());
    Ok(vocab)
}

/// Vocabulary and trie, built once and shared by every request.
pub fn build_shared(vocab: Vocabulary) -> (Arc<Vocabulary>, Arc<CharacterTrie>) {
    let trie = CharacterTrie::new(&vocab);
    (Arc::new(vocab), Arc::new(trie))
}
