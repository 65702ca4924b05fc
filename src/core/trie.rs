//! Character trie over token fragments.
//!
//! Nodes live in a flat arena. After insertion every node is assigned a
//! contiguous range of a pre-order token list, so "all tokens whose fragment
//! extends this node" is a slice rather than a subtree walk.

use super::vocab::Vocabulary;
use std::collections::{BTreeMap, HashSet};

pub type TokenSet = HashSet<u32>;

const ROOT: usize = 0;

#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: BTreeMap<char, usize>,
    /// Tokens whose fragment is exactly the path to this node.
    terminal: Vec<u32>,
    /// `order[subtree.0..subtree.1]` holds every token at or below this node.
    subtree: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct CharacterTrie {
    nodes: Vec<TrieNode>,
    order: Vec<u32>,
    vocab_size: usize,
}

impl CharacterTrie {
    pub fn new(vocab: &Vocabulary) -> Self {
        let mut nodes = vec![TrieNode::default()];
        for (token_id, fragment) in vocab.iter() {
            let mut node = ROOT;
            for ch in fragment.chars() {
                node = match nodes[node].children.get(&ch) {
                    Some(&child) => child,
                    None => {
                        nodes.push(TrieNode::default());
                        let child = nodes.len() - 1;
                        nodes[node].children.insert(ch, child);
                        child
                    }
                };
            }
            nodes[node].terminal.push(token_id);
        }

        let mut trie = Self {
            nodes,
            order: Vec::with_capacity(vocab.len()),
            vocab_size: vocab.len(),
        };
        trie.assign_ranges();
        tracing::info!(
            "Character trie built: {} tokens, {} nodes",
            trie.vocab_size,
            trie.nodes.len()
        );
        trie
    }

    // Iterative pre-order walk; a node's range closes once all its children are done.
    fn assign_ranges(&mut self) {
        enum Visit {
            Enter(usize),
            Exit(usize),
        }
        let mut stack = vec![Visit::Enter(ROOT)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(n) => {
                    let start = self.order.len();
                    self.order.extend_from_slice(&self.nodes[n].terminal);
                    self.nodes[n].subtree.0 = start;
                    stack.push(Visit::Exit(n));
                    for &child in self.nodes[n].children.values().rev() {
                        stack.push(Visit::Enter(child));
                    }
                }
                Visit::Exit(n) => self.nodes[n].subtree.1 = self.order.len(),
            }
        }
    }

    /// Tokens that can be emitted while `remaining` characters are still
    /// required: those whose fragment is a non-empty prefix of `remaining`,
    /// plus those whose fragment starts with `remaining` (overshoot).
    ///
    /// An empty `remaining` means no constraint and yields every token.
    /// Empty-fragment tokens only appear in that unconstrained case since they
    /// cannot advance a constraint.
    pub fn compatible_tokens(&self, remaining: &str) -> TokenSet {
        if remaining.is_empty() {
            return (0..self.vocab_size as u32).collect();
        }

        let mut tokens = TokenSet::new();
        let mut node = ROOT;
        for ch in remaining.chars() {
            match self.nodes[node].children.get(&ch) {
                Some(&child) => node = child,
                None => return tokens,
            }
            tokens.extend(self.nodes[node].terminal.iter().copied());
        }

        let (start, end) = self.nodes[node].subtree;
        tokens.extend(self.order[start..end].iter().copied());
        tokens
    }

    /// [`compatible_tokens`](Self::compatible_tokens) minus `excluded` and
    /// minus the tokens that would leave a remainder no token sequence can
    /// cover without using `excluded`. Empty if `remaining` itself cannot be
    /// covered that way.
    pub fn viable_tokens(&self, remaining: &str, excluded: &[u32]) -> TokenSet {
        if remaining.is_empty() {
            let mut tokens = self.compatible_tokens(remaining);
            tokens.retain(|id| !excluded.contains(id));
            return tokens;
        }
        let chars: Vec<char> = remaining.chars().collect();
        let coverable = self.coverable_suffixes(&chars, excluded);
        let mut tokens = TokenSet::new();
        if !coverable[0] {
            return tokens;
        }

        let mut node = ROOT;
        for (i, ch) in chars.iter().enumerate() {
            match self.nodes[node].children.get(ch) {
                Some(&child) => node = child,
                None => return tokens,
            }
            if coverable[i + 1] {
                tokens.extend(self.terminal_tokens(node, excluded));
            }
        }
        let (start, end) = self.nodes[node].subtree;
        tokens.extend(
            self.order[start..end]
                .iter()
                .copied()
                .filter(|id| !excluded.contains(id)),
        );
        tokens
    }

    fn terminal_tokens<'a>(
        &'a self,
        node: usize,
        excluded: &'a [u32],
    ) -> impl Iterator<Item = u32> + 'a {
        self.nodes[node]
            .terminal
            .iter()
            .copied()
            .filter(move |id| !excluded.contains(id))
    }

    /// `coverable[i]`: some token sequence outside `excluded` covers
    /// `chars[i..]`, its last token possibly running past the end.
    fn coverable_suffixes(&self, chars: &[char], excluded: &[u32]) -> Vec<bool> {
        let n = chars.len();
        let mut coverable = vec![false; n + 1];
        coverable[n] = true;
        for i in (0..n).rev() {
            let mut node = ROOT;
            for j in i..n {
                match self.nodes[node].children.get(&chars[j]) {
                    Some(&child) => node = child,
                    None => break,
                }
                let ends_here = j + 1 == n && {
                    let (start, end) = self.nodes[node].subtree;
                    self.order[start..end].iter().any(|id| !excluded.contains(id))
                };
                let steps_here =
                    coverable[j + 1] && self.terminal_tokens(node, excluded).next().is_some();
                if ends_here || steps_here {
                    coverable[i] = true;
                    break;
                }
            }
        }
        coverable
    }

    /// Longest token fragment that `text` starts with, as
    /// `(token_id, fragment length in chars)`. Duplicate fragments resolve to
    /// the lowest id.
    pub fn longest_match(&self, text: &str) -> Option<(u32, usize)> {
        let mut best = None;
        let mut node = ROOT;
        for (depth, ch) in text.chars().enumerate() {
            match self.nodes[node].children.get(&ch) {
                Some(&child) => node = child,
                None => break,
            }
            if let Some(&id) = self.nodes[node].terminal.iter().min() {
                best = Some((id, depth + 1));
            }
        }
        best
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie_of(fragments: &[&str]) -> CharacterTrie {
        let vocab = Vocabulary::new(fragments.iter().map(|s| s.to_string()).collect()).unwrap();
        CharacterTrie::new(&vocab)
    }

    fn sorted(set: TokenSet) -> Vec<u32> {
        let mut v: Vec<u32> = set.into_iter().collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn test_empty_remaining_is_unconstrained() {
        let trie = trie_of(&["de", "f", "factorial", "fact", ""]);
        assert_eq!(sorted(trie.compatible_tokens("")), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_shorter_equal_and_longer_tokens() {
        // 0:"de" 1:"f" 2:"factorial" 3:"fact"
        let trie = trie_of(&["de", "f", "factorial", "fact"]);

        // "f" is a prefix of "fact", "fact" equals it, "factorial" overshoots.
        assert_eq!(sorted(trie.compatible_tokens("fact")), vec![1, 2, 3]);
        // Only "de" is a prefix of "def fact"; nothing starts with it.
        assert_eq!(sorted(trie.compatible_tokens("def fact")), vec![0]);
        // Remaining shorter than every fragment starting with its first char.
        assert_eq!(sorted(trie.compatible_tokens("fa")), vec![1, 2, 3]);
        assert_eq!(sorted(trie.compatible_tokens("factx")), vec![1, 3]);
    }

    #[test]
    fn test_no_token_starts_with_char() {
        let trie = trie_of(&["de", "f"]);
        assert!(trie.compatible_tokens("xyz").is_empty());
    }

    #[test]
    fn test_every_fragment_reaches_itself() {
        let fragments = ["a", "ab", "abc", "b", "bc", " (", "ab", "日本", "日"];
        let trie = trie_of(&fragments);
        for (id, fragment) in fragments.iter().enumerate() {
            assert!(
                trie.compatible_tokens(fragment).contains(&(id as u32)),
                "token {id} ({fragment:?}) missing"
            );
        }
    }

    #[test]
    fn test_duplicate_fragments_both_returned() {
        let trie = trie_of(&["ab", "x", "ab"]);
        assert_eq!(sorted(trie.compatible_tokens("a")), vec![0, 2]);
        assert_eq!(sorted(trie.compatible_tokens("abz")), vec![0, 2]);
    }

    #[test]
    fn test_empty_fragment_excluded_when_constrained() {
        let trie = trie_of(&["", "a"]);
        assert_eq!(sorted(trie.compatible_tokens("a")), vec![1]);
    }

    #[test]
    fn test_viable_tokens_skip_dead_ends() {
        // 0:"de" 1:"f" 2:"factorial" 3:"fact" 4:" "
        let trie = trie_of(&["de", "f", "factorial", "fact", " "]);
        // "f" would leave "act", which nothing starts with.
        assert_eq!(sorted(trie.compatible_tokens("fact")), vec![1, 2, 3]);
        assert_eq!(sorted(trie.viable_tokens("fact", &[])), vec![2, 3]);
        assert_eq!(sorted(trie.viable_tokens("def fact", &[])), vec![0]);
        assert_eq!(sorted(trie.viable_tokens("", &[])), vec![0, 1, 2, 3, 4]);
        // Coverable as "f" + "f", "f" + "fact" or "f" + "factorial".
        assert_eq!(sorted(trie.viable_tokens("ff", &[])), vec![1]);
    }

    #[test]
    fn test_uncoverable_remainder_detected_up_front() {
        let trie = trie_of(&["a", "b", "ab"]);
        // The bad character is at the end, but nothing is viable now.
        assert!(!trie.compatible_tokens("abz").is_empty());
        assert!(trie.viable_tokens("abz", &[]).is_empty());
        assert_eq!(sorted(trie.viable_tokens("abab", &[])), vec![0, 2]);
    }

    #[test]
    fn test_viable_tokens_skip_excluded() {
        // 0:"d" 1:"e" 2:"de"
        let trie = trie_of(&["d", "e", "de"]);
        assert_eq!(sorted(trie.viable_tokens("de", &[])), vec![0, 2]);
        // With "e" excluded, "d" would strand the remaining "e".
        assert_eq!(sorted(trie.viable_tokens("de", &[1])), vec![2]);
        assert!(trie.viable_tokens("e", &[1]).is_empty());
        assert_eq!(sorted(trie.viable_tokens("", &[1])), vec![0, 2]);
        // Overshoot through an excluded-only subtree does not count.
        let trie = trie_of(&["a", "bc"]);
        assert!(trie.viable_tokens("ab", &[1]).is_empty());
        assert_eq!(sorted(trie.viable_tokens("ab", &[])), vec![0]);
    }

    #[test]
    fn test_longest_match() {
        let trie = trie_of(&["de", "f", "factorial", "fact", "fact"]);
        assert_eq!(trie.longest_match("factory"), Some((3, 4)));
        assert_eq!(trie.longest_match("factorial("), Some((2, 9)));
        assert_eq!(trie.longest_match("fx"), Some((1, 1)));
        assert_eq!(trie.longest_match("d"), None);
        assert_eq!(trie.longest_match(""), None);
    }
}
