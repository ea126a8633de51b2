//! Merge rule table.
//!
//! Rules are keyed by token-id pairs: `(left_id, right_id) -> (rank, merged_id)`.
//! A lower rank means a higher priority. The table is built once at load time
//! and never mutated, so lookups during segmentation need no synchronization.

use rustc_hash::FxHashMap;

use super::error::ModelFormatError;
use super::vocab::{TokenId, Vocab};

/// Priority of a merge rule (lower merges first).
pub type Rank = u32;

/// Immutable pairwise merge rules.
#[derive(Debug, Clone, Default)]
pub struct MergeTable {
    pairs: FxHashMap<(TokenId, TokenId), (Rank, TokenId)>,
}

impl MergeTable {
    /// Build the table from ordered `(left, right)` rules; rule `i` gets rank `i`.
    ///
    /// With a `continuing_prefix` (e.g. `##`), the right-hand side of a rule
    /// carries the prefix and the merged token keeps only the left's:
    /// `("un", "##aff") -> "unaff"`.
    ///
    /// Every side and every merged token must exist in `vocab`.
    pub fn from_rules(
        rules: &[(String, String)],
        vocab: &Vocab,
        continuing_prefix: Option<&str>,
    ) -> Result<Self, ModelFormatError> {
        let mut pairs = FxHashMap::default();
        pairs.reserve(rules.len());

        for (rank, (left, right)) in rules.iter().enumerate() {
            let left_id = vocab
                .lookup_id(left)
                .ok_or_else(|| ModelFormatError::MergeOutOfVocabulary(left.clone()))?;
            let right_id = vocab
                .lookup_id(right)
                .ok_or_else(|| ModelFormatError::MergeOutOfVocabulary(right.clone()))?;

            let tail = match continuing_prefix {
                Some(prefix) => right.strip_prefix(prefix).unwrap_or(right),
                None => right,
            };
            let merged = format!("{left}{tail}");
            let merged_id = vocab
                .lookup_id(&merged)
                .ok_or(ModelFormatError::MergeOutOfVocabulary(merged))?;

            pairs
                .entry((left_id, right_id))
                .or_insert((rank as Rank, merged_id));
        }

        Ok(Self { pairs })
    }

    /// Derive rules from a rank-ordered vocabulary (tiktoken semantics).
    ///
    /// Any two adjacent tokens whose concatenation is in the vocabulary may
    /// merge, and the concatenation's id is the rule's rank.
    pub fn from_ranked_vocab(vocab: &Vocab) -> Self {
        let mut pairs = FxHashMap::default();

        for (id, token) in vocab.tokens().iter().enumerate() {
            if vocab.is_special(id as TokenId) {
                continue;
            }
            let split_points = token.char_indices().skip(1).map(|(i, _)| i);
            for split in split_points {
                let (left, right) = token.split_at(split);
                if let (Some(l), Some(r)) = (vocab.lookup_id(left), vocab.lookup_id(right)) {
                    let id = id as TokenId;
                    pairs
                        .entry((l, r))
                        .and_modify(|entry: &mut (Rank, TokenId)| {
                            if id < entry.0 {
                                *entry = (id, id);
                            }
                        })
                        .or_insert((id, id));
                }
            }
        }

        Self { pairs }
    }

    /// Rank and result of merging `left` with `right`, if a rule exists.
    #[inline]
    pub fn get(&self, left: TokenId, right: TokenId) -> Option<(Rank, TokenId)> {
        self.pairs.get(&(left, right)).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Parse a merge rule written as `"left right"`.
pub fn parse_merge(rule: &str) -> Result<(String, String), ModelFormatError> {
    let mut parts = rule.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(left), Some(right), None) if !left.is_empty() && !right.is_empty() => {
            Ok((left.to_string(), right.to_string()))
        }
        _ => Err(ModelFormatError::InvalidMerge(rule.to_string())),
    }
}
