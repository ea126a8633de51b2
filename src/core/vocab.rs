//! Vocabulary store and vocabulary file loaders.
//!
//! The [`Vocab`] is the immutable token ⇄ id mapping shared by every encode
//! call. Ids are dense: a vocabulary of size `n` assigns exactly the ids
//! `0..n`, each to one distinct token string. Special tokens are ordinary
//! entries flagged as special, optionally with a [`SpecialRole`].
//!
//! # Loaders
//!
//! - [`Vocab::from_entries`]: a `token -> id` map, as found in a serialized
//!   model description.
//! - [`load_vocab_txt`]: BERT-style `vocab.txt`, one token per line, id equal
//!   to the line number.
//! - [`load_tiktoken_bpe`]: tiktoken rank files.
//!
//! # Tiktoken Format
//!
//! Each line holds a base64-encoded byte sequence and its rank:
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! The rank doubles as the token id and as the merge priority (lower merges
//! first). Tokens are raw bytes that need not be valid UTF-8, so the loader
//! spells them in the byte-level alphabet (see [`super::byte_level`]).

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;

use super::byte_level::byte_level_encode;
use super::error::ModelFormatError;

/// Dense token id.
pub type TokenId = u32;

/// Structural role of a special token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialRole {
    /// Substituted for out-of-vocabulary pieces.
    Unknown,
    /// Fills encodings up to a requested length.
    Padding,
    /// Opens a sequence (`[CLS]`, `<s>`).
    SequenceStart,
    /// Closes a sequence (`[SEP]`, `</s>`).
    SequenceEnd,
    /// Separates packed sequences.
    Separator,
    /// Masked-language-model placeholder.
    Mask,
}

impl SpecialRole {
    /// Guess roles from the conventional spelling of a special token.
    pub fn from_conventional_name(token: &str) -> &'static [SpecialRole] {
        match token {
            "[UNK]" | "<unk>" | "<|unk|>" => &[SpecialRole::Unknown],
            "[PAD]" | "<pad>" | "<|pad|>" => &[SpecialRole::Padding],
            "[CLS]" => &[SpecialRole::SequenceStart],
            "[SEP]" => &[SpecialRole::Separator, SpecialRole::SequenceEnd],
            "<s>" | "<|begin_of_text|>" => &[SpecialRole::SequenceStart],
            "</s>" | "<|endoftext|>" | "<|end_of_text|>" => &[SpecialRole::SequenceEnd],
            "[MASK]" | "<mask>" => &[SpecialRole::Mask],
            _ => &[],
        }
    }
}

/// Immutable mapping between token strings and dense ids.
#[derive(Debug, Clone, Default)]
pub struct Vocab {
    token_to_id: FxHashMap<String, TokenId>,
    id_to_token: Vec<String>,
    special: Vec<bool>,
    roles: FxHashMap<SpecialRole, TokenId>,
}

impl Vocab {
    /// Build a vocabulary from a `token -> id` map.
    ///
    /// Fails when two tokens share an id or when the ids do not form
    /// `0..entries.len()`.
    pub fn from_entries<I>(entries: I) -> Result<Self, ModelFormatError>
    where
        I: IntoIterator<Item = (String, TokenId)>,
    {
        let mut by_id: FxHashMap<TokenId, String> = FxHashMap::default();
        let mut token_to_id = FxHashMap::default();

        for (token, id) in entries {
            if let Some(previous) = token_to_id.insert(token.clone(), id) {
                if previous != id {
                    return Err(ModelFormatError::DuplicateToken {
                        token,
                        first: previous.min(id),
                        second: previous.max(id),
                    });
                }
                continue;
            }
            if let Some(first) = by_id.get(&id) {
                let (first, second) = ordered_pair(first, &token);
                return Err(ModelFormatError::DuplicateId { id, first, second });
            }
            by_id.insert(id, token);
        }

        let size = by_id.len();
        let mut id_to_token = Vec::with_capacity(size);
        for id in 0..size as TokenId {
            match by_id.remove(&id) {
                Some(token) => id_to_token.push(token),
                None => return Err(ModelFormatError::NonDenseIds { missing: id, size }),
            }
        }

        Ok(Self {
            token_to_id,
            special: vec![false; size],
            id_to_token,
            roles: FxHashMap::default(),
        })
    }

    /// Build a vocabulary where each token's id is its position.
    pub fn from_ordered(tokens: Vec<String>) -> Result<Self, ModelFormatError> {
        let entries: Vec<(String, TokenId)> = tokens
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, i as TokenId))
            .collect();
        Self::from_entries(entries)
    }

    /// Add tokens that extend the model vocabulary (e.g. added special tokens).
    ///
    /// Tokens already present must keep their id. New tokens must take
    /// exactly the ids following the current vocabulary, in any order.
    pub fn extend<I>(&mut self, entries: I) -> Result<(), ModelFormatError>
    where
        I: IntoIterator<Item = (String, TokenId)>,
    {
        let mut pending: FxHashMap<TokenId, String> = FxHashMap::default();
        for (token, id) in entries {
            match self.token_to_id.get(&token) {
                Some(&existing) if existing == id => continue,
                Some(&existing) => {
                    return Err(ModelFormatError::DuplicateToken {
                        token,
                        first: existing.min(id),
                        second: existing.max(id),
                    })
                }
                None => {}
            }
            if let Some(first) = self.lookup_text(id).or(pending.get(&id).map(String::as_str)) {
                let (first, second) = ordered_pair(first, &token);
                return Err(ModelFormatError::DuplicateId { id, first, second });
            }
            pending.insert(id, token);
        }

        let size = self.id_to_token.len() + pending.len();
        for id in self.id_to_token.len() as TokenId..size as TokenId {
            let token = pending
                .remove(&id)
                .ok_or(ModelFormatError::NonDenseIds { missing: id, size })?;
            self.token_to_id.insert(token.clone(), id);
            self.id_to_token.push(token);
            self.special.push(false);
        }
        Ok(())
    }

    /// Flag `id` as a special token, optionally with a role.
    ///
    /// Returns `false` when `id` is outside the vocabulary.
    pub fn mark_special(&mut self, id: TokenId, role: Option<SpecialRole>) -> bool {
        let Some(flag) = self.special.get_mut(id as usize) else {
            return false;
        };
        *flag = true;
        if let Some(role) = role {
            self.roles.insert(role, id);
        }
        true
    }

    /// Assign a role without changing the special flag.
    ///
    /// Used for the unknown token, which is a regular vocabulary entry in many
    /// models.
    pub fn assign_role(&mut self, role: SpecialRole, id: TokenId) {
        if (id as usize) < self.id_to_token.len() {
            self.roles.insert(role, id);
        }
    }

    #[inline]
    pub fn lookup_id(&self, token: &str) -> Option<TokenId> {
        self.token_to_id.get(token).copied()
    }

    #[inline]
    pub fn lookup_text(&self, id: TokenId) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    #[inline]
    pub fn special_token(&self, role: SpecialRole) -> Option<TokenId> {
        self.roles.get(&role).copied()
    }

    #[inline]
    pub fn is_special(&self, id: TokenId) -> bool {
        self.special.get(id as usize).copied().unwrap_or(false)
    }

    /// Ids of all special tokens, ascending.
    pub fn special_ids(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.special
            .iter()
            .enumerate()
            .filter(|(_, &s)| s)
            .map(|(i, _)| i as TokenId)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Tokens in id order.
    pub fn tokens(&self) -> &[String] {
        &self.id_to_token
    }
}

fn ordered_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Load a BERT-style `vocab.txt` (one token per line, id = line number).
pub fn load_vocab_txt(text: &str) -> Result<Vocab, ModelFormatError> {
    let tokens: Vec<String> = text
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();
    Vocab::from_ordered(tokens)
}

/// Load a tiktoken rank file from raw bytes.
///
/// Returns `(token, rank)` pairs with each token spelled in the byte-level
/// alphabet, in file order.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<Vec<(String, TokenId)>, ModelFormatError> {
    let mut entries = Vec::new();

    for line in data.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let space_pos = line
            .iter()
            .rposition(|&b| b == b' ')
            .ok_or_else(|| ModelFormatError::Parse("Missing space separator".to_string()))?;

        let token = STANDARD.decode(&line[..space_pos])?;

        let rank_str = std::str::from_utf8(&line[space_pos + 1..])
            .map_err(|_| ModelFormatError::Parse("Invalid UTF-8 in rank".to_string()))?;
        let rank: TokenId = rank_str
            .trim()
            .parse()
            .map_err(|_| ModelFormatError::Parse(format!("Invalid rank: {}", rank_str)))?;

        entries.push((byte_level_encode(&token), rank));
    }

    Ok(entries)
}

/// Load a tiktoken rank file from disk.
pub fn load_tiktoken_bpe_file(
    path: impl AsRef<std::path::Path>,
) -> Result<Vec<(String, TokenId)>, ModelFormatError> {
    let data = std::fs::read(path)?;
    load_tiktoken_bpe(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, TokenId)]) -> Vec<(String, TokenId)> {
        pairs.iter().map(|&(t, i)| (t.to_string(), i)).collect()
    }

    #[test]
    fn test_lookup_both_directions() {
        let vocab = Vocab::from_entries(entries(&[("un", 0), ("##aff", 1), ("[UNK]", 2)])).unwrap();
        assert_eq!(vocab.lookup_id("##aff"), Some(1));
        assert_eq!(vocab.lookup_text(2), Some("[UNK]"));
        assert_eq!(vocab.lookup_id("missing"), None);
        assert_eq!(vocab.lookup_text(99), None);
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn test_non_dense_ids_rejected() {
        let err = Vocab::from_entries(entries(&[("a", 0), ("b", 2)])).unwrap_err();
        assert!(matches!(err, ModelFormatError::NonDenseIds { missing: 1, size: 2 }));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = Vocab::from_entries(entries(&[("a", 0), ("b", 0)])).unwrap_err();
        assert!(matches!(err, ModelFormatError::DuplicateId { id: 0, .. }));
    }

    #[test]
    fn test_extend_appends_dense_ids() {
        let mut vocab = Vocab::from_entries(entries(&[("a", 0), ("b", 1)])).unwrap();
        vocab
            .extend(entries(&[("[SEP]", 3), ("[CLS]", 2), ("a", 0)]))
            .unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.lookup_id("[SEP]"), Some(3));

        let err = vocab.extend(entries(&[("[MASK]", 7)])).unwrap_err();
        assert!(matches!(err, ModelFormatError::NonDenseIds { missing: 4, .. }));
    }

    #[test]
    fn test_special_roles() {
        let mut vocab =
            Vocab::from_entries(entries(&[("[PAD]", 0), ("[UNK]", 1), ("x", 2)])).unwrap();
        assert!(vocab.mark_special(0, Some(SpecialRole::Padding)));
        vocab.assign_role(SpecialRole::Unknown, 1);
        assert!(!vocab.mark_special(10, None));

        assert_eq!(vocab.special_token(SpecialRole::Padding), Some(0));
        assert_eq!(vocab.special_token(SpecialRole::Unknown), Some(1));
        assert_eq!(vocab.special_token(SpecialRole::Mask), None);
        assert!(vocab.is_special(0));
        assert!(!vocab.is_special(1));
        assert_eq!(vocab.special_ids().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_load_vocab_txt() {
        let vocab = load_vocab_txt("[PAD]\r\n[UNK]\nhello\n").unwrap();
        assert_eq!(vocab.lookup_id("hello"), Some(2));
        assert_eq!(vocab.lookup_id("[UNK]"), Some(1));
    }

    #[test]
    fn test_load_tiktoken_bpe() {
        // "Hello" = "SGVsbG8=", " World" = "IFdvcmxk"
        let data = b"SGVsbG8= 0\nIFdvcmxk 1\n";
        let entries = load_tiktoken_bpe(data).unwrap();
        assert_eq!(
            entries,
            vec![("Hello".to_string(), 0), ("\u{120}World".to_string(), 1)]
        );
    }

    #[test]
    fn test_load_tiktoken_bpe_rejects_missing_rank() {
        let err = load_tiktoken_bpe(b"SGVsbG8=\n").unwrap_err();
        assert!(matches!(err, ModelFormatError::Parse(_)));
    }
}
