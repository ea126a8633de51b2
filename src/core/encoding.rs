//! Encoding output: parallel per-token arrays.

use serde::{Deserialize, Serialize};

use super::vocab::TokenId;

/// Side of a sequence that truncation removes from or padding adds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Direction {
    Left,
    #[default]
    Right,
}

/// One content token produced by segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: TokenId,
    pub value: String,
    /// Byte range into the original text.
    pub offsets: (usize, usize),
    /// Index of the chunk the token came from.
    pub word: Option<u32>,
}

/// The result of encoding one input (a single sequence or a pair).
///
/// All arrays have the same length. Special and padding tokens carry the
/// empty offset `(0, 0)` and no word id.
///
/// Offsets never split a character, so they may overlap: the two sequences
/// of a pair each index their own text, a character a normalizer expands
/// gives all its pieces the same range, and when byte-level BPE splits a
/// multi-byte character across tokens each of those tokens carries the
/// whole character's range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Encoding {
    ids: Vec<TokenId>,
    type_ids: Vec<u32>,
    tokens: Vec<String>,
    word_ids: Vec<Option<u32>>,
    offsets: Vec<(usize, usize)>,
    special_tokens_mask: Vec<u32>,
    attention_mask: Vec<u32>,
    sequence_ids: Vec<Option<usize>>,
    n_sequences: usize,
}

impl Encoding {
    /// Content tokens of one input sequence.
    pub fn from_tokens(tokens: Vec<Token>, sequence_id: usize, type_id: u32) -> Self {
        let mut encoding = Self::with_capacity(tokens.len());
        for token in tokens {
            encoding.ids.push(token.id);
            encoding.tokens.push(token.value);
            encoding.offsets.push(token.offsets);
            encoding.word_ids.push(token.word);
        }
        let n = encoding.ids.len();
        encoding.type_ids = vec![type_id; n];
        encoding.special_tokens_mask = vec![0; n];
        encoding.attention_mask = vec![1; n];
        encoding.sequence_ids = vec![Some(sequence_id); n];
        encoding.n_sequences = 1;
        encoding
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            type_ids: Vec::with_capacity(capacity),
            tokens: Vec::with_capacity(capacity),
            word_ids: Vec::with_capacity(capacity),
            offsets: Vec::with_capacity(capacity),
            special_tokens_mask: Vec::with_capacity(capacity),
            attention_mask: Vec::with_capacity(capacity),
            sequence_ids: Vec::with_capacity(capacity),
            n_sequences: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[TokenId] {
        &self.ids
    }

    pub fn type_ids(&self) -> &[u32] {
        &self.type_ids
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn word_ids(&self) -> &[Option<u32>] {
        &self.word_ids
    }

    /// Byte ranges into the text of the sequence each token belongs to.
    pub fn offsets(&self) -> &[(usize, usize)] {
        &self.offsets
    }

    pub fn special_tokens_mask(&self) -> &[u32] {
        &self.special_tokens_mask
    }

    pub fn attention_mask(&self) -> &[u32] {
        &self.attention_mask
    }

    /// Input sequence (0 or 1) of each token; `None` for special tokens.
    pub fn sequence_ids(&self) -> &[Option<usize>] {
        &self.sequence_ids
    }

    pub fn n_sequences(&self) -> usize {
        self.n_sequences
    }

    /// Append a special token.
    pub fn push_special(&mut self, id: TokenId, token: &str, type_id: u32) {
        self.ids.push(id);
        self.type_ids.push(type_id);
        self.tokens.push(token.to_string());
        self.word_ids.push(None);
        self.offsets.push((0, 0));
        self.special_tokens_mask.push(1);
        self.attention_mask.push(1);
        self.sequence_ids.push(None);
    }

    /// Append the content of `other`, overriding its type ids.
    pub fn append(&mut self, other: Encoding, type_id: u32) {
        let n = other.len();
        self.ids.extend(other.ids);
        self.type_ids.extend(std::iter::repeat(type_id).take(n));
        self.tokens.extend(other.tokens);
        self.word_ids.extend(other.word_ids);
        self.offsets.extend(other.offsets);
        self.special_tokens_mask.extend(other.special_tokens_mask);
        self.attention_mask.extend(other.attention_mask);
        self.sequence_ids.extend(other.sequence_ids);
    }

    pub(crate) fn set_n_sequences(&mut self, n: usize) {
        self.n_sequences = n;
    }

    /// Keep at most `max_len` tokens, dropping from `direction`.
    pub fn truncate(&mut self, max_len: usize, direction: Direction) {
        if self.len() <= max_len {
            return;
        }
        match direction {
            Direction::Right => {
                self.ids.truncate(max_len);
                self.type_ids.truncate(max_len);
                self.tokens.truncate(max_len);
                self.word_ids.truncate(max_len);
                self.offsets.truncate(max_len);
                self.special_tokens_mask.truncate(max_len);
                self.attention_mask.truncate(max_len);
                self.sequence_ids.truncate(max_len);
            }
            Direction::Left => {
                let cut = self.len() - max_len;
                self.ids.drain(..cut);
                self.type_ids.drain(..cut);
                self.tokens.drain(..cut);
                self.word_ids.drain(..cut);
                self.offsets.drain(..cut);
                self.special_tokens_mask.drain(..cut);
                self.attention_mask.drain(..cut);
                self.sequence_ids.drain(..cut);
            }
        }
    }

    /// Pad up to `target` tokens.
    pub fn pad(
        &mut self,
        target: usize,
        pad_id: TokenId,
        pad_type_id: u32,
        pad_token: &str,
        direction: Direction,
    ) {
        if self.len() >= target {
            return;
        }
        let n = target - self.len();
        match direction {
            Direction::Right => {
                self.ids.extend(std::iter::repeat(pad_id).take(n));
                self.type_ids.extend(std::iter::repeat(pad_type_id).take(n));
                self.tokens.extend(std::iter::repeat(pad_token.to_string()).take(n));
                self.word_ids.extend(std::iter::repeat(None).take(n));
                self.offsets.extend(std::iter::repeat((0, 0)).take(n));
                self.special_tokens_mask.extend(std::iter::repeat(1).take(n));
                self.attention_mask.extend(std::iter::repeat(0).take(n));
                self.sequence_ids.extend(std::iter::repeat(None).take(n));
            }
            Direction::Left => {
                prepend(&mut self.ids, pad_id, n);
                prepend(&mut self.type_ids, pad_type_id, n);
                prepend(&mut self.tokens, pad_token.to_string(), n);
                prepend(&mut self.word_ids, None, n);
                prepend(&mut self.offsets, (0, 0), n);
                prepend(&mut self.special_tokens_mask, 1, n);
                prepend(&mut self.attention_mask, 0, n);
                prepend(&mut self.sequence_ids, None, n);
            }
        }
    }
}

fn prepend<T: Clone>(v: &mut Vec<T>, value: T, n: usize) {
    v.splice(0..0, std::iter::repeat(value).take(n));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(n: usize) -> Encoding {
        let tokens = (0..n)
            .map(|i| Token {
                id: i as TokenId + 10,
                value: format!("t{i}"),
                offsets: (i, i + 1),
                word: Some(i as u32),
            })
            .collect();
        Encoding::from_tokens(tokens, 0, 0)
    }

    fn assert_parallel(e: &Encoding) {
        let n = e.len();
        assert_eq!(e.type_ids().len(), n);
        assert_eq!(e.tokens().len(), n);
        assert_eq!(e.word_ids().len(), n);
        assert_eq!(e.offsets().len(), n);
        assert_eq!(e.special_tokens_mask().len(), n);
        assert_eq!(e.attention_mask().len(), n);
        assert_eq!(e.sequence_ids().len(), n);
    }

    #[test]
    fn test_truncate_both_directions() {
        let mut right = content(5);
        right.truncate(3, Direction::Right);
        assert_eq!(right.ids(), &[10, 11, 12]);
        assert_parallel(&right);

        let mut left = content(5);
        left.truncate(2, Direction::Left);
        assert_eq!(left.ids(), &[13, 14]);
        assert_eq!(left.offsets(), &[(3, 4), (4, 5)]);
        assert_parallel(&left);
    }

    #[test]
    fn test_pad_left_marks_padding() {
        let mut e = content(2);
        e.pad(4, 0, 0, "[PAD]", Direction::Left);
        assert_eq!(e.ids(), &[0, 0, 10, 11]);
        assert_eq!(e.attention_mask(), &[0, 0, 1, 1]);
        assert_eq!(e.special_tokens_mask(), &[1, 1, 0, 0]);
        assert_eq!(e.word_ids()[0], None);
        assert_eq!(e.tokens()[1], "[PAD]");
        assert_parallel(&e);
    }

    #[test]
    fn test_special_and_append() {
        let mut e = Encoding::with_capacity(4);
        e.push_special(101, "[CLS]", 0);
        e.append(content(2), 0);
        e.push_special(102, "[SEP]", 0);
        assert_eq!(e.ids(), &[101, 10, 11, 102]);
        assert_eq!(e.special_tokens_mask(), &[1, 0, 0, 1]);
        assert_eq!(e.offsets()[0], (0, 0));
        assert_eq!(e.sequence_ids(), &[None, Some(0), Some(0), None]);
        assert_parallel(&e);
    }
}
