//! Segmentation models.
//!
//! A model turns one pre-tokenized chunk into vocabulary ids. Pieces report
//! byte ranges of the chunk text; the caller maps them back to original
//! offsets through the chunk alignments.
//!
//! Out-of-vocabulary text never fails. It becomes the unknown token, either
//! per piece or for the whole chunk depending on [`UnknownPolicy`], and is
//! dropped when the vocabulary has no unknown token.

use serde::Deserialize;
use tracing::trace;

use super::bpe::{merge_symbols, Symbol};
use super::merges::MergeTable;
use super::vocab::{SpecialRole, TokenId, Vocab};

/// How out-of-vocabulary text maps to the unknown token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum UnknownPolicy {
    /// One unknown token per piece that cannot be resolved.
    PerPiece,
    /// The whole chunk collapses to a single unknown token.
    WholeChunk,
}

/// A segment of a chunk: `start..end` bytes of the chunk text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub id: TokenId,
    pub start: usize,
    pub end: usize,
}

/// Byte-pair encoding options.
#[derive(Debug, Clone)]
pub struct Bpe {
    pub merges: MergeTable,
    pub continuing_subword_prefix: Option<String>,
    pub end_of_word_suffix: Option<String>,
    /// Spell unknown characters as `<0xNN>` byte tokens when available.
    pub byte_fallback: bool,
    /// Fuse consecutive unknown symbols into one.
    pub fuse_unk: bool,
    /// Emit a chunk that is itself a vocabulary entry without merging.
    pub ignore_merges: bool,
    pub unknown_policy: UnknownPolicy,
}

impl Bpe {
    pub fn new(merges: MergeTable) -> Self {
        Self {
            merges,
            continuing_subword_prefix: None,
            end_of_word_suffix: None,
            byte_fallback: false,
            fuse_unk: false,
            ignore_merges: false,
            unknown_policy: UnknownPolicy::PerPiece,
        }
    }

    fn segment(&self, text: &str, vocab: &Vocab) -> Vec<Piece> {
        if self.ignore_merges {
            if let Some(id) = vocab.lookup_id(text) {
                return vec![Piece {
                    id,
                    start: 0,
                    end: text.len(),
                }];
            }
        }

        let unk = vocab.special_token(SpecialRole::Unknown);
        let mut symbols: Vec<Symbol> = Vec::with_capacity(text.len());
        let mut lookup = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((start, ch)) = chars.next() {
            let end = start + ch.len_utf8();
            lookup.clear();
            if start > 0 {
                if let Some(prefix) = &self.continuing_subword_prefix {
                    lookup.push_str(prefix);
                }
            }
            lookup.push(ch);
            if chars.peek().is_none() {
                if let Some(suffix) = &self.end_of_word_suffix {
                    lookup.push_str(suffix);
                }
            }

            if let Some(id) = vocab.lookup_id(&lookup) {
                symbols.push(Symbol {
                    id,
                    start,
                    end,
                    unknown: false,
                });
                continue;
            }

            if self.byte_fallback {
                let mut buf = [0u8; 4];
                let bytes: Option<Vec<TokenId>> = ch
                    .encode_utf8(&mut buf)
                    .bytes()
                    .map(|b| vocab.lookup_id(&format!("<0x{b:02X}>")))
                    .collect();
                if let Some(bytes) = bytes {
                    symbols.extend(bytes.into_iter().map(|id| Symbol {
                        id,
                        start,
                        end,
                        unknown: false,
                    }));
                    continue;
                }
            }

            match unk {
                Some(id) => match symbols.last_mut() {
                    Some(last) if self.fuse_unk && last.unknown => last.end = end,
                    _ => symbols.push(Symbol {
                        id,
                        start,
                        end,
                        unknown: true,
                    }),
                },
                None => trace!(piece = %ch, "dropping out-of-vocabulary character"),
            }
        }

        let symbols = merge_symbols(symbols, &self.merges);
        if self.unknown_policy == UnknownPolicy::WholeChunk && symbols.iter().any(|s| s.unknown) {
            return whole_chunk_unknown(text, unk);
        }
        symbols
            .into_iter()
            .map(|s| Piece {
                id: s.id,
                start: s.start,
                end: s.end,
            })
            .collect()
    }
}

/// Greedy longest-match-first subword model.
#[derive(Debug, Clone)]
pub struct WordPiece {
    pub continuing_subword_prefix: String,
    /// Longer chunks are unknown as a whole.
    pub max_input_chars_per_word: usize,
    pub unknown_policy: UnknownPolicy,
}

impl Default for WordPiece {
    fn default() -> Self {
        Self {
            continuing_subword_prefix: "##".to_string(),
            max_input_chars_per_word: 100,
            unknown_policy: UnknownPolicy::WholeChunk,
        }
    }
}

impl WordPiece {
    fn segment(&self, text: &str, vocab: &Vocab) -> Vec<Piece> {
        let unk = vocab.special_token(SpecialRole::Unknown);
        if text.chars().count() > self.max_input_chars_per_word {
            return whole_chunk_unknown(text, unk);
        }

        let mut pieces = Vec::new();
        let prefix_len = self.continuing_subword_prefix.len();
        let mut candidate = String::with_capacity(text.len() + prefix_len);
        let mut start = 0;

        while start < text.len() {
            let mut found = None;
            // Candidate ends, longest first.
            let ends = text[start..]
                .char_indices()
                .skip(1)
                .map(|(i, _)| start + i)
                .chain(std::iter::once(text.len()))
                .collect::<Vec<_>>();
            for &end in ends.iter().rev() {
                candidate.clear();
                if start > 0 {
                    candidate.push_str(&self.continuing_subword_prefix);
                }
                candidate.push_str(&text[start..end]);
                if let Some(id) = vocab.lookup_id(&candidate) {
                    found = Some((id, end));
                    break;
                }
            }

            match found {
                Some((id, end)) => {
                    pieces.push(Piece { id, start, end });
                    start = end;
                }
                None if self.unknown_policy == UnknownPolicy::WholeChunk => {
                    return whole_chunk_unknown(text, unk);
                }
                None => {
                    // Skip one character and resume matching after it.
                    let end = ends[0];
                    match unk {
                        Some(id) => pieces.push(Piece { id, start, end }),
                        None => {
                            trace!(piece = &text[start..end], "dropping out-of-vocabulary piece")
                        }
                    }
                    start = end;
                }
            }
        }
        pieces
    }
}

/// Whole-chunk vocabulary lookup.
#[derive(Debug, Clone, Default)]
pub struct WordLevel;

impl WordLevel {
    fn segment(&self, text: &str, vocab: &Vocab) -> Vec<Piece> {
        match vocab.lookup_id(text) {
            Some(id) => vec![Piece {
                id,
                start: 0,
                end: text.len(),
            }],
            None => whole_chunk_unknown(text, vocab.special_token(SpecialRole::Unknown)),
        }
    }
}

/// The segmentation model of a tokenizer.
#[derive(Debug, Clone)]
pub enum Model {
    Bpe(Bpe),
    WordPiece(WordPiece),
    WordLevel(WordLevel),
}

impl Model {
    /// Segment one chunk into pieces that cover it in order.
    ///
    /// Pieces may be missing where out-of-vocabulary text was dropped.
    pub fn segment(&self, text: &str, vocab: &Vocab) -> Vec<Piece> {
        if text.is_empty() {
            return Vec::new();
        }
        match self {
            Model::Bpe(bpe) => bpe.segment(text, vocab),
            Model::WordPiece(wp) => wp.segment(text, vocab),
            Model::WordLevel(wl) => wl.segment(text, vocab),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Model::Bpe(_) => "BPE",
            Model::WordPiece(_) => "WordPiece",
            Model::WordLevel(_) => "WordLevel",
        }
    }
}

fn whole_chunk_unknown(text: &str, unk: Option<TokenId>) -> Vec<Piece> {
    match unk {
        Some(id) => vec![Piece {
            id,
            start: 0,
            end: text.len(),
        }],
        None => {
            trace!(chunk = text, "dropping out-of-vocabulary chunk");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(tokens: &[&str]) -> Vocab {
        let mut vocab =
            Vocab::from_ordered(tokens.iter().map(|t| t.to_string()).collect()).unwrap();
        if let Some(id) = vocab.lookup_id("[UNK]").or(vocab.lookup_id("<unk>")) {
            vocab.assign_role(SpecialRole::Unknown, id);
        }
        vocab
    }

    fn rules(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|&(l, r)| (l.to_string(), r.to_string()))
            .collect()
    }

    fn spans(pieces: &[Piece]) -> Vec<(TokenId, usize, usize)> {
        pieces.iter().map(|p| (p.id, p.start, p.end)).collect()
    }

    #[test]
    fn test_wordpiece_unaffable() {
        let v = vocab(&["un", "##aff", "##able", "[UNK]"]);
        let model = Model::WordPiece(WordPiece::default());
        let pieces = model.segment("unaffable", &v);
        assert_eq!(spans(&pieces), vec![(0, 0, 2), (1, 2, 5), (2, 5, 9)]);
    }

    #[test]
    fn test_wordpiece_unknown_whole_chunk() {
        let v = vocab(&["un", "##aff", "##able", "[UNK]"]);
        let model = Model::WordPiece(WordPiece::default());
        assert_eq!(spans(&model.segment("unxable", &v)), vec![(3, 0, 7)]);
    }

    #[test]
    fn test_wordpiece_unknown_per_piece() {
        let v = vocab(&["un", "##able", "[UNK]"]);
        let model = Model::WordPiece(WordPiece {
            unknown_policy: UnknownPolicy::PerPiece,
            ..WordPiece::default()
        });
        // "x" is unknown; matching resumes at "able", which takes the prefix.
        assert_eq!(
            spans(&model.segment("unxable", &v)),
            vec![(0, 0, 2), (2, 2, 3), (1, 3, 7)]
        );
    }

    #[test]
    fn test_wordpiece_max_chars() {
        let v = vocab(&["a", "[UNK]"]);
        let model = Model::WordPiece(WordPiece {
            max_input_chars_per_word: 3,
            ..WordPiece::default()
        });
        assert_eq!(spans(&model.segment("aaaa", &v)), vec![(1, 0, 4)]);
    }

    #[test]
    fn test_bpe_merges_and_unknown() {
        let v = vocab(&["<unk>", "h", "e", "l", "o", "he", "ll", "hell", "hello"]);
        let merges = MergeTable::from_rules(
            &rules(&[("h", "e"), ("l", "l"), ("he", "ll"), ("hell", "o")]),
            &v,
            None,
        )
        .unwrap();
        let model = Model::Bpe(Bpe::new(merges));
        assert_eq!(spans(&model.segment("hello", &v)), vec![(8, 0, 5)]);
        assert_eq!(
            spans(&model.segment("hexo", &v)),
            vec![(5, 0, 2), (0, 2, 3), (4, 3, 4)]
        );
    }

    #[test]
    fn test_bpe_fuse_unk_and_whole_chunk() {
        let v = vocab(&["<unk>", "a"]);
        let mut bpe = Bpe::new(MergeTable::default());
        bpe.fuse_unk = true;
        let model = Model::Bpe(bpe.clone());
        assert_eq!(spans(&model.segment("axyz", &v)), vec![(1, 0, 1), (0, 1, 4)]);

        bpe.unknown_policy = UnknownPolicy::WholeChunk;
        let model = Model::Bpe(bpe);
        assert_eq!(spans(&model.segment("ax", &v)), vec![(0, 0, 2)]);
    }

    #[test]
    fn test_bpe_byte_fallback() {
        let v = vocab(&["<unk>", "a", "<0xC3>", "<0xA9>"]);
        let mut bpe = Bpe::new(MergeTable::default());
        bpe.byte_fallback = true;
        let pieces = Model::Bpe(bpe).segment("aé", &v);
        assert_eq!(spans(&pieces), vec![(1, 0, 1), (2, 1, 3), (3, 1, 3)]);
    }

    #[test]
    fn test_bpe_prefix_and_suffix_lookup() {
        let v = vocab(&["a", "##b", "c</w>", "##c</w>"]);
        let mut bpe = Bpe::new(MergeTable::default());
        bpe.continuing_subword_prefix = Some("##".to_string());
        bpe.end_of_word_suffix = Some("</w>".to_string());
        let model = Model::Bpe(bpe);
        assert_eq!(
            spans(&model.segment("abc", &v)),
            vec![(0, 0, 1), (1, 1, 2), (3, 2, 3)]
        );
        assert_eq!(spans(&model.segment("c", &v)), vec![(2, 0, 1)]);
    }

    #[test]
    fn test_missing_unknown_token_drops_pieces() {
        let v = vocab(&["a"]);
        let model = Model::Bpe(Bpe::new(MergeTable::default()));
        assert_eq!(spans(&model.segment("axa", &v)), vec![(0, 0, 1), (0, 2, 3)]);
        assert!(Model::WordLevel(WordLevel).segment("zz", &v).is_empty());
    }

    #[test]
    fn test_ignore_merges_uses_whole_token() {
        let v = vocab(&["a", "b", "ab"]);
        let mut bpe = Bpe::new(MergeTable::default());
        bpe.ignore_merges = true;
        assert_eq!(spans(&Model::Bpe(bpe).segment("ab", &v)), vec![(2, 0, 2)]);
    }
}
