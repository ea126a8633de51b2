//! Encoding assembly: special-token templates, truncation and padding.
//!
//! A [`Template`] describes where special tokens go around one or two
//! encoded sequences and which type id each part receives:
//!
//! ```text
//! single: [CLS] $A [SEP]
//! pair:   [CLS] $A [SEP] $B:1 [SEP]:1
//! ```
//!
//! Truncation runs on the content sequences before the template is applied,
//! with a budget of `max_length` minus the special tokens the template adds,
//! so special tokens are never truncated.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::trace;

use super::encoding::{Direction, Encoding};
use super::error::{ModelFormatError, TokenizerError};
use super::vocab::{TokenId, Vocab};

/// Which input sequence a template slot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Sequence {
    A,
    B,
}

/// One slot of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePiece {
    Sequence { id: Sequence, type_id: u32 },
    SpecialToken { id: String, type_id: u32 },
}

impl TemplatePiece {
    /// Parse `$A`, `$B:1`, `[CLS]` or `[SEP]:1`.
    pub fn parse(piece: &str) -> Result<Self, ModelFormatError> {
        let (name, type_id) = match piece.rsplit_once(':') {
            Some((name, type_id)) if !name.is_empty() => {
                let type_id = type_id
                    .parse()
                    .map_err(|_| {
                        ModelFormatError::Parse(format!("Invalid template piece: {piece}"))
                    })?;
                (name, type_id)
            }
            _ => (piece, 0),
        };
        match name {
            "$" | "$A" | "$a" => Ok(TemplatePiece::Sequence {
                id: Sequence::A,
                type_id,
            }),
            "$B" | "$b" => Ok(TemplatePiece::Sequence {
                id: Sequence::B,
                type_id,
            }),
            name if name.starts_with('$') => {
                Err(ModelFormatError::Parse(format!("Invalid template piece: {piece}")))
            }
            name => Ok(TemplatePiece::SpecialToken {
                id: name.to_string(),
                type_id,
            }),
        }
    }
}

/// A special token of a template; may expand to several ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialToken {
    pub ids: Vec<TokenId>,
    pub tokens: Vec<String>,
}

impl SpecialToken {
    pub fn single(token: &str, id: TokenId) -> Self {
        Self {
            ids: vec![id],
            tokens: vec![token.to_string()],
        }
    }
}

/// Special-token layout for single and pair inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    single: Vec<TemplatePiece>,
    /// `None`: pair inputs are rejected.
    pair: Option<Vec<TemplatePiece>>,
    special_tokens: FxHashMap<String, SpecialToken>,
}

impl Default for Template {
    /// `$A` and `$A $B:1`, without special tokens.
    fn default() -> Self {
        Self {
            single: vec![TemplatePiece::Sequence {
                id: Sequence::A,
                type_id: 0,
            }],
            pair: Some(vec![
                TemplatePiece::Sequence {
                    id: Sequence::A,
                    type_id: 0,
                },
                TemplatePiece::Sequence {
                    id: Sequence::B,
                    type_id: 1,
                },
            ]),
            special_tokens: FxHashMap::default(),
        }
    }
}

impl Template {
    /// Build a template and check that every special token it names is defined.
    pub fn new(
        single: Vec<TemplatePiece>,
        pair: Option<Vec<TemplatePiece>>,
        special_tokens: FxHashMap<String, SpecialToken>,
    ) -> Result<Self, ModelFormatError> {
        let template = Self {
            single,
            pair,
            special_tokens,
        };
        let pieces = template.single.iter().chain(template.pair.iter().flatten());
        for piece in pieces {
            if let TemplatePiece::SpecialToken { id, .. } = piece {
                if !template.special_tokens.contains_key(id) {
                    return Err(ModelFormatError::TokenOutOfVocabulary(id.clone()));
                }
            }
        }
        Ok(template)
    }

    /// Parse whitespace-separated template strings.
    pub fn parse(
        single: &str,
        pair: Option<&str>,
        special_tokens: FxHashMap<String, SpecialToken>,
    ) -> Result<Self, ModelFormatError> {
        let parse_all = |s: &str| -> Result<Vec<TemplatePiece>, ModelFormatError> {
            s.split_whitespace().map(TemplatePiece::parse).collect()
        };
        let pair = pair.map(parse_all).transpose()?;
        Self::new(parse_all(single)?, pair, special_tokens)
    }

    /// `[CLS] $A [SEP]` and `[CLS] $A [SEP] $B:1 [SEP]:1`.
    pub fn bert(cls: (&str, TokenId), sep: (&str, TokenId)) -> Self {
        let special = |token: &str, type_id| TemplatePiece::SpecialToken {
            id: token.to_string(),
            type_id,
        };
        let seq = |id, type_id| TemplatePiece::Sequence { id, type_id };
        Self {
            single: vec![special(cls.0, 0), seq(Sequence::A, 0), special(sep.0, 0)],
            pair: Some(vec![
                special(cls.0, 0),
                seq(Sequence::A, 0),
                special(sep.0, 0),
                seq(Sequence::B, 1),
                special(sep.0, 1),
            ]),
            special_tokens: special_map(&[cls, sep]),
        }
    }

    /// `<s> $A </s>` and `<s> $A </s> </s> $B </s>`, all type id 0.
    pub fn roberta(cls: (&str, TokenId), sep: (&str, TokenId)) -> Self {
        let special = |token: &str| TemplatePiece::SpecialToken {
            id: token.to_string(),
            type_id: 0,
        };
        let seq = |id| TemplatePiece::Sequence { id, type_id: 0 };
        Self {
            single: vec![special(cls.0), seq(Sequence::A), special(sep.0)],
            pair: Some(vec![
                special(cls.0),
                seq(Sequence::A),
                special(sep.0),
                special(sep.0),
                seq(Sequence::B),
                special(sep.0),
            ]),
            special_tokens: special_map(&[cls, sep]),
        }
    }

    pub fn has_pair(&self) -> bool {
        self.pair.is_some()
    }

    /// Number of ids the template adds around the content.
    pub fn added_tokens(&self, is_pair: bool) -> usize {
        let pieces = if is_pair {
            self.pair.as_deref().unwrap_or(&[])
        } else {
            &self.single
        };
        pieces
            .iter()
            .map(|piece| match piece {
                TemplatePiece::SpecialToken { id, .. } => {
                    self.special_tokens.get(id).map_or(0, |t| t.ids.len())
                }
                TemplatePiece::Sequence { .. } => 0,
            })
            .sum()
    }

    /// Lay out `a` (and `b`) according to the template.
    ///
    /// Without `add_special_tokens` only the sequence slots are used, so the
    /// type ids still follow the template.
    pub fn apply(
        &self,
        a: Encoding,
        b: Option<Encoding>,
        add_special_tokens: bool,
    ) -> Result<Encoding, TokenizerError> {
        let pieces = match (&b, &self.pair) {
            (None, _) => &self.single,
            (Some(_), Some(pair)) => pair,
            (Some(_), None) => {
                return Err(TokenizerError::Encoding(
                    "the post-processor has no pair template".to_string(),
                ))
            }
        };
        let n_sequences = if b.is_some() { 2 } else { 1 };
        let capacity =
            a.len() + b.as_ref().map_or(0, Encoding::len) + self.added_tokens(b.is_some());
        let mut out = Encoding::with_capacity(capacity);
        let mut a = Some(a);
        let mut b = b;

        for piece in pieces {
            match piece {
                TemplatePiece::Sequence { id, type_id } => {
                    let seq = match id {
                        Sequence::A => a.take(),
                        Sequence::B => b.take(),
                    };
                    if let Some(seq) = seq {
                        out.append(seq, *type_id);
                    }
                }
                TemplatePiece::SpecialToken { id, type_id } if add_special_tokens => {
                    if let Some(special) = self.special_tokens.get(id) {
                        for (tid, token) in special.ids.iter().zip(&special.tokens) {
                            out.push_special(*tid, token, *type_id);
                        }
                    }
                }
                TemplatePiece::SpecialToken { .. } => {}
            }
        }
        out.set_n_sequences(n_sequences);
        Ok(out)
    }

    /// Special tokens referenced by the template that are missing from `vocab`.
    pub fn missing_from(&self, vocab: &Vocab) -> Vec<String> {
        self.special_tokens
            .values()
            .flat_map(|t| t.ids.iter().zip(&t.tokens))
            .filter(|(&id, token)| vocab.lookup_text(id) != Some(token.as_str()))
            .map(|(_, token)| token.clone())
            .collect()
    }
}

fn special_map(tokens: &[(&str, TokenId)]) -> FxHashMap<String, SpecialToken> {
    tokens
        .iter()
        .map(|&(token, id)| (token.to_string(), SpecialToken::single(token, id)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TruncationStrategy {
    /// Remove from the longer sequence first.
    #[default]
    LongestFirst,
    OnlyFirst,
    OnlySecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncationParams {
    pub max_length: usize,
    pub strategy: TruncationStrategy,
    pub direction: Direction,
}

impl TruncationParams {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            strategy: TruncationStrategy::default(),
            direction: Direction::Right,
        }
    }

    /// Fit `a` and `b` into `max_length - added` tokens.
    pub fn apply(
        &self,
        a: &mut Encoding,
        b: Option<&mut Encoding>,
        added: usize,
    ) -> Result<(), TokenizerError> {
        let budget = self.max_length.checked_sub(added).ok_or_else(|| {
            TokenizerError::Configuration(format!(
                "max_length {} is smaller than the {added} special tokens the template adds",
                self.max_length
            ))
        })?;

        let total = a.len() + b.as_ref().map_or(0, |b| b.len());
        if total <= budget {
            return Ok(());
        }
        trace!(total, budget, strategy = ?self.strategy, "truncating");

        match (self.strategy, b) {
            (TruncationStrategy::LongestFirst, Some(b)) => {
                // The shorter side keeps up to half the budget; ties favor A.
                let short_keep = a.len().min(b.len()).min(budget / 2);
                let long_keep = budget - short_keep;
                let (a_keep, b_keep) = if a.len() >= b.len() {
                    (long_keep, short_keep)
                } else {
                    (short_keep, long_keep)
                };
                a.truncate(a_keep, self.direction);
                b.truncate(b_keep, self.direction);
            }
            (TruncationStrategy::LongestFirst | TruncationStrategy::OnlyFirst, None) => {
                a.truncate(budget, self.direction);
            }
            (TruncationStrategy::OnlyFirst, Some(_)) => {
                truncate_one(a, total - budget, self.direction, "first")?;
            }
            (TruncationStrategy::OnlySecond, Some(b)) => {
                truncate_one(b, total - budget, self.direction, "second")?;
            }
            (TruncationStrategy::OnlySecond, None) => {
                return Err(TokenizerError::Encoding(
                    "OnlySecond truncation needs a second sequence".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn truncate_one(
    seq: &mut Encoding,
    to_remove: usize,
    direction: Direction,
    which: &str,
) -> Result<(), TokenizerError> {
    if seq.len() <= to_remove {
        return Err(TokenizerError::Encoding(format!(
            "the {which} sequence ({} tokens) is too short to remove {to_remove} tokens",
            seq.len()
        )));
    }
    seq.truncate(seq.len() - to_remove, direction);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingStrategy {
    /// Pad to the truncation `max_length`.
    MaxLength,
    Fixed(usize),
    /// Pad to the longest encoding of a batch.
    BatchLongest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddingParams {
    pub strategy: PaddingStrategy,
    pub direction: Direction,
    pub pad_to_multiple_of: Option<usize>,
    pub pad_id: TokenId,
    pub pad_type_id: u32,
    pub pad_token: String,
}

impl Default for PaddingParams {
    fn default() -> Self {
        Self {
            strategy: PaddingStrategy::BatchLongest,
            direction: Direction::Right,
            pad_to_multiple_of: None,
            pad_id: 0,
            pad_type_id: 0,
            pad_token: "[PAD]".to_string(),
        }
    }
}

impl PaddingParams {
    /// Pad `encoding` to `target`, rounded up to `pad_to_multiple_of`.
    pub fn apply(&self, encoding: &mut Encoding, target: usize) {
        let target = match self.pad_to_multiple_of {
            Some(m) if m > 0 && target % m != 0 => target + m - target % m,
            _ => target,
        };
        encoding.pad(
            target,
            self.pad_id,
            self.pad_type_id,
            &self.pad_token,
            self.direction,
        );
    }
}
