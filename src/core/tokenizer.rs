use std::fmt;

use aho_corasick::{AhoCorasick, MatchKind};
use rayon::prelude::*;
use tracing::debug;

use super::chunk::Chunk;
use super::decoder::Decoder;
use super::encoding::{Encoding, Token};
use super::error::{ModelFormatError, TokenizerError};
use super::merges::MergeTable;
use super::model::{Bpe, Model};
use super::normalizer::Normalizer;
use super::post_processor::{PaddingParams, PaddingStrategy, Template, TruncationParams};
use super::pre_tokenizer::{PreTokenizer, Regex, RegexOptions};
use super::vocab::{load_tiktoken_bpe, SpecialRole, TokenId, Vocab};

/// A token matched verbatim in the input before any other processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedToken {
    pub content: String,
    pub id: TokenId,
    /// Special tokens are flagged in the vocabulary and skipped by
    /// `decode(.., skip_special_tokens = true)`.
    pub special: bool,
}

impl AddedToken {
    pub fn special(content: &str, id: TokenId) -> Self {
        Self {
            content: content.to_string(),
            id,
            special: true,
        }
    }
}

/// Aho-Corasick automaton over the added tokens.
struct AddedMatcher {
    automaton: AhoCorasick,
    ids: Vec<TokenId>,
}

enum Segment {
    Added(TokenId, usize, usize),
    Text(usize, usize),
}

/// Subword tokenizer: normalizer, pre-tokenizer, model, template and decoder
/// over one immutable vocabulary.
///
/// # Regex Backend
///
/// Regex pre-tokenizers compile with `regexr` (pure Rust, JIT where the
/// platform allows) by default. To use PCRE2 instead, enable the `pcre2`
/// feature and call `.pcre2(true)`:
///
/// ```ignore
/// let tokenizer = Tokenizer::from_file("tokenizer.json")?.pcre2(true)?;
/// ```
///
/// # Concurrency
///
/// Every encode and decode is a pure function of `&self` and the input. The
/// tokenizer holds no locks and no caches, so one instance can serve any
/// number of threads; [`Tokenizer::encode_batch`] parallelizes across inputs
/// with Rayon.
pub struct Tokenizer {
    vocab: Vocab,
    model: Model,
    normalizer: Option<Normalizer>,
    pre_tokenizer: Option<PreTokenizer>,
    template: Template,
    decoder: Option<Decoder>,
    added: Option<AddedMatcher>,
    truncation: Option<TruncationParams>,
    padding: Option<PaddingParams>,
    regex_options: RegexOptions,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("model", &self.model.kind())
            .field("vocab_size", &self.vocab.len())
            .field("added_tokens", &self.added.as_ref().map_or(0, |a| a.ids.len()))
            .finish()
    }
}

impl Tokenizer {
    /// Tokenizer with only a model: no normalizer, no pre-tokenizer, no
    /// special tokens, and a decoder that joins tokens with spaces.
    pub fn new(vocab: Vocab, model: Model) -> Self {
        Self {
            vocab,
            model,
            normalizer: None,
            pre_tokenizer: None,
            template: Template::default(),
            decoder: None,
            added: None,
            truncation: None,
            padding: None,
            regex_options: RegexOptions::default(),
        }
    }

    /// Load a serialized `tokenizer.json` description from disk.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ModelFormatError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Load a serialized `tokenizer.json` description.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ModelFormatError> {
        super::serialization::from_json(data)
    }

    /// Create a byte-level BPE tokenizer from a tiktoken rank file.
    ///
    /// `special_tokens` must take the ids directly after the ranks.
    pub fn from_tiktoken(
        data: &[u8],
        pattern: &str,
        special_tokens: &[(&str, TokenId)],
    ) -> Result<Self, ModelFormatError> {
        let vocab = Vocab::from_entries(load_tiktoken_bpe(data)?)?;
        let merges = MergeTable::from_ranked_vocab(&vocab);

        let mut bpe = Bpe::new(merges);
        bpe.ignore_merges = true;
        let pre_tokenizer = PreTokenizer::ByteLevel {
            add_prefix_space: false,
            regex: Some(Regex::new(pattern, RegexOptions::default())?),
        };

        let added: Vec<AddedToken> = special_tokens
            .iter()
            .map(|&(content, id)| AddedToken::special(content, id))
            .collect();
        let merges = bpe.merges.len();

        let tokenizer = Self::new(vocab, Model::Bpe(bpe))
            .with_pre_tokenizer(Some(pre_tokenizer))
            .with_decoder(Some(Decoder::ByteLevel))
            .with_added_tokens(added)?;
        debug!(
            vocab_size = tokenizer.vocab_size(),
            merges,
            special_tokens = special_tokens.len(),
            "loaded tiktoken ranks"
        );
        Ok(tokenizer)
    }

    pub fn with_normalizer(mut self, normalizer: Option<Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_pre_tokenizer(mut self, pre_tokenizer: Option<PreTokenizer>) -> Self {
        self.pre_tokenizer = pre_tokenizer;
        self
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.template = template;
        self
    }

    /// Set the decoder; `None` joins tokens with single spaces.
    pub fn with_decoder(mut self, decoder: Option<Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Register tokens that are matched verbatim in the input.
    ///
    /// Tokens missing from the vocabulary extend it and must take the ids
    /// directly after it.
    pub fn with_added_tokens(mut self, tokens: Vec<AddedToken>) -> Result<Self, ModelFormatError> {
        if tokens.is_empty() {
            return Ok(self);
        }
        self.vocab
            .extend(tokens.iter().map(|t| (t.content.clone(), t.id)))?;
        for token in tokens.iter().filter(|t| t.special) {
            let roles = SpecialRole::from_conventional_name(&token.content);
            self.vocab.mark_special(token.id, None);
            for &role in roles {
                if self.vocab.special_token(role).is_none() {
                    self.vocab.mark_special(token.id, Some(role));
                }
            }
        }

        let mut patterns: Vec<&str> = Vec::with_capacity(tokens.len());
        let mut ids = Vec::with_capacity(tokens.len());
        for token in tokens.iter().filter(|t| !t.content.is_empty()) {
            patterns.push(&token.content);
            ids.push(token.id);
        }
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)?;
        self.added = Some(AddedMatcher { automaton, ids });
        Ok(self)
    }

    /// Truncate every encoding to at most `max_length` tokens.
    pub fn with_truncation(mut self, truncation: Option<TruncationParams>) -> Self {
        self.truncation = truncation;
        self
    }

    pub fn with_padding(mut self, padding: Option<PaddingParams>) -> Self {
        self.padding = padding;
        self
    }

    /// Switch to PCRE2 regex backend.
    ///
    /// # Errors
    /// Returns an error if `pcre2` feature is not enabled or regex compilation fails.
    pub fn pcre2(mut self, use_pcre2: bool) -> Result<Self, TokenizerError> {
        if use_pcre2 && !cfg!(feature = "pcre2") {
            return Err(TokenizerError::Pcre2NotEnabled);
        }
        self.regex_options.pcre2 = use_pcre2;
        self.recompile()?;
        Ok(self)
    }

    /// Enable or disable JIT compilation for the regex backend.
    pub fn jit(mut self, use_jit: bool) -> Result<Self, TokenizerError> {
        self.regex_options.jit = use_jit;
        self.recompile()?;
        Ok(self)
    }

    fn recompile(&mut self) -> Result<(), ModelFormatError> {
        match self.pre_tokenizer.as_mut() {
            Some(pre) => pre.recompile(self.regex_options),
            None => Ok(()),
        }
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn decoder(&self) -> Option<&Decoder> {
        self.decoder.as_ref()
    }

    pub fn truncation(&self) -> Option<&TruncationParams> {
        self.truncation.as_ref()
    }

    pub fn padding(&self) -> Option<&PaddingParams> {
        self.padding.as_ref()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.vocab.lookup_id(token)
    }

    pub fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.vocab.lookup_text(id)
    }

    /// Decoder the description would imply if it named none.
    pub fn inferred_decoder(&self) -> Option<Decoder> {
        if let Some(pre) = &self.pre_tokenizer {
            if pre.uses_byte_level() {
                return Some(Decoder::ByteLevel);
            }
            if let Some((replacement, prepend_scheme)) = pre.metaspace() {
                return Some(Decoder::Metaspace {
                    replacement,
                    prepend_scheme,
                });
            }
        }
        match &self.model {
            Model::WordPiece(wp) => Some(Decoder::WordPiece {
                prefix: wp.continuing_subword_prefix.clone(),
                cleanup: true,
            }),
            Model::Bpe(Bpe {
                end_of_word_suffix: Some(suffix),
                ..
            }) => Some(Decoder::Bpe {
                suffix: suffix.clone(),
            }),
            _ => None,
        }
    }

    /// Encode one sequence, or a pair packed into one encoding.
    pub fn encode(
        &self,
        text: &str,
        pair: Option<&str>,
        add_special_tokens: bool,
    ) -> Result<Encoding, TokenizerError> {
        self.check_options(pair.is_some(), add_special_tokens)?;
        let mut encoding = self.encode_unpadded(text, pair, add_special_tokens)?;
        if let Some(padding) = &self.padding {
            let target = self.padding_target(padding, encoding.len());
            padding.apply(&mut encoding, target);
        }
        Ok(encoding)
    }

    /// Encode many inputs in parallel.
    ///
    /// With [`PaddingStrategy::BatchLongest`], every encoding is padded to
    /// the longest one in the batch.
    pub fn encode_batch(
        &self,
        inputs: &[(&str, Option<&str>)],
        add_special_tokens: bool,
    ) -> Result<Vec<Encoding>, TokenizerError> {
        for (_, pair) in inputs {
            self.check_options(pair.is_some(), add_special_tokens)?;
        }
        let mut encodings = inputs
            .par_iter()
            .map(|&(text, pair)| self.encode_unpadded(text, pair, add_special_tokens))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(padding) = &self.padding {
            let longest = encodings.iter().map(Encoding::len).max().unwrap_or(0);
            let target = self.padding_target(padding, longest);
            encodings
                .par_iter_mut()
                .for_each(|encoding| padding.apply(encoding, target));
        }
        Ok(encodings)
    }

    /// Decode ids into text; ids outside the vocabulary are skipped.
    pub fn decode(&self, ids: &[TokenId], skip_special_tokens: bool) -> String {
        let tokens: Vec<String> = ids
            .iter()
            .filter(|&&id| !(skip_special_tokens && self.vocab.is_special(id)))
            .filter_map(|&id| self.vocab.lookup_text(id))
            .map(str::to_string)
            .collect();
        match &self.decoder {
            Some(decoder) => decoder.decode(tokens),
            None => tokens.join(" "),
        }
    }

    pub fn decode_batch(&self, sequences: &[&[TokenId]], skip_special_tokens: bool) -> Vec<String> {
        sequences
            .par_iter()
            .map(|ids| self.decode(ids, skip_special_tokens))
            .collect()
    }

    /// Reject option combinations before any text is processed.
    fn check_options(&self, is_pair: bool, add_special_tokens: bool) -> Result<(), TokenizerError> {
        if is_pair && !self.template.has_pair() {
            return Err(TokenizerError::Encoding(
                "a pair input was given but the post-processor has no pair template".to_string(),
            ));
        }
        if let Some(truncation) = &self.truncation {
            let added = self.added_tokens(is_pair, add_special_tokens);
            if truncation.max_length < added {
                return Err(TokenizerError::Configuration(format!(
                    "max_length {} is smaller than the {added} special tokens the template adds",
                    truncation.max_length
                )));
            }
        }
        if let Some(PaddingParams {
            strategy: PaddingStrategy::MaxLength,
            ..
        }) = &self.padding
        {
            if self.truncation.is_none() {
                return Err(TokenizerError::Configuration(
                    "MaxLength padding requires truncation".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn added_tokens(&self, is_pair: bool, add_special_tokens: bool) -> usize {
        if add_special_tokens {
            self.template.added_tokens(is_pair)
        } else {
            0
        }
    }

    fn padding_target(&self, padding: &PaddingParams, longest: usize) -> usize {
        match padding.strategy {
            PaddingStrategy::MaxLength => self.truncation.map_or(longest, |t| t.max_length),
            PaddingStrategy::Fixed(n) => n,
            PaddingStrategy::BatchLongest => longest,
        }
    }

    fn encode_unpadded(
        &self,
        text: &str,
        pair: Option<&str>,
        add_special_tokens: bool,
    ) -> Result<Encoding, TokenizerError> {
        let mut a = self.encode_sequence(text, 0);
        let mut b = pair.map(|p| self.encode_sequence(p, 1));
        if let Some(truncation) = &self.truncation {
            let added = self.added_tokens(b.is_some(), add_special_tokens);
            truncation.apply(&mut a, b.as_mut(), added)?;
        }
        self.template.apply(a, b, add_special_tokens)
    }

    /// Content tokens of one sequence, before truncation and templating.
    fn encode_sequence(&self, text: &str, sequence_id: usize) -> Encoding {
        let mut tokens = Vec::new();
        let mut word: u32 = 0;

        for segment in self.split_added(text) {
            match segment {
                Segment::Added(id, start, end) => {
                    tokens.push(Token {
                        id,
                        value: self.token_value(id),
                        offsets: (start, end),
                        word: Some(word),
                    });
                    word += 1;
                }
                Segment::Text(start, end) => {
                    let mut chunk = Chunk::from_original(&text[start..end], start);
                    if let Some(normalizer) = &self.normalizer {
                        normalizer.normalize(&mut chunk);
                    }
                    let chunks = match &self.pre_tokenizer {
                        Some(pre) => pre.pre_tokenize(chunk),
                        None if chunk.is_empty() => Vec::new(),
                        None => vec![chunk],
                    };
                    for chunk in chunks {
                        for piece in self.model.segment(chunk.as_str(), &self.vocab) {
                            tokens.push(Token {
                                id: piece.id,
                                value: self.token_value(piece.id),
                                offsets: chunk.original_range(piece.start, piece.end),
                                word: Some(word),
                            });
                        }
                        word += 1;
                    }
                }
            }
        }

        Encoding::from_tokens(tokens, sequence_id, 0)
    }

    fn token_value(&self, id: TokenId) -> String {
        self.vocab.lookup_text(id).unwrap_or_default().to_string()
    }

    /// Split around added tokens found in `text`.
    fn split_added(&self, text: &str) -> Vec<Segment> {
        let Some(added) = &self.added else {
            return vec![Segment::Text(0, text.len())];
        };

        let mut segments = Vec::new();
        let mut last_end = 0;
        for m in added.automaton.find_iter(text) {
            if m.start() > last_end {
                segments.push(Segment::Text(last_end, m.start()));
            }
            segments.push(Segment::Added(
                added.ids[m.pattern().as_usize()],
                m.start(),
                m.end(),
            ));
            last_end = m.end();
        }
        if last_end < text.len() {
            segments.push(Segment::Text(last_end, text.len()));
        }
        segments
    }
}
