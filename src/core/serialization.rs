//! `tokenizer.json` description.
//!
//! The serde types here mirror the JSON layout one to one and are private;
//! [`from_json`] validates them and builds the runtime components. Anything
//! the engine cannot honor exactly is rejected with
//! [`ModelFormatError::Unsupported`] instead of being approximated, except
//! for a few knobs that only affect training or overflow handling, which are
//! ignored with a warning.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, warn};

use super::decoder::Decoder;
use super::encoding::Direction;
use super::error::ModelFormatError;
use super::merges::{parse_merge, MergeTable};
use super::model::{Bpe, Model, UnknownPolicy, WordLevel, WordPiece};
use super::normalizer::{BertNormalizer, Normalizer};
use super::post_processor::{
    PaddingParams, PaddingStrategy, Sequence, SpecialToken, Template, TemplatePiece,
    TruncationParams, TruncationStrategy,
};
use super::pre_tokenizer::{
    PreTokenizer, PrependScheme, Regex, RegexOptions, SplitBehavior, SplitPattern,
};
use super::tokenizer::{AddedToken, Tokenizer};
use super::vocab::{SpecialRole, TokenId, Vocab};

fn yes() -> bool {
    true
}

fn wordpiece_prefix() -> String {
    "##".to_string()
}

#[derive(Deserialize)]
struct TokenizerDesc {
    #[serde(default)]
    added_tokens: Vec<AddedTokenDesc>,
    normalizer: Option<NormalizerDesc>,
    pre_tokenizer: Option<PreTokenizerDesc>,
    model: ModelDesc,
    post_processor: Option<PostProcessorDesc>,
    decoder: Option<DecoderDesc>,
    truncation: Option<TruncationDesc>,
    padding: Option<PaddingDesc>,
}

#[derive(Deserialize)]
struct AddedTokenDesc {
    id: TokenId,
    content: String,
    #[serde(default)]
    special: bool,
}

#[derive(Deserialize)]
enum PatternDesc {
    String(String),
    Regex(String),
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum NormalizerDesc {
    BertNormalizer {
        #[serde(default = "yes")]
        clean_text: bool,
        #[serde(default = "yes")]
        handle_chinese_chars: bool,
        #[serde(default)]
        strip_accents: Option<bool>,
        #[serde(default = "yes")]
        lowercase: bool,
    },
    Lowercase,
    StripAccents,
    #[serde(rename = "NFD")]
    Nfd,
    #[serde(rename = "NFC")]
    Nfc,
    #[serde(rename = "NFKD")]
    Nfkd,
    #[serde(rename = "NFKC")]
    Nfkc,
    Replace {
        pattern: PatternDesc,
        content: String,
    },
    Prepend {
        prepend: String,
    },
    Strip {
        #[serde(default)]
        strip_left: bool,
        #[serde(default)]
        strip_right: bool,
    },
    Sequence {
        normalizers: Vec<NormalizerDesc>,
    },
}

impl NormalizerDesc {
    fn build(self) -> Result<Normalizer, ModelFormatError> {
        Ok(match self {
            NormalizerDesc::BertNormalizer {
                clean_text,
                handle_chinese_chars,
                strip_accents,
                lowercase,
            } => Normalizer::Bert(BertNormalizer {
                clean_text,
                handle_chinese_chars,
                strip_accents,
                lowercase,
            }),
            NormalizerDesc::Lowercase => Normalizer::Lowercase,
            NormalizerDesc::StripAccents => Normalizer::StripAccents,
            NormalizerDesc::Nfd => Normalizer::Nfd,
            NormalizerDesc::Nfc => Normalizer::Nfc,
            NormalizerDesc::Nfkd => Normalizer::Nfkd,
            NormalizerDesc::Nfkc => Normalizer::Nfkc,
            NormalizerDesc::Replace {
                pattern: PatternDesc::String(pattern),
                content,
            } => Normalizer::Replace { pattern, content },
            NormalizerDesc::Replace {
                pattern: PatternDesc::Regex(pattern),
                ..
            } => {
                return Err(ModelFormatError::Unsupported(format!(
                    "Replace normalizer with regex pattern {pattern:?}"
                )))
            }
            NormalizerDesc::Prepend { prepend } => Normalizer::Prepend(prepend),
            NormalizerDesc::Strip {
                strip_left,
                strip_right,
            } => Normalizer::Strip {
                left: strip_left,
                right: strip_right,
            },
            NormalizerDesc::Sequence { normalizers } => Normalizer::Sequence(
                normalizers
                    .into_iter()
                    .map(NormalizerDesc::build)
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum PreTokenizerDesc {
    BertPreTokenizer,
    Whitespace,
    WhitespaceSplit,
    Punctuation {
        #[serde(default = "isolated")]
        behavior: SplitBehavior,
    },
    Digits {
        #[serde(default)]
        individual_digits: bool,
    },
    ByteLevel {
        #[serde(default = "yes")]
        add_prefix_space: bool,
        #[serde(default = "yes")]
        use_regex: bool,
    },
    Split {
        pattern: PatternDesc,
        behavior: SplitBehavior,
        #[serde(default)]
        invert: bool,
    },
    Metaspace {
        #[serde(default = "metaspace_replacement")]
        replacement: char,
        prepend_scheme: Option<PrependScheme>,
        /// Older descriptions carry this flag instead of `prepend_scheme`.
        add_prefix_space: Option<bool>,
        #[serde(default = "yes")]
        split: bool,
    },
    Sequence {
        pretokenizers: Vec<PreTokenizerDesc>,
    },
}

fn isolated() -> SplitBehavior {
    SplitBehavior::Isolated
}

fn metaspace_replacement() -> char {
    '\u{2581}'
}

fn prepend_scheme(scheme: Option<PrependScheme>, add_prefix_space: Option<bool>) -> PrependScheme {
    match (scheme, add_prefix_space) {
        (Some(scheme), _) => scheme,
        (None, Some(false)) => PrependScheme::Never,
        (None, _) => PrependScheme::Always,
    }
}

impl PreTokenizerDesc {
    fn build(self, options: RegexOptions) -> Result<PreTokenizer, ModelFormatError> {
        Ok(match self {
            PreTokenizerDesc::BertPreTokenizer => PreTokenizer::Bert,
            PreTokenizerDesc::Whitespace => PreTokenizer::Whitespace,
            PreTokenizerDesc::WhitespaceSplit => PreTokenizer::WhitespaceSplit,
            PreTokenizerDesc::Punctuation { behavior } => PreTokenizer::Punctuation(behavior),
            PreTokenizerDesc::Digits { individual_digits } => {
                PreTokenizer::Digits { individual_digits }
            }
            PreTokenizerDesc::ByteLevel {
                add_prefix_space,
                use_regex: true,
            } => PreTokenizer::byte_level(add_prefix_space, options)?,
            PreTokenizerDesc::ByteLevel {
                add_prefix_space,
                use_regex: false,
            } => PreTokenizer::ByteLevel {
                add_prefix_space,
                regex: None,
            },
            PreTokenizerDesc::Split {
                pattern,
                behavior,
                invert,
            } => PreTokenizer::Split {
                pattern: match pattern {
                    PatternDesc::String(s) => SplitPattern::Literal(s),
                    PatternDesc::Regex(r) => SplitPattern::Regex(Regex::new(&r, options)?),
                },
                behavior,
                invert,
            },
            PreTokenizerDesc::Metaspace {
                replacement,
                prepend_scheme: scheme,
                add_prefix_space,
                split,
            } => PreTokenizer::Metaspace {
                replacement,
                prepend_scheme: prepend_scheme(scheme, add_prefix_space),
                split,
            },
            PreTokenizerDesc::Sequence { pretokenizers } => PreTokenizer::Sequence(
                pretokenizers
                    .into_iter()
                    .map(|p| p.build(options))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// A merge rule is either `"a b"` or `["a", "b"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum MergeDesc {
    Joined(String),
    Pair(String, String),
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ModelDesc {
    #[serde(rename = "BPE")]
    Bpe {
        vocab: FxHashMap<String, TokenId>,
        #[serde(default)]
        merges: Vec<MergeDesc>,
        #[serde(default)]
        dropout: Option<f32>,
        #[serde(default)]
        unk_token: Option<String>,
        #[serde(default)]
        continuing_subword_prefix: Option<String>,
        #[serde(default)]
        end_of_word_suffix: Option<String>,
        #[serde(default)]
        fuse_unk: bool,
        #[serde(default)]
        byte_fallback: bool,
        #[serde(default)]
        ignore_merges: bool,
        #[serde(default)]
        unknown_policy: Option<UnknownPolicy>,
    },
    WordPiece {
        vocab: FxHashMap<String, TokenId>,
        #[serde(default = "wordpiece_unk")]
        unk_token: String,
        #[serde(default = "wordpiece_prefix")]
        continuing_subword_prefix: String,
        #[serde(default = "max_input_chars_per_word")]
        max_input_chars_per_word: usize,
        #[serde(default)]
        unknown_policy: Option<UnknownPolicy>,
    },
    WordLevel {
        vocab: FxHashMap<String, TokenId>,
        #[serde(default)]
        unk_token: Option<String>,
    },
}

fn wordpiece_unk() -> String {
    "[UNK]".to_string()
}

fn max_input_chars_per_word() -> usize {
    100
}

impl ModelDesc {
    fn take_vocab(&mut self) -> FxHashMap<String, TokenId> {
        match self {
            ModelDesc::Bpe { vocab, .. }
            | ModelDesc::WordPiece { vocab, .. }
            | ModelDesc::WordLevel { vocab, .. } => std::mem::take(vocab),
        }
    }

    fn unk_token(&self) -> Option<&str> {
        match self {
            ModelDesc::Bpe { unk_token, .. } | ModelDesc::WordLevel { unk_token, .. } => {
                unk_token.as_deref()
            }
            ModelDesc::WordPiece { unk_token, .. } => Some(unk_token),
        }
    }

    /// Build the model over a vocabulary that already holds every token.
    fn build(self, vocab: &Vocab) -> Result<Model, ModelFormatError> {
        Ok(match self {
            ModelDesc::Bpe {
                merges,
                dropout,
                continuing_subword_prefix,
                end_of_word_suffix,
                fuse_unk,
                byte_fallback,
                ignore_merges,
                unknown_policy,
                ..
            } => {
                if dropout.is_some_and(|p| p > 0.0) {
                    warn!(?dropout, "BPE dropout is ignored; segmentation stays deterministic");
                }
                let rules = merges
                    .into_iter()
                    .map(|m| match m {
                        MergeDesc::Joined(rule) => parse_merge(&rule),
                        MergeDesc::Pair(left, right) => Ok((left, right)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let table =
                    MergeTable::from_rules(&rules, vocab, continuing_subword_prefix.as_deref())?;
                let mut bpe = Bpe::new(table);
                bpe.continuing_subword_prefix = continuing_subword_prefix;
                bpe.end_of_word_suffix = end_of_word_suffix;
                bpe.fuse_unk = fuse_unk;
                bpe.byte_fallback = byte_fallback;
                bpe.ignore_merges = ignore_merges;
                if let Some(policy) = unknown_policy {
                    bpe.unknown_policy = policy;
                }
                Model::Bpe(bpe)
            }
            ModelDesc::WordPiece {
                continuing_subword_prefix,
                max_input_chars_per_word,
                unknown_policy,
                ..
            } => {
                let mut wp = WordPiece {
                    continuing_subword_prefix,
                    max_input_chars_per_word,
                    ..WordPiece::default()
                };
                if let Some(policy) = unknown_policy {
                    wp.unknown_policy = policy;
                }
                Model::WordPiece(wp)
            }
            ModelDesc::WordLevel { .. } => Model::WordLevel(WordLevel),
        })
    }
}

#[derive(Deserialize)]
enum TemplatePieceDesc {
    Sequence { id: Sequence, type_id: u32 },
    SpecialToken { id: String, type_id: u32 },
}

/// Templates appear either as piece lists or as `"[CLS] $A [SEP]"` strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateDesc {
    Pieces(Vec<TemplatePieceDesc>),
    Text(String),
}

impl TemplateDesc {
    fn build(self) -> Result<Vec<TemplatePiece>, ModelFormatError> {
        match self {
            TemplateDesc::Pieces(pieces) => Ok(pieces
                .into_iter()
                .map(|p| match p {
                    TemplatePieceDesc::Sequence { id, type_id } => {
                        TemplatePiece::Sequence { id, type_id }
                    }
                    TemplatePieceDesc::SpecialToken { id, type_id } => {
                        TemplatePiece::SpecialToken { id, type_id }
                    }
                })
                .collect()),
            TemplateDesc::Text(text) => text.split_whitespace().map(TemplatePiece::parse).collect(),
        }
    }
}

#[derive(Deserialize)]
struct SpecialTokenDesc {
    ids: Vec<TokenId>,
    tokens: Vec<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum PostProcessorDesc {
    TemplateProcessing {
        single: TemplateDesc,
        #[serde(default)]
        pair: Option<TemplateDesc>,
        #[serde(default)]
        special_tokens: FxHashMap<String, SpecialTokenDesc>,
    },
    BertProcessing {
        sep: (String, TokenId),
        cls: (String, TokenId),
    },
    RobertaProcessing {
        sep: (String, TokenId),
        cls: (String, TokenId),
    },
    /// Only trims offsets, which are already exact here.
    ByteLevel,
    Sequence {
        processors: Vec<PostProcessorDesc>,
    },
}

impl PostProcessorDesc {
    /// `None` leaves the default template in place.
    fn build(self) -> Result<Option<Template>, ModelFormatError> {
        match self {
            PostProcessorDesc::TemplateProcessing {
                single,
                pair,
                special_tokens,
            } => {
                let specials = special_tokens
                    .into_iter()
                    .map(|(name, t)| {
                        if t.ids.len() != t.tokens.len() {
                            return Err(ModelFormatError::Parse(format!(
                                "special token {name:?} has {} ids but {} tokens",
                                t.ids.len(),
                                t.tokens.len()
                            )));
                        }
                        Ok((
                            name,
                            SpecialToken {
                                ids: t.ids,
                                tokens: t.tokens,
                            },
                        ))
                    })
                    .collect::<Result<FxHashMap<_, _>, _>>()?;
                let pair = pair.map(TemplateDesc::build).transpose()?;
                Template::new(single.build()?, pair, specials).map(Some)
            }
            PostProcessorDesc::BertProcessing { sep, cls } => {
                Ok(Some(Template::bert((cls.0.as_str(), cls.1), (sep.0.as_str(), sep.1))))
            }
            PostProcessorDesc::RobertaProcessing { sep, cls } => {
                Ok(Some(Template::roberta((cls.0.as_str(), cls.1), (sep.0.as_str(), sep.1))))
            }
            PostProcessorDesc::ByteLevel => Ok(None),
            PostProcessorDesc::Sequence { processors } => {
                let mut template = None;
                for processor in processors {
                    if let Some(t) = processor.build()? {
                        if template.is_some() {
                            return Err(ModelFormatError::Unsupported(
                                "more than one template post-processor in a sequence".to_string(),
                            ));
                        }
                        template = Some(t);
                    }
                }
                Ok(template)
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum DecoderDesc {
    WordPiece {
        #[serde(default = "wordpiece_prefix")]
        prefix: String,
        #[serde(default = "yes")]
        cleanup: bool,
    },
    ByteLevel,
    Metaspace {
        #[serde(default = "metaspace_replacement")]
        replacement: char,
        prepend_scheme: Option<PrependScheme>,
        add_prefix_space: Option<bool>,
    },
    #[serde(rename = "BPEDecoder")]
    Bpe {
        #[serde(default = "bpe_suffix")]
        suffix: String,
    },
    ByteFallback,
    Fuse,
    Replace {
        pattern: PatternDesc,
        content: String,
    },
    Strip {
        content: char,
        #[serde(default)]
        start: usize,
        #[serde(default)]
        stop: usize,
    },
    Sequence {
        decoders: Vec<DecoderDesc>,
    },
}

fn bpe_suffix() -> String {
    "</w>".to_string()
}

impl DecoderDesc {
    fn build(self) -> Result<Decoder, ModelFormatError> {
        Ok(match self {
            DecoderDesc::WordPiece { prefix, cleanup } => Decoder::WordPiece { prefix, cleanup },
            DecoderDesc::ByteLevel => Decoder::ByteLevel,
            DecoderDesc::Metaspace {
                replacement,
                prepend_scheme: scheme,
                add_prefix_space,
            } => Decoder::Metaspace {
                replacement,
                prepend_scheme: prepend_scheme(scheme, add_prefix_space),
            },
            DecoderDesc::Bpe { suffix } => Decoder::Bpe { suffix },
            DecoderDesc::ByteFallback => Decoder::ByteFallback,
            DecoderDesc::Fuse => Decoder::Fuse,
            DecoderDesc::Replace {
                pattern: PatternDesc::String(pattern),
                content,
            } => Decoder::Replace { pattern, content },
            DecoderDesc::Replace {
                pattern: PatternDesc::Regex(pattern),
                ..
            } => {
                return Err(ModelFormatError::Unsupported(format!(
                    "Replace decoder with regex pattern {pattern:?}"
                )))
            }
            DecoderDesc::Strip {
                content,
                start,
                stop,
            } => Decoder::Strip {
                content,
                start,
                stop,
            },
            DecoderDesc::Sequence { decoders } => Decoder::Sequence(
                decoders
                    .into_iter()
                    .map(DecoderDesc::build)
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

#[derive(Deserialize)]
struct TruncationDesc {
    max_length: usize,
    #[serde(default)]
    strategy: TruncationStrategy,
    #[serde(default)]
    direction: Direction,
    #[serde(default)]
    stride: usize,
}

#[derive(Deserialize)]
enum PaddingStrategyDesc {
    BatchLongest,
    MaxLength,
    Fixed(usize),
}

#[derive(Deserialize)]
struct PaddingDesc {
    #[serde(default = "batch_longest")]
    strategy: PaddingStrategyDesc,
    #[serde(default)]
    direction: Direction,
    #[serde(default)]
    pad_to_multiple_of: Option<usize>,
    #[serde(default)]
    pad_id: TokenId,
    #[serde(default)]
    pad_type_id: u32,
    #[serde(default = "pad_token")]
    pad_token: String,
}

fn batch_longest() -> PaddingStrategyDesc {
    PaddingStrategyDesc::BatchLongest
}

fn pad_token() -> String {
    "[PAD]".to_string()
}

impl From<PaddingDesc> for PaddingParams {
    fn from(desc: PaddingDesc) -> Self {
        Self {
            strategy: match desc.strategy {
                PaddingStrategyDesc::BatchLongest => PaddingStrategy::BatchLongest,
                PaddingStrategyDesc::MaxLength => PaddingStrategy::MaxLength,
                PaddingStrategyDesc::Fixed(n) => PaddingStrategy::Fixed(n),
            },
            direction: desc.direction,
            pad_to_multiple_of: desc.pad_to_multiple_of,
            pad_id: desc.pad_id,
            pad_type_id: desc.pad_type_id,
            pad_token: desc.pad_token,
        }
    }
}

/// Build a tokenizer from a `tokenizer.json` description.
///
/// Loading is all or nothing: any malformed or inconsistent part fails the
/// whole load.
pub fn from_json(data: &[u8]) -> Result<Tokenizer, ModelFormatError> {
    let mut desc: TokenizerDesc = serde_json::from_slice(data)?;
    let options = RegexOptions::default();

    // Added tokens may live outside the model vocabulary (and the unknown
    // token may be one of them), so the vocabulary is completed first.
    let mut vocab = Vocab::from_entries(desc.model.take_vocab())?;
    vocab.extend(desc.added_tokens.iter().map(|t| (t.content.clone(), t.id)))?;
    if let Some(unk) = desc.model.unk_token() {
        let id = vocab
            .lookup_id(unk)
            .ok_or_else(|| ModelFormatError::TokenOutOfVocabulary(unk.to_string()))?;
        vocab.assign_role(SpecialRole::Unknown, id);
    }
    let model = desc.model.build(&vocab)?;

    let normalizer = desc.normalizer.map(NormalizerDesc::build).transpose()?;
    let pre_tokenizer = desc.pre_tokenizer.map(|p| p.build(options)).transpose()?;
    let template = match desc.post_processor {
        Some(p) => p.build()?.unwrap_or_default(),
        None => Template::default(),
    };
    let missing = template.missing_from(&vocab);
    if !missing.is_empty() {
        warn!(?missing, "template special tokens disagree with the vocabulary");
    }

    let truncation = desc.truncation.map(|t| {
        if t.stride > 0 {
            warn!(stride = t.stride, "truncation stride is ignored; overflow is not kept");
        }
        TruncationParams {
            max_length: t.max_length,
            strategy: t.strategy,
            direction: t.direction,
        }
    });
    let padding = desc.padding.map(PaddingParams::from);

    let added: Vec<AddedToken> = desc
        .added_tokens
        .into_iter()
        .map(|t| AddedToken {
            content: t.content,
            id: t.id,
            special: t.special,
        })
        .collect();
    let added_count = added.len();

    let mut tokenizer = Tokenizer::new(vocab, model)
        .with_normalizer(normalizer)
        .with_pre_tokenizer(pre_tokenizer)
        .with_template(template)
        .with_truncation(truncation)
        .with_padding(padding)
        .with_added_tokens(added)?;
    let decoder = match desc.decoder {
        Some(d) => Some(d.build()?),
        None => tokenizer.inferred_decoder(),
    };
    tokenizer = tokenizer.with_decoder(decoder);

    debug!(
        model = tokenizer.model().kind(),
        vocab_size = tokenizer.vocab_size(),
        added_tokens = added_count,
        decoder = ?tokenizer.decoder(),
        "loaded tokenizer description"
    );
    Ok(tokenizer)
}
