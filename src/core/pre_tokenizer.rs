//! Pre-tokenizers: split normalized text into chunks.
//!
//! Every chunk keeps its alignment to the original input, so offsets survive
//! splitting. Regex-driven splitting uses `regexr` by default (pure Rust, JIT
//! where the platform allows) or PCRE2 when the `pcre2` feature is enabled.

use std::fmt;

use regexr::{Regex as RegexrRegex, RegexBuilder};
use serde::Deserialize;
use unicode_normalization::char::is_combining_mark;

#[cfg(feature = "pcre2")]
use pcre2::bytes::Regex as Pcre2Regex;

use super::byte_level::byte_to_char;
use super::chunk::Chunk;
use super::error::ModelFormatError;
use super::normalizer::is_whitespace;

/// GPT-2 / RoBERTa split pattern; the ByteLevel default.
pub const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Default regex pattern for cl100k_base (GPT-4, GPT-3.5-turbo)
pub const CL100K_BASE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Default regex pattern for o200k_base (GPT-4o)
pub const O200K_BASE_PATTERN: &str = r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// Regex engine settings shared by every pattern of a tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegexOptions {
    pub jit: bool,
    pub pcre2: bool,
}

impl Default for RegexOptions {
    fn default() -> Self {
        Self {
            jit: true,
            pcre2: false,
        }
    }
}

/// Regex backend enum for switching between regexr (default) and PCRE2 (optional)
enum RegexBackend {
    Regexr(Box<RegexrRegex>),
    #[cfg(feature = "pcre2")]
    Pcre2(Pcre2Regex),
}

impl RegexBackend {
    fn compile(pattern: &str, options: RegexOptions) -> Result<Self, ModelFormatError> {
        #[cfg(feature = "pcre2")]
        if options.pcre2 {
            let mut builder = pcre2::bytes::RegexBuilder::new();
            if options.jit {
                builder.jit_if_available(true);
            }
            builder.utf(true);
            builder.ucp(true);
            return Ok(RegexBackend::Pcre2(builder.build(pattern)?));
        }
        let regex = RegexBuilder::new(pattern).jit(options.jit).build()?;
        Ok(RegexBackend::Regexr(Box::new(regex)))
    }

    /// Find all matches in the given text, returning (start, end) byte offsets
    fn find_iter(&self, text: &str) -> Vec<(usize, usize)> {
        match self {
            RegexBackend::Regexr(regex) => regex
                .find_iter(text)
                .map(|m| (m.start(), m.end()))
                .collect(),
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(regex) => regex
                .find_iter(text.as_bytes())
                .filter_map(|m| m.ok())
                .map(|m| (m.start(), m.end()))
                .collect(),
        }
    }
}

/// A compiled split pattern that remembers its source for recompilation.
pub struct Regex {
    pattern: String,
    backend: RegexBackend,
}

impl Regex {
    pub fn new(pattern: &str, options: RegexOptions) -> Result<Self, ModelFormatError> {
        Ok(Self {
            pattern: pattern.to_string(),
            backend: RegexBackend::compile(pattern, options)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Non-empty match ranges, in order.
    pub fn find_iter(&self, text: &str) -> Vec<(usize, usize)> {
        let mut matches = self.backend.find_iter(text);
        matches.retain(|(s, e)| s < e);
        matches
    }

    fn recompile(&mut self, options: RegexOptions) -> Result<(), ModelFormatError> {
        self.backend = RegexBackend::compile(&self.pattern, options)?;
        Ok(())
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Regex").field(&self.pattern).finish()
    }
}

/// What to do with the delimiter matched by a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SplitBehavior {
    /// Drop the delimiter.
    Removed,
    /// Keep the delimiter as its own chunk.
    Isolated,
    /// Attach the delimiter to the chunk before it.
    MergedWithPrevious,
    /// Attach the delimiter to the chunk after it.
    MergedWithNext,
    /// Merge runs of adjacent delimiters into one chunk.
    Contiguous,
}

/// Pattern of a [`PreTokenizer::Split`].
#[derive(Debug)]
pub enum SplitPattern {
    Literal(String),
    Regex(Regex),
}

impl SplitPattern {
    fn find_iter(&self, text: &str) -> Vec<(usize, usize)> {
        match self {
            SplitPattern::Literal(s) if s.is_empty() => Vec::new(),
            SplitPattern::Literal(s) => text
                .match_indices(s.as_str())
                .map(|(at, m)| (at, at + m.len()))
                .collect(),
            SplitPattern::Regex(regex) => regex.find_iter(text),
        }
    }
}

/// When Metaspace inserts its replacement character in front of the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrependScheme {
    Always,
    /// Only for the chunk starting at original offset 0.
    First,
    Never,
}

/// A pre-tokenization step.
#[derive(Debug)]
pub enum PreTokenizer {
    /// Runs of word characters and runs of other non-space characters.
    Whitespace,
    /// Split on whitespace only.
    WhitespaceSplit,
    /// Split on whitespace and isolate every punctuation character.
    Bert,
    Punctuation(SplitBehavior),
    Digits { individual_digits: bool },
    /// Regex split followed by the byte-to-character alphabet.
    ByteLevel {
        add_prefix_space: bool,
        regex: Option<Regex>,
    },
    Split {
        pattern: SplitPattern,
        behavior: SplitBehavior,
        invert: bool,
    },
    /// Replace spaces with `replacement` and split in front of it.
    Metaspace {
        replacement: char,
        prepend_scheme: PrependScheme,
        split: bool,
    },
    Sequence(Vec<PreTokenizer>),
}

impl PreTokenizer {
    /// ByteLevel with the GPT-2 split pattern.
    pub fn byte_level(
        add_prefix_space: bool,
        options: RegexOptions,
    ) -> Result<Self, ModelFormatError> {
        Ok(PreTokenizer::ByteLevel {
            add_prefix_space,
            regex: Some(Regex::new(GPT2_PATTERN, options)?),
        })
    }

    /// Split `chunk` into ordered sub-chunks.
    pub fn pre_tokenize(&self, chunk: Chunk) -> Vec<Chunk> {
        if chunk.is_empty() {
            return Vec::new();
        }
        match self {
            PreTokenizer::Whitespace => word_runs(&chunk),
            PreTokenizer::WhitespaceSplit => {
                let spaces = char_matches(chunk.as_str(), is_whitespace);
                split(&chunk, &spaces, SplitBehavior::Removed)
            }
            PreTokenizer::Bert => {
                let spaces = char_matches(chunk.as_str(), is_whitespace);
                split(&chunk, &spaces, SplitBehavior::Removed)
                    .into_iter()
                    .flat_map(|piece| {
                        let marks = char_matches(piece.as_str(), is_punctuation);
                        split(&piece, &marks, SplitBehavior::Isolated)
                    })
                    .collect()
            }
            PreTokenizer::Punctuation(behavior) => {
                let marks = char_matches(chunk.as_str(), is_punctuation);
                split(&chunk, &marks, *behavior)
            }
            PreTokenizer::Digits { individual_digits } => {
                let digits = char_matches(chunk.as_str(), char::is_numeric);
                let behavior = if *individual_digits {
                    SplitBehavior::Isolated
                } else {
                    SplitBehavior::Contiguous
                };
                split(&chunk, &digits, behavior)
            }
            PreTokenizer::ByteLevel {
                add_prefix_space,
                regex,
            } => {
                let mut chunk = chunk;
                if *add_prefix_space && !chunk.as_str().starts_with(' ') {
                    chunk.prepend(" ");
                }
                let pieces = match regex {
                    Some(regex) => {
                        let matches = regex.find_iter(chunk.as_str());
                        split(&chunk, &matches, SplitBehavior::Isolated)
                    }
                    None => vec![chunk],
                };
                pieces
                    .into_iter()
                    .map(|mut piece| {
                        piece.map_bytes(byte_to_char);
                        piece
                    })
                    .collect()
            }
            PreTokenizer::Split {
                pattern,
                behavior,
                invert,
            } => {
                let matches = pattern.find_iter(chunk.as_str());
                if *invert {
                    let gaps = complement(&matches, chunk.len());
                    split(&chunk, &gaps, *behavior)
                } else {
                    split(&chunk, &matches, *behavior)
                }
            }
            PreTokenizer::Metaspace {
                replacement,
                prepend_scheme,
                split: split_on_replacement,
            } => {
                let mut chunk = chunk;
                let mut buf = [0u8; 4];
                let replacement: &str = replacement.encode_utf8(&mut buf);
                chunk.replace(" ", replacement);
                let prepend = match prepend_scheme {
                    PrependScheme::Always => true,
                    PrependScheme::First => chunk.offsets().0 == 0,
                    PrependScheme::Never => false,
                };
                if prepend && !chunk.as_str().starts_with(replacement) {
                    chunk.prepend(replacement);
                }
                if *split_on_replacement {
                    let marks =
                        SplitPattern::Literal(replacement.to_string()).find_iter(chunk.as_str());
                    split(&chunk, &marks, SplitBehavior::MergedWithNext)
                } else {
                    vec![chunk]
                }
            }
            PreTokenizer::Sequence(steps) => {
                let mut chunks = vec![chunk];
                for step in steps {
                    chunks = chunks
                        .into_iter()
                        .flat_map(|c| step.pre_tokenize(c))
                        .collect();
                }
                chunks
            }
        }
    }

    /// Recompile every regex under new engine settings.
    pub fn recompile(&mut self, options: RegexOptions) -> Result<(), ModelFormatError> {
        match self {
            PreTokenizer::ByteLevel {
                regex: Some(regex), ..
            } => regex.recompile(options),
            PreTokenizer::Split {
                pattern: SplitPattern::Regex(regex),
                ..
            } => regex.recompile(options),
            PreTokenizer::Sequence(steps) => {
                for step in steps {
                    step.recompile(options)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether any step maps text into the byte-level alphabet.
    pub fn uses_byte_level(&self) -> bool {
        match self {
            PreTokenizer::ByteLevel { .. } => true,
            PreTokenizer::Sequence(steps) => steps.iter().any(PreTokenizer::uses_byte_level),
            _ => false,
        }
    }

    /// Replacement character and scheme of the first Metaspace step, if any.
    pub fn metaspace(&self) -> Option<(char, PrependScheme)> {
        match self {
            PreTokenizer::Metaspace {
                replacement,
                prepend_scheme,
                ..
            } => Some((*replacement, *prepend_scheme)),
            PreTokenizer::Sequence(steps) => steps.iter().find_map(PreTokenizer::metaspace),
            _ => None,
        }
    }
}

/// Punctuation as BERT defines it: ASCII symbols plus the Unicode
/// punctuation blocks.
pub(crate) fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '\u{00A1}'
                | '\u{00A7}'
                | '\u{00AB}'
                | '\u{00B6}'
                | '\u{00B7}'
                | '\u{00BB}'
                | '\u{00BF}'
                | '\u{2010}'..='\u{2027}'
                | '\u{2030}'..='\u{205E}'
                | '\u{3001}'..='\u{3003}'
                | '\u{3008}'..='\u{3011}'
                | '\u{3014}'..='\u{301F}'
                | '\u{FF01}'..='\u{FF0F}'
                | '\u{FF1A}'..='\u{FF20}'
                | '\u{FF3B}'..='\u{FF40}'
                | '\u{FF5B}'..='\u{FF65}'
        )
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || is_combining_mark(c)
}

/// One match per character satisfying `pred`.
fn char_matches(text: &str, pred: impl Fn(char) -> bool) -> Vec<(usize, usize)> {
    text.char_indices()
        .filter(|&(_, c)| pred(c))
        .map(|(i, c)| (i, i + c.len_utf8()))
        .collect()
}

/// Ranges of `0..len` not covered by `matches`.
fn complement(matches: &[(usize, usize)], len: usize) -> Vec<(usize, usize)> {
    let mut gaps = Vec::with_capacity(matches.len() + 1);
    let mut last = 0;
    for &(start, end) in matches {
        if start > last {
            gaps.push((last, start));
        }
        last = end;
    }
    if last < len {
        gaps.push((last, len));
    }
    gaps
}

/// `\w+|[^\w\s]+`: word runs and symbol runs, whitespace dropped.
fn word_runs(chunk: &Chunk) -> Vec<Chunk> {
    #[derive(PartialEq, Clone, Copy)]
    enum Class {
        Word,
        Symbol,
        Space,
    }
    let classify = |c: char| {
        if is_whitespace(c) {
            Class::Space
        } else if is_word_char(c) {
            Class::Word
        } else {
            Class::Symbol
        }
    };

    let mut out = Vec::new();
    let mut run: Option<(usize, Class)> = None;
    for (i, c) in chunk.as_str().char_indices() {
        let class = classify(c);
        match run {
            Some((_, current)) if current == class => {}
            Some((start, current)) => {
                if current != Class::Space {
                    out.push(chunk.slice(start, i));
                }
                run = Some((i, class));
            }
            None => run = Some((i, class)),
        }
    }
    if let Some((start, class)) = run {
        if class != Class::Space {
            out.push(chunk.slice(start, chunk.len()));
        }
    }
    out
}

/// Split `chunk` around the ordered, non-overlapping `matches`.
fn split(chunk: &Chunk, matches: &[(usize, usize)], behavior: SplitBehavior) -> Vec<Chunk> {
    if matches.is_empty() {
        return vec![chunk.clone()];
    }

    // (start, end, is_match) covering the whole text.
    let mut segments = Vec::with_capacity(matches.len() * 2 + 1);
    let mut last = 0;
    for &(start, end) in matches {
        if start > last {
            segments.push((last, start, false));
        }
        segments.push((start, end, true));
        last = end;
    }
    if last < chunk.len() {
        segments.push((last, chunk.len(), false));
    }

    let ranges: Vec<(usize, usize)> = match behavior {
        SplitBehavior::Removed => segments
            .iter()
            .filter(|s| !s.2)
            .map(|&(s, e, _)| (s, e))
            .collect(),
        SplitBehavior::Isolated => segments.iter().map(|&(s, e, _)| (s, e)).collect(),
        SplitBehavior::MergedWithPrevious => {
            let mut out: Vec<(usize, usize)> = Vec::new();
            let mut previous_match = false;
            for &(s, e, is_match) in &segments {
                match out.last_mut() {
                    Some(last) if is_match && !previous_match => last.1 = e,
                    _ => out.push((s, e)),
                }
                previous_match = is_match;
            }
            out
        }
        SplitBehavior::MergedWithNext => {
            let mut out: Vec<(usize, usize)> = Vec::new();
            let mut next_match = false;
            for &(s, e, is_match) in segments.iter().rev() {
                match out.last_mut() {
                    Some(last) if is_match && !next_match => last.0 = s,
                    _ => out.push((s, e)),
                }
                next_match = is_match;
            }
            out.reverse();
            out
        }
        SplitBehavior::Contiguous => {
            let mut out: Vec<(usize, usize)> = Vec::new();
            let mut previous_match = false;
            for &(s, e, is_match) in &segments {
                match out.last_mut() {
                    Some(last) if is_match && previous_match => last.1 = e,
                    _ => out.push((s, e)),
                }
                previous_match = is_match;
            }
            out
        }
    };

    ranges
        .into_iter()
        .map(|(s, e)| chunk.slice(s, e))
        .collect()
}
