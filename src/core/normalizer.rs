//! Text normalizers.
//!
//! Normalizers rewrite a [`Chunk`] in place before pre-tokenization. Every
//! rewrite goes through the chunk's alignment-preserving primitives, so the
//! offsets reported for the final tokens still point into the caller's
//! original text.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::chunk::Chunk;

/// Options of the BERT text normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BertNormalizer {
    /// Drop control characters and map every whitespace to a plain space.
    pub clean_text: bool,
    /// Surround CJK ideographs with spaces so they split into single chunks.
    pub handle_chinese_chars: bool,
    /// `None` follows `lowercase`.
    pub strip_accents: Option<bool>,
    pub lowercase: bool,
}

impl Default for BertNormalizer {
    fn default() -> Self {
        Self {
            clean_text: true,
            handle_chinese_chars: true,
            strip_accents: None,
            lowercase: true,
        }
    }
}

/// A normalization step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalizer {
    Bert(BertNormalizer),
    Lowercase,
    StripAccents,
    Nfd,
    Nfc,
    Nfkd,
    Nfkc,
    /// Replace every occurrence of a literal pattern.
    Replace { pattern: String, content: String },
    /// Prefix non-empty text.
    Prepend(String),
    /// Trim whitespace on either side.
    Strip { left: bool, right: bool },
    Sequence(Vec<Normalizer>),
}

impl Normalizer {
    pub fn normalize(&self, chunk: &mut Chunk) {
        match self {
            Normalizer::Bert(options) => bert_normalize(options, chunk),
            Normalizer::Lowercase => chunk.map_chars(|c, out| out.extend(c.to_lowercase())),
            Normalizer::StripAccents => strip_accents(chunk),
            Normalizer::Nfd => chunk.map_clusters(|s, out| out.extend(s.nfd())),
            Normalizer::Nfc => chunk.map_clusters(|s, out| out.extend(s.nfc())),
            Normalizer::Nfkd => chunk.map_clusters(|s, out| out.extend(s.nfkd())),
            Normalizer::Nfkc => chunk.map_clusters(|s, out| out.extend(s.nfkc())),
            Normalizer::Replace { pattern, content } => chunk.replace(pattern, content),
            Normalizer::Prepend(prefix) => {
                if !chunk.is_empty() {
                    chunk.prepend(prefix);
                }
            }
            Normalizer::Strip { left, right } => strip(chunk, *left, *right),
            Normalizer::Sequence(steps) => {
                for step in steps {
                    step.normalize(chunk);
                }
            }
        }
    }

    /// Normalize a standalone string; offsets are discarded.
    pub fn normalize_str(&self, text: &str) -> String {
        let mut chunk = Chunk::from_original(text, 0);
        self.normalize(&mut chunk);
        chunk.as_str().to_string()
    }
}

fn bert_normalize(options: &BertNormalizer, chunk: &mut Chunk) {
    if options.clean_text {
        chunk.map_chars(|c, out| {
            if c == '\0' || c == char::REPLACEMENT_CHARACTER || is_control(c) {
                return;
            }
            out.push(if is_whitespace(c) { ' ' } else { c });
        });
    }
    if options.handle_chinese_chars {
        chunk.map_chars(|c, out| {
            if is_chinese_char(c) {
                out.push(' ');
                out.push(c);
                out.push(' ');
            } else {
                out.push(c);
            }
        });
    }
    if options.strip_accents.unwrap_or(options.lowercase) {
        strip_accents(chunk);
    }
    if options.lowercase {
        chunk.map_chars(|c, out| out.extend(c.to_lowercase()));
    }
}

/// Decompose, then drop combining marks.
fn strip_accents(chunk: &mut Chunk) {
    chunk.map_clusters(|s, out| out.extend(s.nfd().filter(|&c| !is_combining_mark(c))));
}

fn strip(chunk: &mut Chunk, left: bool, right: bool) {
    let text = chunk.as_str();
    let start = if left {
        text.len() - text.trim_start().len()
    } else {
        0
    };
    let end = if right {
        text.trim_end().len()
    } else {
        text.len()
    };
    if start >= end {
        *chunk = chunk.slice(0, 0);
    } else if start > 0 || end < text.len() {
        *chunk = chunk.slice(start, end);
    }
}

pub(crate) fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r') || c.is_whitespace()
}

/// Control and format characters, excluding the whitespace controls.
pub(crate) fn is_control(c: char) -> bool {
    if matches!(c, '\t' | '\n' | '\r') {
        return false;
    }
    c.is_control()
        || matches!(
            c,
            '\u{00AD}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{FEFF}'
        )
}

/// CJK Unified Ideographs and their extensions.
pub(crate) fn is_chinese_char(c: char) -> bool {
    matches!(
        c as u32,
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2B73F
            | 0x2B740..=0x2B81F
            | 0x2B820..=0x2CEAF
            | 0xF900..=0xFAFF
            | 0x2F800..=0x2FA1F
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_keeps_offsets() {
        let mut chunk = Chunk::from_original("HeLLo", 0);
        Normalizer::Lowercase.normalize(&mut chunk);
        assert_eq!(chunk.as_str(), "hello");
        assert_eq!(chunk.original_range(1, 3), (1, 3));
    }

    #[test]
    fn test_strip_accents_maps_back_to_precomposed_char() {
        // "é" is two bytes in the original and one byte after stripping.
        let mut chunk = Chunk::from_original("café", 0);
        Normalizer::StripAccents.normalize(&mut chunk);
        assert_eq!(chunk.as_str(), "cafe");
        assert_eq!(chunk.original_range(3, 4), (3, 5));
    }

    #[test]
    fn test_nfc_composes_within_cluster() {
        let mut chunk = Chunk::from_original("e\u{301}x", 0);
        Normalizer::Nfc.normalize(&mut chunk);
        assert_eq!(chunk.as_str(), "éx");
        assert_eq!(chunk.original_range(0, 2), (0, 3));
        assert_eq!(chunk.original_range(2, 3), (3, 4));
    }

    #[test]
    fn test_nfkc_expands_ligature() {
        assert_eq!(Normalizer::Nfkc.normalize_str("\u{FB01}ne"), "fine");
    }

    #[test]
    fn test_bert_normalizer_defaults() {
        let normalizer = Normalizer::Bert(BertNormalizer::default());
        let mut chunk = Chunk::from_original("Héllo\u{0}\tW中", 0);
        normalizer.normalize(&mut chunk);
        assert_eq!(chunk.as_str(), "hello w 中 ");
        // The ideograph keeps its own three-byte original range.
        let at = chunk.as_str().find('中').unwrap();
        assert_eq!(chunk.original_range(at, at + 3), (9, 12));
    }

    #[test]
    fn test_bert_normalizer_keeps_accents_when_cased() {
        let normalizer = Normalizer::Bert(BertNormalizer {
            lowercase: false,
            ..BertNormalizer::default()
        });
        assert_eq!(normalizer.normalize_str("Héllo"), "Héllo");
    }

    #[test]
    fn test_replace_and_prepend() {
        let normalizer = Normalizer::Sequence(vec![
            Normalizer::Prepend("\u{2581}".to_string()),
            Normalizer::Replace {
                pattern: " ".to_string(),
                content: "\u{2581}".to_string(),
            },
        ]);
        let mut chunk = Chunk::from_original("a b", 0);
        normalizer.normalize(&mut chunk);
        assert_eq!(chunk.as_str(), "\u{2581}a\u{2581}b");
        assert_eq!(chunk.original_range(0, 3), (0, 0));
        assert_eq!(chunk.original_range(4, 7), (1, 2));
        assert_eq!(Normalizer::Prepend("x".into()).normalize_str(""), "");
    }

    #[test]
    fn test_strip_both_sides() {
        let mut chunk = Chunk::from_original("  ab ", 0);
        Normalizer::Strip {
            left: true,
            right: true,
        }
        .normalize(&mut chunk);
        assert_eq!(chunk.as_str(), "ab");
        assert_eq!(chunk.offsets(), (2, 4));
    }
}
