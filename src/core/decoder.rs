//! Decoders: undo the spacing conventions of a model when turning tokens
//! back into text.
//!
//! Each decoder rewrites the token strings in a chain; the final text is the
//! concatenation of the chain output.

use super::byte_level::char_to_byte;
use super::pre_tokenizer::PrependScheme;

/// A decoding step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoder {
    /// Glue `prefix`-marked continuations to the previous token and put a
    /// space before every other token.
    WordPiece { prefix: String, cleanup: bool },
    /// Map the byte-level alphabet back to bytes; invalid UTF-8 becomes U+FFFD.
    ByteLevel,
    /// Turn the replacement character back into spaces.
    Metaspace {
        replacement: char,
        prepend_scheme: PrependScheme,
    },
    /// Turn the end-of-word suffix into a space.
    Bpe { suffix: String },
    /// Reassemble `<0xNN>` byte tokens.
    ByteFallback,
    /// Concatenate everything into one token.
    Fuse,
    Replace { pattern: String, content: String },
    /// Remove up to `start` leading and `stop` trailing `content` characters
    /// from every token.
    Strip { content: char, start: usize, stop: usize },
    Sequence(Vec<Decoder>),
}

impl Decoder {
    pub fn decode(&self, tokens: Vec<String>) -> String {
        self.decode_chain(tokens).concat()
    }

    pub fn decode_chain(&self, tokens: Vec<String>) -> Vec<String> {
        match self {
            Decoder::WordPiece { prefix, cleanup } => tokens
                .into_iter()
                .enumerate()
                .map(|(i, token)| {
                    let token = if i == 0 {
                        token
                    } else if let Some(rest) = token.strip_prefix(prefix.as_str()) {
                        rest.to_string()
                    } else {
                        format!(" {token}")
                    };
                    if *cleanup {
                        cleanup_spaces(&token)
                    } else {
                        token
                    }
                })
                .collect(),
            Decoder::ByteLevel => {
                let mut bytes = Vec::new();
                for ch in tokens.iter().flat_map(|t| t.chars()) {
                    match char_to_byte(ch) {
                        Some(b) => bytes.push(b),
                        None => {
                            let mut buf = [0u8; 4];
                            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        }
                    }
                }
                vec![String::from_utf8_lossy(&bytes).into_owned()]
            }
            Decoder::Metaspace {
                replacement,
                prepend_scheme,
            } => tokens
                .into_iter()
                .enumerate()
                .map(|(i, token)| {
                    let token = token.replace(*replacement, " ");
                    match token.strip_prefix(' ') {
                        Some(rest) if i == 0 && *prepend_scheme != PrependScheme::Never => {
                            rest.to_string()
                        }
                        _ => token,
                    }
                })
                .collect(),
            Decoder::Bpe { suffix } => {
                let n = tokens.len();
                tokens
                    .into_iter()
                    .enumerate()
                    .map(|(i, token)| {
                        let with = if i + 1 == n { "" } else { " " };
                        token.replace(suffix.as_str(), with)
                    })
                    .collect()
            }
            Decoder::ByteFallback => byte_fallback(tokens),
            Decoder::Fuse => vec![tokens.concat()],
            Decoder::Replace { pattern, content } => tokens
                .into_iter()
                .map(|t| t.replace(pattern.as_str(), content))
                .collect(),
            Decoder::Strip {
                content,
                start,
                stop,
            } => tokens
                .into_iter()
                .map(|t| strip_chars(&t, *content, *start, *stop))
                .collect(),
            Decoder::Sequence(steps) => steps
                .iter()
                .fold(tokens, |tokens, step| step.decode_chain(tokens)),
        }
    }
}

/// BERT-style cleanup of spaces before punctuation and contractions.
fn cleanup_spaces(token: &str) -> String {
    token
        .replace(" .", ".")
        .replace(" ?", "?")
        .replace(" !", "!")
        .replace(" ,", ",")
        .replace(" ' ", "'")
        .replace(" n't", "n't")
        .replace(" 'm", "'m")
        .replace(" do not", " don't")
        .replace(" 's", "'s")
        .replace(" 've", "'ve")
        .replace(" 're", "'re")
}

fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

fn byte_fallback(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut pending: Vec<u8> = Vec::new();

    let flush = |pending: &mut Vec<u8>, out: &mut Vec<String>| {
        if pending.is_empty() {
            return;
        }
        match String::from_utf8(std::mem::take(pending)) {
            Ok(text) => out.push(text),
            Err(err) => {
                let n = err.as_bytes().len();
                out.extend(std::iter::repeat(char::REPLACEMENT_CHARACTER.to_string()).take(n));
            }
        }
    };

    for token in tokens {
        match parse_byte_token(&token) {
            Some(b) => pending.push(b),
            None => {
                flush(&mut pending, &mut out);
                out.push(token);
            }
        }
    }
    flush(&mut pending, &mut out);
    out
}

fn strip_chars(token: &str, content: char, start: usize, stop: usize) -> String {
    let mut s = token;
    for _ in 0..start {
        match s.strip_prefix(content) {
            Some(rest) => s = rest,
            None => break,
        }
    }
    for _ in 0..stop {
        match s.strip_suffix(content) {
            Some(rest) => s = rest,
            None => break,
        }
    }
    s.to_string()
}
