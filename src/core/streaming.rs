//! UTF-8 safe streaming decoder for token-by-token output.
//!
//! When ids arrive one at a time (as in streaming generation), a token may
//! end in the middle of a multi-byte character, and decoders such as
//! WordPiece or Metaspace change a token's spelling depending on what
//! precedes it. The streaming decoder therefore keeps a short window of
//! already-emitted ids as context, re-decodes the window on every step and
//! emits only the new suffix, and only once it no longer ends in a partial
//! character (U+FFFD).

use super::tokenizer::Tokenizer;
use super::vocab::TokenId;

/// Incremental decoder over a borrowed [`Tokenizer`].
///
/// # Example
///
/// ```ignore
/// let tokenizer = Tokenizer::from_file("tokenizer.json")?;
/// let mut decoder = StreamingDecoder::new(&tokenizer, true);
///
/// for token_id in token_stream {
///     if let Some(text) = decoder.add_token(token_id) {
///         print!("{}", text);
///     }
/// }
/// // Flush anything still held back
/// print!("{}", decoder.flush());
/// ```
pub struct StreamingDecoder<'a> {
    tokenizer: &'a Tokenizer,
    skip_special_tokens: bool,
    /// Context ids followed by ids not yet emitted.
    ids: Vec<TokenId>,
    /// Decoded text of the context ids.
    prefix: String,
    /// Number of context ids at the front of `ids`.
    prefix_index: usize,
}

impl<'a> StreamingDecoder<'a> {
    pub fn new(tokenizer: &'a Tokenizer, skip_special_tokens: bool) -> Self {
        Self {
            tokenizer,
            skip_special_tokens,
            ids: Vec::with_capacity(16),
            prefix: String::new(),
            prefix_index: 0,
        }
    }

    /// Add a token and return any newly completed text.
    ///
    /// Returns `None` while the pending tokens still end in a partial
    /// character or decode to nothing.
    pub fn add_token(&mut self, token_id: TokenId) -> Option<String> {
        if !self.decodes(token_id) {
            return None;
        }
        self.ids.push(token_id);
        self.step()
    }

    /// Add multiple tokens at once and return any newly completed text.
    pub fn add_tokens(&mut self, token_ids: &[TokenId]) -> Option<String> {
        let before = self.ids.len();
        let kept: Vec<TokenId> = token_ids
            .iter()
            .copied()
            .filter(|&id| self.decodes(id))
            .collect();
        self.ids.extend(kept);
        if self.ids.len() == before {
            return None;
        }
        self.step()
    }

    /// Emit everything still pending; partial characters become U+FFFD.
    ///
    /// The decoder starts over afterwards.
    pub fn flush(&mut self) -> String {
        let out = if self.has_pending() {
            let text = self.decode_window();
            suffix_after(&text, &self.prefix).unwrap_or_default().to_string()
        } else {
            String::new()
        };
        self.reset();
        out
    }

    /// Discard all state.
    pub fn reset(&mut self) {
        self.ids.clear();
        self.prefix.clear();
        self.prefix_index = 0;
    }

    /// Whether tokens were added that have not been emitted yet.
    pub fn has_pending(&self) -> bool {
        self.ids.len() > self.prefix_index
    }

    fn step(&mut self) -> Option<String> {
        let text = self.decode_window();
        if text.ends_with(char::REPLACEMENT_CHARACTER) {
            return None;
        }
        if text == self.prefix {
            // Complete tokens that spell nothing; keep the window bounded.
            self.rotate();
            return None;
        }
        if text.len() <= self.prefix.len() {
            return None;
        }
        let new_text = suffix_after(&text, &self.prefix)?.to_string();
        self.rotate();
        Some(new_text)
    }

    /// The pending ids become the context for the next step.
    fn rotate(&mut self) {
        let emitted = self.ids.len() - self.prefix_index;
        self.ids.drain(..self.prefix_index);
        self.prefix_index = emitted;
        self.prefix = self.decode_window();
    }

    /// Ids that `decode` drops never change the output.
    fn decodes(&self, token_id: TokenId) -> bool {
        let vocab = self.tokenizer.vocab();
        vocab.lookup_text(token_id).is_some()
            && !(self.skip_special_tokens && vocab.is_special(token_id))
    }

    /// Number of ids currently held, context included.
    pub fn window_len(&self) -> usize {
        self.ids.len()
    }

    fn decode_window(&self) -> String {
        self.tokenizer.decode(&self.ids, self.skip_special_tokens)
    }
}

fn suffix_after<'t>(text: &'t str, prefix: &str) -> Option<&'t str> {
    text.strip_prefix(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decoder::Decoder;
    use crate::core::merges::MergeTable;
    use crate::core::model::{Bpe, Model, WordPiece};
    use crate::core::tokenizer::AddedToken;
    use crate::core::vocab::Vocab;

    fn vocab(tokens: &[&str]) -> Vocab {
        Vocab::from_ordered(tokens.iter().map(|t| t.to_string()).collect()).unwrap()
    }

    fn byte_level_tokenizer() -> Tokenizer {
        // "中" is E4 B8 AD, spelled "ä¸Ń" in the byte-level alphabet.
        let v = vocab(&["Hello", "\u{120}world", "\u{e4}", "\u{b8}", "\u{143}", "!"]);
        Tokenizer::new(v, Model::Bpe(Bpe::new(MergeTable::default())))
            .with_decoder(Some(Decoder::ByteLevel))
    }

    #[test]
    fn test_simple_ascii() {
        let tok = byte_level_tokenizer();
        let mut decoder = StreamingDecoder::new(&tok, false);
        assert_eq!(decoder.add_token(0), Some("Hello".to_string()));
        assert_eq!(decoder.add_token(1), Some(" world".to_string()));
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_split_multibyte_character() {
        let tok = byte_level_tokenizer();
        let mut decoder = StreamingDecoder::new(&tok, false);
        assert_eq!(decoder.add_token(2), None);
        assert_eq!(decoder.add_token(3), None);
        assert!(decoder.has_pending());
        assert_eq!(decoder.add_token(4), Some("中".to_string()));
        assert_eq!(decoder.add_token(5), Some("!".to_string()));
    }

    #[test]
    fn test_flush_incomplete() {
        let tok = byte_level_tokenizer();
        let mut decoder = StreamingDecoder::new(&tok, false);
        assert_eq!(decoder.add_token(0), Some("Hello".to_string()));
        assert_eq!(decoder.add_token(2), None);
        assert_eq!(decoder.flush(), "\u{FFFD}");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_reset() {
        let tok = byte_level_tokenizer();
        let mut decoder = StreamingDecoder::new(&tok, false);
        decoder.add_token(2);
        decoder.reset();
        assert!(!decoder.has_pending());
        assert_eq!(decoder.add_token(0), Some("Hello".to_string()));
    }

    #[test]
    fn test_add_tokens_batch() {
        let tok = byte_level_tokenizer();
        let mut decoder = StreamingDecoder::new(&tok, false);
        assert_eq!(
            decoder.add_tokens(&[0, 1, 2, 3, 4]),
            Some("Hello world中".to_string())
        );
    }

    #[test]
    fn test_dropped_ids_are_not_buffered() {
        let v = vocab(&["Hello", "\u{120}world", "<|endoftext|>"]);
        let tok = Tokenizer::new(v, Model::Bpe(Bpe::new(MergeTable::default())))
            .with_decoder(Some(Decoder::ByteLevel))
            .with_added_tokens(vec![AddedToken::special("<|endoftext|>", 2)])
            .unwrap();
        let mut decoder = StreamingDecoder::new(&tok, true);
        assert_eq!(decoder.add_token(0), Some("Hello".to_string()));
        for _ in 0..1000 {
            assert_eq!(decoder.add_token(2), None);
            assert_eq!(decoder.add_token(9999), None);
        }
        assert!(!decoder.has_pending());
        assert_eq!(decoder.window_len(), 1);
        assert_eq!(decoder.add_tokens(&[2, 9999]), None);
        assert_eq!(decoder.add_token(1), Some(" world".to_string()));
        assert_eq!(decoder.window_len(), 1);
    }

    #[test]
    fn test_empty_tokens_keep_window_bounded() {
        let v = vocab(&["Hello", ""]);
        let tok = Tokenizer::new(v, Model::Bpe(Bpe::new(MergeTable::default())))
            .with_decoder(Some(Decoder::ByteLevel));
        let mut decoder = StreamingDecoder::new(&tok, false);
        assert_eq!(decoder.add_token(0), Some("Hello".to_string()));
        for _ in 0..100 {
            assert_eq!(decoder.add_token(1), None);
        }
        assert!(decoder.window_len() <= 1);
        assert_eq!(decoder.add_token(0), Some("Hello".to_string()));
    }

    #[test]
    fn test_wordpiece_context_spacing() {
        let v = vocab(&["un", "##aff", "##able", "today"]);
        let tok = Tokenizer::new(v, Model::WordPiece(WordPiece::default())).with_decoder(Some(
            Decoder::WordPiece {
                prefix: "##".to_string(),
                cleanup: true,
            },
        ));
        let mut decoder = StreamingDecoder::new(&tok, false);
        let pieces: Vec<String> = [0, 1, 2, 3]
            .iter()
            .filter_map(|&id| decoder.add_token(id))
            .collect();
        assert_eq!(pieces, vec!["un", "aff", "able", " today"]);
    }
}
