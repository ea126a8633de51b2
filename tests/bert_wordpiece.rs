//! Integration tests for a BERT-style WordPiece tokenizer loaded from
//! `tokenizer.json`.
//!
//! Covers normalization offsets, unknown-token handling, the `[CLS] .. [SEP]`
//! template, truncation and padding.

use subtok::core::{Direction, PaddingParams, PaddingStrategy, TruncationParams, TruncationStrategy};
use subtok::Tokenizer;

/// Basic single-sequence encoding with special tokens.
#[test]
fn test_bert_encode_with_specials() {
    let tokenizer = create_bert_tokenizer();
    let enc = tokenizer.encode("Hello, World!", None, true).unwrap();

    assert_eq!(enc.ids(), &[2, 12, 15, 13, 14, 3]);
    assert_eq!(enc.tokens(), &["[CLS]", "hello", ",", "world", "!", "[SEP]"]);
    assert_eq!(enc.offsets(), &[(0, 0), (0, 5), (5, 6), (7, 12), (12, 13), (0, 0)]);
    assert_eq!(enc.special_tokens_mask(), &[1, 0, 0, 0, 0, 1]);
    assert_eq!(enc.attention_mask(), &[1; 6]);
    assert_eq!(enc.word_ids(), &[None, Some(0), Some(1), Some(2), Some(3), None]);
}

/// Subword continuation pieces and their byte offsets.
#[test]
fn test_bert_subword_offsets() {
    let tokenizer = create_bert_tokenizer();
    let enc = tokenizer.encode("unaffable", None, false).unwrap();

    assert_eq!(enc.ids(), &[5, 6, 7]);
    assert_eq!(enc.offsets(), &[(0, 2), (2, 5), (5, 9)]);
    assert_eq!(enc.word_ids(), &[Some(0), Some(0), Some(0)]);
}

/// Words the vocabulary cannot spell become `[UNK]` as a whole.
#[test]
fn test_bert_unknown_words() {
    let tokenizer = create_bert_tokenizer();

    let enc = tokenizer.encode("xyz hello", None, false).unwrap();
    assert_eq!(enc.ids(), &[1, 12]);
    assert_eq!(enc.offsets(), &[(0, 3), (4, 9)]);

    // A known prefix does not rescue the rest of the word.
    let enc = tokenizer.encode("unaffablex", None, false).unwrap();
    assert_eq!(enc.ids(), &[1]);
    assert_eq!(enc.offsets(), &[(0, 10)]);
}

/// Offsets point into the original text even after case folding, accent
/// stripping and CJK spacing.
#[test]
fn test_bert_normalization_keeps_original_offsets() {
    let tokenizer = create_bert_tokenizer();

    let text = "CAFÉ";
    let enc = tokenizer.encode(text, None, false).unwrap();
    assert_eq!(enc.ids(), &[16]);
    assert_eq!(enc.offsets(), &[(0, 5)]);
    assert_eq!(&text[0..5], "CAFÉ");

    let enc = tokenizer.encode("中hello", None, false).unwrap();
    assert_eq!(enc.ids(), &[17, 12]);
    assert_eq!(enc.offsets(), &[(0, 3), (3, 8)]);
}

/// Pair inputs get segment type ids from the template.
#[test]
fn test_bert_pair_layout() {
    let tokenizer = create_bert_tokenizer();
    let enc = tokenizer.encode("hello", Some("world"), true).unwrap();

    assert_eq!(enc.ids(), &[2, 12, 3, 13, 3]);
    assert_eq!(enc.type_ids(), &[0, 0, 0, 1, 1]);
    assert_eq!(enc.sequence_ids(), &[None, Some(0), None, Some(1), None]);
    assert_eq!(enc.n_sequences(), 2);
    // Offsets of the second sequence index into the second text.
    assert_eq!(enc.offsets()[3], (0, 5));
}

/// Added tokens in the input are matched verbatim.
#[test]
fn test_bert_special_token_in_text() {
    let tokenizer = create_bert_tokenizer();
    let enc = tokenizer.encode("hello [SEP] world", None, false).unwrap();
    assert_eq!(enc.ids(), &[12, 3, 13]);
    assert_eq!(enc.offsets(), &[(0, 5), (6, 11), (12, 17)]);
}

/// Truncation never removes template special tokens.
#[test]
fn test_bert_truncation() {
    let tokenizer = create_bert_tokenizer().with_truncation(Some(TruncationParams::new(5)));
    let enc = tokenizer.encode("the quick brown fox", None, true).unwrap();
    assert_eq!(enc.ids(), &[2, 8, 9, 10, 3]);

    let tokenizer = create_bert_tokenizer().with_truncation(Some(TruncationParams::new(7)));
    let enc = tokenizer
        .encode("the quick brown fox", Some("hello world"), true)
        .unwrap();
    assert_eq!(enc.ids(), &[2, 8, 9, 3, 12, 13, 3]);
    assert_eq!(enc.len(), 7);
}

/// Left truncation keeps the end of the sequence.
#[test]
fn test_bert_truncation_left_only_first() {
    let tokenizer = create_bert_tokenizer().with_truncation(Some(TruncationParams {
        max_length: 6,
        strategy: TruncationStrategy::OnlyFirst,
        direction: Direction::Left,
    }));
    let enc = tokenizer
        .encode("the quick brown fox", Some("hello"), true)
        .unwrap();
    assert_eq!(enc.ids(), &[2, 10, 11, 3, 12, 3]);

    // Nothing can be taken from the first sequence to fit the second.
    let tokenizer = create_bert_tokenizer().with_truncation(Some(TruncationParams {
        max_length: 4,
        strategy: TruncationStrategy::OnlyFirst,
        direction: Direction::Right,
    }));
    let err = tokenizer.encode("fox", Some("hello world"), true).unwrap_err();
    assert!(err.is_encoding());
}

/// A limit below the template's special tokens is a configuration error.
#[test]
fn test_bert_truncation_below_specials() {
    let tokenizer = create_bert_tokenizer().with_truncation(Some(TruncationParams::new(1)));
    let err = tokenizer.encode("hello", None, true).unwrap_err();
    assert!(err.is_configuration());
    assert!(tokenizer.encode("hello", None, false).is_ok());
}

/// Fixed, multiple-of and max-length padding.
#[test]
fn test_bert_padding() {
    let tokenizer = create_bert_tokenizer().with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::Fixed(6),
        ..PaddingParams::default()
    }));
    let enc = tokenizer.encode("hello", None, true).unwrap();
    assert_eq!(enc.ids(), &[2, 12, 3, 0, 0, 0]);
    assert_eq!(enc.attention_mask(), &[1, 1, 1, 0, 0, 0]);
    assert_eq!(enc.tokens()[5], "[PAD]");

    let tokenizer = create_bert_tokenizer().with_padding(Some(PaddingParams {
        direction: Direction::Left,
        pad_to_multiple_of: Some(4),
        ..PaddingParams::default()
    }));
    let enc = tokenizer.encode("hello", None, true).unwrap();
    assert_eq!(enc.ids(), &[0, 2, 12, 3]);

    let tokenizer = create_bert_tokenizer()
        .with_truncation(Some(TruncationParams::new(8)))
        .with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::MaxLength,
            ..PaddingParams::default()
        }));
    let enc = tokenizer.encode("hello world", None, true).unwrap();
    assert_eq!(enc.len(), 8);
    assert_eq!(enc.type_ids().len(), 8);
}

/// Batches are padded to their longest member.
#[test]
fn test_bert_batch_longest() {
    let tokenizer = create_bert_tokenizer().with_padding(Some(PaddingParams::default()));
    let batch = tokenizer
        .encode_batch(&[("hello", None), ("the quick brown fox", None)], true)
        .unwrap();

    assert_eq!(batch[0].len(), 6);
    assert_eq!(batch[1].len(), 6);
    assert_eq!(batch[0].ids(), &[2, 12, 3, 0, 0, 0]);
    assert_eq!(batch[1].ids(), &[2, 8, 9, 10, 11, 3]);
}

/// Decoding joins continuation pieces and tidies punctuation spacing.
#[test]
fn test_bert_decode() {
    let tokenizer = create_bert_tokenizer();
    let ids = [2, 5, 6, 7, 15, 12, 3];

    assert_eq!(tokenizer.decode(&ids, true), "unaffable, hello");
    assert_eq!(tokenizer.decode(&ids, false), "[CLS] unaffable, hello [SEP]");

    let batch = tokenizer.decode_batch(&[&[12, 13], &[19, 20]], true);
    assert_eq!(batch, vec!["hello world".to_string(), "running".to_string()]);
}

/// Vocabulary lookups.
#[test]
fn test_bert_vocab_lookup() {
    let tokenizer = create_bert_tokenizer();
    assert_eq!(tokenizer.vocab_size(), 22);
    assert_eq!(tokenizer.token_to_id("##able"), Some(7));
    assert_eq!(tokenizer.id_to_token(17), Some("中"));
    assert_eq!(tokenizer.id_to_token(22), None);
}

fn create_bert_tokenizer() -> Tokenizer {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/bert_wordpiece.json");
    Tokenizer::from_file(path).expect("Failed to load BERT fixture")
}
