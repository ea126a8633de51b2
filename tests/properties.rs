//! Property tests over arbitrary text for the fixture tokenizers.

use proptest::prelude::*;
use subtok::core::{Encoding, TruncationParams};
use subtok::Tokenizer;

fn load_fixture(name: &str) -> Tokenizer {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    Tokenizer::from_file(path).expect("Failed to load fixture")
}

fn assert_well_formed(enc: &Encoding, texts: &[&str]) {
    let n = enc.len();
    assert_eq!(enc.ids().len(), n);
    assert_eq!(enc.type_ids().len(), n);
    assert_eq!(enc.attention_mask().len(), n);
    assert_eq!(enc.special_tokens_mask().len(), n);
    assert_eq!(enc.tokens().len(), n);
    assert_eq!(enc.word_ids().len(), n);
    assert_eq!(enc.offsets().len(), n);
    assert_eq!(enc.sequence_ids().len(), n);

    let mut last_start = [0usize; 2];
    for (i, &(start, end)) in enc.offsets().iter().enumerate() {
        let Some(seq) = enc.sequence_ids()[i] else {
            assert_eq!((start, end), (0, 0));
            continue;
        };
        let text = texts[seq];
        assert!(start <= end && end <= text.len(), "{start}..{end} outside {text:?}");
        assert!(text.is_char_boundary(start) && text.is_char_boundary(end));
        assert!(start >= last_start[seq], "offsets go backwards in {text:?}");
        last_start[seq] = start;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_byte_level_roundtrip(text in "\\PC{0,40}") {
        let tokenizer = load_fixture("byte_level_bpe.json");
        let enc = tokenizer.encode(&text, None, true).unwrap();
        assert_well_formed(&enc, &[&text]);
        prop_assert_eq!(tokenizer.decode(enc.ids(), false), text);
    }

    #[test]
    fn prop_bert_offsets_and_determinism(a in "\\PC{0,30}", b in "[a-z ,.!]{0,30}") {
        let tokenizer = load_fixture("bert_wordpiece.json");
        let first = tokenizer.encode(&a, Some(&b), true).unwrap();
        let second = tokenizer.encode(&a, Some(&b), true).unwrap();
        assert_well_formed(&first, &[&a, &b]);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_truncation_bound(text in "[a-z ]{0,60}", pair in "[a-z ]{0,60}", max in 3usize..16) {
        let tokenizer = load_fixture("bert_wordpiece.json")
            .with_truncation(Some(TruncationParams::new(max)));
        let single = tokenizer.encode(&text, None, true).unwrap();
        prop_assert!(single.len() <= max);
        let packed = tokenizer.encode(&text, Some(&pair), true).unwrap();
        prop_assert!(packed.len() <= max);
        assert_well_formed(&packed, &[&text, &pair]);
    }

    #[test]
    fn prop_batch_matches_single(texts in proptest::collection::vec("[a-z ]{0,20}", 0..6)) {
        let tokenizer = load_fixture("bert_wordpiece.json");
        let inputs: Vec<(&str, Option<&str>)> = texts.iter().map(|t| (t.as_str(), None)).collect();
        let batch = tokenizer.encode_batch(&inputs, true).unwrap();
        prop_assert_eq!(batch.len(), texts.len());
        for (text, enc) in texts.iter().zip(&batch) {
            prop_assert_eq!(&tokenizer.encode(text, None, true).unwrap(), enc);
        }
    }
}
