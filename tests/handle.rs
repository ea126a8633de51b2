//! Integration tests for the handle entry points.

use std::io::Write;
use std::path::PathBuf;

use subtok::{decode, encode, encode_batch, load, ModelFormatError, ModelSource};

const WORDPIECE: &str = r###"{
    "added_tokens": [{"id": 3, "content": "[UNK]", "special": true}],
    "pre_tokenizer": {"type": "WhitespaceSplit"},
    "model": {
        "type": "WordPiece",
        "unk_token": "[UNK]",
        "continuing_subword_prefix": "##",
        "vocab": {"un": 0, "##aff": 1, "##able": 2, "[UNK]": 3}
    }
}"###;

/// Loading the same description from a path and from bytes gives the same
/// results.
#[test]
fn test_load_from_path_and_bytes() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(WORDPIECE.as_bytes()).unwrap();

    let from_path = load(ModelSource::Path(file.path().to_path_buf())).unwrap();
    let from_bytes = load(ModelSource::Bytes(WORDPIECE.as_bytes().to_vec())).unwrap();

    for handle in [&from_path, &from_bytes] {
        let enc = encode(handle, "unaffable", None, false).unwrap();
        assert_eq!(enc.ids(), &[0, 1, 2]);
        assert_eq!(enc.offsets(), &[(0, 2), (2, 5), (5, 9)]);
    }
}

/// Out-of-vocabulary text maps to `[UNK]` instead of failing.
#[test]
fn test_unknown_piece() {
    let handle = load(ModelSource::Bytes(WORDPIECE.as_bytes().to_vec())).unwrap();
    let enc = encode(&handle, "unaffable xyz", None, false).unwrap();
    assert_eq!(enc.ids(), &[0, 1, 2, 3]);
    assert_eq!(decode(&handle, enc.ids(), true), "unaffable");
    assert_eq!(decode(&handle, enc.ids(), false), "unaffable [UNK]");
}

/// Batch encoding keeps input order.
#[test]
fn test_encode_batch() {
    let handle = load(ModelSource::Bytes(WORDPIECE.as_bytes().to_vec())).unwrap();
    let inputs = [("un", None), ("unaffable", None), ("xyz", Some("un"))];
    let batch = encode_batch(&handle, &inputs, true).unwrap();

    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].ids(), &[0]);
    assert_eq!(batch[1].ids(), &[0, 1, 2]);
    assert_eq!(batch[2].ids(), &[3, 0]);
    assert_eq!(batch[2].type_ids(), &[0, 1]);
}

/// Malformed descriptions fail the whole load.
#[test]
fn test_load_failures() {
    let dir = tempfile::tempdir().unwrap();
    let missing = load(ModelSource::Path(dir.path().join("missing.json")));
    assert!(matches!(missing, Err(ModelFormatError::Io(_))));

    let not_dense = r#"{"model": {"type": "WordLevel", "vocab": {"a": 0, "b": 2}}}"#;
    assert!(matches!(
        load(ModelSource::Bytes(not_dense.as_bytes().to_vec())),
        Err(ModelFormatError::NonDenseIds { missing: 1, size: 2 })
    ));

    let duplicate = r#"{"model": {"type": "WordLevel", "vocab": {"a": 0, "b": 0}}}"#;
    assert!(matches!(
        load(ModelSource::Bytes(duplicate.as_bytes().to_vec())),
        Err(ModelFormatError::DuplicateId { id: 0, .. })
    ));

    let truncated = &WORDPIECE[..WORDPIECE.len() / 2];
    assert!(matches!(
        load(ModelSource::Bytes(truncated.as_bytes().to_vec())),
        Err(ModelFormatError::Json(_))
    ));

    let dir_as_file = load(ModelSource::Path(PathBuf::from(dir.path())));
    assert!(dir_as_file.is_err());
}

/// Handles are cheap to clone and usable from many threads.
#[test]
fn test_handle_across_threads() {
    let handle = load(ModelSource::Bytes(WORDPIECE.as_bytes().to_vec())).unwrap();
    let expected = encode(&handle, "un unaffable", None, true).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let handle = handle.clone();
            let expected = &expected;
            scope.spawn(move || {
                for _ in 0..50 {
                    let enc = encode(&handle, "un unaffable", None, true).unwrap();
                    assert_eq!(&enc, expected);
                }
            });
        }
    });
}
