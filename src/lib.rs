//! subtok: subword tokenization for language-model preprocessing.
//!
//! Loads a `tokenizer.json` description (or a tiktoken rank file) and
//! converts text into token ids with byte-exact offsets, attention masks and
//! special-token layout, and converts ids back into text.
//!
//! - BPE, WordPiece and WordLevel segmentation
//! - Regex pre-tokenization with `regexr` (JIT) or optionally PCRE2
//! - Aho-Corasick matching of added tokens
//! - Rayon parallelism for batch encoding and decoding
//! - UTF-8 safe streaming decoder for generated output
//!
//! ```ignore
//! use subtok::{load, encode, decode, ModelSource};
//!
//! let handle = load(ModelSource::Path("tokenizer.json".into()))?;
//! let encoding = encode(&handle, "Hello world", None, true)?;
//! println!("{:?}", encoding.ids());
//! println!("{}", decode(&handle, encoding.ids(), true));
//! ```

pub mod core;
pub mod handle;

pub use core::{
    Encoding, ModelFormatError, StreamingDecoder, TokenId, Tokenizer, TokenizerError,
    CL100K_BASE_PATTERN, GPT2_PATTERN, O200K_BASE_PATTERN,
};
pub use handle::{decode, encode, encode_batch, load, ModelSource, TokenizerHandle};
