//! Core tokenization engine.
//!
//! Text flows through the components in this order:
//!
//! - added-token matching ([`Tokenizer`], Aho-Corasick)
//! - [`Normalizer`], rewriting text while keeping byte alignments
//! - [`PreTokenizer`], splitting into chunks (regex, whitespace, byte-level)
//! - [`Model`], segmenting each chunk (BPE, WordPiece or WordLevel)
//! - [`Template`] with [`TruncationParams`] and [`PaddingParams`], assembling
//!   the final [`Encoding`]
//!
//! and back through a [`Decoder`] (or a [`StreamingDecoder`]) for ids.
//!
//! Everything a [`Tokenizer`] holds is immutable after loading, so a single
//! instance is shared freely between threads.

mod bpe;
pub mod byte_level;
mod chunk;
mod decoder;
mod encoding;
mod error;
mod merges;
mod model;
mod normalizer;
mod post_processor;
mod pre_tokenizer;
mod serialization;
mod streaming;
mod tokenizer;
mod vocab;

pub use byte_level::{byte_level_decode, byte_level_encode};
pub use chunk::Chunk;
pub use decoder::Decoder;
pub use encoding::{Direction, Encoding, Token};
pub use error::{ModelFormatError, TokenizerError};
pub use merges::{parse_merge, MergeTable, Rank};
pub use model::{Bpe, Model, Piece, UnknownPolicy, WordLevel, WordPiece};
pub use normalizer::{BertNormalizer, Normalizer};
pub use post_processor::{
    PaddingParams, PaddingStrategy, Sequence, SpecialToken, Template, TemplatePiece,
    TruncationParams, TruncationStrategy,
};
pub use pre_tokenizer::{
    PrependScheme, PreTokenizer, Regex, RegexOptions, SplitBehavior, SplitPattern,
    CL100K_BASE_PATTERN, GPT2_PATTERN, O200K_BASE_PATTERN,
};
pub use serialization::from_json;
pub use streaming::StreamingDecoder;
pub use tokenizer::{AddedToken, Tokenizer};
pub use vocab::{
    load_tiktoken_bpe, load_tiktoken_bpe_file, load_vocab_txt, SpecialRole, TokenId, Vocab,
};
