//! Error taxonomy for loading and running a tokenizer.
//!
//! - [`ModelFormatError`]: the serialized model is malformed or inconsistent.
//!   Fatal to loading; a tokenizer is never partially built.
//! - [`TokenizerError::Configuration`]: caller options contradict each other.
//!   Reported before any text is processed.
//! - [`TokenizerError::Encoding`]: the given input cannot be encoded under the
//!   loaded configuration (e.g. a pair input without a pair template).
//!
//! Out-of-vocabulary text is not an error: it maps to the unknown token.

use thiserror::Error;

/// Errors raised while reading or validating a serialized tokenizer model.
#[derive(Error, Debug)]
pub enum ModelFormatError {
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    Parse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid model description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Token ids are not dense: id {missing} is unassigned (vocabulary size {size})")]
    NonDenseIds { missing: u32, size: usize },
    #[error("Token id {id} is assigned to both {first:?} and {second:?}")]
    DuplicateId {
        id: u32,
        first: String,
        second: String,
    },
    #[error("Token {token:?} is assigned to both id {first} and id {second}")]
    DuplicateToken { token: String, first: u32, second: u32 },
    #[error("Merge rule {0:?} references a token missing from the vocabulary")]
    MergeOutOfVocabulary(String),
    #[error("Invalid merge rule: {0:?}")]
    InvalidMerge(String),
    #[error("Token {0:?} is referenced by the model but missing from the vocabulary")]
    TokenOutOfVocabulary(String),
    #[error("Regex compilation error (regexr): {0}")]
    Regexr(#[from] regexr::Error),
    #[cfg(feature = "pcre2")]
    #[error("Regex compilation error (PCRE2): {0}")]
    Pcre2(#[from] pcre2::Error),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasick(#[from] aho_corasick::BuildError),
    #[error("Unsupported component: {0}")]
    Unsupported(String),
}

/// Errors returned by the tokenizer facade.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Model format error: {0}")]
    ModelFormat(#[from] ModelFormatError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("PCRE2 feature not enabled. Compile with --features pcre2")]
    Pcre2NotEnabled,
}

impl TokenizerError {
    /// Returns `true` for errors caused by inconsistent caller options.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TokenizerError::Configuration(_))
    }

    /// Returns `true` for errors caused by the given input.
    pub fn is_encoding(&self) -> bool {
        matches!(self, TokenizerError::Encoding(_))
    }
}
