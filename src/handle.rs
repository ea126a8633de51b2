//! Handle-based entry points.
//!
//! [`load`] returns an opaque, cheaply cloneable [`TokenizerHandle`] that can
//! be moved to other threads; the free functions take it by reference.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::core::{Encoding, ModelFormatError, TokenId, Tokenizer, TokenizerError};

/// Where a serialized tokenizer description comes from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Shared reference to a loaded tokenizer.
#[derive(Clone)]
pub struct TokenizerHandle(Arc<Tokenizer>);

impl TokenizerHandle {
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.0
    }
}

impl From<Tokenizer> for TokenizerHandle {
    fn from(tokenizer: Tokenizer) -> Self {
        Self(Arc::new(tokenizer))
    }
}

impl fmt::Debug for TokenizerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenizerHandle")
            .field("model", &self.0.model().kind())
            .field("vocab_size", &self.0.vocab_size())
            .finish()
    }
}

/// Load a tokenizer description.
pub fn load(source: ModelSource) -> Result<TokenizerHandle, ModelFormatError> {
    let tokenizer = match source {
        ModelSource::Path(path) => {
            debug!(path = %path.display(), "loading tokenizer");
            Tokenizer::from_file(&path)?
        }
        ModelSource::Bytes(data) => Tokenizer::from_bytes(&data)?,
    };
    Ok(tokenizer.into())
}

pub fn encode(
    handle: &TokenizerHandle,
    text: &str,
    text_pair: Option<&str>,
    add_special_tokens: bool,
) -> Result<Encoding, TokenizerError> {
    handle.0.encode(text, text_pair, add_special_tokens)
}

pub fn encode_batch(
    handle: &TokenizerHandle,
    inputs: &[(&str, Option<&str>)],
    add_special_tokens: bool,
) -> Result<Vec<Encoding>, TokenizerError> {
    handle.0.encode_batch(inputs, add_special_tokens)
}

pub fn decode(handle: &TokenizerHandle, ids: &[TokenId], skip_special_tokens: bool) -> String {
    handle.0.decode(ids, skip_special_tokens)
}
