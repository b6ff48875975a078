use crate::error::IngestError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenCounter {
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenCounter {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let tokenizer = tokenizers::Tokenizer::from_file(path.as_ref())
            .map_err(|error| IngestError::Tokenizer(error.to_string()))?;
        Ok(Self { tokenizer })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenCounter for HfTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(error) => {
                warn!(%error, "tokenizer failed to encode text, counting characters");
                text.chars().count()
            }
        }
    }
}

#[derive(Clone, Default)]
pub enum SizeMeasure {
    #[default]
    Characters,
    Tokens(Arc<dyn TokenCounter>),
}

impl fmt::Debug for SizeMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeMeasure::Characters => f.write_str("Characters"),
            SizeMeasure::Tokens(_) => f.write_str("Tokens(..)"),
        }
    }
}

impl SizeMeasure {
    pub fn tokens(counter: impl TokenCounter + 'static) -> Self {
        SizeMeasure::Tokens(Arc::new(counter))
    }

    pub fn or_characters<C>(loaded: Result<C, IngestError>) -> Self
    where
        C: TokenCounter + 'static,
    {
        match loaded {
            Ok(counter) => SizeMeasure::tokens(counter),
            Err(error) => {
                warn!(%error, "tokenizer unavailable, falling back to character count");
                SizeMeasure::Characters
            }
        }
    }

    #[cfg(feature = "hf-tokenizer")]
    pub fn from_tokenizer_file(path: &Path) -> Self {
        Self::or_characters(HfTokenCounter::from_file(path))
    }

    #[cfg(not(feature = "hf-tokenizer"))]
    pub fn from_tokenizer_file(path: &Path) -> Self {
        Self::or_characters::<WordCounter>(Err(IngestError::Tokenizer(format!(
            "built without the hf-tokenizer feature, cannot load {}",
            path.display()
        ))))
    }

    pub fn measure(&self, text: &str) -> usize {
        match self {
            SizeMeasure::Characters => text.chars().count(),
            SizeMeasure::Tokens(counter) => counter.count_tokens(text),
        }
    }

    pub fn is_token_based(&self) -> bool {
        matches!(self, SizeMeasure::Tokens(_))
    }
}
