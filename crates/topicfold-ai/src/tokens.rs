//! Token counting used to size condensation batches.
//!
//! Counts only have to be stable within a run; they are not expected to match
//! the remote service's own limits exactly.

/// Deterministic token counter.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Byte-length estimate, rounded up. Roughly four bytes per token for English.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenCounter {
    bytes_per_token: usize,
}

impl HeuristicTokenCounter {
    pub fn new(bytes_per_token: usize) -> Self {
        Self {
            bytes_per_token: bytes_per_token.max(1),
        }
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(self.bytes_per_token)
    }
}

#[cfg(feature = "tokenizers")]
pub use hf::HfTokenCounter;

#[cfg(feature = "tokenizers")]
mod hf {
    use std::path::Path;

    use tokenizers::Tokenizer;
    use tracing::{info, warn};

    use super::{HeuristicTokenCounter, TokenCounter};

    /// Exact counts from a Hugging Face `tokenizer.json`.
    pub struct HfTokenCounter {
        tokenizer: Tokenizer,
        fallback: HeuristicTokenCounter,
    }

    impl HfTokenCounter {
        pub fn load(path: &Path) -> anyhow::Result<Self> {
            anyhow::ensure!(path.exists(), "tokenizer not found at {path:?}");
            let tokenizer =
                Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
            info!(path = %path.display(), "loaded tokenizer");
            Ok(Self {
                tokenizer,
                fallback: HeuristicTokenCounter::default(),
            })
        }
    }

    impl TokenCounter for HfTokenCounter {
        fn count_tokens(&self, text: &str) -> usize {
            match self.tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    warn!(error = %e, "tokenize failed, using byte estimate");
                    self.fallback.count_tokens(text)
                }
            }
        }
    }
}
