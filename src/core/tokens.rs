//! Token counting for generated output.
//!
//! Counting goes through the `o200k_base` BPE ranking when the embedded
//! tokenizer data loads, and degrades to a whitespace estimate when it
//! does not. The BPE table is expensive to build, so it is created once
//! per counter and shared across all aggregations.

use std::sync::OnceLock;

use tiktoken_rs::{o200k_base, CoreBPE};

/// Counting seam used by the aggregation engine.
///
/// Production code uses [`TokenCounter`]; tests inject fixed-cost
/// implementations to make results predictable.
pub trait TokenCounterOperations: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Shared token counter backed by the `o200k_base` encoding.
#[derive(Default)]
pub struct TokenCounter {
    bpe: OnceLock<Option<CoreBPE>>,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn bpe(&self) -> Option<&CoreBPE> {
        self.bpe
            .get_or_init(|| match o200k_base() {
                Ok(bpe) => Some(bpe),
                Err(e) => {
                    tracing::warn!(
                        "Tokenizer initialization failed, falling back to whitespace estimate: {e}"
                    );
                    None
                }
            })
            .as_ref()
    }
}

impl TokenCounterOperations for TokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        match self.bpe() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => whitespace_token_estimate(text),
        }
    }
}

/// Fallback estimator: one token per whitespace-separated word.
pub fn whitespace_token_estimate(text: &str) -> usize {
    text.split_whitespace().count()
}
