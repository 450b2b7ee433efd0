//! Term tokenizer.
//!
//! Normalizes text into a set of comparable terms: lower-cased, split on
//! runs of non-word characters, with empty fragments discarded. A word
//! character is any Unicode alphanumeric or `_`, so splitting does not
//! depend on the process locale.
//!
//! # Example
//!
//! ```rust
//! use olive_core::tokenize::tokenize;
//!
//! let terms = tokenize("Saya suka APEL, apel!");
//! assert_eq!(terms.len(), 3);
//! assert!(terms.contains("apel"));
//! ```

use std::collections::HashSet;

/// Split `text` into its distinct lower-cased terms.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !is_word_char(c))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
