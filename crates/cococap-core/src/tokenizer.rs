//! # Caption Tokenizer
//!
//! Splits captions into lowercase word tokens for vocabulary building and
//! encoding. Words, apostrophe clitics (`'s`, `n't`) and individual
//! punctuation marks each become their own token; whitespace is dropped.

use regex::Regex;

use crate::error::Result;

/// Negated word / word / clitic / single punctuation mark.
const WORD_PATTERN: &str = r"\w*n't|\w+|'\w+|[^\w\s]";

const NEGATION: &str = "n't";

/// Tokenizer for COCO captions.
#[derive(Debug, Clone)]
pub struct CaptionTokenizer {
    re_word: Regex,
}

impl CaptionTokenizer {
    /// Create a new tokenizer with the word pattern compiled.
    ///
    /// # Errors
    ///
    /// Returns `CocoError::RegexError` if the pattern fails to compile
    /// (should never happen with the static pattern defined here).
    pub fn new() -> Result<Self> {
        Ok(Self {
            re_word: Regex::new(WORD_PATTERN)?,
        })
    }

    /// Tokenize a caption into lowercase tokens.
    ///
    /// # Examples
    /// ```
    /// use cococap_core::tokenizer::CaptionTokenizer;
    ///
    /// let tokenizer = CaptionTokenizer::new().unwrap();
    /// let tokens = tokenizer.tokenize("A man's hat, on a TABLE.");
    /// assert_eq!(tokens, ["a", "man", "'s", "hat", ",", "on", "a", "table", "."]);
    /// ```
    pub fn tokenize(&self, caption: &str) -> Vec<String> {
        let lowered = caption.to_lowercase();
        self.pieces(&lowered).map(str::to_string).collect()
    }

    /// Number of tokens in a caption, without allocating the token strings.
    pub fn count(&self, caption: &str) -> usize {
        self.pieces(&caption.to_lowercase()).count()
    }

    // "isn't" matches as one piece and is split into "is" + "n't".
    fn pieces<'a>(&'a self, lowered: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.re_word.find_iter(lowered).flat_map(|m| {
            let token = m.as_str();
            let parts = match token.strip_suffix(NEGATION) {
                Some(stem) if !stem.is_empty() => [Some(stem), Some(&token[stem.len()..])],
                _ => [Some(token), None],
            };
            parts.into_iter().flatten()
        })
    }
}
