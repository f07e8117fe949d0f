//! Token estimation utilities.
//!
//! Local model servers don't expose their tokenizer, so this module provides a
//! conservative character-based estimate with corrective terms for the inputs
//! that tokenize badly: emoji, punctuation, non-ASCII text and very long words.

use serde::{Deserialize, Serialize};

use crate::memory::Exchange;

/// Default characters per token for mixed English text and code.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.0;

/// Default multiplicative safety margin (20%).
pub const DEFAULT_SAFETY_MARGIN: f64 = 1.2;

/// Extra tokens charged per emoji.
const EMOJI_TOKENS: f64 = 2.0;
/// Extra tokens charged per punctuation/symbol character.
const SYMBOL_TOKENS: f64 = 0.3;
/// Extra tokens charged per non-emoji, non-ASCII character.
const UNICODE_TOKENS: f64 = 0.5;
/// Words longer than this are charged a long-word penalty.
const LONG_WORD_CHARS: usize = 20;

/// Token estimator for counting tokens from text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenEstimator {
    /// Base characters-per-token ratio
    chars_per_token: f64,
    /// Multiplier applied after the corrective terms
    safety_margin: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl TokenEstimator {
    /// Create an estimator with a custom ratio and safety margin.
    ///
    /// A non-positive or non-finite ratio falls back to the default; the
    /// safety margin never drops below 1.0.
    pub fn new(chars_per_token: f64, safety_margin: f64) -> Self {
        let chars_per_token = if chars_per_token.is_finite() && chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        let safety_margin = if safety_margin.is_finite() {
            safety_margin.max(1.0)
        } else {
            DEFAULT_SAFETY_MARGIN
        };
        Self {
            chars_per_token,
            safety_margin,
        }
    }

    /// Create a default-ratio estimator with a custom safety margin.
    pub fn conservative(safety_margin: f64) -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN, safety_margin)
    }

    /// Characters-per-token ratio in use.
    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Safety margin in use.
    pub fn safety_margin(&self) -> f64 {
        self.safety_margin
    }

    /// Estimate tokens from text.
    ///
    /// Returns 0 for empty text and at least 1 for anything else.
    pub fn estimate(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count();
        let base = (char_count as f64 / self.chars_per_token).max(1.0);

        let mut emoji = 0usize;
        let mut symbols = 0usize;
        let mut non_ascii = 0usize;
        for c in text.chars() {
            if is_emoji(c) {
                emoji += 1;
            }
            if is_symbol(c) {
                symbols += 1;
            }
            if !c.is_ascii() {
                non_ascii += 1;
            }
        }

        let long_word_chars: usize = text
            .split_whitespace()
            .map(|word| word.chars().count())
            .filter(|&len| len > LONG_WORD_CHARS)
            .map(|len| len - LONG_WORD_CHARS)
            .sum();

        let corrections = emoji as f64 * EMOJI_TOKENS
            + symbols as f64 * SYMBOL_TOKENS
            + non_ascii.saturating_sub(emoji) as f64 * UNICODE_TOKENS
            + long_word_chars as f64 / 10.0;

        let estimate = ((base + corrections) * self.safety_margin) as u64;
        estimate.max(1)
    }

    /// Estimate tokens for several texts.
    pub fn estimate_batch(&self, texts: &[&str]) -> Vec<u64> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }

    /// Estimate both sides of an exchange from their content.
    pub fn estimate_exchange(&self, exchange: &Exchange) -> ExchangeTokens {
        ExchangeTokens::new(
            self.estimate(&exchange.user.content),
            self.estimate(&exchange.assistant.content),
        )
    }

    /// Sum of content estimates over a sequence of exchanges.
    pub fn estimate_conversation(&self, exchanges: &[Exchange]) -> u64 {
        exchanges
            .iter()
            .map(|e| self.estimate_exchange(e).total())
            .sum()
    }

    /// Compare an estimate against an actual count, if one is known.
    pub fn accuracy(&self, text: &str, actual_tokens: Option<u64>) -> EstimationAccuracy {
        let estimated = self.estimate(text);
        let text_length = text.chars().count();
        let mut report = EstimationAccuracy {
            text_length,
            estimated_tokens: estimated,
            chars_per_token: text_length as f64 / estimated.max(1) as f64,
            actual_tokens,
            estimation_ratio: None,
            estimation_error: None,
            estimation_error_percent: None,
        };

        if let Some(actual) = actual_tokens {
            let error = estimated.abs_diff(actual);
            report.estimation_ratio = Some(estimated as f64 / actual.max(1) as f64);
            report.estimation_error = Some(error);
            report.estimation_error_percent = Some(error as f64 / actual.max(1) as f64 * 100.0);
        }

        report
    }
}

/// Emoji and pictographic ranges that commonly cost several tokens.
fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F600..=0x1F64F
            | 0x1F300..=0x1F5FF
            | 0x1F680..=0x1F6FF
            | 0x1F1E0..=0x1F1FF
            | 0x2700..=0x27BF
            | 0x1F900..=0x1F9FF
            | 0x1F018..=0x1F270
    )
}

fn is_symbol(c: char) -> bool {
    matches!(
        c,
        '(' | ')'
            | '{'
            | '}'
            | '['
            | ']'
            | '<'
            | '>'
            | '='
            | '!'
            | '@'
            | '#'
            | '$'
            | '%'
            | '^'
            | '&'
            | '*'
            | '+'
            | '-'
            | '_'
            | '|'
            | '\\'
            | ':'
            | ';'
            | '"'
            | '\''
            | ','
            | '.'
            | '/'
            | '`'
            | '~'
    )
}

/// Token counts for the two sides of an exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeTokens {
    /// User turn tokens
    pub user: u64,
    /// Assistant turn tokens
    pub assistant: u64,
}

impl ExchangeTokens {
    /// Create a new token pair.
    pub fn new(user: u64, assistant: u64) -> Self {
        Self { user, assistant }
    }

    /// Get total tokens.
    pub fn total(&self) -> u64 {
        self.user + self.assistant
    }
}

impl std::ops::Add for ExchangeTokens {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            user: self.user + other.user,
            assistant: self.assistant + other.assistant,
        }
    }
}

impl std::ops::AddAssign for ExchangeTokens {
    fn add_assign(&mut self, other: Self) {
        self.user += other.user;
        self.assistant += other.assistant;
    }
}

/// How far an estimate is from a known token count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationAccuracy {
    pub text_length: usize,
    pub estimated_tokens: u64,
    pub chars_per_token: f64,
    pub actual_tokens: Option<u64>,
    pub estimation_ratio: Option<f64>,
    pub estimation_error: Option<u64>,
    pub estimation_error_percent: Option<f64>,
}
