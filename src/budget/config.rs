//! Budget and estimation configuration.

use serde::{Deserialize, Serialize};

use crate::budget::estimator::{TokenEstimator, DEFAULT_CHARS_PER_TOKEN, DEFAULT_SAFETY_MARGIN};
use crate::budget::validator::ValidationThresholds;

/// Parameters for the token estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Characters per token before corrections
    pub chars_per_token: f64,
    /// Multiplier applied to the corrected estimate
    pub safety_margin: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl EstimatorConfig {
    /// Set the characters-per-token ratio.
    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = ratio;
        self
    }

    /// Set the safety margin.
    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Build the estimator. Invalid values fall back to defaults.
    pub fn build(&self) -> TokenEstimator {
        TokenEstimator::new(self.chars_per_token, self.safety_margin)
    }
}

/// Configuration for context preparation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Floor for the `conversation_memory` bucket (0 = none)
    pub minimum_memory_tokens: u64,

    /// Number of recent exchanges always included, even over budget
    pub minimum_exchanges: usize,

    /// Estimator parameters
    pub estimator: EstimatorConfig,

    /// Validation thresholds
    pub validation: ValidationThresholds,
}

impl BudgetConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum memory floor.
    pub fn with_minimum_memory_tokens(mut self, tokens: u64) -> Self {
        self.minimum_memory_tokens = tokens;
        self
    }

    /// Set the minimum number of exchanges.
    pub fn with_minimum_exchanges(mut self, count: usize) -> Self {
        self.minimum_exchanges = count;
        self
    }

    /// Set the estimator parameters.
    pub fn with_estimator(mut self, estimator: EstimatorConfig) -> Self {
        self.estimator = estimator;
        self
    }

    /// Set the validation thresholds.
    pub fn with_validation(mut self, validation: ValidationThresholds) -> Self {
        self.validation = validation;
        self
    }
}
