//! Context budget management.
//!
//! This module decides how a model's context window is shared out for one
//! request.
//!
//! # Overview
//!
//! The budget system consists of:
//! - **TokenEstimator**: Estimates token counts from text (local servers don't expose their tokenizer)
//! - **ComplexityAnalyzer**: Scores how demanding a query is, resisting keyword stuffing
//! - **BudgetAllocator**: Splits the window into buckets, skewed by complexity
//! - **BudgetValidator**: Reports allocations that overrun or starve a bucket
//!
//! # Example
//!
//! ```ignore
//! use chatmem::budget::{BudgetAllocator, BudgetValidator, InteractionMode};
//!
//! let allocator = BudgetAllocator::new();
//! let complexity = allocator.analyzer().analyze("implement a cache", InteractionMode::Chat);
//! let allocation =
//!     allocator.allocate_with_complexity(32_768, InteractionMode::Chat, complexity, 0);
//!
//! let report = BudgetValidator::default().validate(&allocation, 32_768, complexity);
//! if !report.is_valid {
//!     eprintln!("{}", report.format());
//! }
//! ```

mod allocator;
mod complexity;
mod config;
mod estimator;
mod validator;

pub use allocator::{
    Bucket, BudgetAllocation, BudgetAllocator, BudgetProfile, RESERVED_FLOOR_PCT, RESPONSE_FLOOR_PCT,
};
pub use complexity::{
    CodePattern, ComplexityAnalyzer, ComplexityBreakdown, FactorScore, InteractionMode,
    EMPTY_QUERY_COMPLEXITY,
};
pub use config::{BudgetConfig, EstimatorConfig};
pub use estimator::{
    EstimationAccuracy, ExchangeTokens, TokenEstimator, DEFAULT_CHARS_PER_TOKEN,
    DEFAULT_SAFETY_MARGIN,
};
pub use validator::{
    BucketShare, BudgetStatus, BudgetValidator, IssueKind, Severity, ValidationIssue,
    ValidationReport, ValidationThresholds,
};
