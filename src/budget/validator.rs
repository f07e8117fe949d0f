//! Sanity checks for a computed allocation.
//!
//! Validation only reports: it never changes the allocation. Exceeding the
//! window (or a zero window) makes the report invalid; every other finding is
//! a warning.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::budget::allocator::{Bucket, BudgetAllocation};

/// Thresholds applied by the validator, as fractions of the context window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationThresholds {
    /// Utilization above which a warning is raised
    pub max_utilization: f64,
    /// Minimum `response_generation` share
    pub min_response_ratio: f64,
    /// Minimum `conversation_memory` share
    pub min_memory_ratio: f64,
    /// Minimum `safety_margin` share
    pub min_safety_ratio: f64,
    /// Complexity above which a query counts as demanding
    pub high_complexity: f64,
    /// Response share a demanding query should get
    pub complex_response_ratio: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            max_utilization: 0.95,
            min_response_ratio: 0.10,
            min_memory_ratio: 0.30,
            min_safety_ratio: 0.02,
            high_complexity: 0.7,
            complex_response_ratio: 0.20,
        }
    }
}

impl ValidationThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_utilization(mut self, ratio: f64) -> Self {
        self.max_utilization = ratio;
        self
    }

    pub fn with_min_response_ratio(mut self, ratio: f64) -> Self {
        self.min_response_ratio = ratio;
        self
    }

    pub fn with_min_memory_ratio(mut self, ratio: f64) -> Self {
        self.min_memory_ratio = ratio;
        self
    }

    pub fn with_min_safety_ratio(mut self, ratio: f64) -> Self {
        self.min_safety_ratio = ratio;
        self
    }

    pub fn with_high_complexity(mut self, score: f64) -> Self {
        self.high_complexity = score;
        self
    }

    pub fn with_complex_response_ratio(mut self, ratio: f64) -> Self {
        self.complex_response_ratio = ratio;
        self
    }
}

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    InvalidWindow,
    ExceedsWindow,
    HighUtilization,
    LowResponse,
    LowMemory,
    LowSafetyMargin,
    ComplexityMismatch,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn warning(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    fn error(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// One bucket's share of the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketShare {
    pub bucket: Bucket,
    pub tokens: u64,
    /// Percent of the context window
    pub percent: f64,
}

/// Overall budget health derived from a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    /// No findings.
    Ok,
    /// Usable, with warnings.
    Warning,
    /// Over the window or otherwise unusable as-is.
    Exceeded,
}

/// Result of validating an allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub total: u64,
    pub context_window: u64,
    pub utilization_pct: f64,
    /// Window minus total; negative when overcommitted.
    pub remaining_tokens: i64,
    pub issues: Vec<ValidationIssue>,
    pub recommendations: Vec<String>,
    pub breakdown: Vec<BucketShare>,
    /// Informational notes.
    pub info: Vec<String>,
}

impl ValidationReport {
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }

    pub fn status(&self) -> BudgetStatus {
        if !self.is_valid {
            BudgetStatus::Exceeded
        } else if self.issues.is_empty() {
            BudgetStatus::Ok
        } else {
            BudgetStatus::Warning
        }
    }

    /// Human-readable multi-line summary.
    pub fn format(&self) -> String {
        let mut out = String::new();
        let status = match self.status() {
            BudgetStatus::Ok => "OK",
            BudgetStatus::Warning => "WARNING",
            BudgetStatus::Exceeded => "EXCEEDED",
        };
        let _ = writeln!(
            out,
            "Budget {}: {} / {} tokens ({:.1}% utilization, {} remaining)",
            status, self.total, self.context_window, self.utilization_pct, self.remaining_tokens
        );
        for share in &self.breakdown {
            let _ = writeln!(
                out,
                "  {:<20} {:>8} ({:.1}%)",
                share.bucket.as_str(),
                share.tokens,
                share.percent
            );
        }
        for issue in &self.issues {
            let label = match issue.severity {
                Severity::Warning => "warning",
                Severity::Error => "error",
            };
            let _ = writeln!(out, "  {}: {}", label, issue.message);
        }
        for recommendation in &self.recommendations {
            let _ = writeln!(out, "  hint: {}", recommendation);
        }
        for note in &self.info {
            let _ = writeln!(out, "  {}", note);
        }
        out
    }
}

/// Checks allocations against configurable thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetValidator {
    thresholds: ValidationThresholds,
}

impl BudgetValidator {
    pub fn new(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ValidationThresholds {
        &self.thresholds
    }

    /// Validate `allocation` for `context_window` and the query's complexity.
    pub fn validate(
        &self,
        allocation: &BudgetAllocation,
        context_window: u64,
        complexity: f64,
    ) -> ValidationReport {
        let total = allocation.total();
        let remaining_tokens = context_window as i64 - total as i64;
        let mut report = ValidationReport {
            is_valid: true,
            total,
            context_window,
            utilization_pct: 0.0,
            remaining_tokens,
            issues: Vec::new(),
            recommendations: Vec::new(),
            breakdown: Vec::new(),
            info: Vec::new(),
        };

        if context_window == 0 {
            report.is_valid = false;
            report.issues.push(ValidationIssue::error(
                IssueKind::InvalidWindow,
                "Invalid context window: 0 tokens",
            ));
            return report;
        }

        let window = context_window as f64;
        let ratio = |tokens: u64| tokens as f64 / window;
        let utilization = ratio(total);
        let t = &self.thresholds;
        report.utilization_pct = utilization * 100.0;
        report.breakdown = allocation
            .iter()
            .map(|(bucket, tokens)| BucketShare {
                bucket,
                tokens,
                percent: ratio(tokens) * 100.0,
            })
            .collect();

        if total > context_window {
            report.is_valid = false;
            report.issues.push(ValidationIssue::error(
                IssueKind::ExceedsWindow,
                format!(
                    "Budget exceeds context window by {} tokens",
                    total - context_window
                ),
            ));
            report
                .recommendations
                .push("Lower the minimum memory floor or use a larger context window".to_string());
        }

        if utilization > t.max_utilization {
            report.issues.push(ValidationIssue::warning(
                IssueKind::HighUtilization,
                format!("High context utilization: {:.1}%", utilization * 100.0),
            ));
        }

        let response_ratio = ratio(allocation.response_generation);
        if response_ratio < t.min_response_ratio {
            report.issues.push(ValidationIssue::warning(
                IssueKind::LowResponse,
                format!(
                    "Low response allocation: {:.1}%, responses may be truncated",
                    response_ratio * 100.0
                ),
            ));
        }

        let memory_ratio = ratio(allocation.conversation_memory);
        if memory_ratio < t.min_memory_ratio {
            report.issues.push(ValidationIssue::warning(
                IssueKind::LowMemory,
                format!(
                    "Low memory allocation: {:.1}%, older context may be lost",
                    memory_ratio * 100.0
                ),
            ));
        }

        let safety_ratio = ratio(allocation.safety_margin);
        if safety_ratio < t.min_safety_ratio {
            report.issues.push(ValidationIssue::warning(
                IssueKind::LowSafetyMargin,
                format!("Insufficient safety margin: {:.1}%", safety_ratio * 100.0),
            ));
        }

        if complexity > t.high_complexity && response_ratio < t.complex_response_ratio {
            report.issues.push(ValidationIssue::warning(
                IssueKind::ComplexityMismatch,
                format!(
                    "High complexity query ({:.2}) with low response allocation ({:.1}%)",
                    complexity,
                    response_ratio * 100.0
                ),
            ));
            report
                .recommendations
                .push("Consider increasing response allocation for complex queries".to_string());
        }

        if report.is_valid {
            report.info.push(format!(
                "Budget validation passed: {:.1}% utilization",
                report.utilization_pct
            ));
        }

        report
    }
}
