//! Query complexity scoring.
//!
//! Scores a free-text query between 0.0 (trivial) and 1.0 (demanding) from
//! four weighted factors: length, analysis keywords, code content and question
//! patterns. Keyword scoring is damped against repetition and stuffing so the
//! score can't be inflated by pasting the same verb many times.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Score returned for empty input. Kept above zero so downstream budgets never
/// see a degenerate complexity.
pub const EMPTY_QUERY_COMPLEXITY: f64 = 0.1;

const LENGTH_WEIGHT: f64 = 0.25;
const KEYWORD_WEIGHT: f64 = 0.30;
const CODE_WEIGHT: f64 = 0.25;
const QUESTION_WEIGHT: f64 = 0.20;

/// Multiplier applied in tools mode.
const TOOLS_MODE_ADJUSTMENT: f64 = 1.2;

const SHORT_QUERY: usize = 50;
const MEDIUM_QUERY: usize = 150;
const LONG_QUERY: usize = 300;

/// Keywords per 10 characters above which the keyword score is halved.
const STUFFING_DENSITY: f64 = 0.3;

/// Analysis verbs and their weights.
const ANALYSIS_KEYWORDS: &[(&str, f64)] = &[
    ("analyze", 2.0),
    ("explain", 1.5),
    ("compare", 2.0),
    ("evaluate", 2.5),
    ("implement", 3.0),
    ("create", 2.0),
    ("design", 2.5),
    ("develop", 2.5),
    ("optimize", 2.5),
    ("debug", 2.0),
    ("refactor", 2.0),
    ("review", 1.5),
    ("summarize", 1.5),
    ("research", 2.0),
    ("investigate", 2.0),
];

/// Question indicators and their weights.
const QUESTION_INDICATORS: &[(&str, f64)] = &[
    ("how", 1.0),
    ("what", 0.5),
    ("why", 1.5),
    ("when", 0.5),
    ("where", 0.5),
    ("which", 0.8),
    ("who", 0.3),
    ("can you", 1.2),
    ("could you", 1.2),
    ("explain how", 2.0),
    ("show me", 1.5),
    ("help me", 1.8),
];

/// Markers counted when deciding whether a query asks several questions.
const QUESTION_MARKERS: &[&str] = &["?", "how", "what", "why", "when", "where", "which"];

/// Interaction mode, which selects the budget profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    /// Plain conversation
    #[default]
    Chat,
    /// Tool-calling conversation with tool definitions in the prompt
    Tools,
}

impl InteractionMode {
    /// Parse a mode name, falling back to chat for anything unrecognized.
    pub fn parse_lossy(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionMode::Chat => "chat",
            InteractionMode::Tools => "tools",
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(InteractionMode::Chat),
            "tools" => Ok(InteractionMode::Tools),
            other => Err(format!("unknown interaction mode: {}", other)),
        }
    }
}

/// Kinds of code content the analyzer looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePattern {
    FencedBlock,
    InlineCode,
    FunctionDef,
    ClassDef,
    Import,
    MarkupTag,
}

impl CodePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePattern::FencedBlock => "fenced_block",
            CodePattern::InlineCode => "inline_code",
            CodePattern::FunctionDef => "function_def",
            CodePattern::ClassDef => "class_def",
            CodePattern::Import => "import",
            CodePattern::MarkupTag => "markup_tag",
        }
    }

    /// Score contributed by each match.
    fn weight(&self) -> f64 {
        match self {
            CodePattern::FencedBlock => 0.5,
            _ => 0.1,
        }
    }
}

static CODE_PATTERNS: OnceLock<Vec<(CodePattern, Regex)>> = OnceLock::new();

fn code_patterns() -> &'static [(CodePattern, Regex)] {
    CODE_PATTERNS.get_or_init(|| {
        vec![
            (
                CodePattern::FencedBlock,
                Regex::new(r"(?mi)```[\s\S]*?```").expect("Invalid fenced block pattern"),
            ),
            (
                CodePattern::InlineCode,
                Regex::new(r"(?mi)`[^`]+`").expect("Invalid inline code pattern"),
            ),
            (
                CodePattern::FunctionDef,
                Regex::new(r"(?mi)def\s+\w+").expect("Invalid def pattern"),
            ),
            (
                CodePattern::ClassDef,
                Regex::new(r"(?mi)class\s+\w+").expect("Invalid class pattern"),
            ),
            (
                CodePattern::Import,
                Regex::new(r"(?mi)import\s+\w+").expect("Invalid import pattern"),
            ),
            (
                CodePattern::MarkupTag,
                Regex::new(r"(?mi)<[\w/]+>").expect("Invalid tag pattern"),
            ),
        ]
    })
}

/// One weighted factor of a complexity breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    /// Normalized score in [0, 1]
    pub score: f64,
    /// Weight in the final sum
    pub weight: f64,
    /// Human-readable detail
    pub details: String,
}

/// Per-factor view of a complexity score, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityBreakdown {
    pub length: FactorScore,
    pub keywords: FactorScore,
    pub code: FactorScore,
    pub questions: FactorScore,
    pub mode_adjustment: f64,
    pub total: f64,
}

/// Scores query complexity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityAnalyzer;

impl ComplexityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Complexity of `query` in [0, 1].
    pub fn analyze(&self, query: &str, mode: InteractionMode) -> f64 {
        let text = query.trim().to_lowercase();
        if text.is_empty() {
            return EMPTY_QUERY_COMPLEXITY;
        }
        let length = text.chars().count();

        let base = self.length_score(length) * LENGTH_WEIGHT
            + self.keyword_score(&text) * KEYWORD_WEIGHT
            + self.code_score(query) * CODE_WEIGHT
            + self.question_score(&text) * QUESTION_WEIGHT;

        (base * mode_adjustment(mode)).clamp(0.0, 1.0)
    }

    /// Length factor with diminishing returns past the long-query threshold.
    pub fn length_score(&self, length: usize) -> f64 {
        if length <= SHORT_QUERY {
            0.1
        } else if length <= MEDIUM_QUERY {
            0.3
        } else if length <= LONG_QUERY {
            0.6
        } else {
            let excess = (length - LONG_QUERY) as f64;
            (0.6 + (excess / 1000.0 * 0.3).min(0.3)).min(0.9)
        }
    }

    /// Keyword factor for lowercased text.
    ///
    /// Each keyword contributes `weight * sqrt(count)`. The total is halved
    /// when keywords make up more than 0.3 occurrences per 10 characters.
    pub fn keyword_score(&self, text: &str) -> f64 {
        let text = text.to_lowercase();
        let length = text.chars().count();

        let mut weighted = 0.0;
        let mut occurrences = 0usize;
        for (keyword, weight) in ANALYSIS_KEYWORDS {
            let count = text.matches(keyword).count();
            if count > 0 {
                weighted += weight * (count as f64).sqrt();
                occurrences += count;
            }
        }

        if weighted == 0.0 {
            return 0.0;
        }

        let density = occurrences as f64 / (length as f64 / 10.0).max(1.0);
        if density > STUFFING_DENSITY {
            weighted *= 0.5;
        }

        (weighted / 10.0).min(1.0)
    }

    /// Code factor, matched against the original-case text.
    pub fn code_score(&self, text: &str) -> f64 {
        let score: f64 = code_patterns()
            .iter()
            .map(|(pattern, re)| re.find_iter(text).count() as f64 * pattern.weight())
            .sum();
        score.min(1.0)
    }

    /// Question factor for lowercased text.
    pub fn question_score(&self, text: &str) -> f64 {
        let text = text.to_lowercase();
        let mut score: f64 = QUESTION_INDICATORS
            .iter()
            .filter(|(indicator, _)| text.contains(indicator))
            .map(|(_, weight)| weight)
            .sum();

        let markers = QUESTION_MARKERS
            .iter()
            .filter(|marker| text.contains(*marker))
            .count();
        if markers > 1 {
            score *= 1.2;
        }

        (score / 5.0).min(1.0)
    }

    /// Detailed per-factor analysis.
    pub fn breakdown(&self, query: &str, mode: InteractionMode) -> ComplexityBreakdown {
        let text = query.trim().to_lowercase();
        let length = text.chars().count();

        let length_factor = FactorScore {
            score: self.length_score(length),
            weight: LENGTH_WEIGHT,
            details: format!("Text length: {} chars", length),
        };
        let keywords = FactorScore {
            score: if text.is_empty() { 0.0 } else { self.keyword_score(&text) },
            weight: KEYWORD_WEIGHT,
            details: keyword_details(&text),
        };
        let code = FactorScore {
            score: self.code_score(query),
            weight: CODE_WEIGHT,
            details: code_details(query),
        };
        let questions = FactorScore {
            score: self.question_score(&text),
            weight: QUESTION_WEIGHT,
            details: question_details(&text),
        };

        ComplexityBreakdown {
            length: length_factor,
            keywords,
            code,
            questions,
            mode_adjustment: mode_adjustment(mode),
            total: self.analyze(query, mode),
        }
    }
}

fn mode_adjustment(mode: InteractionMode) -> f64 {
    match mode {
        InteractionMode::Tools => TOOLS_MODE_ADJUSTMENT,
        InteractionMode::Chat => 1.0,
    }
}

fn keyword_details(text: &str) -> String {
    let found: Vec<String> = ANALYSIS_KEYWORDS
        .iter()
        .filter_map(|(keyword, _)| {
            let count = text.matches(keyword).count();
            (count > 0).then(|| format!("{}({})", keyword, count))
        })
        .collect();
    if found.is_empty() {
        "Keywords: none".to_string()
    } else {
        format!("Keywords: {}", found.join(", "))
    }
}

fn code_details(text: &str) -> String {
    let found: Vec<String> = code_patterns()
        .iter()
        .filter_map(|(pattern, re)| {
            let count = re.find_iter(text).count();
            (count > 0).then(|| format!("{}({})", pattern.as_str(), count))
        })
        .collect();
    if found.is_empty() {
        "Code patterns: none".to_string()
    } else {
        format!("Code patterns: {}", found.join(", "))
    }
}

fn question_details(text: &str) -> String {
    let found: Vec<&str> = QUESTION_INDICATORS
        .iter()
        .filter(|(indicator, _)| text.contains(indicator))
        .map(|(indicator, _)| *indicator)
        .collect();
    let mut details = if found.is_empty() {
        "Indicators: none".to_string()
    } else {
        format!("Indicators: {}", found.join(", "))
    };
    let question_marks = text.matches('?').count();
    if question_marks > 0 {
        details.push_str(&format!(", Question marks: {}", question_marks));
    }
    details
}
