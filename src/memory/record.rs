use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::budget::{ExchangeTokens, TokenEstimator};
use crate::memory::conversation::Conversation;

/// Current memory file schema version.
pub const MEMORY_SCHEMA_VERSION: &str = "3.0";

/// One side of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Message text.
    pub content: String,
    /// Token count, supplied by the caller or estimated.
    pub tokens: u64,
}

impl Turn {
    pub fn new(content: impl Into<String>, tokens: u64) -> Self {
        Self {
            content: content.into(),
            tokens,
        }
    }
}

/// One user turn and the assistant reply to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// Timestamp when the exchange was recorded.
    pub timestamp: DateTime<Utc>,
    pub user: Turn,
    pub assistant: Turn,
}

impl Exchange {
    /// Create an exchange with token counts estimated from the content.
    pub fn new(
        user: impl Into<String>,
        assistant: impl Into<String>,
        estimator: &TokenEstimator,
    ) -> Self {
        let user = user.into();
        let assistant = assistant.into();
        let user_tokens = estimator.estimate(&user);
        let assistant_tokens = estimator.estimate(&assistant);
        Self::with_tokens(user, user_tokens, assistant, assistant_tokens)
    }

    /// Create an exchange with caller-supplied token counts.
    pub fn with_tokens(
        user: impl Into<String>,
        user_tokens: u64,
        assistant: impl Into<String>,
        assistant_tokens: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user: Turn::new(user, user_tokens),
            assistant: Turn::new(assistant, assistant_tokens),
        }
    }

    /// Replace the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Stored token counts for both turns.
    pub fn tokens(&self) -> ExchangeTokens {
        ExchangeTokens::new(self.user.tokens, self.assistant.tokens)
    }

    /// Total stored tokens.
    pub fn token_count(&self) -> u64 {
        self.user.tokens.saturating_add(self.assistant.tokens)
    }

    /// Rebuild an exchange from loosely shaped JSON.
    ///
    /// Accepts turns stored as `{content, tokens}` objects or as bare strings,
    /// estimates missing token counts and falls back to `now` for missing or
    /// unparseable timestamps. Returns `None` unless both turns are present.
    pub fn from_value(value: &Value, estimator: &TokenEstimator) -> Option<Self> {
        let object = value.as_object()?;
        let user = turn_from_value(object.get("user")?, estimator)?;
        let assistant = turn_from_value(object.get("assistant")?, estimator)?;
        let timestamp = object
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);
        Some(Self {
            timestamp,
            user,
            assistant,
        })
    }
}

fn turn_from_value(value: &Value, estimator: &TokenEstimator) -> Option<Turn> {
    match value {
        Value::String(content) => Some(Turn::new(content.clone(), estimator.estimate(content))),
        Value::Object(object) => {
            let content = object
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let tokens = object
                .get("tokens")
                .and_then(parse_tokens)
                .unwrap_or_else(|| estimator.estimate(&content));
            Some(Turn::new(content, tokens))
        }
        _ => None,
    }
}

fn parse_tokens(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|tokens| tokens.is_finite() && *tokens >= 0.0)
            .map(|tokens| tokens as u64)
    })
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as UTC.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Metadata stored at the top of each model's memory file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Model identity that owns the file.
    pub model: String,
    /// Timestamp when the memory was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest save.
    pub last_modified: DateTime<Utc>,
    /// Memory schema version.
    pub version: String,
    /// Number of exchanges in the current conversation.
    pub total_exchanges: u64,
    /// Timestamp of the latest load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl MemoryMetadata {
    pub fn new(model: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            model: model.into(),
            created_at: timestamp,
            last_modified: timestamp,
            version: MEMORY_SCHEMA_VERSION.to_string(),
            total_exchanges: 0,
            last_accessed: None,
        }
    }
}

/// First and last timestamps of a run of exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Record left behind when a conversation is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub summarized_at: DateTime<Utc>,
    pub exchange_count: u64,
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

/// Everything persisted for one model identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMemory {
    pub metadata: MemoryMetadata,
    #[serde(default)]
    pub current_conversation: Conversation,
    #[serde(default)]
    pub summarized_conversations: Vec<ConversationSummary>,
}

impl ModelMemory {
    /// Create empty memory for a model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            metadata: MemoryMetadata::new(model, Utc::now()),
            current_conversation: Conversation::new(),
            summarized_conversations: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.metadata.model
    }

    /// Move the current conversation into a summary entry.
    ///
    /// Returns `None` and leaves the summaries untouched when there is nothing
    /// to summarize.
    pub fn summarize(&mut self) -> Option<ConversationSummary> {
        if self.current_conversation.is_empty() {
            return None;
        }
        let summary = ConversationSummary {
            summarized_at: Utc::now(),
            exchange_count: self.current_conversation.len() as u64,
            date_range: self.current_conversation.date_range(),
        };
        self.current_conversation = Conversation::new();
        self.metadata.total_exchanges = 0;
        self.summarized_conversations.push(summary.clone());
        Some(summary)
    }

    /// Rebuild memory from loosely shaped JSON, noting every fix applied.
    ///
    /// Returns `None` when the value is not a JSON object at all.
    pub fn repair(
        value: &Value,
        model: &str,
        estimator: &TokenEstimator,
    ) -> Option<(Self, Vec<String>)> {
        let object = value.as_object()?;
        let mut fixes = Vec::new();

        let metadata = match object.get("metadata") {
            Some(Value::Object(metadata)) => metadata.clone(),
            _ => {
                fixes.push("metadata missing or malformed".to_string());
                Map::new()
            }
        };

        let exchanges = match object.get("current_conversation") {
            Some(Value::Array(items)) => {
                let exchanges: Vec<Exchange> = items
                    .iter()
                    .filter_map(|item| Exchange::from_value(item, estimator))
                    .collect();
                if exchanges.len() != items.len() {
                    fixes.push(format!(
                        "dropped {} malformed exchanges",
                        items.len() - exchanges.len()
                    ));
                }
                exchanges
            }
            _ => {
                fixes.push("current_conversation missing or malformed".to_string());
                Vec::new()
            }
        };

        let summaries = match object.get("summarized_conversations") {
            Some(Value::Array(items)) => {
                let summaries: Vec<ConversationSummary> = items
                    .iter()
                    .filter_map(summary_from_value)
                    .collect();
                if summaries.len() != items.len() {
                    fixes.push(format!(
                        "dropped {} malformed summaries",
                        items.len() - summaries.len()
                    ));
                }
                summaries
            }
            _ => {
                fixes.push("summarized_conversations missing or malformed".to_string());
                Vec::new()
            }
        };

        let now = Utc::now();
        let stored_model = metadata
            .get("model")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty());
        if stored_model.is_none() {
            fixes.push("model name missing".to_string());
        }
        let created_at = metadata.get("created_at").and_then(parse_timestamp);
        if created_at.is_none() {
            fixes.push("created_at missing".to_string());
        }
        let created_at = created_at.unwrap_or(now);
        let version = metadata.get("version").and_then(Value::as_str);
        if version.is_none() {
            fixes.push("version missing".to_string());
        }

        let metadata = MemoryMetadata {
            model: stored_model.unwrap_or(model).to_string(),
            created_at,
            last_modified: metadata
                .get("last_modified")
                .and_then(parse_timestamp)
                .unwrap_or(created_at),
            version: version.unwrap_or(MEMORY_SCHEMA_VERSION).to_string(),
            total_exchanges: exchanges.len() as u64,
            last_accessed: metadata.get("last_accessed").and_then(parse_timestamp),
        };

        Some((
            Self {
                metadata,
                current_conversation: Conversation::from_exchanges(exchanges),
                summarized_conversations: summaries,
            },
            fixes,
        ))
    }
}

fn summary_from_value(value: &Value) -> Option<ConversationSummary> {
    let object = value.as_object()?;
    let date_range = object.get("date_range").and_then(|range| {
        Some(DateRange {
            start: range.get("start").and_then(parse_timestamp)?,
            end: range.get("end").and_then(parse_timestamp)?,
        })
    });
    Some(ConversationSummary {
        summarized_at: object.get("summarized_at").and_then(parse_timestamp)?,
        exchange_count: object.get("exchange_count").and_then(parse_tokens)?,
        date_range,
    })
}
