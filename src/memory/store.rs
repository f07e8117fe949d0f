use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::budget::TokenEstimator;
use crate::memory::config::MemoryStoreConfig;
use crate::memory::conversation::{trim_to_budget, Conversation};
use crate::memory::record::{ConversationSummary, DateRange, Exchange, ModelMemory};

const MEMORY_FILE_EXTENSION: &str = "json";
const LEGACY_FILE_NAME: &str = "memory.json";
const MODEL_HASH_CHARS: usize = 8;

/// Errors that can occur during memory storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Empty or whitespace-only model identity.
    #[error("Invalid model identity")]
    InvalidModel,
}

/// Result type for memory storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of appending an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Exchanges in the conversation after the append.
    pub total_exchanges: usize,
    /// Oldest exchanges dropped to stay inside the context window.
    pub trimmed: usize,
}

/// Summary statistics for one model's memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub model: String,
    pub total_exchanges: usize,
    pub summarized_conversations: usize,
    pub total_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub date_range: Option<DateRange>,
    pub memory_file: PathBuf,
    /// Whether a memory file exists on disk yet.
    pub persisted: bool,
}

/// Outcome of importing a legacy single-file memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated_exchanges: usize,
    /// Models that received exchanges, sorted.
    pub models: Vec<String>,
    /// Where the legacy file was copied, if anything was migrated.
    pub backup_path: Option<PathBuf>,
}

/// Per-model conversation memory backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    base_dir: PathBuf,
    window_trim_ratio: f64,
    estimator: TokenEstimator,
}

impl MemoryStore {
    /// Create a store, creating the memory directory if needed.
    pub fn new(config: MemoryStoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(&config.memory_dir)?;
        Ok(Self {
            base_dir: config.memory_dir,
            window_trim_ratio: config.window_trim_ratio,
            estimator: TokenEstimator::default(),
        })
    }

    /// Use a custom estimator for missing token counts.
    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Get the memory directory path.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Default location of the legacy single-file memory.
    pub fn legacy_path(&self) -> PathBuf {
        self.base_dir.join(LEGACY_FILE_NAME)
    }

    /// Path of the memory file for a model.
    pub fn memory_path(&self, model: &str) -> PathBuf {
        self.base_dir.join(model_file_name(model))
    }

    /// Load a model's memory.
    ///
    /// A missing file yields fresh memory. Malformed content is repaired where
    /// possible; otherwise the file is moved to `<file>.corrupted.<ts>` and
    /// replaced with fresh memory.
    /// Only I/O failures other than a missing file are errors.
    pub fn load(&self, model: &str) -> StoreResult<ModelMemory> {
        let model = validate_model(model)?;
        let path = self.memory_path(model);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ModelMemory::new(model));
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        let repaired = serde_json::from_str::<Value>(&content)
            .ok()
            .and_then(|value| ModelMemory::repair(&value, model, &self.estimator));

        let mut memory = match repaired {
            Some((memory, fixes)) => {
                if !fixes.is_empty() {
                    warn!(model, path = %path.display(), fixes = ?fixes, "Repaired memory file");
                }
                memory
            }
            None => {
                warn!(model, path = %path.display(), "Memory file is corrupted, starting fresh");
                self.backup_corrupted(&path);
                let mut memory = ModelMemory::new(model);
                if let Err(err) = self.save(&mut memory) {
                    warn!(model, error = %err, "Failed to replace corrupted memory file");
                }
                memory
            }
        };

        memory.metadata.last_accessed = Some(Utc::now());
        Ok(memory)
    }

    /// Atomically persist a model's memory, refreshing its metadata.
    pub fn save(&self, memory: &mut ModelMemory) -> StoreResult<()> {
        let model = validate_model(&memory.metadata.model)?.to_string();
        memory.metadata.last_modified = Utc::now();
        memory.metadata.total_exchanges = memory.current_conversation.len() as u64;

        let json = serde_json::to_string_pretty(memory)?;
        let path = self.memory_path(&model);
        let temp_path = path.with_extension(format!("{}.tmp", MEMORY_FILE_EXTENSION));

        let result = write_atomic(&temp_path, &path, json.as_bytes());
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    /// Append an exchange and drop the oldest exchanges past
    /// `context_window * window_trim_ratio`.
    pub fn append_exchange(
        &self,
        model: &str,
        exchange: Exchange,
        context_window: u64,
    ) -> StoreResult<AppendOutcome> {
        let mut memory = self.load(model)?;
        memory.current_conversation.push(exchange);
        let trimmed = memory
            .current_conversation
            .trim_to_window(context_window, self.window_trim_ratio);
        if trimmed > 0 {
            info!(model, trimmed, context_window, "Trimmed oldest exchanges to fit window");
        }
        self.save(&mut memory)?;

        let outcome = AppendOutcome {
            total_exchanges: memory.current_conversation.len(),
            trimmed,
        };
        debug!(model, total = outcome.total_exchanges, "Appended exchange");
        Ok(outcome)
    }

    /// Current conversation for a model.
    pub fn conversation(&self, model: &str) -> StoreResult<Conversation> {
        Ok(self.load(model)?.current_conversation)
    }

    /// Recent history, optionally capped by exchange count and stored tokens.
    pub fn history(
        &self,
        model: &str,
        max_exchanges: Option<usize>,
        max_tokens: Option<u64>,
    ) -> StoreResult<Vec<Exchange>> {
        let conversation = self.conversation(model)?;
        let mut selected = match max_exchanges {
            Some(count) if count > 0 => conversation.recent(count),
            _ => conversation.exchanges(),
        };
        if let Some(budget) = max_tokens {
            selected = trim_to_budget(selected, budget);
        }
        Ok(selected.to_vec())
    }

    /// Clear a model's conversation, keeping a summary of what was removed.
    pub fn clear(&self, model: &str) -> StoreResult<Option<ConversationSummary>> {
        let mut memory = self.load(model)?;
        let summary = memory.summarize();
        self.save(&mut memory)?;
        if let Some(summary) = &summary {
            info!(model, exchanges = summary.exchange_count, "Cleared conversation");
        }
        Ok(summary)
    }

    /// Models with a readable memory file, sorted.
    pub fn list_models(&self) -> StoreResult<Vec<String>> {
        let mut models = Vec::new();

        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(MEMORY_FILE_EXTENSION)
            {
                continue;
            }

            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(&content) else {
                continue;
            };
            if let Some(model) = value
                .get("metadata")
                .and_then(|metadata| metadata.get("model"))
                .and_then(Value::as_str)
                .filter(|model| !model.is_empty())
            {
                models.push(model.to_string());
            }
        }

        models.sort();
        models.dedup();
        Ok(models)
    }

    /// Statistics for a model's memory.
    pub fn stats(&self, model: &str) -> StoreResult<MemoryStats> {
        let memory = self.load(model)?;
        let memory_file = self.memory_path(model);
        Ok(MemoryStats {
            model: memory.metadata.model.clone(),
            total_exchanges: memory.current_conversation.len(),
            summarized_conversations: memory.summarized_conversations.len(),
            total_tokens: memory.current_conversation.total_tokens(),
            created_at: memory.metadata.created_at,
            last_modified: memory.metadata.last_modified,
            date_range: memory.current_conversation.date_range(),
            persisted: memory_file.exists(),
            memory_file,
        })
    }

    /// Import a legacy single-file memory into per-model files.
    ///
    /// Exchanges carrying `metadata.model` go to that model, the rest to
    /// `default_model`. The legacy file is left in place and copied to
    /// `<path>.migrated.<unix-ts>` once anything has been imported.
    pub fn migrate_legacy(&self, path: &Path, default_model: &str) -> StoreResult<MigrationReport> {
        let default_model = validate_model(default_model)?;

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No legacy memory file found");
                return Ok(MigrationReport::default());
            }
            Err(err) => return Err(StoreError::Io(err)),
        };
        let legacy: Value = serde_json::from_str(&content)?;

        let mut candidates: Vec<&Value> = Vec::new();
        if let Some(current) = legacy.get("current_conversation").and_then(Value::as_array) {
            candidates.extend(current);
        }
        if let Some(recent) = legacy.get("recent_conversations").and_then(Value::as_array) {
            for conversation in recent.iter().filter_map(Value::as_array) {
                candidates.extend(conversation);
            }
        }

        let mut by_model: BTreeMap<String, Vec<Exchange>> = BTreeMap::new();
        for candidate in candidates {
            let Some(exchange) = Exchange::from_value(candidate, &self.estimator) else {
                continue;
            };
            let model = candidate
                .get("metadata")
                .and_then(|metadata| metadata.get("model"))
                .and_then(Value::as_str)
                .filter(|model| !model.trim().is_empty())
                .unwrap_or(default_model);
            by_model.entry(model.to_string()).or_default().push(exchange);
        }

        if by_model.is_empty() {
            info!(path = %path.display(), "Legacy memory file is empty");
            return Ok(MigrationReport::default());
        }

        let mut report = MigrationReport::default();
        for (model, exchanges) in by_model {
            let mut memory = self.load(&model)?;
            report.migrated_exchanges += exchanges.len();
            for exchange in exchanges {
                memory.current_conversation.push(exchange);
            }
            self.save(&mut memory)?;
            report.models.push(model);
        }

        let backup_path = suffixed_path(path, &format!("migrated.{}", Utc::now().timestamp()));
        fs::copy(path, &backup_path)?;
        info!(
            exchanges = report.migrated_exchanges,
            backup = %backup_path.display(),
            "Migrated legacy memory"
        );
        report.backup_path = Some(backup_path);
        Ok(report)
    }

    /// Whether `path` has already been imported, judged by a
    /// `<path>.migrated.<ts>` backup next to it.
    pub fn is_migrated(&self, path: &Path) -> bool {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        let prefix = format!("{}.migrated.", name.to_string_lossy());
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        fs::read_dir(parent)
            .map(|entries| {
                entries
                    .flatten()
                    .any(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            })
            .unwrap_or(false)
    }

    fn backup_corrupted(&self, path: &Path) {
        let backup_path = suffixed_path(path, &format!("corrupted.{}", Utc::now().timestamp()));
        match fs::rename(path, &backup_path) {
            Ok(_) => warn!(backup = %backup_path.display(), "Corrupted memory backed up"),
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to back up corrupted memory"),
        }
    }
}

fn validate_model(model: &str) -> StoreResult<&str> {
    if model.trim().is_empty() {
        Err(StoreError::InvalidModel)
    } else {
        Ok(model)
    }
}

fn write_atomic(temp_path: &Path, path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut file = fs::File::create(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(temp_path, path)?;
    Ok(())
}

fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// File name for a model: a filesystem-safe rendering of the name plus a
/// short SHA-256 suffix so distinct names never collide.
pub fn model_file_name(model: &str) -> String {
    let safe: String = model
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '.' => '-',
            ' ' => '_',
            c if c.is_alphanumeric() || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect();

    let digest = hex::encode(Sha256::digest(model.as_bytes()));
    format!(
        "{}_{}.{}",
        safe,
        &digest[..MODEL_HASH_CHARS],
        MEMORY_FILE_EXTENSION
    )
}
