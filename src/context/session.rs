//! Caller-owned memory session.
//!
//! A [`MemorySession`] bundles the store and composer for one active model and
//! turns every failure into a logged, non-fatal outcome: preparing context
//! never fails, recording returns `false` rather than an error.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::budget::{BudgetAllocation, InteractionMode, TokenEstimator};
use crate::context::composer::{ChatMessage, ContextComposer, PreparedContext, Role};
use crate::memory::{
    trim_to_budget, BackgroundWriter, Exchange, MemoryStats, MemoryStore, StoreResult,
    WriterStats,
};
use crate::settings::Settings;

/// Share of the window used for history when no query is available.
const SIMPLE_CONTEXT_RATIO: f64 = 0.8;

/// Supplied token counts further than this from the estimate are suspicious.
const TOKEN_MISMATCH_RATIO: f64 = 0.5;

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub exchanges_added: u64,
    pub contexts_prepared: u64,
    pub failed_saves: u64,
    pub migrations_performed: u64,
}

/// Outcome of preparing context through a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    /// The prepared context, when preparation succeeded.
    pub prepared: Option<PreparedContext>,
    /// Why preparation failed; the caller continues with an empty context.
    pub error: Option<String>,
}

impl SessionContext {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Messages to send, empty on failure.
    pub fn messages(&self) -> &[ChatMessage] {
        self.prepared
            .as_ref()
            .map(|prepared| prepared.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.prepared
            .map(|prepared| prepared.messages)
            .unwrap_or_default()
    }
}

/// User message waiting for its assistant reply.
#[derive(Debug, Clone)]
struct PendingUser {
    content: String,
    tokens: Option<u64>,
}

/// Conversation memory for one active model.
pub struct MemorySession {
    store: MemoryStore,
    composer: ContextComposer,
    model: String,
    mode: InteractionMode,
    context_window: u64,
    writer: Option<BackgroundWriter>,
    pending: Option<PendingUser>,
    stats: SessionStats,
    last_allocation: Option<BudgetAllocation>,
}

impl MemorySession {
    /// Create a session over an existing store and composer.
    pub fn new(store: MemoryStore, composer: ContextComposer, model: impl Into<String>) -> Self {
        let store = store.with_estimator(*composer.estimator());
        Self {
            store,
            composer,
            model: model.into(),
            mode: InteractionMode::default(),
            context_window: crate::settings::DEFAULT_CONTEXT_WINDOW,
            writer: None,
            pending: None,
            stats: SessionStats::default(),
            last_allocation: None,
        }
    }

    /// Open a session from settings, importing a legacy memory file once.
    pub fn open(settings: &Settings) -> StoreResult<Self> {
        let store = MemoryStore::new(settings.store_config())?;
        let composer = ContextComposer::new(settings.budget_config());
        let mut session = Self::new(store, composer, settings.default_model.clone())
            .with_mode(settings.mode)
            .with_context_window(settings.context_window);

        let legacy_path = session.store.legacy_path();
        if legacy_path.exists() && !session.store.is_migrated(&legacy_path) {
            session.migrate_legacy(&legacy_path);
        }
        Ok(session)
    }

    pub fn with_mode(mut self, mode: InteractionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_context_window(mut self, context_window: u64) -> Self {
        self.context_window = context_window;
        self
    }

    /// Persist exchanges on a background task. Requires a tokio runtime.
    pub fn with_background_writes(mut self) -> Self {
        self.writer = Some(BackgroundWriter::spawn(self.store.clone()));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn context_window(&self) -> u64 {
        self.context_window
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn estimator(&self) -> &TokenEstimator {
        self.composer.estimator()
    }

    /// Switch the active model. A half-recorded exchange is discarded.
    pub fn set_model(&mut self, model: impl Into<String>) {
        if self.pending.take().is_some() {
            warn!(model = %self.model, "Discarding unpaired user message on model switch");
        }
        self.model = model.into();
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        self.mode = mode;
    }

    pub fn set_context_window(&mut self, context_window: u64) {
        self.context_window = context_window;
    }

    /// Prepare context for `query` with the session's mode and window.
    pub fn prepare_context(&mut self, query: &str) -> SessionContext {
        self.prepare_context_with(query, self.mode, self.context_window)
    }

    /// Prepare context with an explicit mode and window.
    pub fn prepare_context_with(
        &mut self,
        query: &str,
        mode: InteractionMode,
        context_window: u64,
    ) -> SessionContext {
        match self
            .composer
            .prepare_from_store(&self.store, &self.model, query, mode, context_window)
        {
            Ok(prepared) => {
                self.stats.contexts_prepared += 1;
                self.last_allocation = Some(prepared.allocation);
                SessionContext {
                    prepared: Some(prepared),
                    error: None,
                }
            }
            Err(err) => {
                error!(model = %self.model, error = %err, "Failed to prepare context");
                SessionContext {
                    prepared: None,
                    error: Some(format!("Failed to prepare context for {}: {}", self.model, err)),
                }
            }
        }
    }

    /// Recent history as messages, using 80% of the window, without any
    /// complexity analysis.
    pub fn recent_messages(&self, context_window: u64) -> Vec<ChatMessage> {
        let budget = (context_window as f64 * SIMPLE_CONTEXT_RATIO) as u64;
        let conversation = match self.store.conversation(&self.model) {
            Ok(conversation) => conversation,
            Err(err) => {
                error!(model = %self.model, error = %err, "Failed to load conversation");
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for exchange in trim_to_budget(conversation.exchanges(), budget) {
            if !exchange.user.content.is_empty() {
                messages.push(ChatMessage::user(exchange.user.content.clone()));
            }
            if !exchange.assistant.content.is_empty() {
                messages.push(ChatMessage::assistant(exchange.assistant.content.clone()));
            }
        }
        messages
    }

    /// Record a complete exchange. Missing token counts are estimated.
    pub fn record_exchange(
        &mut self,
        user: &str,
        assistant: &str,
        user_tokens: Option<u64>,
        assistant_tokens: Option<u64>,
    ) -> bool {
        let estimator = *self.composer.estimator();
        for warning in exchange_warnings(&estimator, user, assistant, user_tokens, assistant_tokens)
        {
            warn!(model = %self.model, "{}", warning);
        }

        let exchange = Exchange::with_tokens(
            user,
            user_tokens.unwrap_or_else(|| estimator.estimate(user)),
            assistant,
            assistant_tokens.unwrap_or_else(|| estimator.estimate(assistant)),
        );
        let tokens = exchange.tokens();

        let saved = match &self.writer {
            Some(writer) => writer.submit(self.model.clone(), exchange, self.context_window),
            None => match self
                .store
                .append_exchange(&self.model, exchange, self.context_window)
            {
                Ok(_) => true,
                Err(err) => {
                    error!(model = %self.model, error = %err, "Failed to save exchange");
                    false
                }
            },
        };

        if saved {
            self.stats.exchanges_added += 1;
            info!(
                model = %self.model,
                user_tokens = tokens.user,
                assistant_tokens = tokens.assistant,
                "Recorded exchange"
            );
        } else {
            self.stats.failed_saves += 1;
        }
        saved
    }

    /// Record one message, pairing each user message with the next assistant
    /// message.
    ///
    /// Returns `true` when the message was buffered or completed a saved
    /// exchange.
    pub fn push_message(&mut self, role: Role, content: &str, tokens: Option<u64>) -> bool {
        match role {
            Role::User => {
                if self.pending.is_some() {
                    warn!(model = %self.model, "Replacing unanswered user message");
                }
                self.pending = Some(PendingUser {
                    content: content.to_string(),
                    tokens,
                });
                true
            }
            Role::Assistant => match self.pending.take() {
                Some(user) => self.record_exchange(&user.content, content, user.tokens, tokens),
                None => {
                    warn!(model = %self.model, "Assistant message without a user message, ignoring");
                    false
                }
            },
        }
    }

    /// Whether a user message is waiting for its reply.
    pub fn has_pending_message(&self) -> bool {
        self.pending.is_some()
    }

    /// Recent exchanges, empty on failure.
    pub fn history(&self, max_exchanges: Option<usize>, max_tokens: Option<u64>) -> Vec<Exchange> {
        self.store
            .history(&self.model, max_exchanges, max_tokens)
            .unwrap_or_else(|err| {
                error!(model = %self.model, error = %err, "Failed to read history");
                Vec::new()
            })
    }

    /// Clear the active model's conversation.
    ///
    /// With background writes the clear is queued behind earlier exchanges.
    pub fn reset(&mut self) -> bool {
        self.pending = None;
        if let Some(writer) = &self.writer {
            return writer.clear(self.model.clone());
        }
        match self.store.clear(&self.model) {
            Ok(_) => true,
            Err(err) => {
                error!(model = %self.model, error = %err, "Failed to reset memory");
                false
            }
        }
    }

    /// Stored statistics for the active model.
    pub fn memory_stats(&self) -> Option<MemoryStats> {
        self.store
            .stats(&self.model)
            .map_err(|err| error!(model = %self.model, error = %err, "Failed to read stats"))
            .ok()
    }

    /// Models with stored memory, empty on failure.
    pub fn models(&self) -> Vec<String> {
        self.store.list_models().unwrap_or_else(|err| {
            error!(error = %err, "Failed to list models");
            Vec::new()
        })
    }

    /// Import a legacy memory file into per-model files.
    ///
    /// With background writes the import is queued and not counted in
    /// [`SessionStats::migrations_performed`].
    pub fn migrate_legacy(&mut self, path: &Path) -> bool {
        if let Some(writer) = &self.writer {
            return writer.migrate(path, self.model.clone());
        }
        match self.store.migrate_legacy(path, &self.model) {
            Ok(report) => {
                if report.migrated_exchanges > 0 {
                    self.stats.migrations_performed += 1;
                }
                true
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "Legacy migration failed");
                false
            }
        }
    }

    pub fn session_stats(&self) -> SessionStats {
        self.stats
    }

    /// Allocation from the latest successful preparation.
    pub fn last_allocation(&self) -> Option<&BudgetAllocation> {
        self.last_allocation.as_ref()
    }

    /// Drain queued background writes, if any.
    pub async fn close(self) -> Option<WriterStats> {
        match self.writer {
            Some(writer) => {
                let stats = writer.shutdown().await;
                debug!(written = stats.written, failed = stats.failed, "Session closed");
                Some(stats)
            }
            None => None,
        }
    }
}

/// Warnings for a suspicious exchange. The exchange is still recorded.
pub fn exchange_warnings(
    estimator: &TokenEstimator,
    user: &str,
    assistant: &str,
    user_tokens: Option<u64>,
    assistant_tokens: Option<u64>,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for (label, content, tokens) in [
        ("User", user, user_tokens),
        ("Assistant", assistant, assistant_tokens),
    ] {
        if content.trim().is_empty() {
            warnings.push(format!("{} content is empty", label));
        }
        let Some(tokens) = tokens else {
            continue;
        };
        if tokens == 0 {
            warnings.push(format!("{} token count is zero", label));
            continue;
        }
        let estimated = estimator.estimate(content);
        if tokens.abs_diff(estimated) as f64 > estimated as f64 * TOKEN_MISMATCH_RATIO {
            warnings.push(format!(
                "{} token count seems off: {} vs estimated {}",
                label, tokens, estimated
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStoreConfig;
    use tempfile::TempDir;

    fn session(temp_dir: &TempDir) -> MemorySession {
        let store = MemoryStore::new(MemoryStoreConfig::new(temp_dir.path())).expect("store");
        MemorySession::new(store, ContextComposer::default(), "qwen2.5:3b")
    }

    #[test]
    fn test_record_then_prepare() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut session = session(&temp_dir);

        assert!(session.record_exchange("What is Rust?", "A systems language.", None, None));
        let context = session.prepare_context("Tell me more");

        assert!(context.is_ok());
        assert_eq!(context.messages().len(), 2);
        assert_eq!(context.messages()[0].content, "What is Rust?");
        assert_eq!(session.session_stats().exchanges_added, 1);
        assert_eq!(session.session_stats().contexts_prepared, 1);
        assert!(session.last_allocation().is_some());
    }

    #[test]
    fn test_zero_window_yields_empty_context_with_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut session = session(&temp_dir).with_context_window(0);
        session.record_exchange("q", "a", None, None);

        let context = session.prepare_context("hi");
        assert!(!context.is_ok());
        assert!(context.messages().is_empty());
        assert!(context.error.expect("error").contains("Invalid context window"));
        assert!(session.last_allocation().is_none());
    }

    #[test]
    fn test_push_message_pairs_user_and_assistant() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut session = session(&temp_dir);

        assert!(!session.push_message(Role::Assistant, "orphan", None));
        assert!(session.push_message(Role::User, "first", None));
        assert!(session.push_message(Role::User, "second", Some(3)));
        assert!(session.has_pending_message());
        assert!(session.push_message(Role::Assistant, "reply", None));
        assert!(!session.has_pending_message());

        let history = session.history(None, None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user.content, "second");
        assert_eq!(history[0].user.tokens, 3);
        assert_eq!(history[0].assistant.content, "reply");
    }

    #[test]
    fn test_reset_clears_history() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut session = session(&temp_dir);
        session.record_exchange("q", "a", None, None);

        assert!(session.reset());
        assert!(session.history(None, None).is_empty());
        let stats = session.memory_stats().expect("stats");
        assert_eq!(stats.summarized_conversations, 1);
    }

    #[test]
    fn test_models_are_switched_explicitly() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut session = session(&temp_dir);
        session.record_exchange("for qwen", "ok", None, None);
        session.set_model("llama3");
        session.record_exchange("for llama", "ok", None, None);

        assert_eq!(session.history(None, None)[0].user.content, "for llama");
        assert_eq!(session.models(), vec!["llama3", "qwen2.5:3b"]);
    }

    #[test]
    fn test_recent_messages_skip_empty_turns() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut session = session(&temp_dir);
        session.record_exchange("question", "", None, None);

        let messages = session.recent_messages(32768);
        assert_eq!(messages, vec![ChatMessage::user("question")]);
    }

    #[test]
    fn test_exchange_warnings() {
        let estimator = TokenEstimator::default();
        let text = "a ".repeat(150);

        assert!(exchange_warnings(&estimator, &text, &text, None, None).is_empty());
        assert!(exchange_warnings(&estimator, &text, &text, Some(120), Some(100)).is_empty());

        let warnings = exchange_warnings(&estimator, "", &text, Some(0), Some(10));
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("User content is empty"));
        assert!(warnings[1].contains("zero"));
        assert!(warnings[2].contains("10 vs estimated 120"));
    }

    #[tokio::test]
    async fn test_background_writes_drain_on_close() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = MemoryStore::new(MemoryStoreConfig::new(temp_dir.path())).expect("store");

        let mut session = MemorySession::new(store.clone(), ContextComposer::default(), "m")
            .with_background_writes();
        for i in 0..3 {
            assert!(session.record_exchange(&format!("q{}", i), "a", None, None));
        }
        let stats = session.close().await;

        assert_eq!(stats.map(|s| s.written), Some(3));
        assert_eq!(store.history("m", None, None).expect("history").len(), 3);
    }

    #[tokio::test]
    async fn test_reset_after_background_writes_clears_everything() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = MemoryStore::new(MemoryStoreConfig::new(temp_dir.path())).expect("store");

        let mut session = MemorySession::new(store.clone(), ContextComposer::default(), "m")
            .with_background_writes();
        for i in 0..50 {
            assert!(session.record_exchange(&format!("question {}", i), "answer", None, None));
        }
        assert!(session.reset());
        let stats = session.close().await.expect("writer stats");

        assert_eq!(stats, WriterStats { written: 51, failed: 0 });
        assert!(store.history("m", None, None).expect("history").is_empty());
        let memory_stats = store.stats("m").expect("stats");
        assert_eq!(memory_stats.summarized_conversations, 1);
        assert_eq!(memory_stats.total_exchanges, 0);
    }

    #[tokio::test]
    async fn test_background_migration_runs_in_order() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = MemoryStore::new(MemoryStoreConfig::new(temp_dir.path())).expect("store");
        let legacy_path = temp_dir.path().join("legacy.json");
        std::fs::write(
            &legacy_path,
            r#"{"current_conversation": [{"user": "old question", "assistant": "old answer"}]}"#,
        )
        .expect("write legacy");

        let mut session = MemorySession::new(store.clone(), ContextComposer::default(), "m")
            .with_background_writes();
        assert!(session.migrate_legacy(&legacy_path));
        assert!(session.record_exchange("new question", "new answer", None, None));
        session.close().await.expect("writer stats");

        let history = store.history("m", None, None).expect("history");
        let order: Vec<_> = history.iter().map(|e| e.user.content.as_str()).collect();
        assert_eq!(order, vec!["old question", "new question"]);
    }
}
