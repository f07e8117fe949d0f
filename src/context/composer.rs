//! Turns a query and stored history into the message list for a chat call.
//!
//! Preparation runs in a fixed order: score the query, allocate the window,
//! validate the allocation, select the most recent exchanges that fit the
//! memory bucket, then re-check the selection against content-based estimates.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::budget::{
    BudgetAllocation, BudgetAllocator, BudgetConfig, BudgetValidator, InteractionMode,
    TokenEstimator, ValidationReport,
};
use crate::memory::{select_within_budget, Exchange, MemoryStore, StoreError};

/// Errors that stop context preparation.
#[derive(Error, Debug)]
pub enum ComposeError {
    /// Context window of zero tokens.
    #[error("Invalid context window: {0} tokens")]
    InvalidContextWindow(u64),

    /// Failure loading the conversation.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for context preparation.
pub type ComposeResult<T> = Result<T, ComposeError>;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// One message ready for a chat-completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Figures describing a prepared context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    /// Exchanges available before selection
    pub available_exchanges: usize,
    /// Exchanges included in the messages
    pub included_exchanges: usize,
    /// Content-based estimate of the included exchanges
    pub estimated_memory_tokens: u64,
    pub memory_budget: u64,
    pub response_budget: u64,
    /// Allocation total as percent of the window
    pub utilization_pct: f64,
    /// Whether the allocation was shrunk to fit the window
    pub adjusted: bool,
}

/// Everything produced for one outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedContext {
    pub model: String,
    pub mode: InteractionMode,
    pub context_window: u64,
    /// History in chronological order, user and assistant alternating
    pub messages: Vec<ChatMessage>,
    pub allocation: BudgetAllocation,
    pub complexity: f64,
    /// Validation of the returned allocation
    pub validation: ValidationReport,
    pub stats: ContextStats,
}

/// Orchestrates complexity scoring, allocation and history selection.
#[derive(Debug, Clone, Default)]
pub struct ContextComposer {
    config: BudgetConfig,
    allocator: BudgetAllocator,
    validator: BudgetValidator,
    estimator: TokenEstimator,
}

impl ContextComposer {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            allocator: BudgetAllocator::new(),
            validator: BudgetValidator::new(config.validation),
            estimator: config.estimator.build(),
            config,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn allocator(&self) -> &BudgetAllocator {
        &self.allocator
    }

    pub fn validator(&self) -> &BudgetValidator {
        &self.validator
    }

    /// Load `model`'s conversation from `store` and prepare a context.
    pub fn prepare_from_store(
        &self,
        store: &MemoryStore,
        model: &str,
        query: &str,
        mode: InteractionMode,
        context_window: u64,
    ) -> ComposeResult<PreparedContext> {
        if context_window == 0 {
            return Err(ComposeError::InvalidContextWindow(context_window));
        }
        let conversation = store.conversation(model)?;
        self.prepare(model, query, mode, context_window, conversation.exchanges())
    }

    /// Prepare a context from an explicit history, oldest exchange first.
    pub fn prepare(
        &self,
        model: &str,
        query: &str,
        mode: InteractionMode,
        context_window: u64,
        exchanges: &[Exchange],
    ) -> ComposeResult<PreparedContext> {
        if context_window == 0 {
            return Err(ComposeError::InvalidContextWindow(context_window));
        }

        let minimum_memory = self.config.minimum_memory_tokens;
        let complexity = self.allocator.analyzer().analyze(query, mode);
        let mut allocation =
            self.allocator
                .allocate_with_complexity(context_window, mode, complexity, minimum_memory);

        let mut validation = self.validator.validate(&allocation, context_window, complexity);
        let mut adjusted = false;
        if !validation.is_valid {
            let errors: Vec<&str> = validation.errors().map(|e| e.message.as_str()).collect();
            warn!(model, errors = ?errors, "Budget validation failed, fitting allocation to window");
            let unreclaimed = allocation.fit_to_window(context_window, minimum_memory);
            if unreclaimed > 0 {
                warn!(model, unreclaimed, "Allocation still exceeds the context window");
            }
            validation = self.validator.validate(&allocation, context_window, complexity);
            adjusted = true;
        }

        let memory_budget = allocation.conversation_memory;
        let minimum_exchanges = self.config.minimum_exchanges;
        let mut selected =
            select_within_budget(exchanges, memory_budget, minimum_exchanges, Exchange::token_count);

        let mut estimated = self.estimator.estimate_conversation(selected);
        if estimated > memory_budget {
            warn!(
                model,
                estimated, memory_budget, "Selected history exceeds memory budget, trimming"
            );
            selected = select_within_budget(selected, memory_budget, minimum_exchanges, |e| {
                self.estimator.estimate_exchange(e).total()
            });
            estimated = self.estimator.estimate_conversation(selected);
        }

        let messages: Vec<ChatMessage> = selected
            .iter()
            .flat_map(|exchange| {
                [
                    ChatMessage::user(exchange.user.content.clone()),
                    ChatMessage::assistant(exchange.assistant.content.clone()),
                ]
            })
            .collect();

        let stats = ContextStats {
            available_exchanges: exchanges.len(),
            included_exchanges: selected.len(),
            estimated_memory_tokens: estimated,
            memory_budget,
            response_budget: allocation.response_generation,
            utilization_pct: validation.utilization_pct,
            adjusted,
        };

        info!(
            model,
            messages = messages.len(),
            complexity = %format!("{:.3}", complexity),
            utilization = %format!("{:.1}%", stats.utilization_pct),
            "Context prepared"
        );

        Ok(PreparedContext {
            model: model.to_string(),
            mode,
            context_window,
            messages,
            allocation,
            complexity,
            validation,
            stats,
        })
    }
}
