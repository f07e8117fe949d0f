//! Conversational memory for locally hosted language models.
//!
//! `chatmem` keeps a per-model history of user/assistant exchanges on disk and,
//! for each new query, decides how much of the model's context window that
//! history may use. Demanding queries get a larger response budget and less
//! history; simple follow-ups get more history.
//!
//! ```ignore
//! use chatmem::{MemorySession, Settings};
//!
//! let settings = Settings::load(None)?;
//! let mut session = MemorySession::open(&settings)?;
//!
//! let context = session.prepare_context("Why does my borrow checker complain?");
//! let messages = context.into_messages();
//! // ... send `messages` plus the query to the model ...
//! session.record_exchange("Why does my borrow checker complain?", &reply, None, None);
//! ```

pub mod budget;
pub mod context;
pub mod memory;
pub mod settings;
pub mod telemetry;

pub use budget::{
    BudgetAllocation, BudgetAllocator, BudgetConfig, BudgetValidator, ComplexityAnalyzer,
    InteractionMode, TokenEstimator, ValidationReport,
};
pub use context::{
    ChatMessage, ComposeError, ContextComposer, MemorySession, PreparedContext, Role,
    SessionContext,
};
pub use memory::{Conversation, Exchange, MemoryStore, MemoryStoreConfig, StoreError};
pub use settings::{Settings, SettingsError};
