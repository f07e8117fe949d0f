//! Per-model conversation memory.
//!
//! Each model identity owns one JSON file holding its current conversation and
//! summaries of cleared ones. The store repairs malformed files on load and
//! writes atomically; the background writer keeps saves off the interactive
//! path.

pub mod config;
pub mod conversation;
pub mod record;
pub mod store;
pub mod writer;

pub use config::MemoryStoreConfig;
pub use conversation::{
    select_recent, select_within_budget, trim_to_budget, Conversation, DEFAULT_WINDOW_TRIM_RATIO,
};
pub use record::{
    ConversationSummary, DateRange, Exchange, MemoryMetadata, ModelMemory, Turn,
    MEMORY_SCHEMA_VERSION,
};
pub use store::{
    model_file_name, AppendOutcome, MemoryStats, MemoryStore, MigrationReport, StoreError,
    StoreResult,
};
pub use writer::{BackgroundWriter, WriterStats};
