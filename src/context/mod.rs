//! Context assembly for chat requests.
//!
//! [`ContextComposer`] is the pure pipeline from query and history to
//! messages. [`MemorySession`] wraps a composer and a store for one active
//! model and never surfaces an error to the chat loop.

pub mod composer;
pub mod session;

pub use composer::{
    ChatMessage, ComposeError, ComposeResult, ContextComposer, ContextStats, PreparedContext, Role,
};
pub use session::{exchange_warnings, MemorySession, SessionContext, SessionStats};
