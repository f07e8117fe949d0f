//! Compose, record and compose again through an on-disk store.

use std::fs;

use chatmem::budget::InteractionMode;
use chatmem::context::{ContextComposer, MemorySession, Role};
use chatmem::memory::{MemoryStore, MemoryStoreConfig};
use chatmem::Settings;
use tempfile::TempDir;

fn settings(temp_dir: &TempDir) -> Settings {
    Settings::default().with_memory_dir(temp_dir.path().join("memory"))
}

fn seed(session: &mut MemorySession, count: usize, tokens_each_side: u64) {
    for i in 0..count {
        assert!(session.record_exchange(
            &format!("question {}", i),
            &format!("answer {}", i),
            Some(tokens_each_side),
            Some(tokens_each_side),
        ));
    }
}

#[test]
fn test_history_flows_into_next_context() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut session = MemorySession::open(&settings(&temp_dir)).expect("open");

    let first = session.prepare_context("What is ownership in Rust?");
    assert!(first.is_ok());
    assert!(first.messages().is_empty());

    assert!(session.push_message(Role::User, "What is ownership in Rust?", None));
    assert!(session.push_message(Role::Assistant, "Each value has a single owner.", None));

    let second = session.prepare_context("And borrowing?");
    let messages = second.into_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].content, "Each value has a single owner.");

    // A fresh session over the same directory sees the persisted exchange
    let reopened = MemorySession::open(&settings(&temp_dir)).expect("reopen");
    assert_eq!(reopened.history(None, None).len(), 1);
}

#[test]
fn test_complex_queries_get_less_history() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut session = MemorySession::open(&settings(&temp_dir))
        .expect("open")
        .with_context_window(4096);
    seed(&mut session, 30, 40);

    let simple = session.prepare_context_with("thanks", InteractionMode::Chat, 4096);
    let complex = session.prepare_context_with(
        "Can you analyze and refactor this function, explain why it is slow, and \
         implement an optimized version?\n```rust\nfn slow(v: &[u32]) -> u32 { v.iter().sum() }\n```",
        InteractionMode::Chat,
        4096,
    );

    let simple = simple.prepared.expect("simple context");
    let complex = complex.prepared.expect("complex context");
    assert!(complex.complexity > simple.complexity);
    assert!(complex.allocation.conversation_memory < simple.allocation.conversation_memory);
    assert!(complex.allocation.response_generation > simple.allocation.response_generation);
    assert!(complex.stats.included_exchanges < simple.stats.included_exchanges);
    assert!(simple.stats.included_exchanges < 30);
}

#[test]
fn test_stored_conversation_is_trimmed_to_window() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut session = MemorySession::open(&settings(&temp_dir))
        .expect("open")
        .with_context_window(1000);
    // 200 tokens per exchange against an 800-token cap
    seed(&mut session, 10, 100);

    let history = session.history(None, None);
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].user.content, "question 6");
    assert_eq!(history[3].user.content, "question 9");
}

#[test]
fn test_models_are_isolated() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut session = MemorySession::open(&settings(&temp_dir)).expect("open");
    seed(&mut session, 2, 10);

    session.set_model("mistral:7b");
    let context = session.prepare_context("hello");
    assert!(context.messages().is_empty());
    seed(&mut session, 1, 10);

    assert_eq!(session.models(), vec!["mistral:7b", "qwen2.5:3b"]);
}

#[test]
fn test_corrupted_memory_is_backed_up_and_replaced() {
    let temp_dir = TempDir::new().expect("temp dir");
    let settings = settings(&temp_dir);
    let store = MemoryStore::new(MemoryStoreConfig::new(&settings.memory_dir)).expect("store");
    let path = store.memory_path("qwen2.5:3b");
    fs::write(&path, "{ not json").expect("write");

    let mut session = MemorySession::new(store, ContextComposer::default(), "qwen2.5:3b");
    let context = session.prepare_context("hi");
    assert!(context.is_ok());
    assert!(context.messages().is_empty());

    let backups = fs::read_dir(&settings.memory_dir)
        .expect("read dir")
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupted."))
        .count();
    assert!(backups >= 1);

    assert!(session.record_exchange("q", "a", None, None));
    assert_eq!(session.history(None, None).len(), 1);
}

#[test]
fn test_legacy_memory_imported_once_on_open() {
    let temp_dir = TempDir::new().expect("temp dir");
    let settings = settings(&temp_dir);
    fs::create_dir_all(&settings.memory_dir).expect("mkdir");
    fs::write(
        settings.memory_dir.join("memory.json"),
        r#"{"current_conversation": [{"user": "old question", "assistant": "old answer"}]}"#,
    )
    .expect("write legacy");

    let session = MemorySession::open(&settings).expect("open");
    assert_eq!(session.history(None, None).len(), 1);
    assert_eq!(session.session_stats().migrations_performed, 1);

    let reopened = MemorySession::open(&settings).expect("reopen");
    assert_eq!(reopened.history(None, None).len(), 1);
    assert_eq!(reopened.session_stats().migrations_performed, 0);
}
