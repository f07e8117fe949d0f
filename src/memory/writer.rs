//! Background persistence for memory changes.
//!
//! Appends, clears and legacy imports are queued on a channel and applied by a
//! single worker task, so the interactive loop never waits on disk I/O and
//! changes land in submission order. A queued change is not guaranteed to be
//! visible to the next read until [`BackgroundWriter::shutdown`] returns.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::memory::record::Exchange;
use crate::memory::store::{MemoryStore, StoreResult};

/// A queued change to the store.
#[derive(Debug, Clone)]
enum WriteRequest {
    Append {
        model: String,
        exchange: Exchange,
        context_window: u64,
    },
    Clear {
        model: String,
    },
    Migrate {
        path: PathBuf,
        default_model: String,
    },
}

impl WriteRequest {
    fn label(&self) -> String {
        match self {
            WriteRequest::Append { model, .. } => format!("append {}", model),
            WriteRequest::Clear { model } => format!("clear {}", model),
            WriteRequest::Migrate { path, .. } => format!("migrate {}", path.display()),
        }
    }

    fn apply(self, store: &MemoryStore) -> StoreResult<()> {
        match self {
            WriteRequest::Append {
                model,
                exchange,
                context_window,
            } => {
                let outcome = store.append_exchange(&model, exchange, context_window)?;
                debug!(model = %model, total = outcome.total_exchanges, "Background save complete");
            }
            WriteRequest::Clear { model } => {
                let summary = store.clear(&model)?;
                debug!(model = %model, cleared = summary.is_some(), "Background clear complete");
            }
            WriteRequest::Migrate {
                path,
                default_model,
            } => {
                let report = store.migrate_legacy(&path, &default_model)?;
                debug!(
                    path = %path.display(),
                    migrated = report.migrated_exchanges,
                    "Background migration complete"
                );
            }
        }
        Ok(())
    }
}

/// Counters reported when the writer shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Requests applied successfully.
    pub written: usize,
    /// Requests that failed.
    pub failed: usize,
}

/// Single-writer queue in front of a [`MemoryStore`].
pub struct BackgroundWriter {
    /// Channel sender for write requests.
    sender: mpsc::UnboundedSender<WriteRequest>,
    /// Requests submitted but not yet applied.
    pending: Arc<AtomicUsize>,
    /// Handle to the worker task.
    task_handle: JoinHandle<WriterStats>,
}

impl BackgroundWriter {
    /// Start the worker task. Must be called from within a tokio runtime.
    pub fn spawn(store: MemoryStore) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<WriteRequest>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);

        let task_handle = tokio::spawn(async move {
            let mut stats = WriterStats::default();

            while let Some(request) = receiver.recv().await {
                let store = store.clone();
                let label = request.label();
                let result = tokio::task::spawn_blocking(move || request.apply(&store)).await;

                match result {
                    Ok(Ok(())) => stats.written += 1,
                    Ok(Err(err)) => {
                        stats.failed += 1;
                        error!(request = %label, error = %err, "Background write failed");
                    }
                    Err(err) => {
                        stats.failed += 1;
                        error!(request = %label, error = %err, "Background write task panicked");
                    }
                }
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }

            stats
        });

        Self {
            sender,
            pending,
            task_handle,
        }
    }

    /// Queue an exchange for persistence.
    ///
    /// Returns `false` if the worker is gone and the exchange was dropped.
    pub fn submit(&self, model: impl Into<String>, exchange: Exchange, context_window: u64) -> bool {
        self.enqueue(WriteRequest::Append {
            model: model.into(),
            exchange,
            context_window,
        })
    }

    /// Queue a clear of a model's conversation behind earlier requests.
    pub fn clear(&self, model: impl Into<String>) -> bool {
        self.enqueue(WriteRequest::Clear {
            model: model.into(),
        })
    }

    /// Queue a legacy import behind earlier requests.
    pub fn migrate(&self, path: impl Into<PathBuf>, default_model: impl Into<String>) -> bool {
        self.enqueue(WriteRequest::Migrate {
            path: path.into(),
            default_model: default_model.into(),
        })
    }

    fn enqueue(&self, request: WriteRequest) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.sender.send(request) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(request = %err.0.label(), "Background writer has stopped, request dropped");
            return false;
        }
        true
    }

    /// Requests submitted but not yet applied.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting requests and wait for the queue to drain.
    pub async fn shutdown(self) -> WriterStats {
        drop(self.sender);
        match self.task_handle.await {
            Ok(stats) => stats,
            Err(err) => {
                error!(error = %err, "Background writer task failed");
                WriterStats::default()
            }
        }
    }
}
