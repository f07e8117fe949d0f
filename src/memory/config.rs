use std::env;
use std::path::PathBuf;

use crate::memory::conversation::DEFAULT_WINDOW_TRIM_RATIO;

/// Environment variable for the memory directory.
pub const MEMORY_DIR_ENV_VAR: &str = "CHATMEM_MEMORY_DIR";

/// Environment variable for the stored-conversation window ratio.
pub const WINDOW_TRIM_RATIO_ENV_VAR: &str = "CHATMEM_WINDOW_TRIM_RATIO";

/// Default memory directory, relative to the working directory.
pub const DEFAULT_MEMORY_DIR: &str = "WorkspaceAI/memory";

/// Configuration for the per-model memory store.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStoreConfig {
    /// Directory holding one JSON file per model.
    pub memory_dir: PathBuf,
    /// Share of the context window a stored conversation may occupy before
    /// the oldest exchanges are dropped on append.
    pub window_trim_ratio: f64,
}

impl MemoryStoreConfig {
    /// Create a config for the given directory with the default trim ratio.
    pub fn new(memory_dir: impl Into<PathBuf>) -> Self {
        Self {
            memory_dir: memory_dir.into(),
            window_trim_ratio: DEFAULT_WINDOW_TRIM_RATIO,
        }
    }

    /// Set the trim ratio. Values outside (0, 1] fall back to the default.
    pub fn with_window_trim_ratio(mut self, ratio: f64) -> Self {
        self.window_trim_ratio = sanitize_ratio(ratio);
        self
    }

    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let memory_dir = env::var(MEMORY_DIR_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MEMORY_DIR));
        let window_trim_ratio = env::var(WINDOW_TRIM_RATIO_ENV_VAR)
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(sanitize_ratio)
            .unwrap_or(DEFAULT_WINDOW_TRIM_RATIO);
        Self {
            memory_dir,
            window_trim_ratio,
        }
    }
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn sanitize_ratio(ratio: f64) -> f64 {
    if ratio.is_finite() && ratio > 0.0 && ratio <= 1.0 {
        ratio
    } else {
        DEFAULT_WINDOW_TRIM_RATIO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_ratio() {
        let config = MemoryStoreConfig::new("/tmp/memory");
        assert_eq!(config.memory_dir, PathBuf::from("/tmp/memory"));
        assert_eq!(config.window_trim_ratio, DEFAULT_WINDOW_TRIM_RATIO);
    }

    #[test]
    fn test_invalid_ratio_falls_back() {
        let config = MemoryStoreConfig::new("m").with_window_trim_ratio(1.5);
        assert_eq!(config.window_trim_ratio, DEFAULT_WINDOW_TRIM_RATIO);

        let config = MemoryStoreConfig::new("m").with_window_trim_ratio(0.5);
        assert_eq!(config.window_trim_ratio, 0.5);
    }
}
