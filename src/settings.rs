//! Layered settings: built-in defaults, an optional TOML file, then
//! `CHATMEM_*` environment variables.
//!
//! Nested keys use a double underscore in the environment, for example
//! `CHATMEM_VALIDATION__MAX_UTILIZATION=0.9` or `CHATMEM_ESTIMATOR__SAFETY_MARGIN=1.5`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::{BudgetConfig, EstimatorConfig, InteractionMode, ValidationThresholds};
use crate::memory::{MemoryStoreConfig, DEFAULT_WINDOW_TRIM_RATIO};

/// Model used when none is given.
pub const DEFAULT_MODEL: &str = "qwen2.5:3b";

/// Context window used when none is given.
pub const DEFAULT_CONTEXT_WINDOW: u64 = 32_768;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "CHATMEM";

/// Errors loading or writing settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failure reading a source or deserializing the merged result.
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Failure rendering settings as TOML.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// A setting with an unusable value.
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Everything configurable about a memory session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_model: String,
    pub context_window: u64,
    pub mode: InteractionMode,
    pub memory_dir: PathBuf,
    /// Recent exchanges always included in context, even over budget
    pub minimum_exchanges: usize,
    /// Floor for the conversation memory bucket
    pub minimum_memory_tokens: u64,
    /// Share of the window a stored conversation may occupy
    pub window_trim_ratio: f64,
    pub estimator: EstimatorConfig,
    pub validation: ValidationThresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            mode: InteractionMode::default(),
            memory_dir: PathBuf::from(crate::memory::config::DEFAULT_MEMORY_DIR),
            minimum_exchanges: 0,
            minimum_memory_tokens: 0,
            window_trim_ratio: DEFAULT_WINDOW_TRIM_RATIO,
            estimator: EstimatorConfig::default(),
            validation: ValidationThresholds::default(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, `path` if given, and the environment.
    pub fn load(path: Option<&Path>) -> SettingsResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text, without environment overrides.
    pub fn from_toml_str(content: &str) -> SettingsResult<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> SettingsResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values no session can work with.
    pub fn validate(&self) -> SettingsResult<()> {
        if self.context_window == 0 {
            return Err(SettingsError::Invalid {
                key: "context_window",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.default_model.trim().is_empty() {
            return Err(SettingsError::Invalid {
                key: "default_model",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn budget_config(&self) -> BudgetConfig {
        BudgetConfig::new()
            .with_minimum_memory_tokens(self.minimum_memory_tokens)
            .with_minimum_exchanges(self.minimum_exchanges)
            .with_estimator(self.estimator)
            .with_validation(self.validation)
    }

    pub fn store_config(&self) -> MemoryStoreConfig {
        MemoryStoreConfig::new(&self.memory_dir).with_window_trim_ratio(self.window_trim_ratio)
    }

    pub fn with_memory_dir(mut self, memory_dir: impl Into<PathBuf>) -> Self {
        self.memory_dir = memory_dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.default_model, "qwen2.5:3b");
        assert_eq!(settings.context_window, 32768);
        assert_eq!(settings.mode, InteractionMode::Chat);
        assert_eq!(settings.memory_dir, PathBuf::from("WorkspaceAI/memory"));
        assert_eq!(settings.window_trim_ratio, 0.8);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            default_model = "llama3:8b"
            mode = "tools"

            [validation]
            max_utilization = 0.9
            "#,
        )
        .expect("parse");

        assert_eq!(settings.default_model, "llama3:8b");
        assert_eq!(settings.mode, InteractionMode::Tools);
        assert_eq!(settings.context_window, 32768);
        assert_eq!(settings.validation.max_utilization, 0.9);
        assert_eq!(settings.validation.min_response_ratio, 0.10);
        assert_eq!(settings.estimator, EstimatorConfig::default());
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = Settings::from_toml_str("context_window = 0");
        assert!(matches!(
            result,
            Err(SettingsError::Invalid {
                key: "context_window",
                ..
            })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("chatmem.toml");
        fs::write(
            &path,
            "minimum_exchanges = 2\nminimum_memory_tokens = 4000\n\n[estimator]\nsafety_margin = 1.5\n",
        )
        .expect("write");

        let settings = Settings::load(Some(&path)).expect("load");
        assert_eq!(settings.minimum_exchanges, 2);

        let budget = settings.budget_config();
        assert_eq!(budget.minimum_memory_tokens, 4000);
        assert_eq!(budget.minimum_exchanges, 2);
        assert_eq!(budget.estimator.safety_margin, 1.5);
        assert_eq!(budget.estimator.chars_per_token, 3.0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let result = Settings::load(Some(&temp_dir.path().join("absent.toml")));
        assert!(matches!(result, Err(SettingsError::Config(_))));
    }

    #[test]
    fn test_toml_output_parses_back() {
        let original = Settings::default().with_memory_dir("/tmp/chatmem");
        let rendered = original.to_toml().expect("render");
        assert!(rendered.contains("default_model = \"qwen2.5:3b\""));
        assert!(rendered.contains("[validation]"));
        assert_eq!(Settings::from_toml_str(&rendered).expect("parse"), original);
    }

    #[test]
    fn test_store_config_sanitizes_ratio() {
        let settings = Settings {
            window_trim_ratio: 3.0,
            ..Settings::default()
        };
        assert_eq!(settings.store_config().window_trim_ratio, 0.8);
    }
}
