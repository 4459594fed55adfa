//! Configuration for the messaging client.
//!
//! Defaults work out of the box; embedders can override them from a TOML
//! file:
//!
//! ```toml
//! [pagination]
//! page_size = 50
//!
//! [typing]
//! throttle_ms = 3000
//!
//! [drafts]
//! placeholder_title = "New conversation"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Page fetching.
    #[serde(default)]
    pub pagination: PaginationConfig,
    /// Typing indicator.
    #[serde(default)]
    pub typing: TypingConfig,
    /// Draft conversations.
    #[serde(default)]
    pub drafts: DraftsConfig,
}

/// Page fetching configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaginationConfig {
    /// Items requested per page (default: 50).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Typing indicator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypingConfig {
    /// Minimum delay between two "typing" mutations for the same
    /// conversation, in milliseconds (default: 3000).
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

/// Draft conversation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DraftsConfig {
    /// Inbox title shown for drafts without a title.
    #[serde(default = "default_placeholder_title")]
    pub placeholder_title: String,
}

// Default value functions
fn default_page_size() -> u32 {
    50
}

fn default_throttle_ms() -> u64 {
    3000
}

fn default_placeholder_title() -> String {
    "New conversation".to_string()
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
        }
    }
}

impl Default for DraftsConfig {
    fn default() -> Self {
        Self {
            placeholder_title: default_placeholder_title(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.pagination.page_size = page_size;
        self
    }

    /// Set the typing throttle window.
    pub fn with_typing_throttle(mut self, window: Duration) -> Self {
        self.typing.throttle_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the draft placeholder title.
    pub fn with_placeholder_title(mut self, title: &str) -> Self {
        self.drafts.placeholder_title = title.to_string();
        self
    }

    /// Typing throttle window.
    pub fn typing_throttle(&self) -> Duration {
        Duration::from_millis(self.typing.throttle_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::default();
        assert_eq!(config.pagination.page_size, 50);
        assert_eq!(config.typing_throttle(), Duration::from_secs(3));
        assert_eq!(config.drafts.placeholder_title, "New conversation");
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[pagination]
page_size = 20

[typing]
throttle_ms = 500

[drafts]
placeholder_title = "Nouvelle conversation"
"#;

        let config: SyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.pagination.page_size, 20);
        assert_eq!(config.typing.throttle_ms, 500);
        assert_eq!(config.drafts.placeholder_title, "Nouvelle conversation");
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: SyncConfig = toml::from_str("[typing]\n").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn builders_override_defaults() {
        let config = SyncConfig::default()
            .with_page_size(5)
            .with_typing_throttle(Duration::from_millis(250))
            .with_placeholder_title("Draft");
        assert_eq!(config.pagination.page_size, 5);
        assert_eq!(config.typing.throttle_ms, 250);
        assert_eq!(config.drafts.placeholder_title, "Draft");
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pagination]\npage_size = 7").unwrap();

        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pagination.page_size, 7);
    }

    #[test]
    fn from_file_reports_missing_file() {
        let result = SyncConfig::from_file(Path::new("/nonexistent/convo-sync.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pagination]\npage_size = \"many\"").unwrap();

        let result = SyncConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
