//! Relay configuration — capacities, timings and capture policy.
//!
//! Project-level config: `.a11y-relay/config.yaml` (every field optional).
//!
//! Resolution: explicit path → project config → built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::classifier::{ClassifierOptions, FocusPolicy};

/// Project-level config location, relative to the working directory.
pub const PROJECT_CONFIG: &str = ".a11y-relay/config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Where mailboxes keep their contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MailboxBackend {
    #[default]
    Memory,
    /// One write-ahead log per tab under `dir`.
    Wal { dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Local queue capacity on the capture side.
    pub queue_capacity: usize,
    /// Per-tab mailbox capacity.
    pub mailbox_capacity: usize,
    /// Ids the consumer remembers for dedup.
    pub seen_capacity: usize,

    pub poll_interval_ms: u64,
    pub ping_interval_ms: u64,
    /// Pause between teardown and re-attach.
    pub settle_delay_ms: u64,
    pub ready_confirm_delay_ms: u64,
    pub ready_retry_interval_ms: u64,
    pub ready_retry_window_ms: u64,
    /// Minimum time one status announcement stays on screen.
    pub announcement_min_ms: u64,
    pub query_timeout_ms: u64,

    /// Characters in a Left/Right arrow excerpt.
    pub excerpt_len: usize,
    /// Characters of text kept in an element snapshot.
    pub text_snapshot_len: usize,
    /// Text longer than this is split at sentence boundaries.
    pub long_text_threshold: usize,

    pub focus_policy: FocusPolicy,
    /// URL schemes on which capture is never established.
    pub restricted_schemes: Vec<String>,
    pub mailbox_backend: MailboxBackend,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            mailbox_capacity: 1000,
            seen_capacity: 5000,
            poll_interval_ms: 500,
            ping_interval_ms: 5000,
            settle_delay_ms: 500,
            ready_confirm_delay_ms: 1000,
            ready_retry_interval_ms: 2000,
            ready_retry_window_ms: 30_000,
            announcement_min_ms: 3000,
            query_timeout_ms: 2000,
            excerpt_len: 50,
            text_snapshot_len: 100,
            long_text_threshold: 200,
            focus_policy: FocusPolicy::default(),
            restricted_schemes: default_restricted_schemes(),
            mailbox_backend: MailboxBackend::default(),
        }
    }
}

fn default_restricted_schemes() -> Vec<String> {
    [
        "chrome",
        "chrome-extension",
        "chrome-search",
        "about",
        "edge",
        "devtools",
        "view-source",
        "moz-extension",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl RelayConfig {
    /// Load from `path` if given, else the project config if present,
    /// else defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let project = Path::new(PROJECT_CONFIG);
                if project.exists() {
                    Self::from_file(project)?
                } else {
                    debug!("no project config, using defaults");
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let capacities = [
            ("queue_capacity", self.queue_capacity),
            ("mailbox_capacity", self.mailbox_capacity),
            ("seen_capacity", self.seen_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        let intervals = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("ready_retry_interval_ms", self.ready_retry_interval_ms),
            ("query_timeout_ms", self.query_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        if self.seen_capacity < self.mailbox_capacity {
            return Err(ConfigError::Invalid(format!(
                "seen_capacity ({}) must be at least mailbox_capacity ({})",
                self.seen_capacity, self.mailbox_capacity
            )));
        }
        Ok(())
    }

    pub fn classifier_options(&self) -> ClassifierOptions {
        ClassifierOptions {
            focus_policy: self.focus_policy,
            text_snapshot_len: self.text_snapshot_len,
            excerpt_len: self.excerpt_len,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = RelayConfig::default();
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.mailbox_capacity, 1000);
        assert_eq!(config.excerpt_len, 50);
        assert_eq!(config.focus_policy, FocusPolicy::SequentialOnly);
        assert_eq!(config.mailbox_backend, MailboxBackend::Memory);
        assert!(config.restricted_schemes.iter().any(|s| s == "chrome"));
        config.validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = RelayConfig::from_yaml(
            "queue_capacity: 5\nfocus_policy: always\nmailbox_backend:\n  kind: wal\n  dir: /tmp/relay\n",
        )
        .unwrap();
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.focus_policy, FocusPolicy::Always);
        assert_eq!(
            config.mailbox_backend,
            MailboxBackend::Wal {
                dir: PathBuf::from("/tmp/relay")
            }
        );
        assert_eq!(config.mailbox_capacity, 1000);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(RelayConfig::from_yaml("").unwrap(), RelayConfig::default());
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = RelayConfig {
            queue_capacity: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = RelayConfig {
            poll_interval_ms: 0,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_path_is_loaded_and_validated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, "mailbox_capacity: 20\nseen_capacity: 40\n").unwrap();
        let config = RelayConfig::load(Some(&path)).unwrap();
        assert_eq!(config.mailbox_capacity, 20);

        std::fs::write(&path, "mailbox_capacity: 20\nseen_capacity: 10\n").unwrap();
        assert!(RelayConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let err = RelayConfig::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn yaml_round_trip() {
        let config = RelayConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("focus_policy: sequential-only"));
        assert_eq!(RelayConfig::from_yaml(&yaml).unwrap(), config);
    }
}
