use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from jobguard.toml.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
#[derive(Default)]
pub struct JobguardConfig {
    pub run: RunConfig,
    pub watcher: WatcherConfig,
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
}

/// One job to submit: a command and its arguments.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct JobSpec {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

// --- Default implementations ---

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "jobguard".to_string(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

/// Upper bound on the watcher's fallback poll.
const MAX_POLL_INTERVAL_MS: u64 = 1000;

impl WatcherConfig {
    /// Poll interval clamped to 1..=1000 ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS))
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl JobguardConfig {
    /// Load the config file, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: JobguardConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `JOB_LABELS` and `JOBGUARD_POLL_INTERVAL_MS` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("JOB_LABELS").and_then(|labels| parse_label(&labels, "job_name"))
        {
            self.run.name = name;
        }
        if let Some(raw) = lookup("JOBGUARD_POLL_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.watcher.poll_interval_ms = ms,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid JOBGUARD_POLL_INTERVAL_MS"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.is_empty() {
            return Err(ConfigError::Invalid("no jobs configured".to_string()));
        }
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                return Err(ConfigError::Invalid("job id must not be empty".to_string()));
            }
            if job.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "job {} has an empty command",
                    job.id
                )));
            }
            if !seen.insert(job.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate job id {}", job.id)));
            }
        }
        Ok(())
    }
}

/// Extract `key` from a comma-separated `k=v` label list.
fn parse_label(labels: &str, key: &str) -> Option<String> {
    labels.split(',').find_map(|label| {
        let (k, v) = label.split_once('=')?;
        (k.trim() == key && !v.contains('=')).then(|| v.trim().to_string())
    })
}
