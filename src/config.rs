//! Configuration and the process-wide filesystem layout. `Config` covers the
//! tunable knobs (concurrency, timeouts, retry budget, TTL, attachment cap);
//! `Env` replaces the global-singleton config-root lookup with an explicit
//! value computed once at process start and threaded into every constructor.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Knobs governing the Gmail Adapter's fan-out and retry behavior (spec §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            dry_run: false,
        }
    }
}

/// Workflow session TTL (spec §3.4, §4.5.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// Composer-level limits (spec §4.1 query cap, §4.4 step 5 attachment cap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
    #[serde(default = "default_query_max_len")]
    pub query_max_len: usize,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: default_max_attachment_bytes(),
            query_max_len: default_query_max_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_circuit_breaker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_circuit_breaker_enabled(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_attachment_bytes() -> u64 {
    25 * 1024 * 1024
}

fn default_query_max_len() -> usize {
    500
}

fn default_circuit_breaker_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> u64 {
    60
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution.concurrency == 0 {
            return Err(GmailError::ConfigError(
                "execution.concurrency must be at least 1".to_string(),
            ));
        }
        if self.execution.concurrency > 50 {
            return Err(GmailError::ConfigError(
                "execution.concurrency cannot exceed 50 (Gmail API rate limits)".to_string(),
            ));
        }
        if self.execution.request_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "execution.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.execution.retry_attempts == 0 {
            return Err(GmailError::ConfigError(
                "execution.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.workflow.ttl_secs == 0 {
            return Err(GmailError::ConfigError(
                "workflow.ttl_secs must be at least 1".to_string(),
            ));
        }
        if self.compose.max_attachment_bytes == 0 {
            return Err(GmailError::ConfigError(
                "compose.max_attachment_bytes must be at least 1".to_string(),
            ));
        }
        if self.compose.query_max_len == 0 {
            return Err(GmailError::ConfigError(
                "compose.query_max_len must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(GmailError::ConfigError(
                "circuit_breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker.reset_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "circuit_breaker.reset_timeout_secs must be greater than 0".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

/// The process-wide filesystem layout, computed once at CLI entry and passed
/// explicitly to every store constructor — replaces the global-singleton
/// config-path pattern.
#[derive(Debug, Clone)]
pub struct Env {
    pub root: PathBuf,
}

impl Env {
    /// `${CLAUDE_PLUGIN_ROOT}/credentials/` when that variable is set (embedded
    /// host mode), else `${HOME}/.mail/`.
    pub fn discover() -> Result<Self> {
        if let Ok(plugin_root) = std::env::var("CLAUDE_PLUGIN_ROOT") {
            return Ok(Self {
                root: PathBuf::from(plugin_root).join("credentials"),
            });
        }
        let home = std::env::var("HOME")
            .map_err(|_| GmailError::ConfigError("neither CLAUDE_PLUGIN_ROOT nor HOME is set".to_string()))?;
        Ok(Self {
            root: PathBuf::from(home).join(".mail"),
        })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.root.join("credentials.json")
    }

    pub fn oauth_keys_path(&self) -> PathBuf {
        self.root.join("oauth-keys.json")
    }

    pub fn groups_path(&self) -> PathBuf {
        self.root.join("email-groups.json")
    }

    pub fn workflows_path(&self) -> PathBuf {
        self.root.join("workflows.yaml")
    }

    pub fn styles_dir(&self) -> PathBuf {
        self.root.join("email-styles")
    }

    pub fn workflow_states_dir(&self) -> PathBuf {
        self.root.join("workflow-states")
    }

    /// Ensure the config root and its subdirectories exist with owner-only
    /// permissions (0700 dirs), per spec §6.2.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.styles_dir(), self.workflow_states_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| GmailError::FilesystemError(format!("creating {:?}: {}", dir, e)))?;
            restrict_dir_permissions(&dir).await?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_dir_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o700);
    tokio::fs::set_permissions(dir, perms)
        .await
        .map_err(|e| GmailError::FilesystemError(format!("setting permissions on {:?}: {}", dir, e)))
}

#[cfg(not(unix))]
async fn restrict_dir_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}
