//! Harness configuration stored under `.autoloop/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::allowlist::CommandAllowlist;
use crate::retry::RetryPolicy;

/// Harness configuration (TOML).
///
/// Edited by humans; every field is optional and falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutoloopConfig {
    /// Iterations per invocation when `--max-iterations` is not given.
    pub max_iterations: u32,

    /// Wall-clock limit for each shell/verify command and external tool.
    pub command_timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes per stream is dropped.
    pub output_limit_bytes: usize,

    pub shell: ShellConfig,
    pub verify: VerifyConfig,
    pub retry: RetryConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    /// Command prefixes that `shell` and `verify` tasks may run.
    pub allowlist: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            allowlist: vec![
                "cargo ".to_string(),
                "rustc ".to_string(),
                "just ".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Commands a `verify` task runs when it names none.
    pub commands: Vec<String>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            commands: vec!["cargo check".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub ripgrep: String,
    pub git: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ripgrep: "rg".to_string(),
            git: "git".to_string(),
        }
    }
}

impl Default for AutoloopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            command_timeout_secs: 600,
            output_limit_bytes: 100_000,
            shell: ShellConfig::default(),
            verify: VerifyConfig::default(),
            retry: RetryConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl AutoloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.shell.allowlist.iter().any(|p| p.trim().is_empty()) {
            return Err(anyhow!("shell.allowlist entries must be non-empty"));
        }
        if self.verify.commands.iter().any(|c| c.trim().is_empty()) {
            return Err(anyhow!("verify.commands entries must be non-empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.tools.ripgrep.trim().is_empty() || self.tools.git.trim().is_empty() {
            return Err(anyhow!("tools.ripgrep and tools.git must be non-empty"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn allowlist(&self) -> CommandAllowlist {
        CommandAllowlist::new(self.shell.allowlist.iter().cloned())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutoloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutoloopConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        return Ok(AutoloopConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutoloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutoloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
