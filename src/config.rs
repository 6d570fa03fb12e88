//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::skills::{PolicyConfig, SandboxConfig};

/// Which executor compiles admitted capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Run snippets in a child interpreter
    Sandbox,
    /// Never run; invoking returns the snippet
    Preview,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Require a reviewer decision before admission
    pub interactive: bool,

    /// Record store file
    pub library_path: PathBuf,

    /// Policy rules
    pub policy: PolicyConfig,

    pub executor: ExecutorKind,

    /// Sandbox limits (used by the sandbox executor)
    pub sandbox: SandboxConfig,

    /// Terminal used by the console reviewer
    pub reviewer_tty: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interactive: false,
            library_path: default_library_path(),
            policy: PolicyConfig::default(),
            executor: ExecutorKind::Sandbox,
            sandbox: SandboxConfig::default(),
            reviewer_tty: PathBuf::from("/dev/tty"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.interactive = var("SKILLGATE_INTERACTIVE")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        if let Some(path) = var("SKILLGATE_LIBRARY") {
            config.library_path = PathBuf::from(path);
        }

        if let Some(path) = var("SKILLGATE_POLICY_FILE") {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read policy file {}", path))?;
            config.policy = PolicyConfig::from_toml(&content)
                .with_context(|| format!("Failed to parse policy file {}", path))?;
        }

        if let Some(list) = var("SKILLGATE_DENYLIST") {
            config.policy.denied_modules = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(v) = var("SKILLGATE_REQUIRE_DOCS") {
            config.policy.require_doc_block = parse_flag(&v);
        }

        config.executor = match var("SKILLGATE_EXECUTOR").as_deref().map(str::trim) {
            None | Some("") | Some("sandbox") => ExecutorKind::Sandbox,
            Some("preview") => ExecutorKind::Preview,
            Some(other) => anyhow::bail!("Unknown SKILLGATE_EXECUTOR: {}", other),
        };

        if let Some(interpreter) = var("SKILLGATE_INTERPRETER") {
            config.sandbox.interpreter = interpreter;
        }

        if let Some(secs) = var("SKILLGATE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.sandbox.timeout_secs = secs;
        }

        if let Some(path) = var("SKILLGATE_REVIEWER_TTY") {
            config.reviewer_tty = PathBuf::from(path);
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn default_library_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skillgate")
        .join("library.json")
}
