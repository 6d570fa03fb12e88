//! Capability Executors
//!
//! An executor turns policy-approved source into an invocable capability.
//! Two are provided:
//!
//! - [`SandboxExecutor`]: pipes the snippet to an interpreter in a child
//!   process with a cleared environment, a hard timeout, and an output cap
//! - [`PreviewExecutor`]: never runs anything; invoking returns the snippet
//!
//! The sandbox limits resources only. Whether the snippet itself is safe to
//! run is decided upstream by the policy gate and the reviewer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::types::{Capability, CapabilityHandle};

/// Environment variable carrying the invocation arguments as JSON
pub const ARGS_ENV_VAR: &str = "SKILLGATE_ARGS";

/// Compilation failure, surfaced verbatim to the caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CompileError(pub String);

/// Turns source into a live capability
#[async_trait]
pub trait Executor: Send + Sync {
    async fn compile(
        &self,
        name: &str,
        description: &str,
        input_schema: serde_json::Value,
        source_code: &str,
    ) -> Result<Capability, CompileError>;
}

fn check_source(source_code: &str, max_bytes: usize) -> Result<(), CompileError> {
    if source_code.trim().is_empty() {
        return Err(CompileError("Source code is empty".to_string()));
    }
    if source_code.len() > max_bytes {
        return Err(CompileError(format!(
            "Source code is {} bytes, limit is {}",
            source_code.len(),
            max_bytes
        )));
    }
    Ok(())
}

// ========== Sandbox ==========

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter binary; the snippet is written to its stdin
    pub interpreter: String,
    /// Arguments that make the interpreter read a program from stdin
    pub interpreter_args: Vec<String>,
    /// Maximum execution time in seconds
    pub timeout_secs: u64,
    /// Maximum stdout size in bytes
    pub max_output_bytes: usize,
    /// Maximum accepted source size in bytes
    pub max_source_bytes: usize,
    /// Working directory for execution
    pub working_dir: Option<PathBuf>,
    /// Environment variables passed through from the host
    pub allowed_env_vars: HashSet<String>,
    /// Additional environment variables to set
    pub extra_env: Vec<(String, String)>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-".to_string()],
            timeout_secs: 30,
            max_output_bytes: 1024 * 1024, // 1 MB
            max_source_bytes: 64 * 1024,
            working_dir: None,
            allowed_env_vars: default_allowed_env_vars(),
            extra_env: Vec::new(),
        }
    }
}

/// Default allowed environment variables
fn default_allowed_env_vars() -> HashSet<String> {
    ["PATH", "HOME", "USER", "LANG", "LC_ALL", "TERM", "TZ"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Result of one sandboxed run
#[derive(Debug, Clone)]
pub struct SandboxResult {
    /// Exit code (None if killed/timeout)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    /// Whether stdout was cut at the size limit
    pub truncated: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// Executor that runs snippets in a child interpreter process
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    config: Arc<SandboxConfig>,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Executor for SandboxExecutor {
    async fn compile(
        &self,
        name: &str,
        description: &str,
        input_schema: serde_json::Value,
        source_code: &str,
    ) -> Result<Capability, CompileError> {
        check_source(source_code, self.config.max_source_bytes)?;

        let handle = SandboxedSnippet {
            name: name.to_string(),
            source: Arc::from(source_code),
            config: self.config.clone(),
        };
        Ok(Capability::new(name, description, input_schema, Arc::new(handle)))
    }
}

/// Compiled snippet bound to a sandbox configuration
pub struct SandboxedSnippet {
    name: String,
    source: Arc<str>,
    config: Arc<SandboxConfig>,
}

impl SandboxedSnippet {
    /// Run the snippet once
    pub async fn run(&self, args: &serde_json::Value) -> Result<SandboxResult> {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(&self.config.interpreter_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .kill_on_drop(true);

        for var in &self.config.allowed_env_vars {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
        for (key, value) in &self.config.extra_env {
            cmd.env(key, value);
        }
        cmd.env(ARGS_ENV_VAR, serde_json::to_string(args)?);

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.config.interpreter))?;

        // Feed the source while draining output, all under one deadline
        let stdin = child.stdin.take();
        let source = self.source.clone();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(source.as_bytes()).await?;
                // dropping closes the pipe so the interpreter sees EOF
            }
            Ok::<_, std::io::Error>(())
        };
        let run = async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            if let Err(e) = fed {
                // an interpreter may exit without reading all of stdin
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(anyhow::Error::new(e).context("Failed to write snippet to interpreter"));
                }
            }
            output.context("Failed to collect interpreter output")
        };

        // On timeout the child is dropped and killed
        let output = match tokio::time::timeout(timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(
                    "Capability '{}' timed out after {}s",
                    self.name, self.config.timeout_secs
                );
                return Ok(SandboxResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Execution timed out after {} seconds", self.config.timeout_secs),
                    success: false,
                    truncated: false,
                    timed_out: true,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
            }
        };

        let max = self.config.max_output_bytes;
        let truncated = output.stdout.len() > max;
        let stdout_bytes = if truncated { &output.stdout[..max] } else { &output.stdout[..] };

        let result = SandboxResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(stdout_bytes).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            truncated,
            timed_out: false,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        debug!(
            "Capability '{}' exited with {:?} in {}ms",
            self.name, result.exit_code, result.duration_ms
        );
        Ok(result)
    }
}

#[async_trait]
impl CapabilityHandle for SandboxedSnippet {
    async fn invoke(&self, args: serde_json::Value) -> Result<String> {
        let result = self.run(&args).await?;

        if result.timed_out {
            anyhow::bail!("{}", result.stderr);
        }
        if !result.success {
            anyhow::bail!(
                "Capability '{}' failed (exit {:?}): {}",
                self.name,
                result.exit_code,
                result.stderr.trim()
            );
        }

        let mut out = result.stdout;
        if result.truncated {
            out.push_str("\n[output truncated]");
        }
        Ok(out)
    }
}

// ========== Preview ==========

/// Executor whose capabilities only echo their source
#[derive(Debug, Clone)]
pub struct PreviewExecutor {
    max_source_bytes: usize,
}

impl Default for PreviewExecutor {
    fn default() -> Self {
        Self {
            max_source_bytes: SandboxConfig::default().max_source_bytes,
        }
    }
}

struct SnippetPreview {
    source: Arc<str>,
}

#[async_trait]
impl CapabilityHandle for SnippetPreview {
    async fn invoke(&self, _args: serde_json::Value) -> Result<String> {
        Ok(format!("Executing library snippet:\n{}", self.source))
    }
}

#[async_trait]
impl Executor for PreviewExecutor {
    async fn compile(
        &self,
        name: &str,
        description: &str,
        input_schema: serde_json::Value,
        source_code: &str,
    ) -> Result<Capability, CompileError> {
        check_source(source_code, self.max_source_bytes)?;
        let handle = SnippetPreview {
            source: Arc::from(source_code),
        };
        Ok(Capability::new(name, description, input_schema, Arc::new(handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::types::empty_object_schema;

    fn shell_sandbox() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig {
            interpreter: "sh".to_string(),
            interpreter_args: vec!["-s".to_string()],
            timeout_secs: 5,
            ..Default::default()
        })
    }

    async fn compile(executor: &dyn Executor, source: &str) -> Result<Capability, CompileError> {
        executor.compile("t", "test", empty_object_schema(), source).await
    }

    #[tokio::test]
    async fn test_preview_echoes_source() {
        let cap = compile(&PreviewExecutor::default(), "\"\"\"doc\"\"\"\nx = 1").await.unwrap();
        let out = cap.invoke(serde_json::json!({})).await.unwrap();
        assert_eq!(out, "Executing library snippet:\n\"\"\"doc\"\"\"\nx = 1");
    }

    #[tokio::test]
    async fn test_empty_source_fails_compile() {
        let err = compile(&PreviewExecutor::default(), "  \n").await.unwrap_err();
        assert!(err.0.contains("empty"));
    }

    #[tokio::test]
    async fn test_oversized_source_fails_compile() {
        let executor = SandboxExecutor::new(SandboxConfig {
            max_source_bytes: 8,
            ..Default::default()
        });
        let err = compile(&executor, "echo 0123456789").await.unwrap_err();
        assert!(err.0.contains("limit"));
    }

    #[tokio::test]
    async fn test_sandbox_runs_snippet() {
        let cap = compile(&shell_sandbox(), "echo hello").await.unwrap();
        let out = cap.invoke(serde_json::json!({})).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_sandbox_passes_args() {
        let cap = compile(&shell_sandbox(), "printf '%s' \"$SKILLGATE_ARGS\"").await.unwrap();
        let out = cap.invoke(serde_json::json!({"who": "world"})).await.unwrap();
        assert_eq!(out, r#"{"who":"world"}"#);
    }

    #[tokio::test]
    async fn test_sandbox_clears_environment() {
        std::env::set_var("SKILLGATE_TEST_SECRET", "hunter2");
        let cap = compile(&shell_sandbox(), "echo \"${SKILLGATE_TEST_SECRET:-unset}\"").await.unwrap();
        let out = cap.invoke(serde_json::json!({})).await.unwrap();
        assert_eq!(out.trim(), "unset");
    }

    #[tokio::test]
    async fn test_sandbox_failure_is_error() {
        let cap = compile(&shell_sandbox(), "echo broken >&2; exit 3").await.unwrap();
        let err = cap.invoke(serde_json::json!({})).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("broken"));
        assert!(msg.contains("3"));
    }

    #[tokio::test]
    async fn test_sandbox_timeout() {
        let executor = SandboxExecutor::new(SandboxConfig {
            interpreter: "sh".to_string(),
            interpreter_args: vec!["-s".to_string()],
            timeout_secs: 1,
            ..Default::default()
        });
        let cap = compile(&executor, "sleep 10").await.unwrap();
        let err = cap.invoke(serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unread_stdin_still_times_out() {
        // The interpreter never reads stdin and the source overflows the pipe buffer
        let executor = SandboxExecutor::new(SandboxConfig {
            interpreter: "sh".to_string(),
            interpreter_args: vec!["-c".to_string(), "sleep 10".to_string()],
            timeout_secs: 1,
            max_source_bytes: 1024 * 1024,
            ..Default::default()
        });
        let source = format!("# {}\n", "x".repeat(512 * 1024));
        let cap = compile(&executor, &source).await.unwrap();

        let started = Instant::now();
        let err = cap.invoke(serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sandbox_truncates_output() {
        let executor = SandboxExecutor::new(SandboxConfig {
            interpreter: "sh".to_string(),
            interpreter_args: vec!["-s".to_string()],
            max_output_bytes: 4,
            ..Default::default()
        });
        let cap = compile(&executor, "echo abcdefgh").await.unwrap();
        let out = cap.invoke(serde_json::json!({})).await.unwrap();
        assert!(out.starts_with("abcd\n[output truncated]"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_error() {
        let executor = SandboxExecutor::new(SandboxConfig {
            interpreter: "definitely-not-an-interpreter-xyz".to_string(),
            ..Default::default()
        });
        let cap = compile(&executor, "print(1)").await.unwrap();
        assert!(cap.invoke(serde_json::json!({})).await.is_err());
    }
}
