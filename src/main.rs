//! Skillgate MCP Server - Entry Point
//!
//! Runs an MCP server over stdio. With `--interactive` (or
//! `SKILLGATE_INTERACTIVE=1`) new tools need a reviewer's YES, asked on the
//! controlling terminal.

use std::sync::Arc;

use anyhow::Context;
use skillgate::skills::{
    AdmissionController, ApprovalMachine, CapabilityRegistry, ConsoleReviewer, Executor,
    PolicyValidator, PreviewExecutor, RecordStore, SandboxExecutor,
};
use skillgate::{tools, Config, ExecutorKind, McpServer, ToolRegistry};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let interactive_flag = args.iter().any(|a| a == "--interactive" || a == "-i");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Skillgate MCP Server v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: skillgate [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --interactive, -i  Require reviewer approval for new tools");
        println!("  --help, -h         Show this help");
        println!();
        println!("Environment variables:");
        println!("  SKILLGATE_INTERACTIVE    Require reviewer approval (true/1)");
        println!("  SKILLGATE_LIBRARY        Capability library file");
        println!("  SKILLGATE_POLICY_FILE    TOML file with a [policy] table");
        println!("  SKILLGATE_DENYLIST       Comma-separated denied modules (default: os,subprocess)");
        println!("  SKILLGATE_REQUIRE_DOCS   Require a documentation block (default: true)");
        println!("  SKILLGATE_EXECUTOR       sandbox | preview (default: sandbox)");
        println!("  SKILLGATE_INTERPRETER    Sandbox interpreter (default: python3)");
        println!("  SKILLGATE_TIMEOUT_SECS   Sandbox timeout (default: 30)");
        println!("  SKILLGATE_REVIEWER_TTY   Reviewer terminal (default: /dev/tty)");
        return Ok(());
    }

    // MCP mode - stdout carries the protocol, log to stderr as JSON
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::from_env()?;
    config.interactive |= interactive_flag;

    info!("Skillgate MCP Server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Library: {} (interactive: {})",
        config.library_path.display(),
        config.interactive
    );

    let executor: Arc<dyn Executor> = match config.executor {
        ExecutorKind::Sandbox => Arc::new(SandboxExecutor::new(config.sandbox.clone())),
        ExecutorKind::Preview => Arc::new(PreviewExecutor::default()),
    };

    let capabilities = Arc::new(CapabilityRegistry::new());
    let store = Arc::new(RecordStore::new(config.library_path.clone()));
    let admission = Arc::new(
        AdmissionController::new(
            PolicyValidator::new(config.policy.clone()),
            executor,
            capabilities.clone(),
            store,
            config.interactive,
        )
        .with_reserved_names(tools::BUILTIN_TOOL_NAMES),
    );

    admission
        .rehydrate()
        .await
        .context("Failed to restore capability library")?;

    let approval = if config.interactive {
        match ConsoleReviewer::open(&config.reviewer_tty).await {
            Ok(reviewer) => Some(ApprovalMachine::new(Arc::new(reviewer))),
            Err(e) => {
                warn!(
                    "No reviewer terminal at {}: {}",
                    config.reviewer_tty.display(),
                    e
                );
                None
            }
        }
    } else {
        None
    };

    let server = McpServer::new(ToolRegistry::new(admission, capabilities, approval));
    server.run().await?;

    Ok(())
}
