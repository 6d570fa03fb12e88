//! Skillgate MCP Server
//!
//! Lets an agent extend its own tool set at runtime. Submitted snippets pass
//! a policy gate, optionally a human reviewer, and are then registered into
//! the live tool list and persisted for later sessions.
//!
//! # Features
//!
//! - **MCP Protocol**: JSON-RPC 2.0 over stdio
//! - **Policy Gate**: documentation and import rules on submitted source
//! - **Human Review**: approval/refinement turns, cancellable per request
//! - **Live Registry**: concurrent reads, serialized registration
//! - **Record Store**: JSON library file, restored on startup
//!
//! # Architecture
//!
//! ```text
//! Agent ──► MCP Protocol ──► ToolRegistry ──► AdmissionController
//!             (stdio)            │                 ├── PolicyValidator
//!                                │                 ├── Executor (sandbox)
//!                                │                 ├── CapabilityRegistry
//!                                │                 └── RecordStore
//!                                └── ApprovalMachine ──► Reviewer (tty)
//! ```

pub mod config;
pub mod mcp;
pub mod skills;
pub mod tools;

pub use config::{Config, ExecutorKind};
pub use mcp::{McpRequest, McpResponse, McpServer};
pub use tools::{ToolDefinition, ToolRegistry};
