//! Self-Extending Capabilities
//!
//! Lets the agent add tools to itself at runtime.
//!
//! # Architecture
//!
//! ```text
//! create_tool ──► Policy Validator ──► (interactive?) ──► Executor.compile
//!                      │                    │                   │
//!                 reject with          continuation:        register in
//!                 violations           ask_reviewer,        live registry
//!                                      resubmit with             │
//!                                      approved=true        append to
//!                                                           record store
//! ```
//!
//! # Record Format
//!
//! Accepted capabilities are kept in one JSON file:
//!
//! ```json
//! [
//!   {
//!     "name": "Greeter",
//!     "description": "says hi",
//!     "sourceCode": "\"\"\"says hi\"\"\"\ndef greet(): return 'hi'",
//!     "createdAt": "2024-05-01T12:00:00Z",
//!     "version": 1,
//!     "usageCount": 0
//!   }
//! ]
//! ```

pub mod admission;
pub mod approval;
pub mod executor;
pub mod policy;
pub mod registry;
pub mod reviewer;
pub mod store;
pub mod types;

pub use admission::{AdmissionController, AdmissionError, AdmissionOutcome, AdmissionState};
pub use approval::{ApprovalError, ApprovalMachine, ApprovalSession, ApprovalState};
pub use executor::{CompileError, Executor, PreviewExecutor, SandboxConfig, SandboxExecutor};
pub use policy::{PolicyConfig, PolicyValidator};
pub use registry::CapabilityRegistry;
pub use reviewer::{ConsoleReviewer, Reviewer};
pub use store::{RecordStore, StoreError};
pub use types::{
    Capability, CapabilityHandle, CapabilityRecord, CapabilitySubmission, PolicyVerdict, Scenario,
};
