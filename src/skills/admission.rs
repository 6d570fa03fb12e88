//! Admission Controller
//!
//! Orchestrates one capability submission:
//!
//! ```text
//! VALIDATING ─┬─► REJECTED_BY_POLICY
//!             ├─► AWAITING_HUMAN        (interactive, no approval yet)
//!             ├─► REJECTED_BY_HUMAN     (interactive, reviewer said NO)
//!             └─► COMPILING ─┬─► REGISTERED
//!                            └─► COMPILE_FAILED
//! ```
//!
//! The controller never waits on a human. In interactive mode it answers with
//! a continuation telling the caller which review turn to run, and the caller
//! resubmits carrying the reviewer's decision in `approved`. Each call is
//! therefore stateless and can be retried.
//!
//! The registry and store are owned by the host and shared in. Compile,
//! persist and register run under one lock so concurrent admissions cannot
//! interleave their store rewrites.

use futures_util::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::executor::Executor;
use super::policy::PolicyValidator;
use super::registry::CapabilityRegistry;
use super::store::{RecordStore, StoreError};
use super::types::{empty_object_schema, CapabilityRecord, CapabilitySubmission, Scenario};

/// Terminal state of one admission call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    RejectedByPolicy,
    AwaitingHuman,
    RejectedByHuman,
    CompileFailed,
    Registered,
}

impl AdmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RejectedByPolicy => "REJECTED_BY_POLICY",
            Self::AwaitingHuman => "AWAITING_HUMAN",
            Self::RejectedByHuman => "REJECTED_BY_HUMAN",
            Self::CompileFailed => "COMPILE_FAILED",
            Self::Registered => "REGISTERED",
        }
    }
}

/// Structured result returned to the agent loop
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    Registered {
        tool_name: String,
        message: String,
    },
    RejectedByPolicy {
        errors: Vec<String>,
    },
    /// Continuation: run `interaction` with the reviewer, then resubmit
    AwaitingHuman {
        interaction: Scenario,
        message: String,
        code: String,
    },
    /// The reviewer declined; refine the code, then resubmit
    RejectedByHuman {
        interaction: Scenario,
        message: String,
        code: String,
    },
    CompileFailed {
        error: String,
    },
}

impl AdmissionOutcome {
    pub fn state(&self) -> AdmissionState {
        match self {
            Self::Registered { .. } => AdmissionState::Registered,
            Self::RejectedByPolicy { .. } => AdmissionState::RejectedByPolicy,
            Self::AwaitingHuman { .. } => AdmissionState::AwaitingHuman,
            Self::RejectedByHuman { .. } => AdmissionState::RejectedByHuman,
            Self::CompileFailed { .. } => AdmissionState::CompileFailed,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }

    /// JSON payload for the caller
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            Self::Registered { tool_name, message } => json!({
                "tool_name": tool_name,
                "message": message,
            }),
            Self::RejectedByPolicy { errors } => json!({
                "status": "rejected",
                "state": self.state().as_str(),
                "errors": errors,
            }),
            Self::AwaitingHuman {
                interaction,
                message,
                code,
            }
            | Self::RejectedByHuman {
                interaction,
                message,
                code,
            } => json!({
                "status": "needs_review",
                "state": self.state().as_str(),
                "interaction": interaction.as_str(),
                "message": message,
                "code": code,
            }),
            Self::CompileFailed { error } => json!({
                "status": "compile_failed",
                "state": self.state().as_str(),
                "error": error,
            }),
        }
    }
}

/// Unexpected admission failures, with operation context
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("{operation} failed for '{name}': {source}")]
    Store {
        operation: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },
}

impl AdmissionError {
    /// True when the store file could not be parsed
    pub fn is_corrupt_store(&self) -> bool {
        matches!(
            self,
            Self::Store {
                source: StoreError::Corrupt { .. },
                ..
            }
        )
    }
}

/// Runs the validate → approve → compile → persist → register pipeline
pub struct AdmissionController {
    validator: PolicyValidator,
    executor: Arc<dyn Executor>,
    registry: Arc<CapabilityRegistry>,
    store: Arc<RecordStore>,
    interactive: bool,
    /// Names the host already serves; capabilities may not take them
    reserved_names: Vec<String>,
    /// Serializes compile/persist/register
    admit_lock: Mutex<()>,
}

impl AdmissionController {
    pub fn new(
        validator: PolicyValidator,
        executor: Arc<dyn Executor>,
        registry: Arc<CapabilityRegistry>,
        store: Arc<RecordStore>,
        interactive: bool,
    ) -> Self {
        Self {
            validator,
            executor,
            registry,
            store,
            interactive,
            reserved_names: Vec::new(),
            admit_lock: Mutex::new(()),
        }
    }

    /// Refuse submissions whose name collides with one of `names`
    pub fn with_reserved_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Admit one submission
    pub async fn submit(
        &self,
        submission: &CapabilitySubmission,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        let admission_id = Uuid::new_v4();
        let name = submission.name.as_str();

        // 1. Policy
        let mut errors = Vec::new();
        if name.trim().is_empty() {
            errors.push("Capability name must not be empty.".to_string());
        } else if self.reserved_names.iter().any(|r| r == name) {
            errors.push(format!("Capability name '{}' is reserved.", name));
        }
        if submission.description.trim().is_empty() {
            errors.push("Capability description must not be empty.".to_string());
        }
        errors.extend(self.validator.validate(&submission.source_code).errors);

        if !errors.is_empty() {
            warn!(
                %admission_id,
                "Capability '{}' {}: {}",
                name,
                AdmissionState::RejectedByPolicy.as_str(),
                errors.join(" ")
            );
            return Ok(AdmissionOutcome::RejectedByPolicy { errors });
        }

        // 2. Human gate
        if self.interactive && !submission.is_approved() {
            let outcome = self.review_continuation(submission);
            info!(%admission_id, "Capability '{}' {}", name, outcome.state().as_str());
            return Ok(outcome);
        }

        let _guard = self.admit_lock.lock().await;

        // 3. Compile
        let capability = match self
            .executor
            .compile(
                name,
                &submission.description,
                submission.schema_or_default(),
                &submission.source_code,
            )
            .await
        {
            Ok(capability) => capability,
            Err(e) => {
                warn!(
                    %admission_id,
                    "Capability '{}' {}: {}",
                    name,
                    AdmissionState::CompileFailed.as_str(),
                    e
                );
                return Ok(AdmissionOutcome::CompileFailed { error: e.to_string() });
            }
        };

        // 4. Persist, then register. A store failure leaves the registry untouched.
        let record = CapabilityRecord::new(name, &submission.description, &submission.source_code);
        self.store
            .append(&record)
            .await
            .map_err(|source| AdmissionError::Store {
                operation: "persist capability",
                name: name.to_string(),
                source,
            })?;

        self.registry.register(capability);

        info!(
            %admission_id,
            "Capability '{}' {} ({} live)",
            name,
            AdmissionState::Registered.as_str(),
            self.registry.len()
        );

        // 5. Report
        Ok(AdmissionOutcome::Registered {
            tool_name: name.to_string(),
            message: format!("Tool '{}' created and registered.", name),
        })
    }

    fn review_continuation(&self, submission: &CapabilitySubmission) -> AdmissionOutcome {
        let name = &submission.name;
        let code = submission.source_code.clone();

        if submission.approved == Some(false) {
            AdmissionOutcome::RejectedByHuman {
                interaction: Scenario::Refinement,
                message: format!(
                    "The reviewer declined '{}'. Ask for modifications with ask_reviewer \
                     (scenario \"refinement\"), revise the code, and resubmit without 'approved'.",
                    name
                ),
                code,
            }
        } else {
            AdmissionOutcome::AwaitingHuman {
                interaction: Scenario::Approval,
                message: format!(
                    "Interactive mode: ask the reviewer to approve '{}' with ask_reviewer \
                     (scenario \"approval\"). If the answer is YES resubmit with approved=true, \
                     otherwise resubmit with approved=false.",
                    name
                ),
                code,
            }
        }
    }

    /// Compile and register every persisted record. Returns how many were registered.
    pub async fn rehydrate(&self) -> Result<usize, AdmissionError> {
        let _guard = self.admit_lock.lock().await;

        let records = self
            .store
            .load_all()
            .await
            .map_err(|source| AdmissionError::Store {
                operation: "load capability library",
                name: self.store.path().display().to_string(),
                source,
            })?;

        // Compile in parallel, register in store order so later records shadow earlier ones
        let compiled = join_all(records.iter().map(|record| {
            self.executor.compile(
                &record.name,
                &record.description,
                empty_object_schema(),
                &record.source_code,
            )
        }))
        .await;

        let mut loaded = 0;
        for (record, result) in records.iter().zip(compiled) {
            match result {
                Ok(capability) => {
                    self.registry.register(capability);
                    loaded += 1;
                }
                Err(e) => {
                    warn!("Skipping stored capability '{}': {}", record.name, e);
                }
            }
        }

        info!("Restored {} of {} stored capabilities", loaded, records.len());
        Ok(loaded)
    }
}
