//! Approval State Machine
//!
//! One prompt/response exchange with a reviewer per call. The machine keeps
//! no state between turns; the caller sequences refinement and approval
//! rounds and carries the result forward on the next submission.
//!
//! ```text
//!   AwaitingRefinement ──turn──► AwaitingApproval ──turn──► Accepted
//!                                                     └───► Rejected
//! ```
//!
//! Approval answers are fail-closed: anything other than a case-insensitive
//! `YES` is `NO`. Cancellation is an error, never an answer.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::reviewer::Reviewer;
use super::types::Scenario;

pub const YES: &str = "YES";
pub const NO: &str = "NO";

/// Review errors
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Review cancelled")]
    Cancelled,

    #[error("Reviewer input closed")]
    ReviewerClosed,

    #[error("Reviewer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a review conversation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    AwaitingRefinement,
    AwaitingApproval,
    Accepted,
    Rejected,
}

/// State for a single human-interaction turn
#[derive(Debug, Clone)]
pub struct ApprovalSession {
    pub scenario: Scenario,
    pub message: String,
    pub code: Option<String>,
    /// Raw trimmed reviewer text, set once the turn completes
    pub last_response: Option<String>,
}

impl ApprovalSession {
    pub fn new(scenario: Scenario, message: &str) -> Self {
        Self {
            scenario,
            message: message.to_string(),
            code: None,
            last_response: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn state(&self) -> ApprovalState {
        match (self.scenario, self.last_response.as_deref()) {
            (Scenario::Refinement, None) => ApprovalState::AwaitingRefinement,
            (Scenario::Refinement, Some(_)) => ApprovalState::AwaitingApproval,
            (Scenario::Approval, None) => ApprovalState::AwaitingApproval,
            (Scenario::Approval, Some(answer)) => {
                if normalize_approval(answer) == YES {
                    ApprovalState::Accepted
                } else {
                    ApprovalState::Rejected
                }
            }
        }
    }
}

/// Map a free-text answer to `YES` or `NO`
pub fn normalize_approval(response: &str) -> &'static str {
    if response.trim().eq_ignore_ascii_case(YES) {
        YES
    } else {
        NO
    }
}

/// Drives single review turns against a reviewer
#[derive(Clone)]
pub struct ApprovalMachine {
    reviewer: Arc<dyn Reviewer>,
}

impl ApprovalMachine {
    pub fn new(reviewer: Arc<dyn Reviewer>) -> Self {
        Self { reviewer }
    }

    /// Run one exchange and return the normalized reviewer text
    pub async fn run_turn(
        &self,
        session: &mut ApprovalSession,
        cancel: &CancellationToken,
    ) -> Result<String, ApprovalError> {
        if cancel.is_cancelled() {
            return Err(ApprovalError::Cancelled);
        }

        self.reviewer
            .display(session.scenario.label(), &session.message)
            .await?;
        if let Some(ref code) = session.code {
            self.reviewer.display("CODE", code).await?;
        }

        let prompt = match session.scenario {
            Scenario::Approval => "Approve? (YES/NO):",
            Scenario::Refinement => "Modifications (empty to keep as is):",
        };

        // Guard the wait even if the reviewer ignores the token
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApprovalError::Cancelled),
            answer = self.reviewer.ask_line(prompt, cancel) => answer?,
        };

        let trimmed = raw.trim().to_string();
        debug!("Reviewer answered {} turn: {:?}", session.scenario, trimmed);

        let result = match session.scenario {
            Scenario::Approval => normalize_approval(&trimmed).to_string(),
            Scenario::Refinement => trimmed.clone(),
        };
        session.last_response = Some(trimmed);

        info!("Review turn ({}) finished in state {:?}", session.scenario, session.state());
        Ok(result)
    }
}
