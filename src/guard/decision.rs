//! Admission decisions.

use serde::Serialize;

/// Outcome of evaluating one request against its identity's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Forward the request downstream
    Allow,
    /// Short-circuit with a too-many-requests response
    Reject {
        /// Seconds until the client's window resets
        retry_after_secs: u64,
    },
}

impl AdmissionDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allow)
    }

    /// Retry-after guidance, if the request was rejected.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AdmissionDecision::Allow => None,
            AdmissionDecision::Reject { retry_after_secs } => Some(*retry_after_secs),
        }
    }
}

/// Client-visible body of a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionBody {
    pub detail: &'static str,
    pub retry_after_seconds: u64,
}

impl RejectionBody {
    pub fn new(retry_after_seconds: u64) -> Self {
        Self {
            detail: "Too Many Requests",
            retry_after_seconds,
        }
    }
}
