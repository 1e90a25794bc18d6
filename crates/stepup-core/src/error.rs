//! Error types for step-up approval
//!
//! Provides error handling for:
//! - Policy loading and evaluation failures
//! - Device capture, match and timeout failures
//! - Escalation strategy failures
//! - Sink (store) write failures
//! - Workflow-level internal errors
//! - Configuration loading

use crate::types::{ApprovalMethod, Modality, TenantId};
use crate::verification::VerificationState;
use std::time::Duration;

/// Failure reported by a storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Write was refused
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Stored data could not be decoded
    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

/// Policy evaluation errors
///
/// Every variant is resolved by the configured fail mode rather than
/// surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Transaction or actor absent from the request
    #[error("missing {0} for policy evaluation")]
    MissingInput(&'static str),

    /// Policy store failed
    #[error("policy unavailable for tenant {tenant}: {source}")]
    PolicyUnavailable {
        tenant: TenantId,
        #[source]
        source: StoreError,
    },

    /// Risk predicate could not be computed
    #[error("risk evaluation failed: {0}")]
    RiskEvaluation(String),

    /// Policy values are out of range
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

/// Verification device errors; each one consumes an attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    /// Capture did not produce a usable sample
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// Capture did not match the enrolled template
    #[error("template mismatch (score {score:.3})")]
    TemplateMismatch { score: f64 },

    /// Actor has no stored template for the modality
    #[error("no enrolled template for {0}")]
    NoTemplate(Modality),

    /// Per-attempt timeout elapsed
    #[error("device timed out after {0:?}")]
    Timeout(Duration),

    /// Device cancelled the pending operation
    #[error("device cancelled the operation")]
    Cancelled,

    /// No device registered for the modality
    #[error("no device registered for {0}")]
    Unavailable(Modality),
}

impl DeviceError {
    /// Check if error came from the per-attempt timer
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Escalation strategy failure; advances the chain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscalationError {
    /// Strategy has no backing collaborator
    #[error("{0} approval is not available")]
    Unavailable(ApprovalMethod),

    /// Actor is not allowed to use this strategy
    #[error("{method} not permitted for role {role}")]
    NotPermitted { method: ApprovalMethod, role: String },

    /// Credentials or remote approver declined
    #[error("{0} approval declined")]
    Declined(ApprovalMethod),

    /// Backing collaborator failed
    #[error("{method} approval errored: {source}")]
    Backend {
        method: ApprovalMethod,
        #[source]
        source: StoreError,
    },
}

/// Canonical record write failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("approval record write failed: {0}")]
pub struct RecordError(#[from] pub StoreError);

/// A serialized decision whose fields disagree with its status
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid approval decision: {0}")]
pub struct InvalidDecision(pub &'static str);

/// State machine errors for the verification loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("illegal verification transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: VerificationState,
        to: VerificationState,
    },
}

/// Internal workflow errors; all surface as a Failed decision
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Actor and transaction belong to different tenants
    #[error("tenant mismatch: transaction {transaction}, actor {actor}")]
    TenantMismatch { transaction: TenantId, actor: TenantId },

    /// Verification loop reached an illegal state
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    /// Canonical record could not be persisted
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_error_display() {
        let err = PolicyError::PolicyUnavailable {
            tenant: TenantId::new("t-9"),
            source: StoreError::Unavailable("connection refused".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("t-9"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn device_error_is_timeout() {
        assert!(DeviceError::Timeout(Duration::from_secs(5)).is_timeout());
        assert!(!DeviceError::Cancelled.is_timeout());
        assert!(!DeviceError::CaptureFailed("blurry".to_string()).is_timeout());
    }

    #[test]
    fn record_error_wraps_store_error() {
        let err: RecordError = StoreError::Rejected("constraint".to_string()).into();
        assert!(err.to_string().contains("constraint"));

        let workflow: WorkflowError = err.into();
        assert!(matches!(workflow, WorkflowError::Record(_)));
    }

    #[test]
    fn escalation_error_display() {
        let err = EscalationError::NotPermitted {
            method: ApprovalMethod::ManagerOverride,
            role: "cashier".to_string(),
        };
        assert_eq!(err.to_string(), "manager_override not permitted for role cashier");
    }
}
