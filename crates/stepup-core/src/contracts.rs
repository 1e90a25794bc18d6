//! Collaborator contracts
//!
//! Storage, prompting and device access are external to the core. Each
//! collaborator is an async trait object shared behind an `Arc`; implementors
//! provide their own concurrency safety.

use crate::error::{DeviceError, StoreError};
use crate::policy::Policy;
use crate::types::{
    Actor, ActorId, ApprovalId, ApprovalMethod, ApprovalRecord, AuditEvent, DeviceId, Modality,
    TenantId, Transaction, TransactionId,
};
use serde::{Deserialize, Serialize};

/// Per-tenant policy lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// Load the tenant's policy, `None` when the tenant has none stored
    async fn get(&self, tenant_id: &TenantId) -> Result<Option<Policy>, StoreError>;
}

/// Pre-registered verification modalities per actor
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Enrolled modalities in preference order
    async fn get(&self, actor_id: &ActorId) -> Result<Vec<Modality>, StoreError>;
}

/// Prompt shown to the actor before a capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub transaction_id: TransactionId,
    pub modality: Modality,
    pub attempt: u8,
    pub max_attempts: u8,
    pub message: String,
}

/// Actor's reaction to a prompt
///
/// Advisory only: the verification loop logs it and never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptResponse {
    Acknowledged,
    Cancelled,
    Unavailable,
}

/// Prompt delivery (dialog, display, terminal)
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn prompt(&self, actor_id: &ActorId, request: &PromptRequest) -> PromptResponse;
}

/// Capture request handed to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub transaction_id: TransactionId,
    pub actor_id: ActorId,
    pub modality: Modality,
}

/// Successful capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub confidence_score: f64,
    pub device_id: DeviceId,
}

/// Verification hardware for a single modality
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait VerificationDevice: Send + Sync {
    /// Capture (and, for facial, verify) a live sample
    async fn capture(&self, request: &CaptureRequest) -> Result<Capture, DeviceError>;
}

/// Result of comparing a capture with the enrolled template
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub matched: bool,
    pub score: f64,
}

/// Template comparison for modalities that need it
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TemplateMatcher: Send + Sync {
    async fn match_template(
        &self,
        actor_id: &ActorId,
        modality: Modality,
        capture: &Capture,
    ) -> Result<TemplateMatch, DeviceError>;
}

/// Canonical approval record sink
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist the record and return its approval id
    async fn save(&self, record: &ApprovalRecord) -> Result<ApprovalId, StoreError>;
}

/// Transaction to approval link sink
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LinkStore: Send + Sync {
    async fn link(
        &self,
        transaction_id: &TransactionId,
        approval_id: &ApprovalId,
    ) -> Result<(), StoreError>;
}

/// Append-only audit sink
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    async fn log(&self, event: &AuditEvent) -> Result<(), StoreError>;
}

/// PIN / password check used by credential escalation strategies
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// `Ok(true)` when the actor supplied a valid credential for `method`
    async fn verify(&self, actor: &Actor, method: ApprovalMethod) -> Result<bool, StoreError>;
}

/// Remote push-approval service
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PushApprovalService: Send + Sync {
    /// `Ok(true)` when a remote approver accepted the request
    async fn request_approval(
        &self,
        transaction: &Transaction,
        actor: &Actor,
    ) -> Result<bool, StoreError>;
}
