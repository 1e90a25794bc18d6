//! StepUp Core - step-up approval for sensitive point-of-sale actions
//!
//! Decides whether a transaction needs a second factor and, if so:
//! - Selects the actor's biometric modalities
//! - Runs up to three prompt/capture/verify attempts
//! - Escalates through PIN, password, manager override and push approval
//! - Records the approval, links it to the transaction and audits it
//!
//! # Example
//!
//! ```rust,ignore
//! use stepup_core::prelude::*;
//! use stepup_core::memory::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = WorkflowCoordinator::builder(StepUpConfig::new())
//!     .policies(Arc::new(InMemoryPolicyStore::new()))
//!     .enrollments(Arc::new(InMemoryEnrollmentStore::new()))
//!     .notifier(Arc::new(LoggingNotifier::default()))
//!     .devices(DeviceRegistry::new().with_device(
//!         Modality::Facial,
//!         Arc::new(SimulatedDevice::new("cam-1", [SimulatedCapture::Success { score: 0.93 }])),
//!     ))
//!     .matcher(Arc::new(InMemoryTemplateStore::new()))
//!     .records(Arc::new(InMemoryRecordStore::new()))
//!     .links(Arc::new(InMemoryLinkStore::new()))
//!     .audit(Arc::new(InMemoryAuditLog::new()))
//!     .build()?;
//!
//! let tx = Transaction::new("tx-1", "store-9", "1500".parse()?, TransactionType::Refund);
//! let actor = Actor::new("cashier-4", Role::Cashier, "store-9");
//! let decision = coordinator.process_approval(&tx, &actor).await;
//!
//! println!("{:?} via {:?}", decision.status(), decision.method());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod config;
pub mod contracts;
pub mod coordinator;
pub mod error;
pub mod escalation;
pub mod memory;
pub mod modality;
pub mod policy;
pub mod recorder;
pub mod types;
pub mod verification;

pub use cache::{CacheStats, PolicyCache};
pub use config::{EvaluationFailMode, PolicyCacheConfig, StepUpConfig, MAX_ATTEMPTS};
pub use contracts::{
    AuditStore, Capture, CaptureRequest, CredentialVerifier, EnrollmentStore, LinkStore, Notifier,
    PolicyStore, PromptRequest, PromptResponse, PushApprovalService, RecordStore, TemplateMatch,
    TemplateMatcher, VerificationDevice,
};
pub use coordinator::{
    BuildError, MissingCollaborator, WorkflowCoordinator, WorkflowCoordinatorBuilder,
};
pub use error::{
    ConfigError, DeviceError, EscalationError, InvalidDecision, PolicyError, RecordError,
    StateMachineError, StoreError, WorkflowError,
};
pub use escalation::{
    CredentialStrategy, EscalationChain, EscalationOutcome, EscalationStrategy,
    ExternalServiceStrategy, ManagerOverrideStrategy,
};
pub use modality::{ModalityPlan, ModalitySelector};
pub use policy::{ApprovalTrigger, Policy, PolicyEvaluator};
pub use recorder::{ApprovalRecorder, RecordReceipt};
pub use types::{
    Actor, ActorId, ApprovalDecision, ApprovalEvidence, ApprovalId, ApprovalMethod,
    ApprovalRecord, ApprovalStatus, AuditEvent, AuditEventKind, DeviceId, Modality, Role,
    TenantId, Transaction, TransactionId, TransactionType,
};
pub use verification::{
    ApprovalAttempt, AttemptOutcome, DeviceRegistry, Verification, VerificationOrchestrator,
    VerificationOutcome, VerificationState,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring a coordinator
    pub use crate::{
        Actor, ApprovalDecision, ApprovalMethod, ApprovalStatus, DeviceRegistry, EscalationChain,
        EvaluationFailMode, Modality, Policy, Role, StepUpConfig, Transaction, TransactionType,
        WorkflowCoordinator,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::memory::*;
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    #[tokio::test]
    async fn in_memory_flow_approves_and_records() {
        let records = Arc::new(InMemoryRecordStore::new());
        let links = Arc::new(InMemoryLinkStore::new());
        let audit = Arc::new(InMemoryAuditLog::new());

        let coordinator = WorkflowCoordinator::builder(StepUpConfig::new())
            .policies(Arc::new(InMemoryPolicyStore::new()))
            .enrollments(Arc::new(InMemoryEnrollmentStore::new()))
            .notifier(Arc::new(LoggingNotifier::default()))
            .devices(DeviceRegistry::new().with_device(
                Modality::Facial,
                Arc::new(SimulatedDevice::new("cam-1", [SimulatedCapture::Success { score: 0.93 }])),
            ))
            .matcher(Arc::new(InMemoryTemplateStore::new()))
            .records(records.clone())
            .links(links.clone())
            .audit(audit.clone())
            .build()
            .unwrap();

        let tx = Transaction::new("tx-1", "store-9", Decimal::new(1500, 0), TransactionType::Sale);
        let actor = Actor::new("cashier-4", Role::Cashier, "store-9");
        let decision = coordinator.process_approval(&tx, &actor).await;

        assert_eq!(decision.status(), ApprovalStatus::Approved);
        let approval_id = decision.approval_id().cloned().unwrap();
        assert!(records.get(&approval_id).is_some());
        assert_eq!(links.approval_for(&tx.id), Some(approval_id));
        assert_eq!(audit.events().len(), 1);
        assert!(audit.verify_integrity().is_ok());
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
