//! Workflow coordinator
//!
//! The single entry point used by the gated action layer:
//!
//! 1. Policy gate (not required ⇒ `NotRequired`, nothing else runs)
//! 2. Modality selection
//! 3. Verification loop (verified ⇒ record ⇒ `Approved`)
//! 4. Escalation chain on exhaustion (approved ⇒ record ⇒ `Approved`,
//!    otherwise `Rejected`)
//!
//! Internal errors become `Failed`. A record-store failure after a successful
//! verification or escalation is one of them: an approval that cannot be
//! persisted carries no approval id and is never returned as `Approved`.

use crate::config::StepUpConfig;
use crate::contracts::{
    AuditStore, EnrollmentStore, LinkStore, Notifier, PolicyStore, RecordStore, TemplateMatcher,
};
use crate::error::{ConfigError, WorkflowError};
use crate::escalation::{EscalationChain, EscalationOutcome};
use crate::modality::{ModalityPlan, ModalitySelector};
use crate::policy::PolicyEvaluator;
use crate::recorder::ApprovalRecorder;
use crate::types::{Actor, ApprovalDecision, ApprovalEvidence, Modality, Transaction};
use crate::verification::{DeviceRegistry, VerificationOrchestrator, VerificationOutcome};
use std::sync::Arc;
use tracing::Instrument;

/// Sequences the step-up components into one decision
#[derive(Debug)]
pub struct WorkflowCoordinator {
    evaluator: PolicyEvaluator,
    selector: ModalitySelector,
    orchestrator: VerificationOrchestrator,
    escalation: EscalationChain,
    recorder: ApprovalRecorder,
}

impl WorkflowCoordinator {
    /// Assemble from already-built components
    #[must_use]
    pub fn new(
        evaluator: PolicyEvaluator,
        selector: ModalitySelector,
        orchestrator: VerificationOrchestrator,
        escalation: EscalationChain,
        recorder: ApprovalRecorder,
    ) -> Self {
        Self {
            evaluator,
            selector,
            orchestrator,
            escalation,
            recorder,
        }
    }

    /// Start a builder
    #[must_use]
    pub fn builder(config: StepUpConfig) -> WorkflowCoordinatorBuilder {
        WorkflowCoordinatorBuilder::new(config)
    }

    /// Decide whether the gated action may proceed
    ///
    /// Produces exactly one decision and never panics on collaborator
    /// failures. Proceed iff [`ApprovalDecision::permits_action`].
    pub async fn process_approval(&self, transaction: &Transaction, actor: &Actor) -> ApprovalDecision {
        let span = tracing::info_span!(
            "process_approval",
            transaction_id = %transaction.id,
            actor_id = %actor.id,
            tenant_id = %transaction.tenant_id,
        );

        async move {
            match self.run(transaction, actor).await {
                Ok(decision) => {
                    tracing::info!(status = ?decision.status(), method = ?decision.method(), "decision");
                    decision
                }
                Err(e) => {
                    tracing::error!("approval workflow failed: {}", e);
                    ApprovalDecision::failed()
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, transaction: &Transaction, actor: &Actor) -> Result<ApprovalDecision, WorkflowError> {
        if actor.tenant_id != transaction.tenant_id {
            return Err(WorkflowError::TenantMismatch {
                transaction: transaction.tenant_id.clone(),
                actor: actor.tenant_id.clone(),
            });
        }

        let required = self
            .evaluator
            .requires_approval(Some(transaction), Some(actor), &transaction.tenant_id)
            .await;
        if !required {
            return Ok(ApprovalDecision::not_required());
        }

        let plan = self.selector.select_modalities(&actor.id).await;
        let modality = self.choose_modality(&plan);
        tracing::debug!(%modality, plan = ?plan.as_slice(), "verification modality chosen");

        match self.orchestrator.verify(transaction, actor, modality).await? {
            VerificationOutcome::Verified(verification) => {
                self.approve(transaction, actor, verification.evidence()).await
            }
            VerificationOutcome::Exhausted { .. } => {
                match self.escalation.escalate(transaction, actor).await {
                    EscalationOutcome::Approved(evidence) => {
                        self.approve(transaction, actor, evidence).await
                    }
                    EscalationOutcome::Rejected { .. } => {
                        self.recorder.record_rejection(transaction, actor).await;
                        Ok(ApprovalDecision::rejected())
                    }
                }
            }
        }
    }

    /// First planned modality with a registered device, else the primary
    fn choose_modality(&self, plan: &ModalityPlan) -> Modality {
        let devices = self.orchestrator.devices();
        plan.iter()
            .find(|modality| devices.contains(*modality))
            .unwrap_or_else(|| plan.primary())
    }

    async fn approve(
        &self,
        transaction: &Transaction,
        actor: &Actor,
        evidence: ApprovalEvidence,
    ) -> Result<ApprovalDecision, WorkflowError> {
        let receipt = self
            .recorder
            .record_approval(transaction, actor, &evidence)
            .await?;
        Ok(ApprovalDecision::approved(evidence, receipt.approval_id))
    }
}

/// Wires collaborators into a [`WorkflowCoordinator`]
pub struct WorkflowCoordinatorBuilder {
    config: StepUpConfig,
    policies: Option<Arc<dyn PolicyStore>>,
    enrollments: Option<Arc<dyn EnrollmentStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    devices: DeviceRegistry,
    matcher: Option<Arc<dyn TemplateMatcher>>,
    escalation: Option<EscalationChain>,
    records: Option<Arc<dyn RecordStore>>,
    links: Option<Arc<dyn LinkStore>>,
    audit: Option<Arc<dyn AuditStore>>,
}

/// Collaborator missing when building a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("missing collaborator: {0}")]
pub struct MissingCollaborator(pub &'static str);

/// Why a coordinator could not be built
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Missing(#[from] MissingCollaborator),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl WorkflowCoordinatorBuilder {
    #[must_use]
    pub fn new(config: StepUpConfig) -> Self {
        Self {
            config,
            policies: None,
            enrollments: None,
            notifier: None,
            devices: DeviceRegistry::new(),
            matcher: None,
            escalation: None,
            records: None,
            links: None,
            audit: None,
        }
    }

    #[must_use]
    pub fn policies(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policies = Some(store);
        self
    }

    #[must_use]
    pub fn enrollments(mut self, store: Arc<dyn EnrollmentStore>) -> Self {
        self.enrollments = Some(store);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn devices(mut self, devices: DeviceRegistry) -> Self {
        self.devices = devices;
        self
    }

    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn TemplateMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Replace the standard escalation chain
    #[must_use]
    pub fn escalation(mut self, chain: EscalationChain) -> Self {
        self.escalation = Some(chain);
        self
    }

    #[must_use]
    pub fn records(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.records = Some(store);
        self
    }

    #[must_use]
    pub fn links(mut self, store: Arc<dyn LinkStore>) -> Self {
        self.links = Some(store);
        self
    }

    #[must_use]
    pub fn audit(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(store);
        self
    }

    /// Build the coordinator
    ///
    /// Without an explicit chain, the standard chain is used with the
    /// configured override roles.
    ///
    /// # Errors
    /// A required collaborator was not supplied, or the config fails
    /// [`StepUpConfig::validate`].
    pub fn build(self) -> Result<WorkflowCoordinator, BuildError> {
        let config = self.config;
        config.validate()?;
        let policies = self.policies.ok_or(MissingCollaborator("policy store"))?;
        let enrollments = self.enrollments.ok_or(MissingCollaborator("enrollment store"))?;
        let notifier = self.notifier.ok_or(MissingCollaborator("notifier"))?;
        let matcher = self.matcher.ok_or(MissingCollaborator("template matcher"))?;
        let records = self.records.ok_or(MissingCollaborator("record store"))?;
        let links = self.links.ok_or(MissingCollaborator("link store"))?;
        let audit = self.audit.ok_or(MissingCollaborator("audit store"))?;
        let escalation = self
            .escalation
            .unwrap_or_else(|| EscalationChain::standard(config.override_roles.iter().cloned()));

        Ok(WorkflowCoordinator::new(
            PolicyEvaluator::from_config(policies, &config),
            ModalitySelector::with_default(enrollments, config.default_modality),
            VerificationOrchestrator::from_config(notifier, self.devices, matcher, &config),
            escalation,
            ApprovalRecorder::new(records, links, audit),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{
        Capture, MockAuditStore, MockEnrollmentStore, MockLinkStore, MockNotifier, MockPolicyStore,
        MockRecordStore, MockTemplateMatcher, MockVerificationDevice, PromptResponse,
    };
    use crate::error::{DeviceError, StoreError};
    use crate::types::{ApprovalId, ApprovalMethod, ApprovalStatus, DeviceId, Role, TransactionType};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    struct Mocks {
        policies: MockPolicyStore,
        enrollments: MockEnrollmentStore,
        notifier: MockNotifier,
        device: MockVerificationDevice,
        matcher: MockTemplateMatcher,
        records: MockRecordStore,
        links: MockLinkStore,
        audit: MockAuditStore,
    }

    impl Mocks {
        fn permissive() -> Self {
            let mut policies = MockPolicyStore::new();
            policies.expect_get().returning(|_| Ok(None));
            let mut enrollments = MockEnrollmentStore::new();
            enrollments.expect_get().returning(|_| Ok(vec![]));
            let mut notifier = MockNotifier::new();
            notifier
                .expect_prompt()
                .returning(|_, _| PromptResponse::Acknowledged);
            let mut records = MockRecordStore::new();
            records.expect_save().returning(|_| Ok(ApprovalId::new("appr-9")));
            let mut links = MockLinkStore::new();
            links.expect_link().returning(|_, _| Ok(()));
            let mut audit = MockAuditStore::new();
            audit.expect_log().returning(|_| Ok(()));
            let mut matcher = MockTemplateMatcher::new();
            matcher.expect_match_template().never();

            Self {
                policies,
                enrollments,
                notifier,
                device: MockVerificationDevice::new(),
                matcher,
                records,
                links,
                audit,
            }
        }

        fn build(self) -> WorkflowCoordinator {
            self.build_with(StepUpConfig::default()).unwrap()
        }

        fn build_with(self, config: StepUpConfig) -> Result<WorkflowCoordinator, BuildError> {
            WorkflowCoordinator::builder(config)
                .policies(Arc::new(self.policies))
                .enrollments(Arc::new(self.enrollments))
                .notifier(Arc::new(self.notifier))
                .devices(DeviceRegistry::new().with_device(Modality::Facial, Arc::new(self.device)))
                .matcher(Arc::new(self.matcher))
                .records(Arc::new(self.records))
                .links(Arc::new(self.links))
                .audit(Arc::new(self.audit))
                .build()
        }
    }

    fn tx(total: i64) -> Transaction {
        Transaction::new("tx-1", "tenant", Decimal::new(total, 0), TransactionType::Sale)
    }

    #[tokio::test]
    async fn not_required_skips_everything() {
        let mut mocks = Mocks::permissive();
        mocks.notifier = MockNotifier::new();
        mocks.notifier.expect_prompt().never();
        mocks.device.expect_capture().never();

        let coordinator = mocks.build();
        let decision = coordinator
            .process_approval(&tx(500), &Actor::new("c", Role::Cashier, "tenant"))
            .await;

        assert_eq!(decision, ApprovalDecision::not_required());
    }

    #[tokio::test]
    async fn verified_capture_is_approved() {
        let mut mocks = Mocks::permissive();
        mocks.device.expect_capture().times(1).returning(|_| {
            Ok(Capture {
                confidence_score: 0.91,
                device_id: DeviceId::new("cam-7"),
            })
        });

        let decision = mocks
            .build()
            .process_approval(&tx(1500), &Actor::new("c", Role::Cashier, "tenant"))
            .await;

        assert_eq!(decision.status(), ApprovalStatus::Approved);
        assert_eq!(decision.method(), Some(ApprovalMethod::Biometric));
        assert_eq!(decision.modality(), Some(Modality::Facial));
        assert_eq!(decision.device_id(), Some(&DeviceId::new("cam-7")));
        assert_eq!(decision.approval_id(), Some(&ApprovalId::new("appr-9")));
    }

    #[tokio::test]
    async fn exhausted_manager_is_approved_by_override() {
        let mut mocks = Mocks::permissive();
        mocks
            .device
            .expect_capture()
            .times(3)
            .returning(|_| Err(DeviceError::CaptureFailed("glare".to_string())));

        let decision = mocks
            .build()
            .process_approval(&tx(50), &Actor::new("m", Role::Manager, "tenant"))
            .await;

        assert_eq!(decision.status(), ApprovalStatus::Approved);
        assert_eq!(decision.method(), Some(ApprovalMethod::ManagerOverride));
        assert_eq!(decision.modality(), None);
    }

    #[tokio::test]
    async fn tenant_mismatch_fails() {
        let mut mocks = Mocks::permissive();
        mocks.device.expect_capture().never();

        let decision = mocks
            .build()
            .process_approval(&tx(1500), &Actor::new("c", Role::Cashier, "other-tenant"))
            .await;

        assert_eq!(decision, ApprovalDecision::failed());
    }

    #[tokio::test]
    async fn record_failure_after_verification_fails() {
        let mut mocks = Mocks::permissive();
        mocks.device.expect_capture().returning(|_| {
            Ok(Capture {
                confidence_score: 0.99,
                device_id: DeviceId::new("cam-1"),
            })
        });
        mocks.records = MockRecordStore::new();
        mocks
            .records
            .expect_save()
            .returning(|_| Err(StoreError::Unavailable("primary".to_string())));
        mocks.links = MockLinkStore::new();
        mocks.links.expect_link().never();

        let decision = mocks
            .build()
            .process_approval(&tx(1500), &Actor::new("c", Role::Cashier, "tenant"))
            .await;

        assert_eq!(decision.status(), ApprovalStatus::Failed);
        assert!(decision.approval_id().is_none());
        assert!(!decision.permits_action());
    }

    #[tokio::test]
    async fn enrolled_modality_without_device_falls_through_to_registered_one() {
        let mut mocks = Mocks::permissive();
        mocks.enrollments = MockEnrollmentStore::new();
        mocks
            .enrollments
            .expect_get()
            .returning(|_| Ok(vec![Modality::Iris, Modality::Facial]));
        mocks.device.expect_capture().times(1).returning(|request| {
            assert_eq!(request.modality, Modality::Facial);
            Ok(Capture {
                confidence_score: 0.8,
                device_id: DeviceId::new("cam-2"),
            })
        });

        let decision = mocks
            .build()
            .process_approval(&tx(1500), &Actor::new("c", Role::Cashier, "tenant"))
            .await;
        assert_eq!(decision.modality(), Some(Modality::Facial));
    }

    #[test]
    fn builder_reports_missing_collaborator() {
        let err = WorkflowCoordinator::builder(StepUpConfig::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Missing(MissingCollaborator("policy store"))));
    }

    #[test]
    fn builder_rejects_zero_attempt_timeout() {
        let config = StepUpConfig::default().with_attempt_timeout(std::time::Duration::ZERO);
        let err = Mocks::permissive().build_with(config).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Config(ConfigError::Invalid { field: "attempt_timeout_ms", .. })
        ));
    }

    #[test]
    fn builder_rejects_zero_modality_timeout() {
        let config = StepUpConfig::default()
            .with_modality_timeout(Modality::Voice, std::time::Duration::ZERO);
        let err = Mocks::permissive().build_with(config).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Config(ConfigError::Invalid { field: "modality_timeouts_ms", .. })
        ));
    }
}
