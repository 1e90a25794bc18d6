//! Testing utilities for the StepUp workspace
//!
//! Shared fixtures, failing doubles and a [`Harness`] that wires a
//! coordinator from in-memory collaborators while keeping handles to them.

#![allow(missing_docs)]

use rust_decimal::Decimal;
use stepup_core::contracts::{
    Capture, CredentialVerifier, EnrollmentStore, PolicyStore, PushApprovalService, RecordStore,
    TemplateMatch, TemplateMatcher,
};
use stepup_core::memory::{
    InMemoryAuditLog, InMemoryEnrollmentStore, InMemoryLinkStore, InMemoryPolicyStore,
    InMemoryRecordStore, LoggingNotifier, SimulatedCapture, SimulatedDevice,
};
use stepup_core::{
    Actor, ActorId, ApprovalId, ApprovalMethod, ApprovalRecord, DeviceError, DeviceRegistry,
    EscalationChain, Modality, Policy, Role, StepUpConfig, StoreError, TenantId, Transaction,
    TransactionType, WorkflowCoordinator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const TENANT: &str = "store-1";

pub fn cashier() -> Actor {
    Actor::new("cashier-1", Role::Cashier, TENANT)
}

pub fn manager() -> Actor {
    Actor::new("manager-1", Role::Manager, TENANT)
}

/// Transaction in [`TENANT`] for a whole-unit amount
pub fn transaction(id: &str, amount: i64, kind: TransactionType) -> Transaction {
    Transaction::new(id, TENANT, Decimal::new(amount, 0), kind)
}

/// Matcher with a fixed verdict that counts its calls
#[derive(Debug)]
pub struct CountingMatcher {
    matched: bool,
    calls: AtomicUsize,
}

impl CountingMatcher {
    pub fn accepting() -> Self {
        Self {
            matched: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            matched: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TemplateMatcher for CountingMatcher {
    async fn match_template(
        &self,
        _actor_id: &ActorId,
        _modality: Modality,
        capture: &Capture,
    ) -> Result<TemplateMatch, DeviceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TemplateMatch {
            matched: self.matched,
            score: capture.confidence_score,
        })
    }
}

/// Record store that is always offline
#[derive(Debug, Default)]
pub struct FailingRecordStore;

#[async_trait::async_trait]
impl RecordStore for FailingRecordStore {
    async fn save(&self, _record: &ApprovalRecord) -> Result<ApprovalId, StoreError> {
        Err(StoreError::Unavailable("record store offline".to_string()))
    }
}

/// Policy store that is always offline
#[derive(Debug, Default)]
pub struct FailingPolicyStore;

#[async_trait::async_trait]
impl PolicyStore for FailingPolicyStore {
    async fn get(&self, _tenant_id: &TenantId) -> Result<Option<Policy>, StoreError> {
        Err(StoreError::Unavailable("policy store offline".to_string()))
    }
}

/// Enrollment store that is always offline
#[derive(Debug, Default)]
pub struct FailingEnrollmentStore;

#[async_trait::async_trait]
impl EnrollmentStore for FailingEnrollmentStore {
    async fn get(&self, _actor_id: &ActorId) -> Result<Vec<Modality>, StoreError> {
        Err(StoreError::Unavailable("enrollment store offline".to_string()))
    }
}

/// Credential verifier with a fixed answer
#[derive(Debug)]
pub struct FixedCredentialVerifier(pub bool);

#[async_trait::async_trait]
impl CredentialVerifier for FixedCredentialVerifier {
    async fn verify(&self, _actor: &Actor, _method: ApprovalMethod) -> Result<bool, StoreError> {
        Ok(self.0)
    }
}

/// Push approval service with a fixed answer
#[derive(Debug)]
pub struct FixedPushService(pub bool);

#[async_trait::async_trait]
impl PushApprovalService for FixedPushService {
    async fn request_approval(
        &self,
        _transaction: &Transaction,
        _actor: &Actor,
    ) -> Result<bool, StoreError> {
        Ok(self.0)
    }
}

/// In-memory wiring with observable collaborators
pub struct Harness {
    pub config: StepUpConfig,
    pub policies: Arc<InMemoryPolicyStore>,
    pub enrollments: Arc<InMemoryEnrollmentStore>,
    pub notifier: Arc<LoggingNotifier>,
    pub matcher: Arc<CountingMatcher>,
    pub records: Arc<InMemoryRecordStore>,
    pub links: Arc<InMemoryLinkStore>,
    pub audit: Arc<InMemoryAuditLog>,
    devices: Vec<(Modality, Arc<SimulatedDevice>)>,
    policy_store: Option<Arc<dyn PolicyStore>>,
    enrollment_store: Option<Arc<dyn EnrollmentStore>>,
    record_store: Option<Arc<dyn RecordStore>>,
    escalation: Option<EscalationChain>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            config: StepUpConfig::new(),
            policies: Arc::new(InMemoryPolicyStore::new()),
            enrollments: Arc::new(InMemoryEnrollmentStore::new()),
            notifier: Arc::new(LoggingNotifier::default()),
            matcher: Arc::new(CountingMatcher::accepting()),
            records: Arc::new(InMemoryRecordStore::new()),
            links: Arc::new(InMemoryLinkStore::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            devices: Vec::new(),
            policy_store: None,
            enrollment_store: None,
            record_store: None,
            escalation: None,
        }
    }

    pub fn with_config(mut self, config: StepUpConfig) -> Self {
        self.config = config;
        self
    }

    /// Policy for [`TENANT`]
    pub fn with_policy(self, policy: Policy) -> Self {
        self.policies.insert(TENANT, policy);
        self
    }

    pub fn with_device(
        mut self,
        modality: Modality,
        script: impl IntoIterator<Item = SimulatedCapture>,
    ) -> Self {
        let device = Arc::new(SimulatedDevice::new(format!("{modality}-device"), script));
        self.devices.push((modality, device));
        self
    }

    pub fn with_enrollment(self, actor: &Actor, modalities: impl IntoIterator<Item = Modality>) -> Self {
        self.enrollments.enroll(actor.id.clone(), modalities);
        self
    }

    pub fn with_matcher(mut self, matcher: CountingMatcher) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    pub fn with_failing_policies(mut self) -> Self {
        self.policy_store = Some(Arc::new(FailingPolicyStore));
        self
    }

    pub fn with_failing_enrollments(mut self) -> Self {
        self.enrollment_store = Some(Arc::new(FailingEnrollmentStore));
        self
    }

    pub fn with_failing_records(mut self) -> Self {
        self.record_store = Some(Arc::new(FailingRecordStore));
        self
    }

    pub fn with_escalation(mut self, chain: EscalationChain) -> Self {
        self.escalation = Some(chain);
        self
    }

    pub fn device(&self, modality: Modality) -> Option<Arc<SimulatedDevice>> {
        self.devices
            .iter()
            .find(|(m, _)| *m == modality)
            .map(|(_, d)| Arc::clone(d))
    }

    /// Captures across all devices
    pub fn capture_count(&self) -> usize {
        self.devices.iter().map(|(_, d)| d.capture_count()).sum()
    }

    pub fn prompt_count(&self) -> usize {
        self.notifier.prompt_count()
    }

    pub fn coordinator(&self) -> WorkflowCoordinator {
        let devices = self
            .devices
            .iter()
            .fold(DeviceRegistry::new(), |registry, (modality, device)| {
                registry.with_device(*modality, device.clone())
            });

        let mut builder = WorkflowCoordinator::builder(self.config.clone())
            .policies(
                self.policy_store
                    .clone()
                    .unwrap_or_else(|| self.policies.clone() as Arc<dyn PolicyStore>),
            )
            .enrollments(
                self.enrollment_store
                    .clone()
                    .unwrap_or_else(|| self.enrollments.clone() as Arc<dyn EnrollmentStore>),
            )
            .notifier(self.notifier.clone())
            .devices(devices)
            .matcher(self.matcher.clone())
            .records(
                self.record_store
                    .clone()
                    .unwrap_or_else(|| self.records.clone() as Arc<dyn RecordStore>),
            )
            .links(self.links.clone())
            .audit(self.audit.clone());

        if let Some(chain) = &self.escalation {
            builder = builder.escalation(chain.clone());
        }

        builder.build().unwrap()
    }
}
