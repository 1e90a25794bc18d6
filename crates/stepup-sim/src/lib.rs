//! StepUp simulator
//!
//! Runs one approval through a coordinator wired from in-memory
//! collaborators and reports the decision with what the collaborators saw.

#![allow(missing_docs)]

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use stepup_core::contracts::{CredentialVerifier, PushApprovalService};
use stepup_core::memory::{
    InMemoryAuditLog, InMemoryEnrollmentStore, InMemoryLinkStore, InMemoryPolicyStore,
    InMemoryRecordStore, InMemoryTemplateStore, LoggingNotifier, SimulatedCapture, SimulatedDevice,
};
use stepup_core::{
    Actor, ApprovalDecision, ApprovalMethod, CredentialStrategy, DeviceRegistry, EscalationChain,
    ExternalServiceStrategy, ManagerOverrideStrategy, Modality, Role, StepUpConfig, StoreError,
    Transaction, TransactionType, WorkflowCoordinator,
};

/// One simulated approval request
#[derive(Debug, Clone)]
pub struct Scenario {
    pub config: StepUpConfig,
    pub tenant: String,
    pub amount: Decimal,
    pub role: Role,
    pub kind: TransactionType,
    /// Enrolled modalities; empty means the default modality
    pub enrolled: Vec<Modality>,
    /// Device outcomes replayed in order
    pub captures: Vec<SimulatedCapture>,
    /// Minimum template score for matched modalities
    pub min_score: f64,
    /// PIN and password answer; `None` leaves them unbacked
    pub credentials: Option<bool>,
    /// Push approval answer; `None` leaves the service unbacked
    pub push: Option<bool>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            config: StepUpConfig::new(),
            tenant: "store-1".to_string(),
            amount: Decimal::new(1500, 0),
            role: Role::Cashier,
            kind: TransactionType::Sale,
            enrolled: Vec::new(),
            captures: vec![SimulatedCapture::Success { score: 0.95 }],
            min_score: 0.8,
            credentials: None,
            push: None,
        }
    }
}

/// Decision plus collaborator counters
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub decision: ApprovalDecision,
    pub prompts: usize,
    pub captures: usize,
    pub records: usize,
    pub audit_events: usize,
    pub audit_head: String,
}

#[derive(Debug)]
struct SimCredentials(bool);

#[async_trait::async_trait]
impl CredentialVerifier for SimCredentials {
    async fn verify(&self, _actor: &Actor, method: ApprovalMethod) -> Result<bool, StoreError> {
        tracing::debug!(%method, accepted = self.0, "simulated credential check");
        Ok(self.0)
    }
}

#[derive(Debug)]
struct SimPush(bool);

#[async_trait::async_trait]
impl PushApprovalService for SimPush {
    async fn request_approval(
        &self,
        transaction: &Transaction,
        _actor: &Actor,
    ) -> Result<bool, StoreError> {
        tracing::debug!(transaction = %transaction.id, accepted = self.0, "simulated push approval");
        Ok(self.0)
    }
}

/// Run the scenario once
pub async fn run(scenario: &Scenario) -> anyhow::Result<SimReport> {
    scenario.config.validate()?;

    let transaction = Transaction::new(
        "sim-tx-1",
        scenario.tenant.as_str(),
        scenario.amount,
        scenario.kind.clone(),
    );
    let actor = Actor::new("sim-actor", scenario.role.clone(), scenario.tenant.as_str());

    let enrollments = Arc::new(InMemoryEnrollmentStore::new());
    enrollments.enroll(actor.id.clone(), scenario.enrolled.iter().copied());

    let templates = Arc::new(InMemoryTemplateStore::new());
    for modality in &scenario.enrolled {
        templates.store(actor.id.clone(), *modality, scenario.min_score);
    }

    let modalities: BTreeSet<Modality> = scenario
        .enrolled
        .iter()
        .copied()
        .chain(std::iter::once(scenario.config.default_modality))
        .collect();
    let mut devices = DeviceRegistry::new();
    let mut handles = Vec::with_capacity(modalities.len());
    for modality in modalities {
        let device = Arc::new(SimulatedDevice::new(
            format!("sim-{modality}"),
            scenario.captures.iter().cloned(),
        ));
        devices.register(modality, device.clone());
        handles.push(device);
    }

    let notifier = Arc::new(LoggingNotifier::default());
    let records = Arc::new(InMemoryRecordStore::new());
    let audit = Arc::new(InMemoryAuditLog::new());

    let coordinator = WorkflowCoordinator::builder(scenario.config.clone())
        .policies(Arc::new(InMemoryPolicyStore::new()))
        .enrollments(enrollments)
        .notifier(notifier.clone())
        .devices(devices)
        .matcher(templates)
        .escalation(escalation_chain(scenario))
        .records(records.clone())
        .links(Arc::new(InMemoryLinkStore::new()))
        .audit(audit.clone())
        .build()?;

    let decision = coordinator.process_approval(&transaction, &actor).await;
    audit.verify_integrity()?;

    Ok(SimReport {
        decision,
        prompts: notifier.prompt_count(),
        captures: handles.iter().map(|d| d.capture_count()).sum(),
        records: records.len(),
        audit_events: audit.events().len(),
        audit_head: audit.head_hash(),
    })
}

fn escalation_chain(scenario: &Scenario) -> EscalationChain {
    let credentials = scenario
        .credentials
        .map(|accept| Arc::new(SimCredentials(accept)) as Arc<dyn CredentialVerifier>);
    let push = scenario
        .push
        .map(|accept| Arc::new(SimPush(accept)) as Arc<dyn PushApprovalService>);

    EscalationChain::new()
        .with_strategy(Arc::new(CredentialStrategy::pin(credentials.clone())))
        .with_strategy(Arc::new(CredentialStrategy::password(credentials)))
        .with_strategy(Arc::new(ManagerOverrideStrategy::with_roles(
            scenario.config.override_roles.iter().cloned(),
        )))
        .with_strategy(Arc::new(ExternalServiceStrategy::new(push)))
}
