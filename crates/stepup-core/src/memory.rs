//! In-memory collaborators
//!
//! Reference implementations of every contract in [`crate::contracts`], used
//! by tests and the simulator. The audit log is hash-chained so tampering
//! with an earlier entry is detectable.

use crate::contracts::{
    AuditStore, Capture, CaptureRequest, EnrollmentStore, LinkStore, Notifier, PolicyStore,
    PromptRequest, PromptResponse, RecordStore, TemplateMatch, TemplateMatcher,
    VerificationDevice,
};
use crate::error::{DeviceError, StoreError};
use crate::policy::Policy;
use crate::types::{
    ActorId, ApprovalId, ApprovalRecord, AuditEvent, DeviceId, Modality, TenantId, TransactionId,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use ulid::Ulid;

/// Tenant policies
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<TenantId, Policy>,
}

impl InMemoryPolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: impl Into<TenantId>, policy: Policy) {
        self.policies.insert(tenant_id.into(), policy);
    }
}

#[async_trait::async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get(&self, tenant_id: &TenantId) -> Result<Option<Policy>, StoreError> {
        Ok(self.policies.get(tenant_id).map(|p| p.value().clone()))
    }
}

/// Actor enrollments
#[derive(Debug, Default)]
pub struct InMemoryEnrollmentStore {
    enrollments: DashMap<ActorId, Vec<Modality>>,
}

impl InMemoryEnrollmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the actor's enrollment
    pub fn enroll(&self, actor_id: impl Into<ActorId>, modalities: impl IntoIterator<Item = Modality>) {
        self.enrollments
            .insert(actor_id.into(), modalities.into_iter().collect());
    }
}

#[async_trait::async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn get(&self, actor_id: &ActorId) -> Result<Vec<Modality>, StoreError> {
        Ok(self
            .enrollments
            .get(actor_id)
            .map(|m| m.value().clone())
            .unwrap_or_default())
    }
}

/// Enrolled templates; a capture matches when its score reaches the
/// template's minimum
#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: DashMap<(ActorId, Modality), f64>,
}

impl InMemoryTemplateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, actor_id: impl Into<ActorId>, modality: Modality, min_score: f64) {
        self.templates.insert((actor_id.into(), modality), min_score);
    }
}

#[async_trait::async_trait]
impl TemplateMatcher for InMemoryTemplateStore {
    async fn match_template(
        &self,
        actor_id: &ActorId,
        modality: Modality,
        capture: &Capture,
    ) -> Result<TemplateMatch, DeviceError> {
        let min_score = self
            .templates
            .get(&(actor_id.clone(), modality))
            .map(|t| *t.value())
            .ok_or(DeviceError::NoTemplate(modality))?;

        Ok(TemplateMatch {
            matched: capture.confidence_score >= min_score,
            score: capture.confidence_score,
        })
    }
}

/// Scripted outcome of one simulated capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedCapture {
    Success { score: f64 },
    Failure { reason: String },
    /// Hold the capture open for this long before succeeding
    Stall { millis: u64 },
    Cancel,
}

impl std::str::FromStr for SimulatedCapture {
    type Err = String;

    /// `ok`, `ok:0.9`, `fail`, `fail:reason`, `stall:5000`, `cancel`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };
        match kind {
            "ok" => {
                let score = arg
                    .map(str::parse::<f64>)
                    .transpose()
                    .map_err(|e| format!("bad score in {s:?}: {e}"))?
                    .unwrap_or(0.95);
                Ok(Self::Success { score })
            }
            "fail" => Ok(Self::Failure {
                reason: arg.unwrap_or("no match").to_string(),
            }),
            "stall" => {
                let millis = arg
                    .ok_or_else(|| format!("stall needs a duration: {s:?}"))?
                    .parse::<u64>()
                    .map_err(|e| format!("bad duration in {s:?}: {e}"))?;
                Ok(Self::Stall { millis })
            }
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("unknown capture outcome: {other}")),
        }
    }
}

/// Device that replays a script of outcomes, then fails
#[derive(Debug)]
pub struct SimulatedDevice {
    device_id: DeviceId,
    script: Mutex<VecDeque<SimulatedCapture>>,
    captures: AtomicUsize,
}

impl SimulatedDevice {
    #[must_use]
    pub fn new(device_id: impl Into<String>, script: impl IntoIterator<Item = SimulatedCapture>) -> Self {
        Self {
            device_id: DeviceId::new(device_id),
            script: Mutex::new(script.into_iter().collect()),
            captures: AtomicUsize::new(0),
        }
    }

    /// Number of capture calls received
    #[must_use]
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl VerificationDevice for SimulatedDevice {
    async fn capture(&self, request: &CaptureRequest) -> Result<Capture, DeviceError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        tracing::debug!(device = %self.device_id, modality = %request.modality, ?next, "simulated capture");

        match next {
            Some(SimulatedCapture::Success { score }) => Ok(Capture {
                confidence_score: score,
                device_id: self.device_id.clone(),
            }),
            Some(SimulatedCapture::Failure { reason }) => Err(DeviceError::CaptureFailed(reason)),
            Some(SimulatedCapture::Stall { millis }) => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(Capture {
                    confidence_score: 0.95,
                    device_id: self.device_id.clone(),
                })
            }
            Some(SimulatedCapture::Cancel) => Err(DeviceError::Cancelled),
            None => Err(DeviceError::CaptureFailed("script exhausted".to_string())),
        }
    }
}

/// Notifier that logs the prompt and answers with a fixed response
#[derive(Debug)]
pub struct LoggingNotifier {
    response: PromptResponse,
    prompts: AtomicUsize,
}

impl LoggingNotifier {
    #[must_use]
    pub fn new(response: PromptResponse) -> Self {
        Self {
            response,
            prompts: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl Default for LoggingNotifier {
    fn default() -> Self {
        Self::new(PromptResponse::Acknowledged)
    }
}

#[async_trait::async_trait]
impl Notifier for LoggingNotifier {
    async fn prompt(&self, actor_id: &ActorId, request: &PromptRequest) -> PromptResponse {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            actor = %actor_id,
            attempt = request.attempt,
            max_attempts = request.max_attempts,
            "{}",
            request.message
        );
        self.response
    }
}

/// Canonical records keyed by ULID approval id
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: DashMap<ApprovalId, ApprovalRecord>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, approval_id: &ApprovalId) -> Option<ApprovalRecord> {
        self.records.get(approval_id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn save(&self, record: &ApprovalRecord) -> Result<ApprovalId, StoreError> {
        let approval_id = ApprovalId::new(Ulid::new().to_string());
        self.records.insert(approval_id.clone(), record.clone());
        Ok(approval_id)
    }
}

/// Transaction to approval links
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    links: DashMap<TransactionId, ApprovalId>,
}

impl InMemoryLinkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn approval_for(&self, transaction_id: &TransactionId) -> Option<ApprovalId> {
        self.links.get(transaction_id).map(|a| a.value().clone())
    }
}

#[async_trait::async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn link(
        &self,
        transaction_id: &TransactionId,
        approval_id: &ApprovalId,
    ) -> Result<(), StoreError> {
        self.links.insert(transaction_id.clone(), approval_id.clone());
        Ok(())
    }
}

/// Audit log entry with its chain hashes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainedAuditEvent {
    pub sequence: u64,
    pub event: AuditEvent,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

/// The chain does not hash to what it claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("audit chain broken at sequence {0}")]
pub struct AuditIntegrityError(pub u64);

/// Append-only, hash-chained audit log
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    inner: Mutex<Vec<ChainedAuditEvent>>,
}

impl InMemoryAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries
    #[must_use]
    pub fn events(&self) -> Vec<ChainedAuditEvent> {
        self.inner.lock().clone()
    }

    /// Hex hash of the latest entry, all zeros when empty
    #[must_use]
    pub fn head_hash(&self) -> String {
        hex::encode(self.inner.lock().last().map_or([0u8; 32], |e| e.hash))
    }

    /// Recompute every hash and link
    pub fn verify_integrity(&self) -> Result<(), AuditIntegrityError> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for entry in guard.iter() {
            if entry.prev_hash != prev || entry.hash != compute_hash(entry) {
                return Err(AuditIntegrityError(entry.sequence));
            }
            prev = entry.hash;
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper(&self, index: usize, f: impl FnOnce(&mut AuditEvent)) {
        f(&mut self.inner.lock()[index].event);
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditLog {
    async fn log(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |e| e.hash);
        let mut entry = ChainedAuditEvent {
            sequence: guard.len() as u64,
            event: event.clone(),
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = compute_hash(&entry);
        guard.push(entry);
        Ok(())
    }
}

fn compute_hash(entry: &ChainedAuditEvent) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.sequence.to_le_bytes());
    hasher.update(entry.event.actor_id.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(entry.event.transaction_id.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(entry.event.modality.map_or("", Modality::as_str).as_bytes());
    hasher.update([0]);
    hasher.update(entry.event.score.unwrap_or(f64::NAN).to_le_bytes());
    hasher.update(format!("{:?}", entry.event.kind).as_bytes());
    hasher.update([0]);
    hasher.update(entry.event.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, AuditEventKind, Role, Transaction, TransactionType};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn event(kind: AuditEventKind) -> AuditEvent {
        let tx = Transaction::new("tx-1", "tenant", Decimal::new(10, 0), TransactionType::Void);
        let actor = Actor::new("a-1", Role::Clerk, "tenant");
        AuditEvent::new(kind, &tx, &actor, None)
    }

    #[tokio::test]
    async fn audit_chain_verifies() {
        let log = InMemoryAuditLog::new();
        log.log(&event(AuditEventKind::ApprovalGranted)).await.unwrap();
        log.log(&event(AuditEventKind::ApprovalRejected)).await.unwrap();

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].prev_hash, events[0].hash);
        assert!(log.verify_integrity().is_ok());
        assert_eq!(log.head_hash(), hex::encode(events[1].hash));
    }

    #[tokio::test]
    async fn tampering_detected() {
        let log = InMemoryAuditLog::new();
        log.log(&event(AuditEventKind::ApprovalGranted)).await.unwrap();
        log.log(&event(AuditEventKind::ApprovalGranted)).await.unwrap();

        log.tamper(0, |e| e.kind = AuditEventKind::ApprovalRejected);
        assert_eq!(log.verify_integrity(), Err(AuditIntegrityError(0)));
    }

    #[test]
    fn empty_log_head_is_zero() {
        assert_eq!(InMemoryAuditLog::new().head_hash(), "0".repeat(64));
    }

    #[tokio::test]
    async fn simulated_device_replays_script() {
        let device = SimulatedDevice::new(
            "sim-1",
            [
                SimulatedCapture::Failure { reason: "blur".to_string() },
                SimulatedCapture::Success { score: 0.8 },
            ],
        );
        let request = CaptureRequest {
            transaction_id: TransactionId::new("tx"),
            actor_id: ActorId::new("a"),
            modality: Modality::Facial,
        };

        assert!(device.capture(&request).await.is_err());
        let capture = device.capture(&request).await.unwrap();
        assert_eq!(capture.confidence_score, 0.8);
        assert!(device.capture(&request).await.is_err());
        assert_eq!(device.capture_count(), 3);
    }

    #[test]
    fn parses_capture_script() {
        assert_eq!("ok".parse::<SimulatedCapture>().unwrap(), SimulatedCapture::Success { score: 0.95 });
        assert_eq!("ok:0.5".parse::<SimulatedCapture>().unwrap(), SimulatedCapture::Success { score: 0.5 });
        assert_eq!(
            "fail:glare".parse::<SimulatedCapture>().unwrap(),
            SimulatedCapture::Failure { reason: "glare".to_string() }
        );
        assert_eq!("stall:200".parse::<SimulatedCapture>().unwrap(), SimulatedCapture::Stall { millis: 200 });
        assert_eq!("cancel".parse::<SimulatedCapture>().unwrap(), SimulatedCapture::Cancel);
        assert!("stall".parse::<SimulatedCapture>().is_err());
        assert!("explode".parse::<SimulatedCapture>().is_err());
    }

    #[tokio::test]
    async fn template_store_matches_on_min_score() {
        let store = InMemoryTemplateStore::new();
        store.store("a-1", Modality::Fingerprint, 0.7);
        let capture = |score| Capture {
            confidence_score: score,
            device_id: DeviceId::new("fp"),
        };
        let actor = ActorId::new("a-1");

        let good = store.match_template(&actor, Modality::Fingerprint, &capture(0.75)).await.unwrap();
        assert!(good.matched);
        let weak = store.match_template(&actor, Modality::Fingerprint, &capture(0.6)).await.unwrap();
        assert!(!weak.matched);
        let missing = store.match_template(&actor, Modality::Iris, &capture(0.9)).await;
        assert_eq!(missing, Err(DeviceError::NoTemplate(Modality::Iris)));
    }

    #[tokio::test]
    async fn record_and_link_stores() {
        let records = InMemoryRecordStore::new();
        let links = InMemoryLinkStore::new();
        let record = ApprovalRecord {
            transaction_id: TransactionId::new("tx-5"),
            tenant_id: TenantId::new("tenant"),
            actor_id: ActorId::new("a"),
            evidence: crate::types::ApprovalEvidence::fallback(crate::types::ApprovalMethod::Pin),
            approved_at: Utc::now(),
        };

        let id = records.save(&record).await.unwrap();
        links.link(&record.transaction_id, &id).await.unwrap();

        assert_eq!(records.get(&id), Some(record.clone()));
        assert_eq!(links.approval_for(&record.transaction_id), Some(id));
        assert_eq!(records.len(), 1);
    }
}
