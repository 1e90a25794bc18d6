//! Approval recording
//!
//! Three sinks, written independently:
//! 1. record store (canonical) - failure is returned to the caller
//! 2. link store - failure logged only
//! 3. audit store - failure logged only

use crate::contracts::{AuditStore, LinkStore, RecordStore};
use crate::error::RecordError;
use crate::types::{
    Actor, ApprovalEvidence, ApprovalId, ApprovalRecord, AuditEvent, AuditEventKind, Transaction,
};
use chrono::Utc;
use std::sync::Arc;

/// What the sinks accepted for one approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReceipt {
    pub approval_id: ApprovalId,
    pub link_written: bool,
    pub audit_written: bool,
}

/// Writes decisions to the record, link and audit sinks
pub struct ApprovalRecorder {
    records: Arc<dyn RecordStore>,
    links: Arc<dyn LinkStore>,
    audit: Arc<dyn AuditStore>,
}

impl std::fmt::Debug for ApprovalRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalRecorder").finish_non_exhaustive()
    }
}

impl ApprovalRecorder {
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordStore>,
        links: Arc<dyn LinkStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            records,
            links,
            audit,
        }
    }

    /// Persist an approval
    ///
    /// # Errors
    /// Only when the record store fails. The link is then skipped (there is
    /// no approval id) and a `RecordWriteFailed` audit event is attempted.
    pub async fn record_approval(
        &self,
        transaction: &Transaction,
        actor: &Actor,
        evidence: &ApprovalEvidence,
    ) -> Result<RecordReceipt, RecordError> {
        let record = ApprovalRecord {
            transaction_id: transaction.id.clone(),
            tenant_id: transaction.tenant_id.clone(),
            actor_id: actor.id.clone(),
            evidence: evidence.clone(),
            approved_at: Utc::now(),
        };

        let approval_id = match self.records.save(&record).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("approval record write failed: {}", e);
                self.audit(AuditEvent::new(
                    AuditEventKind::RecordWriteFailed,
                    transaction,
                    actor,
                    Some(evidence),
                ))
                .await;
                return Err(RecordError(e));
            }
        };

        let link_written = match self.links.link(&transaction.id, &approval_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(approval_id = %approval_id, "transaction link write failed: {}", e);
                false
            }
        };

        let audit_written = self
            .audit(AuditEvent::new(
                AuditEventKind::ApprovalGranted,
                transaction,
                actor,
                Some(evidence),
            ))
            .await;

        tracing::debug!(%approval_id, link_written, audit_written, "approval recorded");
        Ok(RecordReceipt {
            approval_id,
            link_written,
            audit_written,
        })
    }

    /// Audit a rejection; best effort
    pub async fn record_rejection(&self, transaction: &Transaction, actor: &Actor) -> bool {
        self.audit(AuditEvent::new(
            AuditEventKind::ApprovalRejected,
            transaction,
            actor,
            None,
        ))
        .await
    }

    async fn audit(&self, event: AuditEvent) -> bool {
        match self.audit.log(&event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(kind = ?event.kind, "audit write failed: {}", e);
                false
            }
        }
    }
}
