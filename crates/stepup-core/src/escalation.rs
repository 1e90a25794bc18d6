//! Escalation chain
//!
//! Fallback approval strategies tried, in registration order, after the
//! verification loop is exhausted. The first success wins; if every strategy
//! fails the chain rejects.
//!
//! # Built-in strategies
//!
//! - [`CredentialStrategy`]: PIN or password via a [`CredentialVerifier`]
//! - [`ManagerOverrideStrategy`]: role-gated self approval
//! - [`ExternalServiceStrategy`]: remote push approval via a [`PushApprovalService`]
//!
//! Strategies without a backing collaborator always fail with
//! [`EscalationError::Unavailable`]; the chain treats that like any other
//! failure.

use crate::contracts::{CredentialVerifier, PushApprovalService};
use crate::error::EscalationError;
use crate::types::{Actor, ApprovalEvidence, ApprovalMethod, Role, Transaction};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Fallback approval strategy
#[async_trait::async_trait]
pub trait EscalationStrategy: Send + Sync + std::fmt::Debug {
    /// Method recorded when this strategy approves
    fn method(&self) -> ApprovalMethod;

    /// Attempt approval; `Ok` means approved
    async fn try_approve(
        &self,
        transaction: &Transaction,
        actor: &Actor,
    ) -> Result<ApprovalEvidence, EscalationError>;
}

/// PIN or password approval
#[derive(Clone)]
pub struct CredentialStrategy {
    method: ApprovalMethod,
    verifier: Option<Arc<dyn CredentialVerifier>>,
}

impl std::fmt::Debug for CredentialStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStrategy")
            .field("method", &self.method)
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

impl CredentialStrategy {
    /// PIN strategy
    #[must_use]
    pub fn pin(verifier: Option<Arc<dyn CredentialVerifier>>) -> Self {
        Self {
            method: ApprovalMethod::Pin,
            verifier,
        }
    }

    /// Password strategy
    #[must_use]
    pub fn password(verifier: Option<Arc<dyn CredentialVerifier>>) -> Self {
        Self {
            method: ApprovalMethod::Password,
            verifier,
        }
    }
}

#[async_trait::async_trait]
impl EscalationStrategy for CredentialStrategy {
    fn method(&self) -> ApprovalMethod {
        self.method
    }

    async fn try_approve(
        &self,
        _transaction: &Transaction,
        actor: &Actor,
    ) -> Result<ApprovalEvidence, EscalationError> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or(EscalationError::Unavailable(self.method))?;

        let valid = verifier
            .verify(actor, self.method)
            .await
            .map_err(|source| EscalationError::Backend {
                method: self.method,
                source,
            })?;

        if valid {
            Ok(ApprovalEvidence::fallback(self.method))
        } else {
            Err(EscalationError::Declined(self.method))
        }
    }
}

/// Approves when the actor holds an override role
#[derive(Debug, Clone)]
pub struct ManagerOverrideStrategy {
    roles: BTreeSet<Role>,
}

impl ManagerOverrideStrategy {
    /// Override allowed for managers and supervisors
    #[must_use]
    pub fn new() -> Self {
        Self::with_roles([Role::Manager, Role::Supervisor])
    }

    /// Override allowed for the given roles
    #[must_use]
    pub fn with_roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }
}

impl Default for ManagerOverrideStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EscalationStrategy for ManagerOverrideStrategy {
    fn method(&self) -> ApprovalMethod {
        ApprovalMethod::ManagerOverride
    }

    async fn try_approve(
        &self,
        _transaction: &Transaction,
        actor: &Actor,
    ) -> Result<ApprovalEvidence, EscalationError> {
        if self.roles.contains(&actor.role) {
            Ok(ApprovalEvidence::fallback(ApprovalMethod::ManagerOverride))
        } else {
            Err(EscalationError::NotPermitted {
                method: ApprovalMethod::ManagerOverride,
                role: actor.role.to_string(),
            })
        }
    }
}

/// Remote push approval
#[derive(Clone, Default)]
pub struct ExternalServiceStrategy {
    service: Option<Arc<dyn PushApprovalService>>,
}

impl std::fmt::Debug for ExternalServiceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalServiceStrategy")
            .field("service", &self.service.is_some())
            .finish()
    }
}

impl ExternalServiceStrategy {
    #[must_use]
    pub fn new(service: Option<Arc<dyn PushApprovalService>>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl EscalationStrategy for ExternalServiceStrategy {
    fn method(&self) -> ApprovalMethod {
        ApprovalMethod::ExternalService
    }

    async fn try_approve(
        &self,
        transaction: &Transaction,
        actor: &Actor,
    ) -> Result<ApprovalEvidence, EscalationError> {
        let service = self
            .service
            .as_ref()
            .ok_or(EscalationError::Unavailable(ApprovalMethod::ExternalService))?;

        let accepted = service
            .request_approval(transaction, actor)
            .await
            .map_err(|source| EscalationError::Backend {
                method: ApprovalMethod::ExternalService,
                source,
            })?;

        if accepted {
            Ok(ApprovalEvidence::fallback(ApprovalMethod::ExternalService))
        } else {
            Err(EscalationError::Declined(ApprovalMethod::ExternalService))
        }
    }
}

/// Result of running the chain
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// A strategy approved
    Approved(ApprovalEvidence),
    /// Every strategy failed, in chain order
    Rejected { failures: Vec<EscalationError> },
}

/// Ordered list of fallback strategies
#[derive(Debug, Clone, Default)]
pub struct EscalationChain {
    strategies: Vec<Arc<dyn EscalationStrategy>>,
}

impl EscalationChain {
    /// Create empty chain (always rejects)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// PIN, password, manager override, external service; only the override
    /// is backed out of the box
    #[must_use]
    pub fn standard(override_roles: impl IntoIterator<Item = Role>) -> Self {
        Self::new()
            .with_strategy(Arc::new(CredentialStrategy::pin(None)))
            .with_strategy(Arc::new(CredentialStrategy::password(None)))
            .with_strategy(Arc::new(ManagerOverrideStrategy::with_roles(override_roles)))
            .with_strategy(Arc::new(ExternalServiceStrategy::new(None)))
    }

    /// Append a strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn EscalationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Methods in chain order
    #[must_use]
    pub fn methods(&self) -> Vec<ApprovalMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try each strategy in order, stopping at the first approval
    pub async fn escalate(&self, transaction: &Transaction, actor: &Actor) -> EscalationOutcome {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.try_approve(transaction, actor).await {
                Ok(evidence) => {
                    tracing::info!(method = %strategy.method(), "escalation approved");
                    return EscalationOutcome::Approved(evidence);
                }
                Err(e) => {
                    tracing::warn!(method = %strategy.method(), "escalation strategy failed: {}", e);
                    failures.push(e);
                }
            }
        }

        tracing::warn!(strategies = self.strategies.len(), "escalation chain rejected");
        EscalationOutcome::Rejected { failures }
    }
}
