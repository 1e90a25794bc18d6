//! Step-up policy and its evaluator
//!
//! A [`Policy`] is loaded per tenant. When none is stored, the built-in
//! default is substituted. [`PolicyEvaluator::requires_approval`] never
//! surfaces an error: evaluation failures resolve through the configured
//! [`EvaluationFailMode`].

use crate::cache::PolicyCache;
use crate::config::{EvaluationFailMode, StepUpConfig};
use crate::contracts::PolicyStore;
use crate::error::PolicyError;
use crate::types::{Actor, Role, TenantId, Transaction, TransactionType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Per-tenant step-up policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Amounts at or above this require approval
    pub amount_threshold: Decimal,
    /// Actor roles that always require approval
    pub required_roles: BTreeSet<Role>,
    /// Transaction types that always require approval
    pub required_types: BTreeSet<TransactionType>,
    /// Scales the threshold for the risk predicate
    pub risk_multiplier: Decimal,
    /// Enables the risk predicate
    pub risk_evaluation_enabled: bool,
}

impl Policy {
    /// Create a validated policy
    pub fn new(
        amount_threshold: Decimal,
        required_roles: impl IntoIterator<Item = Role>,
        required_types: impl IntoIterator<Item = TransactionType>,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            amount_threshold,
            required_roles: required_roles.into_iter().collect(),
            required_types: required_types.into_iter().collect(),
            ..Self::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Enable the risk predicate with `multiplier`
    pub fn with_risk(mut self, multiplier: Decimal) -> Result<Self, PolicyError> {
        self.risk_multiplier = multiplier;
        self.risk_evaluation_enabled = true;
        self.validate()?;
        Ok(self)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.amount_threshold.is_sign_negative() {
            return Err(PolicyError::InvalidPolicy(format!(
                "amount threshold {} is negative",
                self.amount_threshold
            )));
        }
        if self.risk_multiplier.is_sign_negative() {
            return Err(PolicyError::InvalidPolicy(format!(
                "risk multiplier {} is negative",
                self.risk_multiplier
            )));
        }
        Ok(())
    }

    /// Predicates of this policy that hold for the transaction and actor
    ///
    /// Empty means no approval is required.
    pub fn triggers(
        &self,
        transaction: &Transaction,
        actor: &Actor,
    ) -> Result<Vec<ApprovalTrigger>, PolicyError> {
        let mut triggers = Vec::new();

        if transaction.total >= self.amount_threshold {
            triggers.push(ApprovalTrigger::Amount);
        }
        if self.required_roles.contains(&actor.role) {
            triggers.push(ApprovalTrigger::Role);
        }
        if self.required_types.contains(&transaction.kind) {
            triggers.push(ApprovalTrigger::TransactionType);
        }
        if self.risk_evaluation_enabled {
            let risk_threshold = self
                .amount_threshold
                .checked_mul(self.risk_multiplier)
                .ok_or_else(|| {
                    PolicyError::RiskEvaluation(format!(
                        "{} x {} overflows",
                        self.amount_threshold, self.risk_multiplier
                    ))
                })?;
            if transaction.total >= risk_threshold {
                triggers.push(ApprovalTrigger::Risk);
            }
        }

        Ok(triggers)
    }
}

impl Default for Policy {
    /// Built-in policy substituted when a tenant has none stored
    fn default() -> Self {
        Self {
            amount_threshold: Decimal::new(100_000, 2),
            required_roles: [Role::Manager, Role::Supervisor].into_iter().collect(),
            required_types: [
                TransactionType::Refund,
                TransactionType::Void,
                TransactionType::DiscountOverride,
            ]
            .into_iter()
            .collect(),
            risk_multiplier: Decimal::new(15, 1),
            risk_evaluation_enabled: false,
        }
    }
}

/// Policy predicate that made approval required
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTrigger {
    Amount,
    Role,
    TransactionType,
    Risk,
}

/// Decides whether a transaction needs step-up approval
pub struct PolicyEvaluator {
    store: Arc<dyn PolicyStore>,
    cache: Option<PolicyCache>,
    fail_mode: EvaluationFailMode,
}

impl std::fmt::Debug for PolicyEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEvaluator")
            .field("cache", &self.cache.is_some())
            .field("fail_mode", &self.fail_mode)
            .finish_non_exhaustive()
    }
}

impl PolicyEvaluator {
    /// Create evaluator without a cache
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>, fail_mode: EvaluationFailMode) -> Self {
        Self {
            store,
            cache: None,
            fail_mode,
        }
    }

    /// Create evaluator from workflow config
    #[must_use]
    pub fn from_config(store: Arc<dyn PolicyStore>, config: &StepUpConfig) -> Self {
        Self {
            store,
            cache: PolicyCache::from_config(&config.policy_cache),
            fail_mode: config.fail_mode,
        }
    }

    /// With policy cache
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: PolicyCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Configured fail mode
    #[inline]
    #[must_use]
    pub fn fail_mode(&self) -> EvaluationFailMode {
        self.fail_mode
    }

    /// Whether step-up approval is required
    ///
    /// Missing inputs, store failures and risk-evaluation failures resolve
    /// through the fail mode: `Open` yields `false`, `Closed` yields `true`.
    pub async fn requires_approval(
        &self,
        transaction: Option<&Transaction>,
        actor: Option<&Actor>,
        tenant_id: &TenantId,
    ) -> bool {
        match self.evaluate(transaction, actor, tenant_id).await {
            Ok(triggers) => {
                tracing::debug!(tenant = %tenant_id, ?triggers, "policy evaluated");
                !triggers.is_empty()
            }
            Err(e) => {
                let required = self.fail_mode.requires_approval_on_error();
                tracing::warn!(
                    tenant = %tenant_id,
                    fail_mode = ?self.fail_mode,
                    required,
                    "policy evaluation failed: {}",
                    e
                );
                required
            }
        }
    }

    /// Evaluate every predicate, surfacing errors
    pub async fn evaluate(
        &self,
        transaction: Option<&Transaction>,
        actor: Option<&Actor>,
        tenant_id: &TenantId,
    ) -> Result<Vec<ApprovalTrigger>, PolicyError> {
        let transaction = transaction.ok_or(PolicyError::MissingInput("transaction"))?;
        let actor = actor.ok_or(PolicyError::MissingInput("actor"))?;

        let policy = self.load_policy(tenant_id).await?;
        policy.triggers(transaction, actor)
    }

    /// Load the tenant's policy, substituting the default when none is stored
    pub async fn load_policy(&self, tenant_id: &TenantId) -> Result<Arc<Policy>, PolicyError> {
        if let Some(cache) = &self.cache {
            if let Some(policy) = cache.get(tenant_id).await {
                return Ok(policy);
            }
        }

        let stored = self
            .store
            .get(tenant_id)
            .await
            .map_err(|source| PolicyError::PolicyUnavailable {
                tenant: tenant_id.clone(),
                source,
            })?;

        let policy = match stored {
            Some(policy) => {
                policy.validate()?;
                policy
            }
            None => {
                tracing::debug!(tenant = %tenant_id, "no stored policy, using default");
                Policy::default()
            }
        };

        let policy = Arc::new(policy);
        if let Some(cache) = &self.cache {
            cache.insert(tenant_id.clone(), Arc::clone(&policy)).await;
        }
        Ok(policy)
    }

    /// Drop a cached policy so the next evaluation reloads it
    pub async fn invalidate(&self, tenant_id: &TenantId) {
        if let Some(cache) = &self.cache {
            cache.invalidate(tenant_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::MockPolicyStore;
    use crate::error::StoreError;
    use proptest::prelude::*;

    fn tx(total: Decimal, kind: TransactionType) -> Transaction {
        Transaction::new("tx-1", "tenant-a", total, kind)
    }

    fn actor(role: Role) -> Actor {
        Actor::new("actor-1", role, "tenant-a")
    }

    fn store_returning(policy: Option<Policy>) -> Arc<dyn PolicyStore> {
        let mut store = MockPolicyStore::new();
        store.expect_get().returning(move |_| Ok(policy.clone()));
        Arc::new(store)
    }

    fn failing_store() -> Arc<dyn PolicyStore> {
        let mut store = MockPolicyStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));
        Arc::new(store)
    }

    #[test]
    fn default_policy_values() {
        let policy = Policy::default();
        assert_eq!(policy.amount_threshold, Decimal::new(100_000, 2));
        assert!(policy.required_roles.contains(&Role::Manager));
        assert!(policy.required_roles.contains(&Role::Supervisor));
        assert_eq!(policy.required_types.len(), 3);
        assert!(!policy.risk_evaluation_enabled);
    }

    #[test]
    fn negative_threshold_rejected() {
        let err = Policy::new(Decimal::new(-1, 0), Vec::<Role>::new(), Vec::<TransactionType>::new()).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPolicy(_)));
    }

    #[test]
    fn risk_predicate_uses_multiplier() {
        let policy = Policy::new(Decimal::new(100, 0), Vec::<Role>::new(), Vec::<TransactionType>::new())
            .unwrap()
            .with_risk(Decimal::new(2, 0))
            .unwrap();

        let triggers = policy
            .triggers(&tx(Decimal::new(250, 0), TransactionType::Sale), &actor(Role::Cashier))
            .unwrap();
        assert_eq!(triggers, vec![ApprovalTrigger::Amount, ApprovalTrigger::Risk]);

        let triggers = policy
            .triggers(&tx(Decimal::new(150, 0), TransactionType::Sale), &actor(Role::Cashier))
            .unwrap();
        assert_eq!(triggers, vec![ApprovalTrigger::Amount]);
    }

    #[test]
    fn risk_overflow_is_an_error() {
        let policy = Policy {
            amount_threshold: Decimal::MAX,
            risk_multiplier: Decimal::new(2, 0),
            risk_evaluation_enabled: true,
            ..Policy::default()
        };
        let err = policy
            .triggers(&tx(Decimal::ONE, TransactionType::Sale), &actor(Role::Cashier))
            .unwrap_err();
        assert!(matches!(err, PolicyError::RiskEvaluation(_)));
    }

    #[tokio::test]
    async fn amount_over_threshold_requires_approval() {
        let evaluator = PolicyEvaluator::new(store_returning(None), EvaluationFailMode::Open);
        let t = tx(Decimal::new(1500, 0), TransactionType::Sale);
        let a = actor(Role::Cashier);

        assert!(evaluator.requires_approval(Some(&t), Some(&a), &t.tenant_id).await);
    }

    #[tokio::test]
    async fn amount_equal_to_threshold_requires_approval() {
        let evaluator = PolicyEvaluator::new(store_returning(None), EvaluationFailMode::Open);
        let t = tx(Decimal::new(1000, 0), TransactionType::Sale);
        let a = actor(Role::Cashier);

        assert!(evaluator.requires_approval(Some(&t), Some(&a), &t.tenant_id).await);
    }

    #[tokio::test]
    async fn small_sale_by_cashier_not_required() {
        let evaluator = PolicyEvaluator::new(store_returning(None), EvaluationFailMode::Open);
        let t = tx(Decimal::new(500, 0), TransactionType::Sale);
        let a = actor(Role::Cashier);

        assert!(!evaluator.requires_approval(Some(&t), Some(&a), &t.tenant_id).await);
    }

    #[tokio::test]
    async fn required_role_and_type_trigger() {
        let evaluator = PolicyEvaluator::new(store_returning(None), EvaluationFailMode::Open);
        let small_sale = tx(Decimal::new(5, 0), TransactionType::Sale);
        let small_refund = tx(Decimal::new(5, 0), TransactionType::Refund);

        let triggers = evaluator
            .evaluate(Some(&small_sale), Some(&actor(Role::Supervisor)), &small_sale.tenant_id)
            .await
            .unwrap();
        assert_eq!(triggers, vec![ApprovalTrigger::Role]);

        let triggers = evaluator
            .evaluate(Some(&small_refund), Some(&actor(Role::Cashier)), &small_refund.tenant_id)
            .await
            .unwrap();
        assert_eq!(triggers, vec![ApprovalTrigger::TransactionType]);
    }

    #[tokio::test]
    async fn missing_inputs_fail_open() {
        let evaluator = PolicyEvaluator::new(store_returning(None), EvaluationFailMode::Open);
        let t = tx(Decimal::new(5000, 0), TransactionType::Void);
        let a = actor(Role::Manager);
        let tenant = TenantId::new("tenant-a");

        assert!(!evaluator.requires_approval(None, Some(&a), &tenant).await);
        assert!(!evaluator.requires_approval(Some(&t), None, &tenant).await);
    }

    #[tokio::test]
    async fn store_failure_follows_fail_mode() {
        let t = tx(Decimal::new(5000, 0), TransactionType::Void);
        let a = actor(Role::Manager);

        let open = PolicyEvaluator::new(failing_store(), EvaluationFailMode::Open);
        assert!(!open.requires_approval(Some(&t), Some(&a), &t.tenant_id).await);

        let closed = PolicyEvaluator::new(failing_store(), EvaluationFailMode::Closed);
        assert!(closed.requires_approval(Some(&t), Some(&a), &t.tenant_id).await);
        assert!(closed.requires_approval(None, None, &t.tenant_id).await);
    }

    #[tokio::test]
    async fn invalid_stored_policy_fails_open() {
        let invalid = Policy {
            amount_threshold: Decimal::new(-10, 0),
            ..Policy::default()
        };
        let evaluator = PolicyEvaluator::new(store_returning(Some(invalid)), EvaluationFailMode::Open);
        let t = tx(Decimal::new(5000, 0), TransactionType::Sale);

        assert!(
            !evaluator
                .requires_approval(Some(&t), Some(&actor(Role::Cashier)), &t.tenant_id)
                .await
        );
    }

    #[tokio::test]
    async fn cache_avoids_second_store_read() {
        let mut store = MockPolicyStore::new();
        store.expect_get().times(1).returning(|_| Ok(None));
        let evaluator = PolicyEvaluator::new(Arc::new(store), EvaluationFailMode::Open)
            .with_cache(PolicyCache::new(8));
        let tenant = TenantId::new("tenant-a");

        let first = evaluator.load_policy(&tenant).await.unwrap();
        let second = evaluator.load_policy(&tenant).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn store_errors_are_not_cached() {
        let mut store = MockPolicyStore::new();
        let mut calls = 0;
        store.expect_get().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(StoreError::Unavailable("blip".to_string()))
            } else {
                Ok(None)
            }
        });
        let evaluator = PolicyEvaluator::new(Arc::new(store), EvaluationFailMode::Open)
            .with_cache(PolicyCache::new(8));
        let tenant = TenantId::new("tenant-a");

        assert!(evaluator.load_policy(&tenant).await.is_err());
        assert!(evaluator.load_policy(&tenant).await.is_ok());
    }

    fn role_strategy() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::Cashier),
            Just(Role::Clerk),
            Just(Role::Manager),
            Just(Role::Supervisor),
            Just(Role::Administrator),
        ]
    }

    fn type_strategy() -> impl Strategy<Value = TransactionType> {
        prop_oneof![
            Just(TransactionType::Sale),
            Just(TransactionType::Refund),
            Just(TransactionType::Void),
            Just(TransactionType::DiscountOverride),
            Just(TransactionType::PriceOverride),
            Just(TransactionType::NoSale),
        ]
    }

    proptest! {
        #[test]
        fn prop_required_iff_any_predicate(
            threshold_cents in 0i64..1_000_000,
            total_cents in 0i64..2_000_000,
            multiplier_tenths in 0i64..50,
            risk_enabled in any::<bool>(),
            roles in proptest::collection::btree_set(role_strategy(), 0..3),
            types in proptest::collection::btree_set(type_strategy(), 0..3),
            role in role_strategy(),
            kind in type_strategy(),
        ) {
            let policy = Policy {
                amount_threshold: Decimal::new(threshold_cents, 2),
                required_roles: roles.clone(),
                required_types: types.clone(),
                risk_multiplier: Decimal::new(multiplier_tenths, 1),
                risk_evaluation_enabled: risk_enabled,
            };
            let total = Decimal::new(total_cents, 2);
            let transaction = tx(total, kind.clone());
            let actor = actor(role.clone());

            let expected = total >= policy.amount_threshold
                || roles.contains(&role)
                || types.contains(&kind)
                || (risk_enabled && total >= policy.amount_threshold * policy.risk_multiplier);

            let triggers = policy.triggers(&transaction, &actor).unwrap();
            prop_assert_eq!(!triggers.is_empty(), expected);
        }
    }
}
