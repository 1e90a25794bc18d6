//! Core types for step-up approval
//!
//! Defines the fundamental data model:
//! - Identifiers (tenant, actor, transaction, approval)
//! - Transactions and actors supplied by the gated action layer
//! - Verification modalities and approval methods
//! - The terminal [`ApprovalDecision`] and its status
//! - Records and audit events handed to the sinks

use crate::error::InvalidDecision;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create identifier from any string-like value
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Tenant (store, merchant) identifier
    TenantId
);
string_id!(
    /// Actor (operator) identifier
    ActorId
);
string_id!(
    /// Transaction identifier
    TransactionId
);
string_id!(
    /// Identifier assigned by the record store to a persisted approval
    ApprovalId
);
string_id!(
    /// Identifier of the physical verification device
    DeviceId
);

/// Operator role
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Cashier,
    Clerk,
    Manager,
    Supervisor,
    Administrator,
    /// Tenant-defined role
    Custom(String),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Cashier => f.write_str("cashier"),
            Role::Clerk => f.write_str("clerk"),
            Role::Manager => f.write_str("manager"),
            Role::Supervisor => f.write_str("supervisor"),
            Role::Administrator => f.write_str("administrator"),
            Role::Custom(name) => f.write_str(name),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = std::convert::Infallible;

    /// Unknown names become [`Role::Custom`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "cashier" => Role::Cashier,
            "clerk" => Role::Clerk,
            "manager" => Role::Manager,
            "supervisor" => Role::Supervisor,
            "administrator" | "admin" => Role::Administrator,
            _ => Role::Custom(s.to_string()),
        })
    }
}

/// Transaction type tag
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Sale,
    Refund,
    Void,
    DiscountOverride,
    PriceOverride,
    NoSale,
    /// Tenant-defined type
    Custom(String),
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Sale => f.write_str("sale"),
            TransactionType::Refund => f.write_str("refund"),
            TransactionType::Void => f.write_str("void"),
            TransactionType::DiscountOverride => f.write_str("discount_override"),
            TransactionType::PriceOverride => f.write_str("price_override"),
            TransactionType::NoSale => f.write_str("no_sale"),
            TransactionType::Custom(name) => f.write_str(name),
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = std::convert::Infallible;

    /// Unknown names become [`TransactionType::Custom`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "sale" => TransactionType::Sale,
            "refund" => TransactionType::Refund,
            "void" => TransactionType::Void,
            "discount_override" => TransactionType::DiscountOverride,
            "price_override" => TransactionType::PriceOverride,
            "no_sale" => TransactionType::NoSale,
            _ => TransactionType::Custom(s.to_string()),
        })
    }
}

/// A sensitive transaction awaiting a step-up decision
///
/// Immutable once handed to the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub tenant_id: TenantId,
    pub total: Decimal,
    pub kind: TransactionType,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Create transaction stamped with the current time
    #[inline]
    #[must_use]
    pub fn new(
        id: impl Into<TransactionId>,
        tenant_id: impl Into<TenantId>,
        total: Decimal,
        kind: TransactionType,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            total,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// With explicit timestamp
    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// The operator requesting the gated action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
    pub tenant_id: TenantId,
}

impl Actor {
    /// Create actor
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<ActorId>, role: Role, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            id: id.into(),
            role,
            tenant_id: tenant_id.into(),
        }
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<String> for ActorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Verification modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Facial,
    Fingerprint,
    Iris,
    Voice,
    Palm,
}

impl Modality {
    /// Whether a successful capture must be followed by a template match
    ///
    /// Facial capture is verification on its own; every other modality
    /// compares the capture against the actor's enrolled template.
    #[inline]
    #[must_use]
    pub fn requires_template_match(self) -> bool {
        !matches!(self, Modality::Facial)
    }

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Facial => "facial",
            Modality::Fingerprint => "fingerprint",
            Modality::Iris => "iris",
            Modality::Voice => "voice",
            Modality::Palm => "palm",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "facial" | "face" => Ok(Modality::Facial),
            "fingerprint" => Ok(Modality::Fingerprint),
            "iris" => Ok(Modality::Iris),
            "voice" => Ok(Modality::Voice),
            "palm" => Ok(Modality::Palm),
            other => Err(format!("unknown modality: {other}")),
        }
    }
}

/// How an approval was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMethod {
    Biometric,
    Pin,
    Password,
    ManagerOverride,
    ExternalService,
}

impl fmt::Display for ApprovalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApprovalMethod::Biometric => "biometric",
            ApprovalMethod::Pin => "pin",
            ApprovalMethod::Password => "password",
            ApprovalMethod::ManagerOverride => "manager_override",
            ApprovalMethod::ExternalService => "external_service",
        };
        f.write_str(name)
    }
}

/// Terminal status of one workflow invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Policy did not require step-up approval
    NotRequired,
    /// Approval granted and recorded
    Approved,
    /// Verification and every escalation strategy failed
    Rejected,
    /// The workflow could not complete
    Failed,
}

impl ApprovalStatus {
    /// Whether the gated action may proceed
    #[inline]
    #[must_use]
    pub fn permits_action(self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::NotRequired)
    }
}

/// Generic message returned for every rejected decision
pub const REJECTED_MESSAGE: &str = "step-up approval was not granted";

/// Generic message returned for every failed decision
pub const FAILED_MESSAGE: &str = "step-up approval could not be completed";

/// Evidence attached to an approval: what granted it and with which device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEvidence {
    pub method: ApprovalMethod,
    pub modality: Option<Modality>,
    pub confidence_score: Option<f64>,
    pub device_id: Option<DeviceId>,
}

impl ApprovalEvidence {
    /// Evidence from a verified biometric capture
    #[must_use]
    pub fn biometric(modality: Modality, confidence_score: f64, device_id: DeviceId) -> Self {
        Self {
            method: ApprovalMethod::Biometric,
            modality: Some(modality),
            confidence_score: Some(confidence_score),
            device_id: Some(device_id),
        }
    }

    /// Evidence from a fallback strategy
    #[must_use]
    pub fn fallback(method: ApprovalMethod) -> Self {
        Self {
            method,
            modality: None,
            confidence_score: None,
            device_id: None,
        }
    }
}

/// The terminal, immutable result of `process_approval`
///
/// Built only through the status constructors, so an approval id is present
/// exactly when the status is [`ApprovalStatus::Approved`]. Deserialization
/// goes through the same constructors and rejects a mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDecision")]
pub struct ApprovalDecision {
    status: ApprovalStatus,
    method: Option<ApprovalMethod>,
    modality: Option<Modality>,
    confidence_score: Option<f64>,
    device_id: Option<DeviceId>,
    approval_id: Option<ApprovalId>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct RawDecision {
    status: ApprovalStatus,
    method: Option<ApprovalMethod>,
    modality: Option<Modality>,
    confidence_score: Option<f64>,
    device_id: Option<DeviceId>,
    approval_id: Option<ApprovalId>,
}

impl TryFrom<RawDecision> for ApprovalDecision {
    type Error = InvalidDecision;

    fn try_from(raw: RawDecision) -> Result<Self, Self::Error> {
        match (raw.status, raw.approval_id) {
            (ApprovalStatus::Approved, Some(approval_id)) => {
                let method = raw.method.ok_or(InvalidDecision("approved without a method"))?;
                let evidence = ApprovalEvidence {
                    method,
                    modality: raw.modality,
                    confidence_score: raw.confidence_score,
                    device_id: raw.device_id,
                };
                Ok(Self::approved(evidence, approval_id))
            }
            (ApprovalStatus::Approved, None) => Err(InvalidDecision("approved without an approval id")),
            (_, Some(_)) => Err(InvalidDecision("approval id on a decision that is not approved")),
            (ApprovalStatus::NotRequired, None) => Ok(Self::not_required()),
            (ApprovalStatus::Rejected, None) => Ok(Self::rejected()),
            (ApprovalStatus::Failed, None) => Ok(Self::failed()),
        }
    }
}

impl ApprovalDecision {
    /// Step-up approval was not required
    #[must_use]
    pub fn not_required() -> Self {
        Self {
            status: ApprovalStatus::NotRequired,
            method: None,
            modality: None,
            confidence_score: None,
            device_id: None,
            approval_id: None,
            error_message: None,
        }
    }

    /// Approval granted and persisted under `approval_id`
    #[must_use]
    pub fn approved(evidence: ApprovalEvidence, approval_id: ApprovalId) -> Self {
        Self {
            status: ApprovalStatus::Approved,
            method: Some(evidence.method),
            modality: evidence.modality,
            confidence_score: evidence.confidence_score,
            device_id: evidence.device_id,
            approval_id: Some(approval_id),
            error_message: None,
        }
    }

    /// Every approval path was exhausted
    #[must_use]
    pub fn rejected() -> Self {
        Self {
            status: ApprovalStatus::Rejected,
            error_message: Some(REJECTED_MESSAGE.to_string()),
            ..Self::not_required()
        }
    }

    /// The workflow hit an internal error
    #[must_use]
    pub fn failed() -> Self {
        Self {
            status: ApprovalStatus::Failed,
            error_message: Some(FAILED_MESSAGE.to_string()),
            ..Self::not_required()
        }
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> ApprovalStatus {
        self.status
    }

    #[inline]
    #[must_use]
    pub fn method(&self) -> Option<ApprovalMethod> {
        self.method
    }

    #[inline]
    #[must_use]
    pub fn modality(&self) -> Option<Modality> {
        self.modality
    }

    #[inline]
    #[must_use]
    pub fn confidence_score(&self) -> Option<f64> {
        self.confidence_score
    }

    #[inline]
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        self.device_id.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn approval_id(&self) -> Option<&ApprovalId> {
        self.approval_id.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Caller contract: proceed iff approved or not required
    #[inline]
    #[must_use]
    pub fn permits_action(&self) -> bool {
        self.status.permits_action()
    }
}

/// Canonical approval record written to the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub transaction_id: TransactionId,
    pub tenant_id: TenantId,
    pub actor_id: ActorId,
    pub evidence: ApprovalEvidence,
    pub approved_at: DateTime<Utc>,
}

/// Kind of audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ApprovalGranted,
    ApprovalRejected,
    RecordWriteFailed,
}

/// Append-only audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor_id: ActorId,
    pub transaction_id: TransactionId,
    pub modality: Option<Modality>,
    pub score: Option<f64>,
    pub kind: AuditEventKind,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Create event stamped with the current time
    #[must_use]
    pub fn new(
        kind: AuditEventKind,
        transaction: &Transaction,
        actor: &Actor,
        evidence: Option<&ApprovalEvidence>,
    ) -> Self {
        Self {
            actor_id: actor.id.clone(),
            transaction_id: transaction.id.clone(),
            modality: evidence.and_then(|e| e.modality),
            score: evidence.and_then(|e| e.confidence_score),
            kind,
            timestamp: Utc::now(),
        }
    }
}
