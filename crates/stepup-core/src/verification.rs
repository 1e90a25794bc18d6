//! Verification attempt loop
//!
//! Drives prompt → capture → (template match) for one modality, at most
//! [`MAX_ATTEMPTS`] times, strictly sequentially.
//!
//! # State machine
//!
//! ```text
//! Idle → Prompting → Capturing ─┬──────────────→ Succeeded
//!            ↑                  ├→ Verifying ─┬→ Succeeded
//!            │                  │             └→ AttemptFailed
//!            │                  └──────────────→ AttemptFailed
//!            └────────────── AttemptFailed ────→ Exhausted
//! ```
//!
//! The prompt response never feeds a transition. A device timeout or
//! cancellation is an ordinary attempt failure.

use crate::config::{StepUpConfig, MAX_ATTEMPTS};
use crate::contracts::{
    Capture, CaptureRequest, Notifier, PromptRequest, PromptResponse, TemplateMatcher,
    VerificationDevice,
};
use crate::error::{DeviceError, StateMachineError};
use crate::types::{Actor, ApprovalEvidence, DeviceId, Modality, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Verification loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationState {
    Idle,
    Prompting,
    Capturing,
    Verifying,
    Succeeded,
    AttemptFailed,
    Exhausted,
}

/// Validates a state transition
pub fn validate_transition(
    from: VerificationState,
    to: VerificationState,
) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
pub fn allowed_transitions(from: VerificationState) -> Vec<VerificationState> {
    use VerificationState::*;
    match from {
        Idle => vec![Prompting],
        Prompting => vec![Capturing],
        Capturing => vec![Verifying, Succeeded, AttemptFailed],
        Verifying => vec![Succeeded, AttemptFailed],
        AttemptFailed => vec![Prompting, Exhausted],
        Succeeded | Exhausted => vec![],
    }
}

/// Tracks the current state of one verification run
#[derive(Debug)]
struct AttemptStateMachine {
    state: VerificationState,
}

impl AttemptStateMachine {
    fn new() -> Self {
        Self {
            state: VerificationState::Idle,
        }
    }

    fn transition(&mut self, to: VerificationState) -> Result<(), StateMachineError> {
        validate_transition(self.state, to)?;
        tracing::trace!(from = ?self.state, ?to, "verification transition");
        self.state = to;
        Ok(())
    }
}

/// Devices keyed by the modality they serve
///
/// Resolved once at wiring time and injected into the orchestrator.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: HashMap<Modality, Arc<dyn VerificationDevice>>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("modalities", &self.modalities())
            .finish()
    }
}

impl DeviceRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, replacing any previous one for the modality
    pub fn register(&mut self, modality: Modality, device: Arc<dyn VerificationDevice>) {
        self.devices.insert(modality, device);
    }

    /// Builder form of [`register`](Self::register)
    #[must_use]
    pub fn with_device(mut self, modality: Modality, device: Arc<dyn VerificationDevice>) -> Self {
        self.register(modality, device);
        self
    }

    #[inline]
    #[must_use]
    pub fn get(&self, modality: Modality) -> Option<Arc<dyn VerificationDevice>> {
        self.devices.get(&modality).cloned()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, modality: Modality) -> bool {
        self.devices.contains_key(&modality)
    }

    /// Registered modalities, sorted
    #[must_use]
    pub fn modalities(&self) -> Vec<Modality> {
        let mut modalities: Vec<Modality> = self.devices.keys().copied().collect();
        modalities.sort();
        modalities
    }
}

/// Outcome of one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Verified,
    Failed(DeviceError),
}

/// One pass through the loop; lives only as long as the run that made it
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalAttempt {
    pub number: u8,
    pub modality: Modality,
    pub prompt_response: PromptResponse,
    pub outcome: AttemptOutcome,
    pub confidence_score: Option<f64>,
    pub device_id: Option<DeviceId>,
    pub timestamp: DateTime<Utc>,
}

/// Successful verification
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub modality: Modality,
    pub confidence_score: f64,
    pub device_id: DeviceId,
    /// Attempt number that succeeded
    pub attempt: u8,
}

impl Verification {
    /// Biometric evidence for recording
    #[must_use]
    pub fn evidence(&self) -> ApprovalEvidence {
        ApprovalEvidence::biometric(self.modality, self.confidence_score, self.device_id.clone())
    }
}

/// Terminal result of the loop
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Verified(Verification),
    /// Every attempt failed; the attempts are returned for logging
    Exhausted { attempts: Vec<ApprovalAttempt> },
}

/// Runs the bounded verification loop
pub struct VerificationOrchestrator {
    notifier: Arc<dyn Notifier>,
    devices: DeviceRegistry,
    matcher: Arc<dyn TemplateMatcher>,
    max_attempts: u8,
    attempt_timeout: Duration,
    modality_timeouts: BTreeMap<Modality, Duration>,
}

impl std::fmt::Debug for VerificationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationOrchestrator")
            .field("devices", &self.devices)
            .field("max_attempts", &self.max_attempts)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("modality_timeouts", &self.modality_timeouts)
            .finish_non_exhaustive()
    }
}

impl VerificationOrchestrator {
    /// Create orchestrator with three attempts and a 15s attempt timeout
    #[must_use]
    pub fn new(
        notifier: Arc<dyn Notifier>,
        devices: DeviceRegistry,
        matcher: Arc<dyn TemplateMatcher>,
    ) -> Self {
        Self::from_config(notifier, devices, matcher, &StepUpConfig::default())
    }

    /// Create orchestrator using attempt and timeout settings from config
    #[must_use]
    pub fn from_config(
        notifier: Arc<dyn Notifier>,
        devices: DeviceRegistry,
        matcher: Arc<dyn TemplateMatcher>,
        config: &StepUpConfig,
    ) -> Self {
        Self {
            notifier,
            devices,
            matcher,
            max_attempts: config.effective_max_attempts(),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            modality_timeouts: config
                .modality_timeouts_ms
                .iter()
                .map(|(modality, ms)| (*modality, Duration::from_millis(*ms)))
                .collect(),
        }
    }

    /// With max attempts, clamped to `1..=MAX_ATTEMPTS`
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts.clamp(1, MAX_ATTEMPTS);
        self
    }

    /// With default per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    /// Device registry used by this orchestrator
    #[inline]
    #[must_use]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    fn timeout_for(&self, modality: Modality) -> Duration {
        self.modality_timeouts
            .get(&modality)
            .copied()
            .unwrap_or(self.attempt_timeout)
    }

    /// Run the attempt loop for `modality`
    ///
    /// # Errors
    /// Only an illegal state transition; device failures are attempt
    /// outcomes, not errors.
    pub async fn verify(
        &self,
        transaction: &Transaction,
        actor: &Actor,
        modality: Modality,
    ) -> Result<VerificationOutcome, StateMachineError> {
        let mut machine = AttemptStateMachine::new();
        let mut attempts = Vec::with_capacity(usize::from(self.max_attempts));
        let device = self.devices.get(modality);
        let timeout = self.timeout_for(modality);
        let request = CaptureRequest {
            transaction_id: transaction.id.clone(),
            actor_id: actor.id.clone(),
            modality,
        };

        for number in 1..=self.max_attempts {
            machine.transition(VerificationState::Prompting)?;
            let prompt_response = self.prompt(transaction, actor, modality, number).await;

            // One deadline covers capture and template match together
            let deadline = Instant::now() + timeout;
            let mut captured = None;

            machine.transition(VerificationState::Capturing)?;
            let result = match self.capture(device.as_deref(), &request, deadline, timeout).await {
                Ok(capture) if modality.requires_template_match() => {
                    machine.transition(VerificationState::Verifying)?;
                    captured = Some((capture.confidence_score, capture.device_id.clone()));
                    self.match_capture(actor, modality, capture, deadline, timeout).await
                }
                other => other,
            };

            match result {
                Ok(capture) => {
                    machine.transition(VerificationState::Succeeded)?;
                    tracing::info!(
                        %modality,
                        attempt = number,
                        score = capture.confidence_score,
                        "verification succeeded"
                    );
                    return Ok(VerificationOutcome::Verified(Verification {
                        modality,
                        confidence_score: capture.confidence_score,
                        device_id: capture.device_id,
                        attempt: number,
                    }));
                }
                Err(e) => {
                    machine.transition(VerificationState::AttemptFailed)?;
                    tracing::warn!(
                        %modality,
                        attempt = number,
                        max_attempts = self.max_attempts,
                        "verification attempt failed: {}",
                        e
                    );
                    let (confidence_score, device_id) = captured.unzip();
                    attempts.push(ApprovalAttempt {
                        number,
                        modality,
                        prompt_response,
                        outcome: AttemptOutcome::Failed(e),
                        confidence_score,
                        device_id,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        machine.transition(VerificationState::Exhausted)?;
        tracing::warn!(%modality, attempts = attempts.len(), "verification exhausted");
        Ok(VerificationOutcome::Exhausted { attempts })
    }

    async fn prompt(
        &self,
        transaction: &Transaction,
        actor: &Actor,
        modality: Modality,
        attempt: u8,
    ) -> PromptResponse {
        let request = PromptRequest {
            transaction_id: transaction.id.clone(),
            modality,
            attempt,
            max_attempts: self.max_attempts,
            message: format!("Verify with {modality} to approve transaction {}", transaction.id),
        };
        let response = self.notifier.prompt(&actor.id, &request).await;

        // Advisory only: the capture below runs whatever the actor answered.
        match response {
            PromptResponse::Acknowledged => {
                tracing::debug!(attempt, "prompt acknowledged");
            }
            PromptResponse::Cancelled => {
                tracing::info!(attempt, "prompt cancelled by actor, capture still proceeds");
            }
            PromptResponse::Unavailable => {
                tracing::warn!(attempt, "prompt could not be shown, capture still proceeds");
            }
        }
        response
    }

    async fn capture(
        &self,
        device: Option<&dyn VerificationDevice>,
        request: &CaptureRequest,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Capture, DeviceError> {
        let device = device.ok_or(DeviceError::Unavailable(request.modality))?;
        tokio::time::timeout_at(deadline, device.capture(request))
            .await
            .map_err(|_| DeviceError::Timeout(timeout))?
    }

    async fn match_capture(
        &self,
        actor: &Actor,
        modality: Modality,
        capture: Capture,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Capture, DeviceError> {
        let matched = tokio::time::timeout_at(
            deadline,
            self.matcher.match_template(&actor.id, modality, &capture),
        )
        .await
        .map_err(|_| DeviceError::Timeout(timeout))??;

        if matched.matched {
            Ok(Capture {
                confidence_score: matched.score,
                device_id: capture.device_id,
            })
        } else {
            Err(DeviceError::TemplateMismatch {
                score: matched.score,
            })
        }
    }
}
