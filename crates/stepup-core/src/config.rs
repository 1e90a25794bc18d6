//! Workflow configuration
//!
//! [`StepUpConfig`] is plain serde data with builder-style setters. It can be
//! loaded from TOML:
//!
//! ```toml
//! fail_mode = "open"
//! max_attempts = 3
//! attempt_timeout_ms = 15000
//! default_modality = "facial"
//! override_roles = ["manager", "supervisor"]
//!
//! [modality_timeouts_ms]
//! fingerprint = 8000
//!
//! [policy_cache]
//! enabled = true
//! capacity = 1024
//! ttl_secs = 300
//! ```

use crate::error::ConfigError;
use crate::types::{Modality, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Hard upper bound on verification attempts per invocation
pub const MAX_ATTEMPTS: u8 = 3;

/// What policy evaluation returns when it cannot complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationFailMode {
    /// Treat as "approval not required"
    #[default]
    Open,
    /// Treat as "approval required"
    Closed,
}

impl EvaluationFailMode {
    /// Value of `requires_approval` when evaluation errors
    #[inline]
    #[must_use]
    pub fn requires_approval_on_error(self) -> bool {
        matches!(self, EvaluationFailMode::Closed)
    }
}

/// Policy cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyCacheConfig {
    pub enabled: bool,
    pub capacity: u64,
    pub ttl_secs: u64,
}

impl Default for PolicyCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
            ttl_secs: 300,
        }
    }
}

/// Step-up workflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepUpConfig {
    /// Fail-open or fail-closed policy evaluation
    pub fail_mode: EvaluationFailMode,
    /// Verification attempts before escalation, clamped to `1..=MAX_ATTEMPTS`
    pub max_attempts: u8,
    /// Default per-attempt device timeout
    pub attempt_timeout_ms: u64,
    /// Per-modality overrides of the attempt timeout
    pub modality_timeouts_ms: BTreeMap<Modality, u64>,
    /// Modality used when the actor has no enrollment
    pub default_modality: Modality,
    /// Roles allowed to self-approve through manager override
    pub override_roles: Vec<Role>,
    /// Policy cache
    pub policy_cache: PolicyCacheConfig,
}

impl StepUpConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the workflow cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "attempt_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if let Some((modality, _)) = self.modality_timeouts_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::Invalid {
                field: "modality_timeouts_ms",
                reason: format!("timeout for {modality} must be positive"),
            });
        }
        if self.policy_cache.enabled && self.policy_cache.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "policy_cache.capacity",
                reason: "must be positive when the cache is enabled".to_string(),
            });
        }
        Ok(())
    }

    /// With fail mode
    #[inline]
    #[must_use]
    pub fn with_fail_mode(mut self, fail_mode: EvaluationFailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    /// With max attempts
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// With default attempt timeout
    #[inline]
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = duration_ms(timeout);
        self
    }

    /// With a timeout override for one modality
    #[inline]
    #[must_use]
    pub fn with_modality_timeout(mut self, modality: Modality, timeout: Duration) -> Self {
        self.modality_timeouts_ms.insert(modality, duration_ms(timeout));
        self
    }

    /// With policy cache settings
    #[inline]
    #[must_use]
    pub fn with_policy_cache(mut self, policy_cache: PolicyCacheConfig) -> Self {
        self.policy_cache = policy_cache;
        self
    }

    /// Attempts the verification loop will actually run
    #[inline]
    #[must_use]
    pub fn effective_max_attempts(&self) -> u8 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS)
    }

    /// Per-attempt timeout for `modality`
    #[must_use]
    pub fn attempt_timeout(&self, modality: Modality) -> Duration {
        let ms = self
            .modality_timeouts_ms
            .get(&modality)
            .copied()
            .unwrap_or(self.attempt_timeout_ms);
        Duration::from_millis(ms)
    }
}

impl Default for StepUpConfig {
    fn default() -> Self {
        Self {
            fail_mode: EvaluationFailMode::Open,
            max_attempts: MAX_ATTEMPTS,
            attempt_timeout_ms: 15_000,
            modality_timeouts_ms: BTreeMap::new(),
            default_modality: Modality::Facial,
            override_roles: vec![Role::Manager, Role::Supervisor],
            policy_cache: PolicyCacheConfig::default(),
        }
    }
}

fn duration_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = StepUpConfig::default();
        assert_eq!(config.fail_mode, EvaluationFailMode::Open);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.default_modality, Modality::Facial);
        assert_eq!(config.override_roles, vec![Role::Manager, Role::Supervisor]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn max_attempts_clamped() {
        assert_eq!(StepUpConfig::new().with_max_attempts(10).effective_max_attempts(), 3);
        assert_eq!(StepUpConfig::new().with_max_attempts(2).effective_max_attempts(), 2);
        assert_eq!(StepUpConfig::new().with_max_attempts(0).effective_max_attempts(), 1);
    }

    #[test]
    fn modality_timeout_overrides_default() {
        let config = StepUpConfig::new()
            .with_attempt_timeout(Duration::from_secs(10))
            .with_modality_timeout(Modality::Fingerprint, Duration::from_secs(4));

        assert_eq!(config.attempt_timeout(Modality::Fingerprint), Duration::from_secs(4));
        assert_eq!(config.attempt_timeout(Modality::Facial), Duration::from_secs(10));
    }

    #[test]
    fn parses_toml() {
        let raw = r#"
            fail_mode = "closed"
            max_attempts = 2
            attempt_timeout_ms = 5000
            default_modality = "iris"
            override_roles = ["supervisor"]

            [modality_timeouts_ms]
            voice = 9000

            [policy_cache]
            enabled = false
        "#;

        let config = StepUpConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.fail_mode, EvaluationFailMode::Closed);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.default_modality, Modality::Iris);
        assert_eq!(config.override_roles, vec![Role::Supervisor]);
        assert_eq!(config.attempt_timeout(Modality::Voice), Duration::from_millis(9000));
        assert!(!config.policy_cache.enabled);
        assert_eq!(config.policy_cache.capacity, 1024);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = StepUpConfig::from_toml_str("attempt_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "attempt_timeout_ms", .. }));
    }

    #[test]
    fn rejects_unknown_modality() {
        let err = StepUpConfig::from_toml_str("default_modality = \"retina\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_attempts = 1").unwrap();

        let config = StepUpConfig::load(file.path()).unwrap();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = StepUpConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
