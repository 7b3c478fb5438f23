//! Consumer configuration.

use std::time::Duration;

use batch_core::ConfigError;
use batch_core::env::{env_string, parse_bool_env, parse_env};

/// Most messages a single receive may ask for.
pub const MAX_RECEIVE_BATCH: usize = 10;
/// Longest long-poll wait a receive may ask for.
pub const MAX_RECEIVE_WAIT: Duration = Duration::from_secs(20);

/// What to do with a message whose conditional write lost a race.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Never acknowledge. The redelivery reaches the guard, which sees the
    /// terminal status and acknowledges then.
    #[default]
    LeaveForRedelivery,
    /// Re-read the status and acknowledge only if the job is terminal.
    AcknowledgeIfTerminal,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictPolicy::LeaveForRedelivery => "leave",
            ConflictPolicy::AcknowledgeIfTerminal => "ack-if-terminal",
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leave" | "leave-for-redelivery" => Ok(ConflictPolicy::LeaveForRedelivery),
            "ack-if-terminal" | "acknowledge-if-terminal" => {
                Ok(ConflictPolicy::AcknowledgeIfTerminal)
            }
            other => Err(format!(
                "unknown conflict policy {other:?} (expected leave|ack-if-terminal)"
            )),
        }
    }
}

/// Settings for the worker pool and the per-message pipeline.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of concurrent workers. Bounds concurrently executing jobs.
    pub workers: usize,
    /// Messages requested per receive (1..=10).
    pub max_messages: usize,
    /// Long-poll wait per receive (at most 20s).
    pub wait: Duration,
    /// Executions running longer than this are reported as failed.
    pub execution_timeout: Option<Duration>,
    /// Claim the job (`Pending -> Processing`) before executing it.
    pub claim: bool,
    /// Age after which a `Processing` claim counts as abandoned and may be
    /// taken over by a redelivery. Must exceed `execution_timeout`.
    pub claim_lease: Duration,
    pub conflict_policy: ConflictPolicy,
    /// Pause after a failed receive before polling again.
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_messages: 1,
            wait: MAX_RECEIVE_WAIT,
            execution_timeout: Some(Duration::from_secs(300)),
            claim: false,
            claim_lease: Duration::from_secs(330),
            conflict_policy: ConflictPolicy::LeaveForRedelivery,
            error_backoff: Duration::from_millis(1000),
        }
    }
}

impl ConsumerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_claim(mut self, claim: bool) -> Self {
        self.claim = claim;
        self
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `CONSUMER_WORKERS` (default: 4)
    /// - `CONSUMER_MAX_MESSAGES` (default: 1, range 1..=10)
    /// - `CONSUMER_WAIT_SECONDS` (default: 20, max 20)
    /// - `CONSUMER_EXECUTION_TIMEOUT_SECS` (default: 300, 0 disables)
    /// - `CONSUMER_CLAIM` (default: false)
    /// - `CONSUMER_CLAIM_LEASE_SECS` (default: 330)
    /// - `CONSUMER_CONFLICT_POLICY`: `leave` (default) or `ack-if-terminal`
    /// - `CONSUMER_ERROR_BACKOFF_MS` (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let conflict_policy = match env_string("CONSUMER_CONFLICT_POLICY") {
            Some(raw) => raw.parse().map_err(ConfigError::Invalid)?,
            None => defaults.conflict_policy,
        };

        let execution_timeout = match parse_env::<u64>("CONSUMER_EXECUTION_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.execution_timeout,
        };

        let config = Self {
            workers: parse_env("CONSUMER_WORKERS")?.unwrap_or(defaults.workers),
            max_messages: parse_env("CONSUMER_MAX_MESSAGES")?.unwrap_or(defaults.max_messages),
            wait: parse_env::<u64>("CONSUMER_WAIT_SECONDS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait),
            execution_timeout,
            claim: parse_bool_env("CONSUMER_CLAIM")?.unwrap_or(defaults.claim),
            claim_lease: parse_env::<u64>("CONSUMER_CLAIM_LEASE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_lease),
            conflict_policy,
            error_backoff: parse_env::<u64>("CONSUMER_ERROR_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.error_backoff),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the limits the queue contract imposes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if !(1..=MAX_RECEIVE_BATCH).contains(&self.max_messages) {
            return Err(ConfigError::Invalid(format!(
                "max_messages must be between 1 and {MAX_RECEIVE_BATCH}, got {}",
                self.max_messages
            )));
        }
        if self.wait > MAX_RECEIVE_WAIT {
            return Err(ConfigError::Invalid(format!(
                "receive wait must be at most {}s, got {:?}",
                MAX_RECEIVE_WAIT.as_secs(),
                self.wait
            )));
        }
        if self.execution_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid(
                "execution timeout must be positive (use None to disable)".into(),
            ));
        }
        if self.claim {
            // A live claim must never look abandoned.
            match self.execution_timeout {
                Some(timeout) if self.claim_lease > timeout => {}
                Some(timeout) => {
                    return Err(ConfigError::Invalid(format!(
                        "claim lease ({:?}) must exceed the execution timeout ({:?})",
                        self.claim_lease, timeout
                    )));
                }
                None => {
                    return Err(ConfigError::Invalid(
                        "claiming requires an execution timeout".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConsumerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_messages, 1);
        assert_eq!(config.wait, Duration::from_secs(20));
        assert!(!config.claim);
        assert_eq!(config.conflict_policy, ConflictPolicy::LeaveForRedelivery);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(ConsumerConfig::default().with_workers(0).validate().is_err());
        assert!(ConsumerConfig::default().with_max_messages(0).validate().is_err());
        assert!(ConsumerConfig::default().with_max_messages(11).validate().is_err());
        assert!(
            ConsumerConfig::default()
                .with_wait(Duration::from_secs(21))
                .validate()
                .is_err()
        );
        assert!(
            ConsumerConfig::default()
                .with_execution_timeout(Some(Duration::ZERO))
                .validate()
                .is_err()
        );
        assert!(
            ConsumerConfig::default()
                .with_max_messages(10)
                .with_execution_timeout(None)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn claim_lease_must_outlast_execution() {
        let claiming = ConsumerConfig::default().with_claim(true);
        assert!(claiming.validate().is_ok());
        assert!(
            claiming
                .clone()
                .with_claim_lease(Duration::from_secs(300))
                .validate()
                .is_err()
        );
        assert!(
            claiming
                .clone()
                .with_execution_timeout(None)
                .validate()
                .is_err()
        );
        // Without claiming the lease is not checked.
        assert!(
            ConsumerConfig::default()
                .with_execution_timeout(None)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn parses_conflict_policy() {
        assert_eq!(
            "leave".parse::<ConflictPolicy>(),
            Ok(ConflictPolicy::LeaveForRedelivery)
        );
        assert_eq!(
            "ack-if-terminal".parse::<ConflictPolicy>(),
            Ok(ConflictPolicy::AcknowledgeIfTerminal)
        );
        assert!("always".parse::<ConflictPolicy>().is_err());
    }
}
