//! Broker selection and connection settings.

use std::time::Duration;

use batch_core::ConfigError;
use batch_core::env::{env_string, parse_env};

/// Which broker implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    Memory,
    Sqs,
}

impl BrokerBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            BrokerBackend::Memory => "memory",
            BrokerBackend::Sqs => "sqs",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    /// Queue name, resolved to an endpoint once at startup.
    pub queue_name: String,
    /// AWS region for the SQS backend.
    pub region: String,
    /// Optional endpoint override (e.g. a local SQS emulator).
    pub endpoint: Option<String>,
    /// Visibility timeout for the in-memory backend. SQS uses the queue's own setting.
    pub visibility_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Memory,
            queue_name: "BatchlabJobs".to_string(),
            region: "sa-east-1".to_string(),
            endpoint: None,
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

impl BrokerConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn sqs(queue_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            backend: BrokerBackend::Sqs,
            queue_name: queue_name.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `BROKER_BACKEND`: `memory` (default) or `sqs`
    /// - `QUEUE_NAME` (default: `BatchlabJobs`)
    /// - `AWS_REGION` (default: `sa-east-1`)
    /// - `SQS_ENDPOINT` (optional)
    /// - `BROKER_VISIBILITY_TIMEOUT_SECS` (default: 30, memory backend only)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend = match env_string("BROKER_BACKEND").as_deref() {
            None | Some("memory") | Some("mem") => BrokerBackend::Memory,
            Some("sqs") => BrokerBackend::Sqs,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported BROKER_BACKEND={other} (expected memory|sqs)"
                )));
            }
        };

        let visibility_timeout = parse_env::<u64>("BROKER_VISIBILITY_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.visibility_timeout);
        if visibility_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "BROKER_VISIBILITY_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }

        Ok(Self {
            backend,
            queue_name: env_string("QUEUE_NAME").unwrap_or(defaults.queue_name),
            region: env_string("AWS_REGION").unwrap_or(defaults.region),
            endpoint: env_string("SQS_ENDPOINT"),
            visibility_timeout,
        })
    }
}
