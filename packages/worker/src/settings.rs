//! Settings specific to the worker process.

use std::time::Duration;

use batch_core::ConfigError;
use batch_core::env::{env_string, parse_env};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// How long the simulated work takes per job.
    pub work_duration: Duration,
    /// Share of jobs the simulated work fails.
    pub failure_percent: u8,
    /// Jobs to submit at startup (memory broker only).
    pub demo_jobs: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            work_duration: Duration::from_millis(1000),
            failure_percent: 0,
            demo_jobs: 0,
        }
    }
}

impl WorkerSettings {
    /// - `WORK_DURATION_MS` (default: 1000)
    /// - `WORK_FAILURE_PERCENT` (default: 0, max 100)
    /// - `WORKER_DEMO_JOBS` (default: 0)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let failure_percent = parse_env::<u8>("WORK_FAILURE_PERCENT")?.unwrap_or(0);
        if failure_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "WORK_FAILURE_PERCENT must be at most 100, got {failure_percent}"
            )));
        }

        Ok(Self {
            work_duration: parse_env::<u64>("WORK_DURATION_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.work_duration),
            failure_percent,
            demo_jobs: parse_env("WORKER_DEMO_JOBS")?.unwrap_or(defaults.demo_jobs),
        })
    }
}

/// `LOG_FORMAT=json` switches to JSON lines; anything else is plain text.
pub fn log_format() -> LogFormat {
    match env_string("LOG_FORMAT").as_deref() {
        Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.work_duration, Duration::from_secs(1));
        assert_eq!(settings.failure_percent, 0);
        assert_eq!(settings.demo_jobs, 0);
    }
}
