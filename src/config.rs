//! Orchestrator configuration.
//!
//! Environment-style configuration with typed defaults. All recognized
//! options can be overridden through `ORCH_`-prefixed environment
//! variables; invalid values are configuration errors, never silent
//! fallbacks.

use crate::error::{OrchestratorError, Result};
use crate::retry::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of runnable tasks the priority queue accepts before
    /// submissions are rejected with backpressure.
    pub max_queue_size: usize,
    /// Default execution budget for tasks that don't specify one, seconds.
    pub task_timeout_default: u64,
    /// Default retry budget for tasks that don't specify one.
    pub max_retries_default: u32,
    /// Heartbeat silence beyond this marks a worker lost, seconds.
    pub worker_heartbeat_timeout: u64,
    /// Cadence of the priority re-scoring pass, seconds.
    pub priority_recalc_interval: u64,
    /// Cadence of the heartbeat and execution-timeout scans, seconds.
    pub liveness_scan_interval: u64,
    /// Cadence of the background scheduling pass, seconds.
    pub scheduler_interval: u64,
    /// Base score for high-priority tasks.
    pub high_priority_threshold: f64,
    /// Base score for critical-priority tasks.
    pub critical_priority_threshold: f64,
    /// Cap on workers concurrently executing any single task type.
    pub max_workers_per_task_type: usize,
    /// Score added per hour a task waits in the queue (starvation avoidance).
    pub aging_factor: f64,
    /// Delay policy applied between a failure and retry eligibility.
    pub backoff_policy: BackoffPolicy,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            task_timeout_default: 3_600,
            max_retries_default: 3,
            worker_heartbeat_timeout: 300,
            priority_recalc_interval: 60,
            liveness_scan_interval: 30,
            scheduler_interval: 5,
            high_priority_threshold: 100.0,
            critical_priority_threshold: 1_000.0,
            max_workers_per_task_type: 10,
            aging_factor: 0.1,
            backoff_policy: BackoffPolicy::Exponential,
            backoff_base_seconds: 30,
            backoff_max_seconds: 900,
            event_channel_capacity: 1_000,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the environment, starting from defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        read_env("ORCH_MAX_QUEUE_SIZE", &mut config.max_queue_size)?;
        read_env("ORCH_TASK_TIMEOUT_DEFAULT", &mut config.task_timeout_default)?;
        read_env("ORCH_MAX_RETRIES_DEFAULT", &mut config.max_retries_default)?;
        read_env(
            "ORCH_WORKER_HEARTBEAT_TIMEOUT",
            &mut config.worker_heartbeat_timeout,
        )?;
        read_env(
            "ORCH_PRIORITY_RECALC_INTERVAL",
            &mut config.priority_recalc_interval,
        )?;
        read_env(
            "ORCH_LIVENESS_SCAN_INTERVAL",
            &mut config.liveness_scan_interval,
        )?;
        read_env("ORCH_SCHEDULER_INTERVAL", &mut config.scheduler_interval)?;
        read_env(
            "ORCH_HIGH_PRIORITY_THRESHOLD",
            &mut config.high_priority_threshold,
        )?;
        read_env(
            "ORCH_CRITICAL_PRIORITY_THRESHOLD",
            &mut config.critical_priority_threshold,
        )?;
        read_env(
            "ORCH_MAX_WORKERS_PER_TASK_TYPE",
            &mut config.max_workers_per_task_type,
        )?;
        read_env("ORCH_AGING_FACTOR", &mut config.aging_factor)?;
        read_env("ORCH_BACKOFF_POLICY", &mut config.backoff_policy)?;
        read_env("ORCH_BACKOFF_BASE_SECONDS", &mut config.backoff_base_seconds)?;
        read_env("ORCH_BACKOFF_MAX_SECONDS", &mut config.backoff_max_seconds)?;
        read_env(
            "ORCH_EVENT_CHANNEL_CAPACITY",
            &mut config.event_channel_capacity,
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field sanity of the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(OrchestratorError::Configuration(
                "max_queue_size must be positive".to_string(),
            ));
        }
        if self.task_timeout_default == 0 {
            return Err(OrchestratorError::Configuration(
                "task_timeout_default must be positive".to_string(),
            ));
        }
        if self.max_workers_per_task_type == 0 {
            return Err(OrchestratorError::Configuration(
                "max_workers_per_task_type must be positive".to_string(),
            ));
        }
        if self.high_priority_threshold >= self.critical_priority_threshold {
            return Err(OrchestratorError::Configuration(
                "high_priority_threshold must be below critical_priority_threshold".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(OrchestratorError::Configuration(
                "event_channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env<T>(key: &str, target: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(key) {
        *target = raw
            .parse()
            .map_err(|e| OrchestratorError::Configuration(format!("Invalid {key}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_queue_size, 10_000);
        assert_eq!(config.worker_heartbeat_timeout, 300);
        assert_eq!(config.backoff_policy, BackoffPolicy::Exponential);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("ORCH_MAX_QUEUE_SIZE", "42");
        let config = OrchestratorConfig::from_env().unwrap();
        assert_eq!(config.max_queue_size, 42);
        std::env::remove_var("ORCH_MAX_QUEUE_SIZE");
    }

    #[test]
    fn test_invalid_env_value_rejected() {
        std::env::set_var("ORCH_TEST_BAD_VALUE", "many");
        let mut target: u32 = 3;
        let result = read_env("ORCH_TEST_BAD_VALUE", &mut target);
        assert!(matches!(result, Err(OrchestratorError::Configuration(_))));
        std::env::remove_var("ORCH_TEST_BAD_VALUE");
    }

    #[test]
    fn test_validation_rejects_zero_queue() {
        let config = OrchestratorConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_thresholds() {
        let config = OrchestratorConfig {
            high_priority_threshold: 2_000.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
