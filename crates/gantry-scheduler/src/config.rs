//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for one scheduler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently running jobs.
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,
    /// Budget for preparing one environment.
    #[serde(default = "default_provision_timeout")]
    pub provision_timeout_secs: u64,
    /// Execution budget for jobs that do not set `timeout_minutes`.
    #[serde(default = "default_job_timeout")]
    pub default_job_timeout_minutes: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Keep artifacts after the invocation completes.
    #[serde(default)]
    pub retain_artifacts: bool,
}

fn default_max_parallel_jobs() -> usize {
    4
}

fn default_provision_timeout() -> u64 {
    600
}

fn default_job_timeout() -> u32 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: default_max_parallel_jobs(),
            provision_timeout_secs: default_provision_timeout(),
            default_job_timeout_minutes: default_job_timeout(),
            retry: RetryPolicy::default(),
            retain_artifacts: false,
        }
    }
}

impl SchedulerConfig {
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    pub fn job_timeout(&self, job_minutes: Option<u32>) -> Duration {
        let minutes = job_minutes.unwrap_or(self.default_job_timeout_minutes);
        Duration::from_secs(u64::from(minutes) * 60)
    }
}

/// Bounded retries for infrastructure failures.
///
/// Step failures and execution timeouts are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_infrastructure_attempts")]
    pub infrastructure_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_infrastructure_attempts() -> u32 {
    2
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            infrastructure_attempts: default_infrastructure_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            infrastructure_attempts: 1,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.infrastructure_attempts.max(1)
    }
}
