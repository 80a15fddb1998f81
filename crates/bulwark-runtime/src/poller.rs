//! Readiness polling.
//!
//! Waits for a platform resource to reach a target status. The interval is
//! fixed; there is no backoff. Polling stops at the first terminal status
//! (target or failure), so a resource is never fetched again once it is
//! known to be ready or broken.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::info;

use bulwark_core::{PollingConfig, ResourceStatus};

use crate::services::{ResourceState, ServiceError};

/// Errors from waiting on a resource.
#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("{resource} reached {status} after {attempts} checks: {}", reasons_text(.reasons))]
    Failed {
        resource: String,
        status: ResourceStatus,
        reasons: Vec<String>,
        attempts: u32,
    },

    #[error("{resource} not {target} after {attempts} checks (last status: {})", last_text(.last))]
    TimedOut {
        resource: String,
        target: ResourceStatus,
        attempts: u32,
        last: Option<ResourceStatus>,
    },

    #[error("Status check {attempt} for {resource} failed: {source}")]
    Fetch {
        resource: String,
        attempt: u32,
        #[source]
        source: ServiceError,
    },
}

fn reasons_text(reasons: &[String]) -> String {
    if reasons.is_empty() {
        "no failure reasons reported".to_string()
    } else {
        reasons.join("; ")
    }
}

fn last_text(last: &Option<ResourceStatus>) -> String {
    last.as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// The resource reached its target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readiness {
    /// Number of status fetches performed
    pub attempts: u32,
    pub status: ResourceStatus,
    /// Time spent sleeping between fetches and in fetches
    pub waited: Duration,
}

/// What to wait for and how patiently.
#[derive(Debug, Clone)]
pub struct PollSpec {
    /// Human label for logs and errors, e.g. `agent ABC123`
    pub resource: String,
    pub target: ResourceStatus,
    pub failures: Vec<ResourceStatus>,
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub max_wait: Option<Duration>,
}

impl PollSpec {
    /// Wait for PREPARED, failing on FAILED, with no budget.
    pub fn prepared(resource: impl Into<String>, interval: Duration) -> Self {
        Self {
            resource: resource.into(),
            target: ResourceStatus::Prepared,
            failures: vec![ResourceStatus::Failed],
            interval,
            max_attempts: None,
            max_wait: None,
        }
    }

    /// Apply the attempt and wait budgets from `polling`.
    pub fn with_budget(mut self, polling: &PollingConfig) -> Self {
        self.max_attempts = polling.max_attempts;
        self.max_wait = polling.max_wait;
        self
    }

    fn is_failure(&self, status: &ResourceStatus) -> bool {
        self.failures.contains(status)
    }
}

/// Poll `fetch` until the resource reaches `spec.target`.
///
/// Fetch errors end the wait immediately.
pub async fn wait_until<F, Fut>(spec: &PollSpec, mut fetch: F) -> Result<Readiness, ReadinessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ResourceState, ServiceError>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let state = fetch().await.map_err(|source| ReadinessError::Fetch {
            resource: spec.resource.clone(),
            attempt: attempts,
            source,
        })?;

        info!(
            resource = %spec.resource,
            attempt = attempts,
            status = %state.status,
            "Status check"
        );

        if state.status == spec.target {
            return Ok(Readiness {
                attempts,
                status: state.status,
                waited: started.elapsed(),
            });
        }

        if spec.is_failure(&state.status) {
            return Err(ReadinessError::Failed {
                resource: spec.resource.clone(),
                status: state.status,
                reasons: state.failure_reasons,
                attempts,
            });
        }

        let out_of_attempts = spec.max_attempts.is_some_and(|max| attempts >= max);
        let out_of_time = spec
            .max_wait
            .is_some_and(|max| started.elapsed() + spec.interval > max);
        if out_of_attempts || out_of_time {
            return Err(ReadinessError::TimedOut {
                resource: spec.resource.clone(),
                target: spec.target.clone(),
                attempts,
                last: Some(state.status),
            });
        }

        sleep(spec.interval).await;
    }
}
