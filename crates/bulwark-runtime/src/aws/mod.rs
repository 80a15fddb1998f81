//! AWS SDK backend.
//!
//! Implements the service traits with the official SDK clients. SDK-level
//! retries are disabled: a throttled or failed call surfaces as a
//! [`ServiceError`] exactly once.

use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_iam::error::{DisplayErrorContext, SdkError};
use std::fmt;

use crate::services::ServiceError;

mod agents;
mod guardrails;
mod iam;
mod runtime;

/// All SDK clients the pipeline needs, sharing one configuration.
#[derive(Debug, Clone)]
pub struct AwsPlatform {
    iam: aws_sdk_iam::Client,
    bedrock: aws_sdk_bedrock::Client,
    agents: aws_sdk_bedrockagent::Client,
    agent_runtime: aws_sdk_bedrockagentruntime::Client,
    runtime: aws_sdk_bedrockruntime::Client,
}

impl AwsPlatform {
    /// Load credentials from the default provider chain for `region`.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .retry_config(RetryConfig::disabled())
            .load()
            .await;
        Self::from_conf(&config)
    }

    pub fn from_conf(config: &SdkConfig) -> Self {
        Self {
            iam: aws_sdk_iam::Client::new(config),
            bedrock: aws_sdk_bedrock::Client::new(config),
            agents: aws_sdk_bedrockagent::Client::new(config),
            agent_runtime: aws_sdk_bedrockagentruntime::Client::new(config),
            runtime: aws_sdk_bedrockruntime::Client::new(config),
        }
    }
}

/// Map an SDK failure onto the service error taxonomy.
fn classify<E, R>(operation: &'static str, err: SdkError<E, R>) -> ServiceError
where
    E: std::error::Error + Send + Sync + 'static,
    R: fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) | SdkError::ConstructionFailure(_) => {
            ServiceError::rejected(operation, message)
        }
        SdkError::ResponseError(_) => ServiceError::malformed(operation, message),
        _ => ServiceError::transport(operation, message),
    }
}

/// Request construction failures are rejections: nothing was sent.
fn invalid<E: fmt::Display>(operation: &'static str) -> impl Fn(E) -> ServiceError {
    move |e| ServiceError::rejected(operation, e.to_string())
}

/// Normalize an accessor that may be modeled as required or optional.
fn present<'a, T: ?Sized>(value: impl Into<Option<&'a T>>) -> Option<&'a T> {
    value.into()
}

/// Variant name of an SDK union, read from its Debug form.
fn variant_name(value: &impl fmt::Debug) -> String {
    let debug = format!("{value:?}");
    debug
        .split(|c: char| c == '(' || c == ' ' || c == '{')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    #[allow(dead_code)]
    enum Sample {
        OrchestrationTrace(u8),
        Unknown,
    }

    #[test]
    fn test_variant_name() {
        assert_eq!(variant_name(&Sample::OrchestrationTrace(1)), "OrchestrationTrace");
        assert_eq!(variant_name(&Sample::Unknown), "Unknown");
    }

    #[test]
    fn test_present_accepts_both_shapes() {
        let required: &str = "x";
        let optional: Option<&str> = None;
        assert_eq!(present(required), Some("x"));
        assert_eq!(present(optional), None);
    }
}
