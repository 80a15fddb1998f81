//! Backend selection.

use anyhow::Result;
use clap::ValueEnum;
use std::sync::Arc;
use tracing::info;

use bulwark_core::PipelineConfig;
use bulwark_runtime::{
    AgentControlPlane, AgentRuntime, GuardrailService, IdentityService, PipelineBuilder,
    SimulatedPlatform,
};

/// Account used by the simulated backend when none is configured.
const SIMULATED_ACCOUNT: &str = "123456789012";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Amazon Bedrock through the AWS SDK
    Aws,
    /// Deterministic in-process platform (dry run)
    Simulated,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "aws") {
            Self::Aws
        } else {
            Self::Simulated
        }
    }
}

/// The four service seams, resolved for one backend.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityService>,
    pub guardrails: Arc<dyn GuardrailService>,
    pub agents: Arc<dyn AgentControlPlane>,
    pub runtime: Arc<dyn AgentRuntime>,
}

impl Services {
    fn from_platform<P>(platform: Arc<P>) -> Self
    where
        P: IdentityService + GuardrailService + AgentControlPlane + AgentRuntime + 'static,
    {
        Self {
            identity: platform.clone(),
            guardrails: platform.clone(),
            agents: platform.clone(),
            runtime: platform,
        }
    }

    /// Fill backend-specific gaps in `config`, then connect.
    pub async fn connect(backend: Backend, config: &mut PipelineConfig) -> Result<Self> {
        match backend {
            Backend::Simulated => {
                let account = config
                    .account_id
                    .get_or_insert_with(|| SIMULATED_ACCOUNT.to_string())
                    .clone();
                info!(account_id = %account, region = %config.region, "Using simulated backend");
                let platform =
                    SimulatedPlatform::new().with_location(account, config.region.clone());
                Ok(Self::from_platform(Arc::new(platform)))
            }
            #[cfg(feature = "aws")]
            Backend::Aws => {
                let platform = bulwark_runtime::AwsPlatform::connect(&config.region).await;
                Ok(Self::from_platform(Arc::new(platform)))
            }
            #[cfg(not(feature = "aws"))]
            Backend::Aws => anyhow::bail!(
                "This build has no AWS backend: rebuild with `--features aws` \
                 or pass `--backend simulated`"
            ),
        }
    }

    /// A pipeline builder wired to these services.
    pub fn pipeline(&self) -> PipelineBuilder {
        PipelineBuilder::new()
            .identity(self.identity.clone())
            .guardrails(self.guardrails.clone())
            .control_plane(self.agents.clone())
            .runtime(self.runtime.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_fills_account() {
        let mut config = PipelineConfig::default();
        assert!(config.account_id.is_none());

        Services::connect(Backend::Simulated, &mut config).await.unwrap();
        assert_eq!(config.account_id.as_deref(), Some(SIMULATED_ACCOUNT));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_simulated_keeps_configured_account() {
        let mut config = PipelineConfig::default();
        config.account_id = Some("210987654321".to_string());

        Services::connect(Backend::Simulated, &mut config).await.unwrap();
        assert_eq!(config.account_id.as_deref(), Some("210987654321"));
    }

    #[cfg(not(feature = "aws"))]
    #[tokio::test]
    async fn test_aws_backend_requires_feature() {
        let mut config = PipelineConfig::default();
        let err = Services::connect(Backend::Aws, &mut config).await.err().unwrap();
        assert!(err.to_string().contains("--features aws"));
    }
}
