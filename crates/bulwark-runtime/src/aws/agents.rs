use async_trait::async_trait;
use aws_sdk_bedrockagent::types::{AgentAlias, GuardrailConfiguration};

use bulwark_core::{AgentHandle, ResourceStatus};

use super::{classify, present, AwsPlatform};
use crate::services::{
    AgentControlPlane, AliasState, CreateAgentRequest, ResourceState, ServiceError,
};

fn alias_state(
    operation: &'static str,
    alias: Option<&AgentAlias>,
) -> Result<AliasState, ServiceError> {
    let alias = alias.ok_or_else(|| ServiceError::malformed(operation, "response has no alias"))?;
    let id = present(alias.agent_alias_id())
        .ok_or_else(|| ServiceError::malformed(operation, "alias has no id"))?;
    let status = present(alias.agent_alias_status())
        .map(|s| ResourceStatus::parse(s.as_str()))
        .ok_or_else(|| ServiceError::malformed(operation, "alias has no status"))?;
    let reasons = present(alias.failure_reasons()).unwrap_or_default().to_vec();

    // The first routing entry names the version the alias serves
    let agent_version = present(alias.routing_configuration())
        .unwrap_or_default()
        .first()
        .and_then(|route| present(route.agent_version()))
        .map(str::to_string);

    Ok(AliasState {
        id: id.to_string(),
        state: ResourceState {
            status,
            failure_reasons: reasons,
        },
        agent_version,
    })
}

#[async_trait]
impl AgentControlPlane for AwsPlatform {
    async fn create_agent(&self, request: CreateAgentRequest) -> Result<AgentHandle, ServiceError> {
        const OP: &str = "CreateAgent";

        let guardrail = GuardrailConfiguration::builder()
            .guardrail_identifier(&request.guardrail.id)
            .guardrail_version(&request.guardrail.version)
            .build();
        let ttl = i32::try_from(request.idle_session_ttl.as_secs()).unwrap_or(i32::MAX);

        let output = self
            .agents
            .create_agent()
            .agent_name(&request.name)
            .foundation_model(&request.foundation_model)
            .instruction(&request.instruction)
            .agent_resource_role_arn(&request.role_arn)
            .guardrail_configuration(guardrail)
            .idle_session_ttl_in_seconds(ttl)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        let agent = present(output.agent())
            .ok_or_else(|| ServiceError::malformed(OP, "response has no agent"))?;
        let id = present(agent.agent_id())
            .ok_or_else(|| ServiceError::malformed(OP, "agent has no id"))?;
        let name = present(agent.agent_name()).unwrap_or(&request.name);

        Ok(AgentHandle {
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    async fn prepare_agent(&self, agent_id: &str) -> Result<ResourceStatus, ServiceError> {
        const OP: &str = "PrepareAgent";

        let output = self
            .agents
            .prepare_agent()
            .agent_id(agent_id)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        present(output.agent_status())
            .map(|s| ResourceStatus::parse(s.as_str()))
            .ok_or_else(|| ServiceError::malformed(OP, "response has no agent status"))
    }

    async fn get_agent(&self, agent_id: &str) -> Result<ResourceState, ServiceError> {
        const OP: &str = "GetAgent";

        let output = self
            .agents
            .get_agent()
            .agent_id(agent_id)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        let agent = present(output.agent())
            .ok_or_else(|| ServiceError::malformed(OP, "response has no agent"))?;
        let status = present(agent.agent_status())
            .map(|s| ResourceStatus::parse(s.as_str()))
            .ok_or_else(|| ServiceError::malformed(OP, "agent has no status"))?;

        Ok(ResourceState {
            status,
            failure_reasons: present(agent.failure_reasons()).unwrap_or_default().to_vec(),
        })
    }

    async fn create_agent_alias(
        &self,
        agent_id: &str,
        alias_name: &str,
    ) -> Result<AliasState, ServiceError> {
        const OP: &str = "CreateAgentAlias";

        let output = self
            .agents
            .create_agent_alias()
            .agent_id(agent_id)
            .agent_alias_name(alias_name)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        alias_state(OP, present(output.agent_alias()))
    }

    async fn get_agent_alias(
        &self,
        agent_id: &str,
        alias_id: &str,
    ) -> Result<AliasState, ServiceError> {
        const OP: &str = "GetAgentAlias";

        let output = self
            .agents
            .get_agent_alias()
            .agent_id(agent_id)
            .agent_alias_id(alias_id)
            .send()
            .await
            .map_err(|e| classify(OP, e))?;

        alias_state(OP, present(output.agent_alias()))
    }
}
