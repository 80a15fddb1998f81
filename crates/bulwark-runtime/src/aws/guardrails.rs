use async_trait::async_trait;
use aws_sdk_bedrock::types::{
    GuardrailContentFilterAction, GuardrailContentFilterConfig, GuardrailContentFilterType,
    GuardrailContentPolicyConfig, GuardrailContextualGroundingAction,
    GuardrailContextualGroundingFilterConfig, GuardrailContextualGroundingFilterType,
    GuardrailContextualGroundingPolicyConfig, GuardrailFilterStrength, GuardrailManagedWordsConfig,
    GuardrailManagedWordsType, GuardrailModality, GuardrailPiiEntityConfig, GuardrailPiiEntityType,
    GuardrailRegexConfig, GuardrailSensitiveInformationAction,
    GuardrailSensitiveInformationPolicyConfig, GuardrailTopicConfig, GuardrailTopicPolicyConfig,
    GuardrailTopicType, GuardrailWordAction, GuardrailWordConfig, GuardrailWordPolicyConfig,
};
use tracing::debug;

use bulwark_core::guardrail::{Modality, RuleAction};
use bulwark_core::resources::DRAFT_VERSION;
use bulwark_core::{GuardrailHandle, GuardrailPolicy};

use super::{classify, invalid, present, AwsPlatform};
use crate::services::{GuardrailService, ServiceError};

const OP: &str = "CreateGuardrail";

fn modalities(list: &[Modality]) -> Vec<GuardrailModality> {
    list.iter().map(|m| GuardrailModality::from(m.as_str())).collect()
}

fn topic_policy(policy: &GuardrailPolicy) -> Result<GuardrailTopicPolicyConfig, ServiceError> {
    let mut builder = GuardrailTopicPolicyConfig::builder();
    for topic in &policy.topics {
        let config = GuardrailTopicConfig::builder()
            .name(&topic.name)
            .definition(&topic.definition)
            .set_examples(Some(topic.examples.clone()))
            .r#type(GuardrailTopicType::Deny)
            .build()
            .map_err(invalid(OP))?;
        builder = builder.topics_config(config);
    }
    builder.build().map_err(invalid(OP))
}

fn content_policy(policy: &GuardrailPolicy) -> Result<GuardrailContentPolicyConfig, ServiceError> {
    let mut builder = GuardrailContentPolicyConfig::builder();
    for filter in &policy.content_filters {
        let config = GuardrailContentFilterConfig::builder()
            .r#type(GuardrailContentFilterType::from(filter.kind.as_str()))
            .input_strength(GuardrailFilterStrength::from(filter.input_strength.as_str()))
            .output_strength(GuardrailFilterStrength::from(filter.output_strength.as_str()))
            .set_input_modalities(Some(modalities(&filter.input_modalities)))
            .set_output_modalities(Some(modalities(&filter.output_modalities)))
            .input_action(GuardrailContentFilterAction::from(
                filter.actions.input_action.as_str(),
            ))
            .output_action(GuardrailContentFilterAction::from(
                filter.actions.output_action.as_str(),
            ))
            .input_enabled(filter.actions.input_enabled)
            .output_enabled(filter.actions.output_enabled)
            .build()
            .map_err(invalid(OP))?;
        builder = builder.filters_config(config);
    }
    builder.build().map_err(invalid(OP))
}

fn word_policy(policy: &GuardrailPolicy) -> Result<GuardrailWordPolicyConfig, ServiceError> {
    let mut builder = GuardrailWordPolicyConfig::builder();
    for word in &policy.blocked_words {
        let config = GuardrailWordConfig::builder()
            .text(&word.text)
            .input_action(GuardrailWordAction::from(word.actions.input_action.as_str()))
            .output_action(GuardrailWordAction::from(word.actions.output_action.as_str()))
            .input_enabled(word.actions.input_enabled)
            .output_enabled(word.actions.output_enabled)
            .build()
            .map_err(invalid(OP))?;
        builder = builder.words_config(config);
    }
    for list in &policy.managed_word_lists {
        let config = GuardrailManagedWordsConfig::builder()
            .r#type(GuardrailManagedWordsType::from(list.kind.as_str()))
            .input_action(GuardrailWordAction::from(list.actions.input_action.as_str()))
            .output_action(GuardrailWordAction::from(list.actions.output_action.as_str()))
            .input_enabled(list.actions.input_enabled)
            .output_enabled(list.actions.output_enabled)
            .build()
            .map_err(invalid(OP))?;
        builder = builder.managed_word_lists_config(config);
    }
    Ok(builder.build())
}

fn sensitive_information_policy(
    policy: &GuardrailPolicy,
) -> Result<GuardrailSensitiveInformationPolicyConfig, ServiceError> {
    let action = |a: RuleAction| GuardrailSensitiveInformationAction::from(a.as_str());

    let mut builder = GuardrailSensitiveInformationPolicyConfig::builder();
    for pii in &policy.pii_entities {
        let config = GuardrailPiiEntityConfig::builder()
            .r#type(GuardrailPiiEntityType::from(pii.entity_type.as_str()))
            .action(action(pii.action))
            .input_action(action(pii.actions.input_action))
            .output_action(action(pii.actions.output_action))
            .input_enabled(pii.actions.input_enabled)
            .output_enabled(pii.actions.output_enabled)
            .build()
            .map_err(invalid(OP))?;
        builder = builder.pii_entities_config(config);
    }
    for rule in &policy.regexes {
        let config = GuardrailRegexConfig::builder()
            .name(&rule.name)
            .set_description(rule.description.clone())
            .pattern(&rule.pattern)
            .action(action(rule.action))
            .input_action(action(rule.actions.input_action))
            .output_action(action(rule.actions.output_action))
            .input_enabled(rule.actions.input_enabled)
            .output_enabled(rule.actions.output_enabled)
            .build()
            .map_err(invalid(OP))?;
        builder = builder.regexes_config(config);
    }
    Ok(builder.build())
}

fn grounding_policy(
    policy: &GuardrailPolicy,
) -> Result<GuardrailContextualGroundingPolicyConfig, ServiceError> {
    let mut builder = GuardrailContextualGroundingPolicyConfig::builder();
    for filter in &policy.grounding {
        let config = GuardrailContextualGroundingFilterConfig::builder()
            .r#type(GuardrailContextualGroundingFilterType::from(filter.kind.as_str()))
            .threshold(filter.threshold)
            .action(GuardrailContextualGroundingAction::from(filter.action.as_str()))
            .enabled(filter.enabled)
            .build()
            .map_err(invalid(OP))?;
        builder = builder.filters_config(config);
    }
    builder.build().map_err(invalid(OP))
}

#[async_trait]
impl GuardrailService for AwsPlatform {
    async fn create_guardrail(
        &self,
        name: &str,
        policy: &GuardrailPolicy,
    ) -> Result<GuardrailHandle, ServiceError> {
        // Empty sections are omitted; the service rejects empty config lists.
        let mut call = self
            .bedrock
            .create_guardrail()
            .name(name)
            .blocked_input_messaging(&policy.blocked_input_message)
            .blocked_outputs_messaging(&policy.blocked_output_message);

        if !policy.description.is_empty() {
            call = call.description(&policy.description);
        }
        if !policy.topics.is_empty() {
            call = call.topic_policy_config(topic_policy(policy)?);
        }
        if !policy.content_filters.is_empty() {
            call = call.content_policy_config(content_policy(policy)?);
        }
        if !policy.blocked_words.is_empty() || !policy.managed_word_lists.is_empty() {
            call = call.word_policy_config(word_policy(policy)?);
        }
        if !policy.pii_entities.is_empty() || !policy.regexes.is_empty() {
            call = call.sensitive_information_policy_config(sensitive_information_policy(policy)?);
        }
        if !policy.grounding.is_empty() {
            call = call.contextual_grounding_policy_config(grounding_policy(policy)?);
        }

        let output = call.send().await.map_err(|e| classify(OP, e))?;

        let id = present(output.guardrail_id())
            .ok_or_else(|| ServiceError::malformed(OP, "response has no guardrail id"))?;
        let version = present(output.version()).unwrap_or(DRAFT_VERSION);
        let arn = present(output.guardrail_arn()).map(str::to_string);
        debug!(guardrail_id = id, version, "Guardrail created");

        Ok(GuardrailHandle {
            id: id.to_string(),
            version: version.to_string(),
            arn,
        })
    }
}
