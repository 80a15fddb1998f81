//! ARN construction for the resources the pipeline touches.
//!
//! Every ARN is built from explicit parts. Nothing here wildcards a resource
//! except [`agent_source_pattern`], which is only used as a trust condition.

/// Service namespace of every Bedrock ARN.
const BEDROCK: &str = "bedrock";

/// ARN of a guardrail owned by `account_id`.
pub fn guardrail_arn(region: &str, account_id: &str, guardrail_id: &str) -> String {
    format!("arn:aws:{BEDROCK}:{region}:{account_id}:guardrail/{guardrail_id}")
}

/// ARN of a foundation model. Foundation models have no owning account.
pub fn foundation_model_arn(region: &str, model_id: &str) -> String {
    format!("arn:aws:{BEDROCK}:{region}::foundation-model/{model_id}")
}

/// ARN of an agent owned by `account_id`.
pub fn agent_arn(region: &str, account_id: &str, agent_id: &str) -> String {
    format!("arn:aws:{BEDROCK}:{region}:{account_id}:agent/{agent_id}")
}

/// Pattern matching any agent under `account_id`.
pub fn agent_source_pattern(region: &str, account_id: &str) -> String {
    agent_arn(region, account_id, "*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guardrail_arn() {
        assert_eq!(
            guardrail_arn("us-east-1", "123456789012", "a6w0gl4ttetz"),
            "arn:aws:bedrock:us-east-1:123456789012:guardrail/a6w0gl4ttetz"
        );
    }

    #[test]
    fn test_model_arn_has_empty_account() {
        let arn = foundation_model_arn("us-west-2", "anthropic.claude-3-haiku-20240307-v1:0");
        assert_eq!(
            arn,
            "arn:aws:bedrock:us-west-2::foundation-model/anthropic.claude-3-haiku-20240307-v1:0"
        );
    }

    #[test]
    fn test_agent_pattern() {
        assert_eq!(
            agent_source_pattern("eu-west-1", "111122223333"),
            "arn:aws:bedrock:eu-west-1:111122223333:agent/*"
        );
    }
}
