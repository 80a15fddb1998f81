//! IAM policy documents for the agent execution role.
//!
//! Two documents are produced for every role:
//! - a trust policy letting the agent service assume the role, scoped to the
//!   caller's account and to agents under that account
//! - a permission policy granting model invocation on one exact model ARN and
//!   guardrail application on one exact guardrail ARN

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::arn;

/// IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Service principal that hosts agents.
pub const AGENT_SERVICE_PRINCIPAL: &str = "bedrock.amazonaws.com";

/// Actions needed to call the foundation model.
pub const MODEL_ACTIONS: [&str; 2] = [
    "bedrock:InvokeModel",
    "bedrock:InvokeModelWithResponseStream",
];

/// Action needed to apply the guardrail.
pub const GUARDRAIL_ACTION: &str = "bedrock:ApplyGuardrail";

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A field IAM accepts as a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let items: Vec<&str> = match self {
            OneOrMany::One(s) => vec![s.as_str()],
            OneOrMany::Many(v) => v.iter().map(String::as_str).collect(),
        };
        items.into_iter()
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        OneOrMany::One(value.to_string())
    }
}

impl<const N: usize> From<[&str; N]> for OneOrMany {
    fn from(values: [&str; N]) -> Self {
        OneOrMany::Many(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Principal block of a trust statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: String,
}

/// Condition operator -> condition key -> value.
pub type Condition = BTreeMap<String, BTreeMap<String, String>>;

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    pub effect: Effect,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    pub action: OneOrMany,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

/// A complete policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Serialize for an IAM request.
    pub fn to_json(&self) -> String {
        // Plain data with string keys: serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Every resource named by any statement.
    pub fn resources(&self) -> Vec<&str> {
        self.statement
            .iter()
            .filter_map(|s| s.resource.as_ref())
            .flat_map(|r| r.iter())
            .collect()
    }

    /// Actions granted on `resource`.
    pub fn actions_on(&self, resource: &str) -> Vec<&str> {
        self.statement
            .iter()
            .filter(|s| s.effect == Effect::Allow)
            .filter(|s| {
                s.resource
                    .as_ref()
                    .map(|r| r.iter().any(|x| x == resource))
                    .unwrap_or(false)
            })
            .flat_map(|s| s.action.iter())
            .collect()
    }
}

/// Trust policy: the agent service may assume the role on behalf of any
/// agent under `account_id`, and only from that account.
pub fn trust_policy(region: &str, account_id: &str) -> PolicyDocument {
    let mut condition = Condition::new();
    condition.insert(
        "StringEquals".to_string(),
        BTreeMap::from([("aws:SourceAccount".to_string(), account_id.to_string())]),
    );
    condition.insert(
        "ArnLike".to_string(),
        BTreeMap::from([(
            "AWS:SourceArn".to_string(),
            arn::agent_source_pattern(region, account_id),
        )]),
    );

    PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: vec![Statement {
            sid: None,
            effect: Effect::Allow,
            principal: Some(Principal {
                service: AGENT_SERVICE_PRINCIPAL.to_string(),
            }),
            action: "sts:AssumeRole".into(),
            resource: None,
            condition: Some(condition),
        }],
    }
}

/// Permission policy granting exactly the model and guardrail ARNs given.
pub fn permission_policy(model_arn: &str, guardrail_arn: &str) -> PolicyDocument {
    PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: vec![
            Statement {
                sid: Some("InvokeFoundationModels".to_string()),
                effect: Effect::Allow,
                principal: None,
                action: MODEL_ACTIONS.into(),
                resource: Some(model_arn.into()),
                condition: None,
            },
            Statement {
                sid: Some("ApplyGuardrail".to_string()),
                effect: Effect::Allow,
                principal: None,
                action: GUARDRAIL_ACTION.into(),
                resource: Some(guardrail_arn.into()),
                condition: None,
            },
        ],
    }
}

/// Inputs that scope an execution role.
#[derive(Debug, Clone, Copy)]
pub struct RoleScope<'a> {
    pub region: &'a str,
    pub account_id: &'a str,
    pub foundation_model: &'a str,
    pub guardrail_id: &'a str,
}

/// Both documents attached to an execution role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolePolicies {
    pub trust: PolicyDocument,
    pub permissions: PolicyDocument,
    pub model_arn: String,
    pub guardrail_arn: String,
}

impl RolePolicies {
    pub fn new(scope: RoleScope<'_>) -> Self {
        let model_arn = arn::foundation_model_arn(scope.region, scope.foundation_model);
        let guardrail_arn = arn::guardrail_arn(scope.region, scope.account_id, scope.guardrail_id);

        Self {
            trust: trust_policy(scope.region, scope.account_id),
            permissions: permission_policy(&model_arn, &guardrail_arn),
            model_arn,
            guardrail_arn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const REGION: &str = "us-east-1";
    const ACCOUNT: &str = "123456789012";
    const MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";

    fn policies(guardrail_id: &str) -> RolePolicies {
        RolePolicies::new(RoleScope {
            region: REGION,
            account_id: ACCOUNT,
            foundation_model: MODEL,
            guardrail_id,
        })
    }

    #[test]
    fn test_trust_policy_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&trust_policy(REGION, ACCOUNT).to_json()).unwrap();

        assert_eq!(json["Version"], "2012-10-17");
        let stmt = &json["Statement"][0];
        assert_eq!(stmt["Effect"], "Allow");
        assert_eq!(stmt["Principal"]["Service"], "bedrock.amazonaws.com");
        assert_eq!(stmt["Action"], "sts:AssumeRole");
        assert_eq!(
            stmt["Condition"]["StringEquals"]["aws:SourceAccount"],
            ACCOUNT
        );
        assert_eq!(
            stmt["Condition"]["ArnLike"]["AWS:SourceArn"],
            "arn:aws:bedrock:us-east-1:123456789012:agent/*"
        );
        assert!(stmt.get("Resource").is_none());
    }

    #[test]
    fn test_permissions_grant_exactly_model_and_guardrail() {
        let p = policies("gr-abc123");

        let mut resources = p.permissions.resources();
        resources.sort();
        let mut expected = vec![p.model_arn.as_str(), p.guardrail_arn.as_str()];
        expected.sort();
        assert_eq!(resources, expected);

        assert_eq!(p.permissions.actions_on(&p.model_arn), MODEL_ACTIONS.to_vec());
        assert_eq!(
            p.permissions.actions_on(&p.guardrail_arn),
            vec![GUARDRAIL_ACTION]
        );
        assert!(resources.iter().all(|r| !r.contains('*')));
    }

    #[test]
    fn test_guardrail_arn_is_account_scoped() {
        let p = policies("gr-abc123");
        assert_eq!(
            p.guardrail_arn,
            "arn:aws:bedrock:us-east-1:123456789012:guardrail/gr-abc123"
        );
    }

    proptest! {
        #[test]
        fn prop_changing_guardrail_changes_only_its_arn(
            a in "[a-z0-9]{6,16}",
            b in "[a-z0-9]{6,16}",
        ) {
            let pa = policies(&a);
            let pb = policies(&b);

            prop_assert_eq!(&pa.trust, &pb.trust);
            prop_assert_eq!(&pa.model_arn, &pb.model_arn);

            let rewritten = pa
                .permissions
                .to_json()
                .replace(&pa.guardrail_arn, &pb.guardrail_arn);
            prop_assert_eq!(rewritten, pb.permissions.to_json());
            let suffix = format!(":{}:guardrail/{}", ACCOUNT, b);
            prop_assert!(pb.guardrail_arn.ends_with(&suffix));
        }
    }
}
