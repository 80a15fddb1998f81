//! Identifiers of platform-owned resources.
//!
//! The platform owns every resource; these handles are all the pipeline
//! keeps. Nothing here is ever torn down by bulwark.

use serde::{Deserialize, Serialize};

/// Working version of a freshly created guardrail.
pub const DRAFT_VERSION: &str = "DRAFT";

/// A created guardrail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailHandle {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

impl GuardrailHandle {
    /// Handle to the working draft of guardrail `id`.
    pub fn draft(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: DRAFT_VERSION.to_string(),
            arn: None,
        }
    }
}

/// An execution role the agent service may assume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRole {
    pub name: String,
    pub arn: String,
}

/// A created agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHandle {
    pub id: String,
    pub name: String,
}

/// A prepared alias and the agent version it routes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasHandle {
    pub id: String,
    pub agent_version: String,
}

/// Everything a pipeline run has created so far.
///
/// Reported on failure so the operator can clean up by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrail: Option<GuardrailHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ExecutionRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<AliasHandle>,
}

impl CreatedResources {
    pub fn is_empty(&self) -> bool {
        self.guardrail.is_none()
            && self.role.is_none()
            && self.agent.is_none()
            && self.alias.is_none()
    }

    /// One `kind=id` pair per created resource, in creation order.
    pub fn summary(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(g) = &self.guardrail {
            out.push(format!("guardrail={}", g.id));
        }
        if let Some(r) = &self.role {
            out.push(format!("role={}", r.name));
        }
        if let Some(a) = &self.agent {
            out.push(format!("agent={}", a.id));
        }
        if let Some(a) = &self.alias {
            out.push(format!("alias={}", a.id));
        }
        out
    }
}
