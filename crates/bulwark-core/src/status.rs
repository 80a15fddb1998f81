//! Lifecycle statuses reported by the agent control plane.
//!
//! Agents move CREATING -> NOT_PREPARED -> PREPARING -> PREPARED | FAILED.
//! Aliases move CREATING -> PREPARED. Unknown values are preserved so a new
//! platform status never breaks polling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an agent or alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceStatus {
    Creating,
    NotPrepared,
    Preparing,
    Prepared,
    Failed,
    Updating,
    Deleting,
    Versioning,
    Dissociated,
    Other(String),
}

impl ResourceStatus {
    /// Parse the platform's upper-snake-case status string.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATING" => Self::Creating,
            "NOT_PREPARED" => Self::NotPrepared,
            "PREPARING" => Self::Preparing,
            "PREPARED" => Self::Prepared,
            "FAILED" => Self::Failed,
            "UPDATING" => Self::Updating,
            "DELETING" => Self::Deleting,
            "VERSIONING" => Self::Versioning,
            "DISSOCIATED" => Self::Dissociated,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "CREATING",
            Self::NotPrepared => "NOT_PREPARED",
            Self::Preparing => "PREPARING",
            Self::Prepared => "PREPARED",
            Self::Failed => "FAILED",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::Versioning => "VERSIONING",
            Self::Dissociated => "DISSOCIATED",
            Self::Other(s) => s,
        }
    }

    /// Whether the resource can be aliased or invoked.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Prepared)
    }

    /// Whether the resource has entered an explicit failure state.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ResourceStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for ResourceStatus {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<ResourceStatus> for String {
    fn from(value: ResourceStatus) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_statuses() {
        assert_eq!(ResourceStatus::parse("PREPARED"), ResourceStatus::Prepared);
        assert_eq!(ResourceStatus::parse("not_prepared"), ResourceStatus::NotPrepared);
        assert_eq!(ResourceStatus::parse(" FAILED "), ResourceStatus::Failed);
    }

    #[test]
    fn test_unknown_status_preserved() {
        let status = ResourceStatus::parse("QUARANTINED");
        assert_eq!(status, ResourceStatus::Other("QUARANTINED".to_string()));
        assert_eq!(status.to_string(), "QUARANTINED");
        assert!(!status.is_ready());
        assert!(!status.is_failure());
    }

    #[test]
    fn test_ready_and_failure() {
        assert!(ResourceStatus::Prepared.is_ready());
        assert!(ResourceStatus::Failed.is_failure());
        assert!(!ResourceStatus::Preparing.is_ready());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&ResourceStatus::NotPrepared).unwrap();
        assert_eq!(json, "\"NOT_PREPARED\"");
        let back: ResourceStatus = serde_json::from_str("\"PREPARING\"").unwrap();
        assert_eq!(back, ResourceStatus::Preparing);
    }
}
