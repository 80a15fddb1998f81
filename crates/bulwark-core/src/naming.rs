//! Human-distinguishable resource names.
//!
//! Each run appends a short random hex suffix to a fixed prefix so repeated
//! runs do not collide on name uniqueness constraints.

use uuid::Uuid;

/// Suffix length for guardrail names.
pub const GUARDRAIL_SUFFIX_LEN: usize = 8;

/// Suffix length for agent names.
pub const AGENT_SUFFIX_LEN: usize = 6;

/// `<prefix>-<len hex chars>`, e.g. `demo-agent-guardrails-162c24`.
///
/// `len` is capped at 32, the number of hex digits in a UUID.
pub fn unique_name(prefix: &str, len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    let len = len.min(hex.len());
    format!("{}-{}", prefix.trim_end_matches('-'), &hex[..len])
}

/// A fresh invocation session id.
pub fn session_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name_shape() {
        let name = unique_name("demo-guardrail", GUARDRAIL_SUFFIX_LEN);
        let (prefix, suffix) = name.rsplit_once('-').unwrap();
        assert_eq!(prefix, "demo-guardrail");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_trailing_dash_not_doubled() {
        let name = unique_name("agent-", AGENT_SUFFIX_LEN);
        assert!(name.starts_with("agent-"));
        assert!(!name.contains("--"));
    }

    #[test]
    fn test_names_differ_between_calls() {
        let a = unique_name("x", 32);
        let b = unique_name("x", 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_ids_are_uuids() {
        let id = session_id();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, session_id());
    }
}
