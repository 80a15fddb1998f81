//! Guardrail policy bundle: what a guardrail blocks, masks and scores.
//!
//! A [`GuardrailPolicy`] is built in code ([`GuardrailPolicy::default`] is the
//! demo bundle) or loaded from YAML/JSON. File input is checked against the
//! embedded JSON Schema before deserialization, then [`GuardrailPolicy::validate`]
//! applies the rules the schema cannot express.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_policy_schema;

/// Errors from building or loading a guardrail policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Policy does not match schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Invalid policy: {0}")]
    Invalid(String),
}

/// What a rule does when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    Block,
    Anonymize,
    None,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "BLOCK",
            Self::Anonymize => "ANONYMIZE",
            Self::None => "NONE",
        }
    }
}

/// Harmful-content categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentFilterKind {
    Sexual,
    Violence,
    Hate,
    Insults,
    Misconduct,
    PromptAttack,
}

impl ContentFilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sexual => "SEXUAL",
            Self::Violence => "VIOLENCE",
            Self::Hate => "HATE",
            Self::Insults => "INSULTS",
            Self::Misconduct => "MISCONDUCT",
            Self::PromptAttack => "PROMPT_ATTACK",
        }
    }
}

/// Filter sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterStrength {
    None,
    Low,
    Medium,
    High,
}

impl FilterStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// Content modality a filter inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
        }
    }
}

/// Contextual grounding filter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroundingKind {
    /// Is the answer supported by the grounding source?
    Grounding,
    /// Does the answer respond to the query?
    Relevance,
}

impl GroundingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grounding => "GROUNDING",
            Self::Relevance => "RELEVANCE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GROUNDING" => Some(Self::Grounding),
            "RELEVANCE" => Some(Self::Relevance),
            _ => None,
        }
    }
}

/// Managed word lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagedListKind {
    Profanity,
}

impl ManagedListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profanity => "PROFANITY",
        }
    }
}

fn default_block() -> RuleAction {
    RuleAction::Block
}

fn enabled() -> bool {
    true
}

fn text_modality() -> Vec<Modality> {
    vec![Modality::Text]
}

/// Per-direction action and switch shared by most rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalAction {
    #[serde(default = "default_block")]
    pub input_action: RuleAction,
    #[serde(default = "default_block")]
    pub output_action: RuleAction,
    #[serde(default = "enabled")]
    pub input_enabled: bool,
    #[serde(default = "enabled")]
    pub output_enabled: bool,
}

impl DirectionalAction {
    /// Same action in both directions, both enabled.
    pub fn both(action: RuleAction) -> Self {
        Self {
            input_action: action,
            output_action: action,
            input_enabled: true,
            output_enabled: true,
        }
    }
}

impl Default for DirectionalAction {
    fn default() -> Self {
        Self::both(RuleAction::Block)
    }
}

/// A topic the agent must refuse to discuss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeniedTopic {
    pub name: String,
    pub definition: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// A harmful-content filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFilter {
    pub kind: ContentFilterKind,
    pub input_strength: FilterStrength,
    pub output_strength: FilterStrength,
    #[serde(default = "text_modality")]
    pub input_modalities: Vec<Modality>,
    #[serde(default = "text_modality")]
    pub output_modalities: Vec<Modality>,
    #[serde(flatten)]
    pub actions: DirectionalAction,
}

/// A custom blocked word or phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordRule {
    pub text: String,
    #[serde(flatten)]
    pub actions: DirectionalAction,
}

/// A managed word list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedWordList {
    pub kind: ManagedListKind,
    #[serde(flatten)]
    pub actions: DirectionalAction,
}

/// A PII entity to block or mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiRule {
    /// Platform entity type, e.g. `EMAIL`, `CREDIT_DEBIT_CARD_NUMBER`
    pub entity_type: String,
    pub action: RuleAction,
    #[serde(flatten)]
    pub actions: DirectionalAction,
}

/// A custom regex to block or mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexRule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub pattern: String,
    pub action: RuleAction,
    #[serde(flatten)]
    pub actions: DirectionalAction,
}

/// A contextual grounding threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingFilter {
    pub kind: GroundingKind,
    /// Minimum confidence for an answer to pass
    pub threshold: f64,
    #[serde(default = "default_block")]
    pub action: RuleAction,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// The complete policy bundle submitted when creating a guardrail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailPolicy {
    /// Generated names are `<name_prefix>-<8 hex>`
    pub name_prefix: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub topics: Vec<DeniedTopic>,

    #[serde(default)]
    pub content_filters: Vec<ContentFilter>,

    #[serde(default)]
    pub blocked_words: Vec<WordRule>,

    #[serde(default)]
    pub managed_word_lists: Vec<ManagedWordList>,

    #[serde(default)]
    pub pii_entities: Vec<PiiRule>,

    #[serde(default)]
    pub regexes: Vec<RegexRule>,

    #[serde(default)]
    pub grounding: Vec<GroundingFilter>,

    /// Shown when a prompt is blocked
    pub blocked_input_message: String,

    /// Shown when a response is blocked
    pub blocked_output_message: String,
}

impl Default for GuardrailPolicy {
    /// The demo bundle: refuses heavy-metal music and enforces grounding.
    fn default() -> Self {
        Self {
            name_prefix: "demo-guardrail".to_string(),
            description: "Blocks any mention of heavy-metal music.".to_string(),
            topics: vec![DeniedTopic {
                name: "Heavy metal".to_string(),
                definition: "Heavy metal is a style of rock music that features lyrics exploring \
                             the darker corners of human experience: mythology, rebellion, social \
                             alienation, war, the occult"
                    .to_string(),
                examples: vec!["Create a playlist of heavy metal songs.".to_string()],
            }],
            content_filters: vec![
                ContentFilter {
                    kind: ContentFilterKind::Hate,
                    input_strength: FilterStrength::High,
                    output_strength: FilterStrength::High,
                    input_modalities: vec![Modality::Text, Modality::Image],
                    output_modalities: vec![Modality::Text, Modality::Image],
                    actions: DirectionalAction::default(),
                },
                ContentFilter {
                    kind: ContentFilterKind::PromptAttack,
                    input_strength: FilterStrength::High,
                    output_strength: FilterStrength::None,
                    input_modalities: vec![Modality::Text, Modality::Image],
                    output_modalities: vec![Modality::Text, Modality::Image],
                    actions: DirectionalAction::default(),
                },
            ],
            blocked_words: vec![
                WordRule {
                    text: "metal".to_string(),
                    actions: DirectionalAction::default(),
                },
                WordRule {
                    text: "rock music".to_string(),
                    actions: DirectionalAction::default(),
                },
            ],
            managed_word_lists: vec![ManagedWordList {
                kind: ManagedListKind::Profanity,
                actions: DirectionalAction::default(),
            }],
            pii_entities: vec![
                PiiRule {
                    entity_type: "CREDIT_DEBIT_CARD_NUMBER".to_string(),
                    action: RuleAction::Block,
                    actions: DirectionalAction::both(RuleAction::Block),
                },
                PiiRule {
                    entity_type: "EMAIL".to_string(),
                    action: RuleAction::Anonymize,
                    actions: DirectionalAction::both(RuleAction::Anonymize),
                },
            ],
            regexes: vec![RegexRule {
                name: "BITCOIN_WALLET".to_string(),
                description: Some("Bitcoin address (Base58 or Bech32)".to_string()),
                pattern: r"\b(?:[13][a-km-zA-HJ-NP-Z1-9]{25,34}|bc1[0-9a-z]{6,87})\b".to_string(),
                action: RuleAction::Anonymize,
                actions: DirectionalAction::both(RuleAction::Anonymize),
            }],
            grounding: vec![
                GroundingFilter {
                    kind: GroundingKind::Grounding,
                    threshold: 0.8,
                    action: RuleAction::Block,
                    enabled: true,
                },
                GroundingFilter {
                    kind: GroundingKind::Relevance,
                    threshold: 0.5,
                    action: RuleAction::Block,
                    enabled: true,
                },
            ],
            blocked_input_message: "Sorry, I can't answer questions about heavy-metal music."
                .to_string(),
            blocked_output_message:
                "Sorry, my answer mentioned heavy-metal music, so I had to block it.".to_string(),
        }
    }
}

const MAX_TOPIC_NAME: usize = 100;
const MAX_TOPIC_DEFINITION: usize = 200;
const MAX_TOPIC_EXAMPLES: usize = 5;
const MAX_MESSAGE: usize = 500;

impl GuardrailPolicy {
    /// Load from YAML, checking the schema first.
    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Load from JSON, checking the schema first.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Load a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, PolicyError> {
        validate_policy_schema(&value).map_err(PolicyError::Schema)?;
        let policy: Self = serde_json::from_value(value)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Look up the grounding filter of a kind.
    pub fn grounding_threshold(&self, kind: GroundingKind) -> Option<f64> {
        self.grounding
            .iter()
            .find(|f| f.kind == kind && f.enabled)
            .map(|f| f.threshold)
    }

    /// Whether `text` names a denied topic (case-insensitive).
    pub fn denied_topic_in(&self, text: &str) -> Option<&DeniedTopic> {
        let haystack = text.to_lowercase();
        self.topics
            .iter()
            .find(|t| haystack.contains(&t.name.to_lowercase()))
    }

    /// Rules the schema cannot express.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let invalid = |msg: String| Err(PolicyError::Invalid(msg));

        if self.name_prefix.trim().is_empty() {
            return invalid("name_prefix must not be empty".to_string());
        }

        for (field, message) in [
            ("blocked_input_message", &self.blocked_input_message),
            ("blocked_output_message", &self.blocked_output_message),
        ] {
            if message.trim().is_empty() {
                return invalid(format!("{field} must not be empty"));
            }
            if message.chars().count() > MAX_MESSAGE {
                return invalid(format!("{field} exceeds {MAX_MESSAGE} characters"));
            }
        }

        let mut topic_names = HashSet::new();
        for topic in &self.topics {
            if topic.name.trim().is_empty() || topic.name.chars().count() > MAX_TOPIC_NAME {
                return invalid(format!(
                    "topic name '{}' must be 1-{MAX_TOPIC_NAME} characters",
                    topic.name
                ));
            }
            if topic.definition.chars().count() > MAX_TOPIC_DEFINITION {
                return invalid(format!(
                    "topic '{}' definition exceeds {MAX_TOPIC_DEFINITION} characters",
                    topic.name
                ));
            }
            if topic.examples.len() > MAX_TOPIC_EXAMPLES {
                return invalid(format!(
                    "topic '{}' has more than {MAX_TOPIC_EXAMPLES} examples",
                    topic.name
                ));
            }
            if !topic_names.insert(topic.name.to_lowercase()) {
                return invalid(format!("duplicate topic '{}'", topic.name));
            }
        }

        let mut filter_kinds = HashSet::new();
        for filter in &self.content_filters {
            if !filter_kinds.insert(filter.kind) {
                return invalid(format!("duplicate content filter {}", filter.kind.as_str()));
            }
            // Prompt attacks only exist on the input side
            if filter.kind == ContentFilterKind::PromptAttack
                && filter.output_strength != FilterStrength::None
            {
                return invalid("PROMPT_ATTACK output_strength must be NONE".to_string());
            }
            if uses_anonymize(&filter.actions) {
                return invalid(format!(
                    "content filter {} cannot ANONYMIZE",
                    filter.kind.as_str()
                ));
            }
        }

        for word in &self.blocked_words {
            if word.text.trim().is_empty() {
                return invalid("blocked word must not be empty".to_string());
            }
            if uses_anonymize(&word.actions) {
                return invalid(format!("blocked word '{}' cannot ANONYMIZE", word.text));
            }
        }

        for pii in &self.pii_entities {
            let well_formed = !pii.entity_type.is_empty()
                && pii
                    .entity_type
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if !well_formed {
                return invalid(format!("invalid PII entity type '{}'", pii.entity_type));
            }
        }

        for rule in &self.regexes {
            if let Err(e) = Regex::new(&rule.pattern) {
                return invalid(format!("regex '{}' does not compile: {}", rule.name, e));
            }
        }

        let mut grounding_kinds = HashSet::new();
        for filter in &self.grounding {
            if !(0.0..1.0).contains(&filter.threshold) {
                return invalid(format!(
                    "{} threshold {} must be in [0, 1)",
                    filter.kind.as_str(),
                    filter.threshold
                ));
            }
            if filter.action == RuleAction::Anonymize {
                return invalid(format!("{} cannot ANONYMIZE", filter.kind.as_str()));
            }
            if !grounding_kinds.insert(filter.kind) {
                return invalid(format!("duplicate grounding filter {}", filter.kind.as_str()));
            }
        }

        Ok(())
    }
}

fn uses_anonymize(actions: &DirectionalAction) -> bool {
    actions.input_action == RuleAction::Anonymize || actions.output_action == RuleAction::Anonymize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = GuardrailPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.topics[0].name, "Heavy metal");
        assert_eq!(policy.grounding_threshold(GroundingKind::Grounding), Some(0.8));
        assert_eq!(policy.grounding_threshold(GroundingKind::Relevance), Some(0.5));
    }

    #[test]
    fn test_denied_topic_match_is_case_insensitive() {
        let policy = GuardrailPolicy::default();
        assert!(policy
            .denied_topic_in("Can you recommend some HEAVY METAL bands?")
            .is_some());
        assert!(policy.denied_topic_in("What about jazz?").is_none());
    }

    #[test]
    fn test_bad_regex_rejected() {
        let mut policy = GuardrailPolicy::default();
        policy.regexes[0].pattern = "([unclosed".to_string();
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("does not compile"));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut policy = GuardrailPolicy::default();
        policy.grounding[0].threshold = 1.0;
        assert!(matches!(policy.validate(), Err(PolicyError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_grounding_kind_rejected() {
        let mut policy = GuardrailPolicy::default();
        policy.grounding[1].kind = GroundingKind::Grounding;
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate grounding filter"));
    }

    #[test]
    fn test_prompt_attack_output_must_be_none() {
        let mut policy = GuardrailPolicy::default();
        policy.content_filters[1].output_strength = FilterStrength::Low;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let mut policy = GuardrailPolicy::default();
        let mut copy = policy.topics[0].clone();
        copy.name = "HEAVY METAL".to_string();
        policy.topics.push(copy);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_load_from_yaml() {
        let policy = GuardrailPolicy::from_yaml(
            r#"
name_prefix: jazz-only
description: Keeps the bot on jazz
topics:
  - name: Polka
    definition: Polka is a Central European dance music.
    examples: ["Play me some polka."]
blocked_words:
  - text: accordion
    output_enabled: false
grounding:
  - kind: GROUNDING
    threshold: 0.75
blocked_input_message: No polka, sorry.
blocked_output_message: I drifted into polka, so I stopped.
"#,
        )
        .unwrap();

        assert_eq!(policy.name_prefix, "jazz-only");
        assert_eq!(policy.topics.len(), 1);
        assert_eq!(policy.blocked_words[0].actions.input_action, RuleAction::Block);
        assert!(!policy.blocked_words[0].actions.output_enabled);
        assert_eq!(policy.grounding[0].action, RuleAction::Block);
        assert!(policy.content_filters.is_empty());
    }

    #[test]
    fn test_yaml_schema_violation() {
        let result = GuardrailPolicy::from_yaml(
            r#"
name_prefix: x
blocked_input_message: a
blocked_output_message: b
unexpected: true
"#,
        );
        assert!(matches!(result, Err(PolicyError::Schema(_))));
    }

    #[test]
    fn test_default_policy_satisfies_schema() {
        let json = serde_json::to_string(&GuardrailPolicy::default()).unwrap();
        let reparsed = GuardrailPolicy::from_json(&json).unwrap();
        assert_eq!(reparsed, GuardrailPolicy::default());
    }
}
