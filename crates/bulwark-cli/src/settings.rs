//! Config and policy loading for commands.
//!
//! Layering: defaults, then `--config`, then environment, then flags.

use anyhow::{Context, Result};
use std::path::Path;

use bulwark_core::{GuardrailPolicy, PipelineConfig};

use crate::GlobalArgs;

/// Build the effective pipeline config.
pub fn load_config(args: &GlobalArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env();
    apply_flags(&mut config, args);
    Ok(config)
}

fn apply_flags(config: &mut PipelineConfig, args: &GlobalArgs) {
    if let Some(region) = &args.region {
        config.region = region.clone();
    }
    if let Some(account) = &args.account_id {
        config.account_id = Some(account.trim().to_string());
    }
    if let Some(model) = &args.model {
        config.foundation_model = model.clone();
    }
    if let Some(role) = &args.role_name {
        config.role_name = role.clone();
    }
}

/// Load a policy file, or fall back to the demo policy.
pub fn load_policy(path: Option<&Path>) -> Result<GuardrailPolicy> {
    match path {
        Some(path) => GuardrailPolicy::from_file(path)
            .with_context(|| format!("Failed to load guardrail policy from {}", path.display())),
        None => Ok(GuardrailPolicy::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Backend;
    use std::io::Write;

    fn args() -> GlobalArgs {
        GlobalArgs {
            config: None,
            region: None,
            account_id: None,
            model: None,
            role_name: None,
            backend: Backend::Simulated,
            verbose: false,
            json: false,
        }
    }

    #[test]
    fn test_flags_override_file_and_env() {
        let mut config =
            PipelineConfig::from_yaml("region: eu-west-1\nrole_name: FromFile\n").unwrap();
        config.apply_vars(|name| match name {
            "ACCOUNT_ID" => Some("111111111111".to_string()),
            "BULWARK_ROLE_NAME" => Some("FromEnv".to_string()),
            _ => None,
        });
        assert_eq!(config.role_name, "FromEnv");

        let mut flags = args();
        flags.account_id = Some(" 222222222222 ".to_string());
        flags.model = Some("anthropic.claude-3-5-sonnet-20240620-v1:0".to_string());
        apply_flags(&mut config, &flags);

        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.account_id.as_deref(), Some("222222222222"));
        assert_eq!(config.foundation_model, "anthropic.claude-3-5-sonnet-20240620-v1:0");
        assert_eq!(config.role_name, "FromEnv");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alias_name: staging\npolling:\n  agent_interval: 2s").unwrap();

        let mut flags = args();
        flags.config = Some(file.path().to_path_buf());
        flags.region = Some("us-west-2".to_string());

        let config = load_config(&flags).unwrap();
        assert_eq!(config.alias_name, "staging");
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.polling.agent_interval.as_secs(), 2);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let mut flags = args();
        flags.config = Some("/nonexistent/bulwark.yaml".into());
        let err = load_config(&flags).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_default_policy_when_no_file() {
        let policy = load_policy(None).unwrap();
        assert_eq!(policy, GuardrailPolicy::default());
    }
}
