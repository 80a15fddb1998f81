//! Command implementations.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bulwark_core::{GuardrailHandle, GuardrailPolicy};
use bulwark_runtime::{
    demo_checks, AgentTarget, Evaluator, GroundingCheck, InvocationReader, LabeledCheck,
};

use crate::output::{self, StdoutSink};
use crate::platform::Services;
use crate::settings::{load_config, load_policy};
use crate::GlobalArgs;

/// Cancel stream consumption on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping stream");
            trigger.cancel();
        }
    });
    token
}

pub async fn cmd_run(
    global: &GlobalArgs,
    prompt: &str,
    guardrail_file: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(global)?;
    let policy = load_policy(guardrail_file)?;
    let services = Services::connect(global.backend, &mut config).await?;

    let pipeline = services
        .pipeline()
        .config(config)
        .policy(policy)
        .cancel_token(cancel_on_ctrl_c())
        .build()?;

    let mut sink = StdoutSink::new();
    let report = match pipeline.run(prompt, &mut sink).await {
        Ok(report) => report,
        Err(e) => {
            output::print_leftovers(&e.created);
            return Err(e.into());
        }
    };

    output::print_transcript(&report.transcript);
    info!(
        agent = %report.provisioned.agent.id,
        alias = %report.provisioned.alias.id,
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Run complete"
    );
    Ok(())
}

pub async fn cmd_provision(global: &GlobalArgs, guardrail_file: Option<&Path>) -> Result<()> {
    let mut config = load_config(global)?;
    let policy = load_policy(guardrail_file)?;
    let services = Services::connect(global.backend, &mut config).await?;

    let pipeline = services.pipeline().config(config).policy(policy).build()?;
    let provisioned = match pipeline.provision().await {
        Ok(provisioned) => provisioned,
        Err(e) => {
            output::print_leftovers(&e.created);
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&provisioned)?);
    Ok(())
}

pub async fn cmd_invoke(
    global: &GlobalArgs,
    agent_id: &str,
    alias_id: &str,
    prompt: &str,
) -> Result<()> {
    let mut config = load_config(global)?;
    let services = Services::connect(global.backend, &mut config).await?;

    let reader = InvocationReader::new(services.runtime.clone(), config.streaming.clone());
    let cancel = cancel_on_ctrl_c();
    let mut sink = StdoutSink::new();

    let transcript = reader
        .invoke(&AgentTarget::new(agent_id, alias_id), prompt, &mut sink, Some(&cancel))
        .await?;

    output::print_transcript(&transcript);
    Ok(())
}

pub async fn cmd_evaluate(
    global: &GlobalArgs,
    guardrail_id: &str,
    guardrail_version: &str,
    single: Option<(String, String, String)>,
) -> Result<()> {
    let mut config = load_config(global)?;
    let services = Services::connect(global.backend, &mut config).await?;

    let guardrail = GuardrailHandle {
        id: guardrail_id.to_string(),
        version: guardrail_version.to_string(),
        arn: None,
    };
    let evaluator = Evaluator::new(services.runtime.clone(), guardrail);

    let checks = match single {
        Some((source, query, answer)) => vec![LabeledCheck {
            label: "answer".to_string(),
            check: GroundingCheck::new(source, query, answer),
        }],
        None => demo_checks(),
    };

    let outcomes = evaluator.evaluate_all(&checks).await;
    for outcome in &outcomes {
        println!("{}", output::outcome_line(outcome));
    }

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        bail!("{failed} of {} checks could not be evaluated", outcomes.len());
    }
    Ok(())
}

pub fn cmd_guardrail_validate(file: &Path) -> Result<()> {
    let policy = GuardrailPolicy::from_file(file)
        .with_context(|| format!("{} is not a valid guardrail policy", file.display()))?;

    println!(
        "{}: valid ({} topics, {} content filters, {} blocked words, {} PII entities, \
         {} regexes, {} grounding filters)",
        file.display(),
        policy.topics.len(),
        policy.content_filters.len(),
        policy.blocked_words.len(),
        policy.pii_entities.len(),
        policy.regexes.len(),
        policy.grounding.len(),
    );
    Ok(())
}

pub fn cmd_guardrail_show(file: Option<&Path>) -> Result<()> {
    let policy = load_policy(file)?;
    print!("{}", serde_yaml::to_string(&policy)?);
    Ok(())
}

pub fn cmd_config(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    if let Err(e) = config.validate() {
        warn!(error = %e, "Configuration is not usable as-is");
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
