//! bulwark - provision and exercise guarded Amazon Bedrock agents.
//!
//! ## Commands
//!
//! - `run`: create guardrail, role, agent and alias, then invoke once
//! - `provision`: everything up to a prepared alias
//! - `invoke`: stream one prompt through an existing agent alias
//! - `evaluate`: contextual grounding checks against a guardrail
//! - `guardrail`: validate or print a guardrail policy offline
//! - `config`: print the effective configuration
//!
//! Streamed answers go to stdout; logs go to stderr.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bulwark_core::resources::DRAFT_VERSION;
use bulwark_runtime::DEFAULT_PROMPT;

mod commands;
mod output;
mod platform;
mod settings;

use platform::Backend;

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision and exercise guarded Amazon Bedrock agents", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags accepted by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Pipeline config file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Region, overrides config file and environment
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// 12-digit account id
    #[arg(long, global = true)]
    pub account_id: Option<String>,

    /// Foundation model identifier
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Execution role name
    #[arg(long, global = true)]
    pub role_name: Option<String>,

    /// Platform backend
    #[arg(long, value_enum, global = true, default_value_t = Backend::default())]
    pub backend: Backend,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a guarded agent and invoke it once
    Run {
        /// Prompt sent to the agent
        #[arg(short, long, default_value = DEFAULT_PROMPT)]
        prompt: String,

        /// Guardrail policy file (YAML or JSON); defaults to the demo policy
        #[arg(long)]
        guardrail_file: Option<PathBuf>,
    },

    /// Provision a guarded agent up to a prepared alias
    Provision {
        /// Guardrail policy file (YAML or JSON); defaults to the demo policy
        #[arg(long)]
        guardrail_file: Option<PathBuf>,
    },

    /// Invoke an existing agent alias and stream the answer
    Invoke {
        #[arg(long)]
        agent_id: String,

        #[arg(long)]
        alias_id: String,

        /// Prompt sent to the agent
        #[arg(short, long, default_value = DEFAULT_PROMPT)]
        prompt: String,
    },

    /// Run contextual grounding checks against a guardrail
    Evaluate {
        #[arg(long)]
        guardrail_id: String,

        #[arg(long, default_value = DRAFT_VERSION)]
        guardrail_version: String,

        /// Grounding source for a single check (default: the built-in demo pair)
        #[arg(long, requires_all = ["query", "answer"])]
        source: Option<String>,

        #[arg(long, requires = "source")]
        query: Option<String>,

        #[arg(long, requires = "source")]
        answer: Option<String>,
    },

    /// Offline guardrail policy tools
    Guardrail {
        #[command(subcommand)]
        action: GuardrailCommand,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum GuardrailCommand {
    /// Check a policy file against the schema and policy rules
    Validate {
        file: PathBuf,
    },

    /// Print a policy as YAML
    Show {
        /// Policy file; defaults to the demo policy
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Logs go to stderr so streamed answers on stdout stay clean.
fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.global.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.global.json, level);

    let global = &cli.global;
    match cli.command {
        Commands::Run {
            prompt,
            guardrail_file,
        } => commands::cmd_run(global, &prompt, guardrail_file.as_deref()).await,
        Commands::Provision { guardrail_file } => {
            commands::cmd_provision(global, guardrail_file.as_deref()).await
        }
        Commands::Invoke {
            agent_id,
            alias_id,
            prompt,
        } => commands::cmd_invoke(global, &agent_id, &alias_id, &prompt).await,
        Commands::Evaluate {
            guardrail_id,
            guardrail_version,
            source,
            query,
            answer,
        } => {
            let single = match (source, query, answer) {
                (Some(source), Some(query), Some(answer)) => Some((source, query, answer)),
                _ => None,
            };
            commands::cmd_evaluate(global, &guardrail_id, &guardrail_version, single).await
        }
        Commands::Guardrail { action } => match action {
            GuardrailCommand::Validate { file } => commands::cmd_guardrail_validate(&file),
            GuardrailCommand::Show { file } => commands::cmd_guardrail_show(file.as_deref()),
        },
        Commands::Config => commands::cmd_config(global),
    }
}
