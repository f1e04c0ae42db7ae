//! # relay
//!
//! Send a prompt through the resilient invoker: the primary provider is
//! retried with linear backoff, then the fallback answers once.
//!
//! ## Commands
//!
//! - `relay invoke [PROMPT]` - print the answer (`--json` for the full record)
//! - `relay stream [PROMPT]` - print the answer as it arrives
//! - `relay providers` - list provider types with their default models,
//!   optionally health-check the configured targets
//! - `relay config` - print the effective configuration with secrets redacted
//!
//! Configuration comes from `--config FILE` (YAML), overridden by `RELAY_*`
//! environment variables.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use relay_runtime::{
    ChatMessage, InvokeOptions, ProviderRegistry, RelayConfig, ResilientInvoker, Task,
};

/// Resilient LLM invocation with provider fallback
#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log request and retry details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt and print the answer
    Invoke {
        #[command(flatten)]
        request: RequestArgs,

        /// Print the full invocation record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a prompt and print the answer as it streams
    Stream {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// List available provider types and their default models
    Providers {
        /// Health-check the configured primary and fallback
        #[arg(long)]
        check: bool,
    },

    /// Print the effective configuration (secrets redacted)
    Config,
}

#[derive(Args)]
struct RequestArgs {
    /// Prompt text; read from stdin when omitted
    prompt: Option<String>,

    /// Prompt template, e.g. `summarize` or `translate=French`
    #[arg(short, long)]
    task: Option<Task>,

    /// Model for the primary provider
    #[arg(short, long)]
    model: Option<String>,

    /// Output token bound (defaults to the task's bound)
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Deadline for the whole invocation, e.g. `30s`
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,
}

impl RequestArgs {
    fn messages(&self) -> Result<Vec<ChatMessage>> {
        let input = match &self.prompt {
            Some(prompt) => prompt.clone(),
            None => {
                let mut input = String::new();
                std::io::stdin()
                    .read_to_string(&mut input)
                    .context("Failed to read prompt from stdin")?;
                input.trim_end().to_string()
            }
        };

        Ok(match &self.task {
            Some(task) => task.messages(&input),
            None => vec![ChatMessage::user(input)],
        })
    }

    fn options(&self) -> InvokeOptions {
        InvokeOptions {
            model: self.model.clone(),
            max_tokens: self
                .max_tokens
                .or_else(|| self.task.as_ref().map(Task::max_tokens)),
            timeout: self.timeout,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = load_config(cli.config.as_deref())?;
    let registry = ProviderRegistry::with_defaults();

    match cli.command {
        Commands::Invoke { request, json } => invoke(&config, &registry, &request, json).await,
        Commands::Stream { request } => stream(&config, &registry, &request).await,
        Commands::Providers { check } => providers(&config, &registry, check).await,
        Commands::Config => {
            print!("{}", config.redacted().to_yaml()?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose {
        "relay=debug,relay_runtime=debug"
    } else {
        "relay=info,relay_runtime=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    let mut config = match path {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RelayConfig::default(),
    };

    config
        .apply_lookup(|key| std::env::var(key).ok())
        .context("Invalid RELAY_* environment override")?;
    config.validate().context("Invalid configuration")?;

    tracing::debug!(config = ?config, "Configuration loaded");
    Ok(config)
}

fn build_invoker(config: &RelayConfig, registry: &ProviderRegistry) -> Result<ResilientInvoker> {
    ResilientInvoker::from_config(config, registry).context("Failed to create providers")
}

async fn invoke(
    config: &RelayConfig,
    registry: &ProviderRegistry,
    request: &RequestArgs,
    json: bool,
) -> Result<()> {
    let invoker = build_invoker(config, registry)?;
    let invocation = invoker
        .invoke_messages(request.messages()?, &request.options())
        .await
        .context("Invocation failed")?;

    if invocation.used_fallback {
        tracing::info!(
            provider = %invocation.provider,
            attempts = invocation.attempts,
            "Answered by fallback provider"
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&invocation)?);
    } else {
        println!("{}", invocation.text);
    }
    Ok(())
}

async fn stream(
    config: &RelayConfig,
    registry: &ProviderRegistry,
    request: &RequestArgs,
) -> Result<()> {
    let invoker = build_invoker(config, registry)?;
    let mut chunks = invoker
        .stream_messages(request.messages()?, &request.options())
        .await
        .context("Failed to open stream")?;

    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.context("Stream interrupted")?;
        stdout.write_all(chunk.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

async fn providers(config: &RelayConfig, registry: &ProviderRegistry, check: bool) -> Result<()> {
    for info in registry.catalog() {
        println!(
            "{:<14} {:<40} {}",
            info.provider_type, info.default_model, info.description
        );
    }

    if check {
        let invoker = build_invoker(config, registry)?;
        println!();
        for (role, target) in [("primary", invoker.primary()), ("fallback", invoker.fallback())] {
            let healthy = target.provider().health_check().await;
            println!(
                "{:<9} {:<14} {:<32} {}",
                role,
                target.name(),
                target.config().model,
                if healthy { "ok" } else { "unreachable" }
            );
        }
    }
    Ok(())
}
