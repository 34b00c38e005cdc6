//! `codebuild-stack`: declare, preview, apply and destroy the CodeBuild
//! pull-request pipeline, and check which webhooks a GitHub delivery fires.

mod config;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use engine::{Engine, Operation, Plan};
use provider::{HttpSourceProbe, SimulatedProvider, DEFAULT_ACCOUNT_ID, DEFAULT_REGION};
use stack::{blueprint, Config, ResourceGraph, StackName};
use state::FileStateBackend;

#[derive(Parser)]
#[command(name = "codebuild-stack")]
#[command(about = "Provision a CodeBuild pull-request pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Stack whose configuration and state to use
    #[arg(long, global = true, env = "CODEBUILD_STACK", default_value = "dev")]
    stack: String,

    /// Config file [default: ./codebuild-stack.<stack>.toml when present]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding state files
    #[arg(long, global = true, default_value = ".codebuild-stack")]
    state_dir: PathBuf,

    /// Simulated account file [default: <state-dir>/<stack>.account.json]
    #[arg(long, global = true)]
    account_file: Option<PathBuf>,

    /// Check that the project's source location answers before creating it
    #[arg(long, global = true)]
    probe_sources: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what `up` would change
    Preview {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create or update every declared resource
    Up,
    /// Delete every resource recorded in state
    Destroy {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Print the declared resource graph as JSON (secrets redacted)
    Graph,
    /// Report which webhooks a GitHub delivery would trigger
    CheckTrigger {
        /// Value of the X-GitHub-Event header
        #[arg(long)]
        event: String,
        /// File holding the delivery's JSON body
        #[arg(long)]
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(cli.verbose, cli.json_logs)?;

    let stack = StackName::new(cli.stack.as_str())
        .with_context(|| format!("invalid stack name '{}'", cli.stack))?;
    let config_path = cli
        .config
        .clone()
        .or_else(|| {
            let default = PathBuf::from(format!("codebuild-stack.{stack}.toml"));
            default.exists().then_some(default)
        });
    let config = config::load(stack.clone(), config_path.as_deref(), std::env::vars())?;

    match &cli.command {
        Commands::Graph => {
            let graph = declare(&config)?;
            println!("{}", serde_json::to_string_pretty(&graph.to_json())?);
        }
        Commands::CheckTrigger { event, payload } => {
            check_trigger(&declare(&config)?, event, payload)?
        }
        Commands::Preview { json } => {
            let graph = declare(&config)?;
            let engine = engine(&cli, &config).await?;
            let plan = engine.preview(&graph).await.context("planning")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
        }
        Commands::Up => {
            let graph = declare(&config)?;
            let engine = engine(&cli, &config).await?;
            let report = match engine.up(&graph).await {
                Ok(report) => report,
                Err(e) => {
                    if let Some(failure) = e.apply_failure() {
                        for name in &failure.skipped {
                            eprintln!("  skipped {name}");
                        }
                    }
                    return Err(e).context("applying the stack");
                }
            };
            for step in &report.completed {
                println!(
                    "  {:<8} {:<40} {}",
                    step.operation.to_string(),
                    step.kind.to_string(),
                    step.name
                );
            }
            println!(
                "{} applied, {} unchanged (run {})",
                report.completed.len(),
                report.unchanged,
                report.run_id
            );
        }
        Commands::Destroy { yes } => {
            if !*yes {
                bail!("destroy deletes every resource in stack '{stack}'; pass --yes to confirm");
            }
            let engine = engine(&cli, &config).await?;
            let report = engine.destroy().await.context("destroying the stack")?;
            println!("{} deleted (run {})", report.completed.len(), report.run_id);
        }
    }
    Ok(())
}

/// Only commands that compare against the declared graph need the secrets;
/// `destroy` works from recorded state alone.
fn declare(config: &Config) -> Result<ResourceGraph> {
    blueprint::declare(config).context("declaring the stack")
}

async fn engine(cli: &Cli, config: &Config) -> Result<Engine> {
    let stack = config.stack();
    let state = FileStateBackend::open(&cli.state_dir, stack)
        .await
        .context("opening state")?;

    let account_file = cli
        .account_file
        .clone()
        .unwrap_or_else(|| cli.state_dir.join(format!("{stack}.account.json")));
    let mut provider = SimulatedProvider::open(
        &account_file,
        config.get_or("account-id", DEFAULT_ACCOUNT_ID),
        config.get_or("region", DEFAULT_REGION),
    )
    .await
    .context("opening simulated account")?;
    if cli.probe_sources {
        provider = provider.with_probe(Arc::new(HttpSourceProbe::new()?));
    }

    tracing::debug!(
        state = %state.path().display(),
        account = %account_file.display(),
        "engine ready"
    );
    Ok(Engine::new(Arc::new(provider), Arc::new(state)))
}

fn print_plan(plan: &Plan) {
    for step in &plan.steps {
        let symbol = match step.operation {
            Operation::Create => "+",
            Operation::Update => "~",
            Operation::Replace => "+-",
            Operation::Delete => "-",
            Operation::Same => " ",
        };
        let mut line = format!(
            "{symbol:>2} {:<8} {:<40} {}",
            step.operation.to_string(),
            step.kind.to_string(),
            step.name
        );
        if !step.changed.is_empty() {
            line.push_str(&format!(" [{}]", step.changed.join(", ")));
        }
        println!("{line}");
    }
    println!(
        "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
        plan.count(Operation::Create),
        plan.count(Operation::Update),
        plan.count(Operation::Replace),
        plan.count(Operation::Delete),
        plan.count(Operation::Same),
    );
}

fn check_trigger(graph: &ResourceGraph, event: &str, payload: &Path) -> Result<()> {
    let body = std::fs::read(payload)
        .with_context(|| format!("reading payload {}", payload.display()))?;
    let Some(event) = listener::decode(event, &body)? else {
        println!("event carries nothing a webhook filters on");
        return Ok(());
    };

    let triggers = listener::matching_triggers(graph, &event)?;
    if triggers.is_empty() {
        println!("no webhook matches {}", event.event);
    }
    for trigger in &triggers {
        println!("{} -> {}", trigger.webhook, trigger.project);
    }
    Ok(())
}
