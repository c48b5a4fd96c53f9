use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;

use variantforge_core::{ActorId, ProductGroupId};
use variantforge_dimensions::AxisInput;
use variantforge_infra::jobs::{InMemoryJobQueue, JobId, JobState};
use variantforge_infra::stores::{InMemoryAuditStore, InMemoryVariantStore};
use variantforge_infra::{
    AcceptAllScope, GenerateOutcome, GenerateRequest, GenerationConfig, GenerationOrchestrator,
    JobStatusView, PreviewRequest, RecordingInventory,
};

#[derive(Parser, Debug)]
#[command(name = "variantforge", version, about = "Product variant generation")]
struct Cli {
    /// JSON file with generation settings; defaults to VARIANTFORGE_* variables.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Predict and list combinations without writing anything.
    Preview(TargetArgs),
    /// Generate the variants for an axis set.
    Generate(GenerateArgs),
    /// Compare two axis sets.
    Diff(DiffArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Axis set as JSON (`{"base": [...], "attributes": [...]}`).
    #[arg(long, value_name = "FILE")]
    axes: PathBuf,
    /// Product group; a fresh one when omitted.
    #[arg(long)]
    group: Option<ProductGroupId>,
    #[arg(long)]
    actor: Option<ActorId>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long)]
    sku_prefix: Option<String>,
    /// How long to wait for a background batch.
    #[arg(long, default_value_t = 300)]
    wait_secs: u64,
}

#[derive(Args, Debug)]
struct DiffArgs {
    #[arg(long, value_name = "FILE")]
    previous: PathBuf,
    #[arg(long, value_name = "FILE")]
    next: PathBuf,
}

fn main() -> Result<()> {
    variantforge_observability::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Preview(args) => run_preview(config, args),
        Command::Generate(args) => run_generate(config, args),
        Command::Diff(args) => run_diff(config, args),
        Command::Config => print_json(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<GenerationConfig> {
    let config = match path {
        Some(path) => read_json::<GenerationConfig>(path)?,
        None => GenerationConfig::from_env(),
    };
    config.validate().context("invalid generation configuration")?;
    Ok(config)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Orchestrator over in-memory stores; state lives for one invocation.
fn orchestrator(config: GenerationConfig) -> Result<GenerationOrchestrator> {
    Ok(GenerationOrchestrator::new(
        config,
        Arc::new(InMemoryVariantStore::new()),
        Arc::new(InMemoryAuditStore::new()),
        InMemoryJobQueue::arc(),
        Arc::new(AcceptAllScope),
        Arc::new(RecordingInventory::new()),
    )?)
}

fn run_preview(config: GenerationConfig, args: TargetArgs) -> Result<()> {
    let axes: AxisInput = read_json(&args.axes)?;
    let orchestrator = orchestrator(config)?;

    let preview = orchestrator.preview(&PreviewRequest {
        product_group_id: args.group.unwrap_or_default(),
        axes,
        actor: args.actor,
    })?;
    print_json(&preview)
}

fn run_generate(config: GenerationConfig, args: GenerateArgs) -> Result<()> {
    let axes: AxisInput = read_json(&args.target.axes)?;
    let orchestrator = orchestrator(config)?;

    let mut request = GenerateRequest::new(
        args.target.group.unwrap_or_default(),
        args.target.actor.unwrap_or_default(),
        axes,
    );
    if let Some(prefix) = args.sku_prefix {
        request = request.with_sku_prefix(prefix);
    }

    let outcome = orchestrator.generate(&request)?;
    let GenerateOutcome::Accepted(accepted) = &outcome else {
        return print_json(&outcome);
    };
    print_json(&outcome)?;

    let pool = orchestrator.spawn_workers().context("starting worker pool")?;
    let status = wait_for(&orchestrator, accepted.job_id, Duration::from_secs(args.wait_secs));
    pool.shutdown();

    let status = status?;
    print_json(&status)?;
    if matches!(status.state, JobState::Failed { .. }) {
        bail!(
            "generation job failed: {}",
            status.failed_reason.unwrap_or_default()
        );
    }
    Ok(())
}

fn wait_for(
    orchestrator: &GenerationOrchestrator,
    job_id: JobId,
    limit: Duration,
) -> Result<JobStatusView> {
    let deadline = Instant::now() + limit;
    let poll = orchestrator.config().worker.poll_interval;

    loop {
        let status = orchestrator.job_status(job_id)?;
        match status.state {
            JobState::Completed | JobState::Failed { retryable: false } => return Ok(status),
            _ if Instant::now() >= deadline => {
                bail!("job {job_id} still {:?} after {}s", status.state, limit.as_secs())
            }
            _ => {
                tracing::debug!(job_id = %job_id, progress = status.progress, "waiting for job");
                thread::sleep(poll);
            }
        }
    }
}

fn run_diff(config: GenerationConfig, args: DiffArgs) -> Result<()> {
    let previous: AxisInput = read_json(&args.previous)?;
    let next: AxisInput = read_json(&args.next)?;
    let diff = orchestrator(config)?.diff(&previous, &next)?;
    print_json(&diff)
}
