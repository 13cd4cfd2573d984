use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_workflow::config::AppConfig;
use agent_workflow::shutdown::{graceful_shutdown, wait_for_shutdown, FLUSH_TIMEOUT};
use agent_workflow::state::AppState;
use agent_workflow::workflow::{self, run_batch, BatchOptions, WorkflowName};

#[derive(Parser)]
#[command(
    name = "agent-workflow",
    about = "Drives AI coding agents through a GitHub Projects delivery pipeline"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Root-cause bug reports
    BugInvestigation(BatchArgs),
    /// Write product development documents
    ProductDevelopment(BatchArgs),
    /// Write product design documents
    ProductDesign(BatchArgs),
    /// Write technical designs and implementation phases
    TechDesign(BatchArgs),
    /// Implement approved designs and open pull requests
    Implement(BatchArgs),
    /// Review open pull requests
    PrReview(BatchArgs),
    /// Estimate priority and size of backlog items
    Triage(BatchArgs),
    /// Review how the agents handled finished issues
    WorkflowReview(BatchArgs),
}

impl Command {
    fn split(self) -> (WorkflowName, BatchArgs) {
        match self {
            Command::BugInvestigation(a) => (WorkflowName::BugInvestigation, a),
            Command::ProductDevelopment(a) => (WorkflowName::ProductDevelopment, a),
            Command::ProductDesign(a) => (WorkflowName::ProductDesign, a),
            Command::TechDesign(a) => (WorkflowName::TechDesign, a),
            Command::Implement(a) => (WorkflowName::Implement, a),
            Command::PrReview(a) => (WorkflowName::PrReview, a),
            Command::Triage(a) => (WorkflowName::Triage, a),
            Command::WorkflowReview(a) => (WorkflowName::WorkflowReview, a),
        }
    }
}

#[derive(Args)]
struct BatchArgs {
    /// Process only this project item
    #[arg(long)]
    id: Option<String>,

    /// Show what would happen without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Print agent output as it arrives
    #[arg(long)]
    stream: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Process at most this many items
    #[arg(long)]
    limit: Option<usize>,

    /// Commit but do not push branches
    #[arg(long)]
    skip_push: bool,

    /// Do not pull the default branch first
    #[arg(long)]
    skip_pull: bool,

    /// Do not run the local test command before committing
    #[arg(long)]
    skip_local_test: bool,
}

impl From<BatchArgs> for BatchOptions {
    fn from(args: BatchArgs) -> Self {
        Self {
            id: args.id,
            dry_run: args.dry_run,
            stream: args.stream,
            verbose: args.verbose,
            limit: args.limit,
            skip_push: args.skip_push,
            skip_pull: args.skip_pull,
            skip_local_test: args.skip_local_test,
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };
    let (name, args) = cli.command.split();
    let options = BatchOptions::from(args);

    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(options.verbose, config.logging.format.eq_ignore_ascii_case("json"));

    tracing::info!(
        workflow = %name,
        repo = %config.github.repo_full_name(),
        dry_run = options.dry_run,
        "Starting workflow"
    );

    let state = AppState::new(config).await?;
    let workflow = workflow::for_name(name);

    if workflow.requires_clean_tree() && !options.dry_run {
        state.workspace.ensure_clean().await?;
    }

    let summary = tokio::select! {
        result = run_batch(&state, workflow.as_ref(), &options) => result?,
        _ = wait_for_shutdown() => {
            graceful_shutdown(&state).await;
            anyhow::bail!("Interrupted");
        }
    };

    state.flush(FLUSH_TIMEOUT).await;
    tracing::info!(
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        "Batch finished"
    );
    Ok(())
}
