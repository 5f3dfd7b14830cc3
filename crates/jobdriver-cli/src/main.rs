//! jobdriver - ドライバを起動するデモ CLI
//!
//! `run` wires the driver against file-backed (or in-memory) storage and an
//! in-memory demo repository, submits jobs, and runs until Ctrl-C or idle.
//! `jobs` and `history` read what a previous `run --state-dir` left behind.

mod logging;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use jobdriver_core::app::{DriverBuilder, DriverConfig};
use jobdriver_core::domain::{HistoryFilter, JobAction, JobFilter, JobOptions, JobSpec, NewJob};
use jobdriver_core::impls::{
    FileHistory, FileJobStore, InMemoryHistory, InMemoryJobStore, InMemoryRepository,
    InMemoryResources, InsertSignal, StaticRepoGetter,
};
use jobdriver_core::ports::{HistoryWriter, JobStore, Repository, RepositoryRef};
use jobdriver_core::workers::WorkerRegistry;

const JOBS_FILE: &str = "jobs.json";
const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, Parser)]
#[command(name = "jobdriver", version, about = "Concurrent job driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the driver.
    Run(RunArgs),

    /// Print job records from a state directory.
    Jobs {
        #[arg(long)]
        state_dir: PathBuf,
    },

    /// Print history entries from a state directory.
    History {
        #[arg(long)]
        state_dir: PathBuf,

        #[arg(long)]
        repository: Option<String>,
    },
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// TOML driver config. Defaults apply to missing fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist jobs and history here. In-memory when absent.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Job to insert at startup: `ACTION:REPO` or a JSON job spec.
    #[arg(long = "submit", value_name = "JOB")]
    submit: Vec<String>,

    #[arg(long, default_value = "default")]
    namespace: String,

    /// Override `slots` from the config.
    #[arg(long)]
    slots: Option<usize>,

    #[arg(long)]
    json_logs: bool,

    /// Stop once no job is pending or running.
    #[arg(long)]
    exit_when_idle: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Jobs { state_dir } => print_jobs(&state_dir).await,
        Command::History {
            state_dir,
            repository,
        } => print_history(&state_dir, repository).await,
    }
}

fn parse_submit(raw: &str) -> Result<JobSpec> {
    if raw.trim_start().starts_with('{') {
        return serde_json::from_str(raw).with_context(|| format!("invalid job spec {raw}"));
    }
    let Some((action, repository)) = raw.split_once(':') else {
        bail!("expected ACTION:REPO, got {raw:?}");
    };
    let action: JobAction = action.parse().map_err(anyhow::Error::msg)?;
    if repository.is_empty() {
        bail!("missing repository in {raw:?}");
    }
    Ok(JobSpec {
        repository: repository.to_string(),
        options: JobOptions::default_for(action),
    })
}

async fn open_storage(
    state_dir: Option<&Path>,
) -> Result<(Arc<dyn JobStore>, InsertSignal, Arc<dyn HistoryWriter>)> {
    let Some(dir) = state_dir else {
        let store = InMemoryJobStore::new();
        let inserts = store.subscribe();
        let store: Arc<dyn JobStore> = Arc::new(store);
        let history: Arc<dyn HistoryWriter> = Arc::new(InMemoryHistory::new());
        return Ok((store, inserts, history));
    };

    let store = FileJobStore::open(dir.join(JOBS_FILE))
        .await
        .with_context(|| format!("open job store in {}", dir.display()))?;
    let inserts = store.subscribe();
    let store: Arc<dyn JobStore> = Arc::new(store);
    let history: Arc<dyn HistoryWriter> = Arc::new(FileHistory::new(dir.join(HISTORY_FILE)));
    Ok((store, inserts, history))
}

/// Demo repository with a few JSON files.
async fn demo_repository(target: RepositoryRef) -> Arc<InMemoryRepository> {
    let repo = Arc::new(InMemoryRepository::new(target));
    repo.seed("dashboards/overview.json", r#"{"title":"Overview"}"#)
        .await;
    repo.seed("dashboards/latency.json", r#"{"title":"Latency"}"#)
        .await;
    repo.seed("alerts/disk.json", r#"{"threshold":0.9}"#).await;
    repo
}

async fn run(args: RunArgs) -> Result<()> {
    logging::init(args.json_logs);

    let mut config = match &args.config {
        Some(path) => DriverConfig::from_file(path)?,
        None => DriverConfig::default(),
    };
    if let Some(slots) = args.slots {
        config.slots = slots;
    }

    let specs = args
        .submit
        .iter()
        .map(|raw| parse_submit(raw))
        .collect::<Result<Vec<_>>>()?;

    let (store, inserts, history) = open_storage(args.state_dir.as_deref()).await?;

    let resources = Arc::new(InMemoryResources::new());
    resources
        .insert_unmanaged(&args.namespace, "folders/general.json", r#"{"name":"General"}"#)
        .await;

    let repositories: BTreeSet<&str> = specs.iter().map(|s| s.repository.as_str()).collect();
    let mut repos = StaticRepoGetter::new();
    for name in repositories {
        let repo: Arc<dyn Repository> =
            demo_repository(RepositoryRef::new(args.namespace.clone(), name)).await;
        repos = repos.with(repo);
    }

    let driver = DriverBuilder::new(config)
        .store(Arc::clone(&store))
        .history(Arc::clone(&history))
        .repositories(Arc::new(repos))
        .workers(WorkerRegistry::standard(resources))
        .expect_actions(&JobAction::ALL)
        .insert_signal(inserts)
        .build()?;
    let handle = driver.spawn();

    for spec in specs {
        let job = NewJob::for_repository(args.namespace.clone(), spec.repository, spec.options);
        let record = store.add(job).await.context("submit job")?;
        tracing::info!(job = %record.key, action = %record.action, "submitted");
    }

    if args.exit_when_idle {
        tokio::select! {
            res = wait_until_idle(store.as_ref()) => res?,
            res = tokio::signal::ctrl_c() => res.context("listen for ctrl-c")?,
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("listen for ctrl-c")?;
    }

    tracing::info!("shutting down, waiting for in-flight jobs");
    let status = handle.shutdown_and_join().await;

    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("{}", serde_json::to_string_pretty(&store.counts().await?)?);
    Ok(())
}

async fn wait_until_idle(store: &dyn JobStore) -> Result<()> {
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        if store.counts().await?.active() == 0 {
            return Ok(());
        }
    }
}

async fn print_jobs(state_dir: &Path) -> Result<()> {
    let path = state_dir.join(JOBS_FILE);
    if !path.exists() {
        bail!("no job store at {}", path.display());
    }
    let store = FileJobStore::open(&path).await?;
    for record in store.list(&JobFilter::default()).await? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

async fn print_history(state_dir: &Path, repository: Option<String>) -> Result<()> {
    let history = FileHistory::new(state_dir.join(HISTORY_FILE));
    let filter = HistoryFilter {
        repository,
        ..Default::default()
    };
    for entry in history.list(&filter).await? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}
