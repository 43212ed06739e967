use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pacekeeper::cli::{Cli, Command};
use pacekeeper::config::{SAFETY_LEVEL_ENV, Settings};
use pacekeeper::error::ExecutionError;
use pacekeeper::limiter::{ActionType, JsonSnapshotStore, RateLimiter, SafetyProfile};
use pacekeeper::orchestrator::{ActionExecutor, Orchestrator, UncleanPolicy};
use pacekeeper::schedule::Scheduler;
use pacekeeper::ui::{self, RunProgress};
use pacekeeper::workflow::{
    CheckpointManager, Metadata, SqliteWorkflowStore, WorkflowStatus, WorkflowType, listen_for_signals,
    shutdown_channel,
};

/// Logs what it would do instead of acting. Repeated items are rejected.
struct DryRunExecutor {
    progress: Arc<RunProgress>,
    seen: Mutex<HashSet<String>>,
}

impl ActionExecutor for DryRunExecutor {
    async fn execute(&self, workflow_type: WorkflowType, item: &str) -> Result<(), ExecutionError> {
        let fresh = self
            .seen
            .lock()
            .map(|mut seen| seen.insert(item.to_string()))
            .unwrap_or(true);
        if !fresh {
            self.progress.rejected(item, "duplicate item");
            return Err(ExecutionError::Rejected(format!("duplicate item {item}")));
        }
        info!(%workflow_type, %item, "dry run: would perform action");
        self.progress.advance(item);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = load_settings(&cli)?;
    let profile = settings.profile().context("invalid configuration")?;

    match cli.command {
        Command::Run {
            workflow,
            items,
            file,
            ignore_schedule,
            json,
        } => {
            let items = collect_items(items, file.as_deref())?;
            run(&settings, &profile, workflow.into(), items, ignore_schedule, json).await
        }
        Command::Status => status(&settings, &profile),
        Command::Limits => {
            println!("# safety level: {}", profile.level);
            print!("{}", toml::to_string_pretty(&profile.limits)?);
            print!("\n[session]\n{}", toml::to_string_pretty(&profile.session)?);
            Ok(())
        }
        Command::Reset { action } => {
            let action: ActionType = action.into();
            let limiter = open_limiter(&settings, &profile)?;
            limiter.reset(action);
            println!("{action} limiter state reset");
            Ok(())
        }
        Command::Abandon { workflow } => {
            let workflow: WorkflowType = workflow.into();
            let checkpoints = open_checkpoints(&settings)?;
            let cleared = checkpoints.abandon_paused(workflow);
            println!("{cleared} paused {workflow} workflow(s) abandoned");
            Ok(())
        }
        Command::Workflows { workflow } => {
            let checkpoints = open_checkpoints(&settings)?;
            ui::print_workflows(&checkpoints.list_workflows(workflow.map(Into::into)));
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// File (or defaults), then `PACEKEEPER_SAFETY_LEVEL`, then `--safety-level`.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .with_env_override(std::env::var(SAFETY_LEVEL_ENV).ok())?,
        None => Settings::load().context("failed to load pacekeeper.toml")?,
    };
    if let Some(level) = cli.safety_level {
        settings.safety_level = level.into();
    }
    Ok(settings)
}

fn collect_items(mut items: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        items.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }
    if items.is_empty() {
        bail!("no items to process; pass them as arguments or with --file");
    }
    Ok(items)
}

fn open_limiter(settings: &Settings, profile: &SafetyProfile) -> Result<RateLimiter> {
    std::fs::create_dir_all(&settings.state_dir)
        .with_context(|| format!("failed to create {}", settings.state_dir.display()))?;
    let store = JsonSnapshotStore::new(settings.limiter_state_path());
    let limiter = RateLimiter::open(profile.limits.clone(), Box::new(store))?.with_max_wait(settings.max_wait());
    Ok(limiter)
}

fn open_checkpoints(settings: &Settings) -> Result<CheckpointManager> {
    let path: PathBuf = settings.workflows_db_path();
    let store = SqliteWorkflowStore::open(&path)
        .with_context(|| format!("failed to open workflow database {}", path.display()))?;
    Ok(CheckpointManager::new(Arc::new(store)))
}

async fn run(
    settings: &Settings,
    profile: &SafetyProfile,
    workflow_type: WorkflowType,
    items: Vec<String>,
    ignore_schedule: bool,
    json: bool,
) -> Result<()> {
    let limiter = Arc::new(open_limiter(settings, profile)?);
    let checkpoints = Arc::new(open_checkpoints(settings)?);

    let (trigger, notice) = shutdown_channel();
    tokio::spawn(listen_for_signals(trigger));
    {
        let limiter = limiter.clone();
        checkpoints.on_shutdown(move || limiter.flush());
    }

    let position = checkpoints
        .get_resumable_workflow(workflow_type)
        .filter(|wf| wf.status == WorkflowStatus::Paused || settings.unclean_policy == UncleanPolicy::Resume)
        .map(|wf| wf.current_index)
        .unwrap_or(0);
    let progress = Arc::new(RunProgress::start(workflow_type, items.len() as u64, position as u64));
    let executor = DryRunExecutor {
        progress: progress.clone(),
        seen: Mutex::new(HashSet::new()),
    };

    let mut options = settings.run_options(profile);
    if ignore_schedule {
        options.respect_schedule = false;
    }
    let scheduler = Scheduler::new(settings.schedule.clone());
    let mut orchestrator = Orchestrator::new(
        limiter.clone(),
        scheduler,
        checkpoints.clone(),
        executor,
        options,
        notice,
    );

    let mut metadata = Metadata::new();
    metadata.insert("safety_level".into(), serde_json::json!(profile.level.as_str()));
    let report = orchestrator
        .run_batch(workflow_type, &items, metadata)
        .await
        .context("batch run failed")?;

    // Flushes the limiter unless a signal already did.
    checkpoints.shutdown();

    progress.finish(&report);
    if json {
        ui::print_report_json(&report);
    }
    Ok(())
}

fn status(settings: &Settings, profile: &SafetyProfile) -> Result<()> {
    let limiter = open_limiter(settings, profile)?;
    let stats: Vec<_> = ActionType::ALL.iter().map(|&action| limiter.stats(action)).collect();
    ui::print_stats(profile.level, &stats);
    println!();

    let mut scheduler = Scheduler::new(settings.schedule.clone());
    let today = scheduler.today().clone();
    ui::print_schedule(scheduler.is_work_day(), scheduler.phase(), &today);
    println!();

    let checkpoints = open_checkpoints(settings)?;
    let resumable: Vec<_> = WorkflowType::ALL
        .iter()
        .filter_map(|&workflow_type| checkpoints.get_resumable_workflow(workflow_type))
        .collect();
    println!("Resumable workflows");
    ui::print_workflows(&resumable);
    Ok(())
}
