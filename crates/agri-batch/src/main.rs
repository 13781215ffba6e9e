use std::num::NonZeroUsize;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::LevelFilter, fmt};

use agri_batch::cli::{
    BatchRunArgs, BuildRequestsArgs, CheckBatchArgs, Cli, Commands, PollArgs, ReconcileArgs,
    ValidateArgs,
};
use agri_batch::config::{self, AppConfig};
use agri_batch::constants::DEFAULT_CHUNK_SIZE;
use agri_batch::error::AppError;
use agri_batch::paths::JobWorkspace;
use agri_batch::pipeline::{BuildReport, ChunkingPolicy, ReconcileReport};
use agri_batch::services::{
    BatchJobClient, BatchJobContext, GeminiBatchClient, JobHandle, JobKind, JobPoller,
    LifecycleSettings, ReconcileOutputs, ResultFetcher, build_request_file, reconcile_offline,
    sanitize_display_name,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt().with_max_level(level).with_target(false).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Some(Commands::BatchRun(args)) => run_batch(args).await,
        Some(Commands::CheckBatch(args)) => run_check_batch(args).await,
        Some(Commands::Validate(args)) => run_validate(args).await,
        Some(Commands::Reconcile(args)) => run_reconcile(args).await,
        Some(Commands::BuildRequests(args)) => run_build_requests(args),
        None => {
            Cli::print_help();
            Ok(())
        }
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command.as_ref() {
        Some(Commands::BatchRun(_))
        | Some(Commands::CheckBatch(_))
        | Some(Commands::Validate(_)) => match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        Some(Commands::Reconcile(_)) | Some(Commands::BuildRequests(_)) => match cli.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        None => LevelFilter::OFF,
    }
}

fn gemini_client(config: &AppConfig) -> Result<Arc<dyn BatchJobClient>, AppError> {
    let client = GeminiBatchClient::from_env(&config.provider)?;
    tracing::debug!(model = client.model(), "gemini batch client ready");
    Ok(Arc::new(client))
}

fn lifecycle_settings(config: &AppConfig, poll: Option<&PollArgs>) -> LifecycleSettings {
    let mut settings = LifecycleSettings::from_config(config);
    if let Some(poll) = poll {
        if let Some(secs) = poll.poll_interval {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = poll.timeout {
            settings.poll_timeout = Some(Duration::from_secs(secs));
        }
    }
    settings
}

/// Token cancelled on Ctrl-C so a long wait stops between polls.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after the current request");
            trigger.cancel();
        }
    });
    token
}

async fn run_batch(args: BatchRunArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let client = gemini_client(&config)?;
    let root = args.output_root.unwrap_or_else(|| config.output.root.clone());

    let mut ctx = BatchJobContext::create(
        client,
        lifecycle_settings(&config, None),
        &root,
        &args.job_name,
        JobKind::Generation,
        ChunkingPolicy::PerRecord,
        &args.input,
    )
    .await?;
    let build = ctx.prepare()?;
    print_build_summary(&build, &ctx.workspace().requests_path());
    let handle = ctx.submit().await?;

    println!("Submitted batch job {} ({})", handle.job_id, handle.state);
    println!("Workspace: {}", ctx.workspace().dir().display());
    println!(
        "Check later with: agri-batch check-batch --job-id {} --workspace {}",
        handle.job_id,
        ctx.workspace().dir().display()
    );
    Ok(())
}

async fn run_check_batch(args: CheckBatchArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let client = gemini_client(&config)?;
    let settings = lifecycle_settings(&config, Some(&args.poll));
    let cancel = ctrl_c_token();

    if let Some(dir) = args.workspace.as_deref() {
        if !dir.join("job.json").is_file() {
            return Err(AppError::MissingManifest {
                path: dir.to_path_buf(),
            });
        }
        let mut ctx = BatchJobContext::open(client, settings, dir)
            .await?
            .with_cancellation(cancel);
        let resumed = ctx.resume(Some(&args.job_id)).await?;
        tracing::info!(job_id = %resumed.job_id, state = %resumed.state, "resumed batch job");
        let handle = ctx.wait().await?;
        let fetched = ctx.fetch(&handle).await?;
        println!(
            "Saved {} bytes of raw results to {}",
            fetched.bytes,
            fetched.path.display()
        );
        let report = ctx.reconcile().await?;
        print_reconcile_summary(&report, ctx.workspace().dir());
        return Ok(());
    }

    let root = args.output_root.unwrap_or_else(|| config.output.root.clone());
    let workspace = JobWorkspace::create(&root, &sanitize_display_name(&args.job_id))?;
    let handle = JobHandle::resume(client.as_ref(), &args.job_id).await?;
    tracing::info!(job_id = %handle.job_id, state = %handle.state, "resumed batch job");
    let handle = JobPoller::new(client.as_ref(), settings.poll_interval)
        .with_timeout(settings.poll_timeout)
        .with_cancellation(cancel)
        .wait(&handle.job_id)
        .await?;
    let fetched = ResultFetcher::new(client.as_ref())
        .fetch(&handle, &workspace.raw_results_path())
        .await?;
    println!(
        "Saved {} bytes of raw results to {}",
        fetched.bytes,
        fetched.path.display()
    );
    println!(
        "Reconcile with: agri-batch reconcile --input <records> --results {} --mode per-record --out-dir {}",
        fetched.path.display(),
        workspace.dir().display()
    );
    Ok(())
}

async fn run_validate(args: ValidateArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let client = gemini_client(&config)?;
    let root = args.output_root.unwrap_or_else(|| config.output.root.clone());

    let mut ctx = BatchJobContext::create(
        client,
        lifecycle_settings(&config, Some(&args.poll)),
        &root,
        &args.job_name,
        JobKind::Validation,
        ChunkingPolicy::Chunked(args.chunk_size),
        &args.input,
    )
    .await?
    .with_cancellation(ctrl_c_token());

    let summary = ctx.run().await?;
    print_build_summary(&summary.build, &ctx.workspace().requests_path());
    println!(
        "Batch job {} finished ({}); {} bytes of raw results",
        summary.handle.job_id, summary.handle.state, summary.fetched.bytes
    );
    print_reconcile_summary(&summary.reconcile, ctx.workspace().dir());
    Ok(())
}

async fn run_reconcile(args: ReconcileArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let chunk_size = NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN);
    let policy = args.mode.policy(chunk_size);
    let kind = args
        .kind
        .map(JobKind::from)
        .unwrap_or_else(|| args.mode.default_kind());
    let rule = kind.decision_rule(&config.reconcile.accept_value);
    let outputs = ReconcileOutputs::in_dir(&args.out_dir, config.reconcile.split_missing, &rule);

    let report = reconcile_offline(
        &args.input,
        &args.results,
        &config.records.id_field,
        policy,
        &rule,
        &outputs,
    )
    .await?;
    print_reconcile_summary(&report, &args.out_dir);
    Ok(())
}

fn run_build_requests(args: BuildRequestsArgs) -> Result<(), AppError> {
    let config = config::load()?;
    let settings = lifecycle_settings(&config, None);
    let policy = args.mode.policy(args.chunk_size);
    let report = build_request_file(&args.input, &args.out, policy, &settings)?;
    print_build_summary(&report, &args.out);
    Ok(())
}

fn print_build_summary(report: &BuildReport, path: &Path) {
    println!(
        "Built {} requests from {} records ({} malformed lines skipped) -> {}",
        report.requests,
        report.records,
        report.skipped_lines,
        path.display()
    );
}

fn print_reconcile_summary(report: &ReconcileReport, dir: &Path) {
    println!("Reconciliation of {} records:", report.total());
    println!("  accepted: {}", report.accepted);
    println!("  rejected by model: {}", report.rejected);
    println!("  missing decision: {}", report.missing);
    if report.skipped_lines > 0 {
        println!("  malformed input lines skipped: {}", report.skipped_lines);
    }
    println!(
        "  raw result lines: {} ({} malformed, {} provider errors)",
        report.parse.lines, report.parse.malformed_lines, report.parse.error_entries
    );
    println!("Outputs written to {}", dir.display());
}
