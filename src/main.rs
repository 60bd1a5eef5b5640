use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use drive_reorganize::context::{CounterSnapshot, RunContext};
use drive_reorganize::glacier::{Cutoff, GlacierArchiver};
use drive_reorganize::inspect::{analyze, list_contents};
use drive_reorganize::logging;
use drive_reorganize::pool::WorkerPool;
use drive_reorganize::pruner::EmptyFolderPruner;
use drive_reorganize::recover::{read_recover_list, recover_files};
use drive_reorganize::reorganize::Reorganizer;
use drive_reorganize::settings::{Mode, Settings};
use drive_reorganize::store::{FsStore, RemoteStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long in-flight work may run after an interrupt before the process exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Reorganize a drive into YEAR/MONTH folders and archive old months into ZIP files
#[derive(Parser, Debug)]
#[command(name = "drive-reorganize")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log every create, move, upload and delete instead of performing it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Configuration file (defaults to ./drive-reorganize.{toml,yaml,json} if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the source folder tree
    List,
    /// Count source files by name pattern
    Analyze,
    /// Move source files into destination/YYYY/MM/<relative path>
    Reorganize,
    /// Download the files named in the recover list
    Recover,
    /// Archive month folders up to a cutoff into ZIP files
    Glacier {
        /// Last month to archive, inclusive
        #[arg(long, value_name = "YYYY-MM")]
        until: Cutoff,
    },
}

impl Commands {
    fn mode(&self) -> Mode {
        match self {
            Commands::List => Mode::List,
            Commands::Analyze => Mode::Analyze,
            Commands::Reorganize => Mode::Reorganize,
            Commands::Recover => Mode::Recover,
            Commands::Glacier { .. } => Mode::Glacier,
        }
    }
}

fn main() {
    dotenv().ok();
    let _guard = logging::init_logger();

    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        error!("{:#}", err);
        eprintln!("✗ {:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    settings.log_effective();
    settings.validate(cli.command.mode())?;

    let store = FsStore::new(&settings.store.root)
        .with_context(|| format!("Failed to open store at {}", settings.store.root.display()))?;
    let ctx = Arc::new(RunContext::new(cli.dry_run, settings.retry_policy()));
    watch_for_interrupt(Arc::clone(&ctx))?;

    if cli.dry_run {
        info!("[DRY RUN] No create, move, upload or delete will be performed");
    }

    let source_id = settings.folder.source.id.as_str();
    let recursive = settings.folder.source.recursive;

    match cli.command {
        Commands::List => {
            info!("=== LIST ===");
            let summary = list_contents(&store, source_id, recursive)?;
            println!("✓ {} files, {} folders", summary.files, summary.folders);
        }
        Commands::Analyze => {
            info!("=== ANALYZE ===");
            let report = analyze(&store, source_id, recursive)?;
            for (pattern, count) in &report.patterns {
                println!("{:>6}  {}", count, pattern);
            }
            println!("✓ {} files, {} patterns", report.total_files, report.patterns.len());
        }
        Commands::Recover => {
            info!("=== RECOVER ===");
            let list_file = &settings.recover.list_file;
            match read_recover_list(list_file)? {
                None => error!("Recover list {} not found", list_file.display()),
                Some(names) => {
                    let summary = recover_files(&store, &names, &settings.recover.output_dir, cli.dry_run)?;
                    println!("✓ Recover complete!");
                    println!("  Searched: {}", summary.searched);
                    println!("  Downloaded: {}", summary.downloaded);
                    println!("  Not found: {}", summary.not_found);
                    println!("  Failed: {}", summary.failed);
                }
            }
        }
        Commands::Reorganize => {
            info!("=== REORGANIZE ===");
            let pool = WorkerPool::new(settings.operation.max_threads).context("Failed to start worker pool")?;
            Reorganizer::new(&store, &ctx, &pool, settings.folder.destination.id.as_str())
                .recursive(recursive)
                .reorganize(source_id)?;
            let deleted = if recursive { prune(&store, &ctx, source_id) } else { 0 };

            let counters = ctx.counters.snapshot();
            log_reorganize_summary(&counters, deleted);
            println!("✓ Reorganize complete!");
            println!("  Processed: {}", counters.files_processed);
            println!("  Moved: {}", counters.files_moved);
            println!("  Errors: {}", counters.files_errored);
            println!("  Empty folders deleted: {}", deleted);
        }
        Commands::Glacier { until } => {
            info!(
                "=== GLACIER until {} (max ZIP size {} MB) ===",
                until, settings.glacier.max_zip_size_mb
            );
            GlacierArchiver::new(&store, &ctx, settings.folder.glacier.id.as_str(), settings.max_zip_bytes())
                .archive(source_id, &until)?;
            let deleted = prune(&store, &ctx, source_id);

            let counters = ctx.counters.snapshot();
            log_glacier_summary(&counters, deleted);
            println!("✓ Glacier complete!");
            println!("  Files archived: {}", counters.files_archived);
            println!("  ZIPs created: {}", counters.zips_created);
            println!("  Errors: {}", counters.files_errored);
            println!("  Empty folders deleted: {}", deleted);
        }
    }

    if ctx.is_cancelled() {
        warn!("Run was interrupted, results above are partial");
        println!("! Interrupted, results are partial");
    }
    Ok(())
}

fn prune(store: &dyn RemoteStore, ctx: &RunContext, source_id: &str) -> usize {
    if ctx.is_cancelled() {
        return 0;
    }
    match EmptyFolderPruner::new(store, ctx.dry_run).prune(source_id) {
        Ok(deleted) => deleted,
        Err(err) => {
            error!("Empty folder cleanup failed: {}", err);
            0
        }
    }
}

fn log_reorganize_summary(counters: &CounterSnapshot, folders_deleted: usize) {
    info!("=== REORGANIZE SUMMARY ===");
    info!("Files processed:       {}", counters.files_processed);
    info!("Files moved:           {}", counters.files_moved);
    info!("Files errored:         {}", counters.files_errored);
    info!("Empty folders deleted: {}", folders_deleted);
}

fn log_glacier_summary(counters: &CounterSnapshot, folders_deleted: usize) {
    info!("=== GLACIER SUMMARY ===");
    info!("Files archived:        {}", counters.files_archived);
    info!("ZIPs created:          {}", counters.zips_created);
    info!("Files errored:         {}", counters.files_errored);
    info!("Empty folders deleted: {}", folders_deleted);
}

/// On Ctrl-C, flags the run as cancelled so no new work starts, then exits
/// after [`SHUTDOWN_GRACE`] if the run has not wound down by itself.
fn watch_for_interrupt(ctx: Arc<RunContext>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal handler")?;

    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            if let Err(err) = runtime.block_on(tokio::signal::ctrl_c()) {
                warn!("Interrupt handling unavailable: {}", err);
                return;
            }
            warn!(
                "Interrupt received, letting in-flight work finish (up to {}s)",
                SHUTDOWN_GRACE.as_secs()
            );
            ctx.cancel();
            thread::sleep(SHUTDOWN_GRACE);
            error!("In-flight work did not finish within {}s, exiting", SHUTDOWN_GRACE.as_secs());
            std::process::exit(130);
        })
        .context("Failed to start signal handler")?;
    Ok(())
}
