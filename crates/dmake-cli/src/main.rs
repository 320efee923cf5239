use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dmake_core::Result;
use dmake_core::app::{Driver, JobBuilder, JobOutcome, Worker};
use dmake_core::config::{DEFAULT_PORT, DriverConfig, WorkerConfig};
use dmake_core::impls::{LocalArtifactStore, ShellRunner, TcpConnector};
use dmake_core::space::InMemorySpace;

mod shutdown;

#[derive(Parser, Debug)]
#[command(name = "dmake")]
#[command(version)]
#[command(about = "Distributed make: one driver schedules, many workers build")]
#[command(propagate_version = true)]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build a target by handing its rules out to workers
    Driver(DriverArgs),

    /// Join a driver and run the tasks it hands out
    Worker(WorkerArgs),
}

#[derive(clap::Args, Debug)]
struct DriverArgs {
    /// Target to build; defaults to the first rule in the file
    target: Option<String>,

    /// Build file to read
    #[arg(short, long, default_value = "Makefile")]
    file: PathBuf,

    /// Directory holding the sources workers fetch
    #[arg(short = 'C', long, default_value = ".")]
    dir: PathBuf,

    /// Address workers connect to
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    bind: SocketAddr,

    /// Job name published to workers
    #[arg(long, default_value = "dmake")]
    job: String,

    /// Base coordination period in milliseconds; leases and timers derive from it
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    period_ms: u64,

    /// Workers that must join before any task is handed out
    #[arg(long, default_value_t = 0)]
    min_workers: usize,

    /// Print the dependency tree and the first tasks, then stop
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[derive(clap::Args, Debug)]
struct WorkerArgs {
    /// Driver address
    #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    connect: SocketAddr,

    /// Working directory for commands and artifacts
    #[arg(short = 'C', long, default_value = ".")]
    dir: PathBuf,

    /// Name shown in the driver's log
    #[arg(long, default_value = "worker")]
    name: String,

    /// Claim tasks whose dependencies are already local first
    #[arg(long)]
    prefer_local: bool,

    /// Pause between attempts to reach the driver, in milliseconds
    #[arg(long, default_value_t = 1000)]
    rejoin_delay_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let shutdown = shutdown::install_shutdown_handler();

    let result = match args.command {
        Commands::Driver(driver_args) => run_driver(driver_args, shutdown).await,
        Commands::Worker(worker_args) => run_worker(worker_args, shutdown).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(2)
        }
    }
}

async fn run_driver(args: DriverArgs, shutdown: CancellationToken) -> Result<ExitCode> {
    let config = DriverConfig::new(args.job)
        .with_bind(args.bind)
        .with_dry_run(args.dry_run)
        .with_period(Duration::from_millis(args.period_ms))?
        .with_min_workers(args.min_workers);

    let mut builder = JobBuilder::new();
    if let Some(target) = args.target {
        builder = builder.with_target(target);
    }
    let graph = builder.build_file(&args.file).await?;

    let space = Arc::new(InMemorySpace::new());
    let store = LocalArtifactStore::open(&args.dir, space.clone(), config.space.file_lease()).await?;
    let published = store.publish_all().await?;
    tracing::info!(dir = %store.dir().display(), files = published, "published local files");

    let report = Driver::new(config, graph, space, Arc::new(store))
        .run(shutdown)
        .await?;

    Ok(match report.outcome {
        JobOutcome::Failed { .. } => ExitCode::FAILURE,
        JobOutcome::Completed | JobOutcome::DryRun => ExitCode::SUCCESS,
    })
}

async fn run_worker(args: WorkerArgs, shutdown: CancellationToken) -> Result<ExitCode> {
    let config = WorkerConfig::new(args.name)
        .with_driver(args.connect)
        .with_work_dir(args.dir)
        .with_prefer_local(args.prefer_local)
        .with_rejoin_delay(Duration::from_millis(args.rejoin_delay_ms));

    let connector = TcpConnector::from_config(&config);
    let runner = Arc::new(ShellRunner::new(config.work_dir.clone()));
    Worker::new(config, connector, runner).run(shutdown).await?;

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_period_is_refused_at_parse_time() {
        assert!(Args::try_parse_from(["dmake", "driver", "--period-ms", "0"]).is_err());

        let args = Args::try_parse_from(["dmake", "driver", "--period-ms", "250"]).unwrap();
        let Commands::Driver(driver) = args.command else {
            panic!("expected the driver subcommand");
        };
        assert_eq!(driver.period_ms, 250);
    }
}
