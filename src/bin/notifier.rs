use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use futures_util::future::select_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chain_notify::config::{AppConfig, CONFIG_PATH, LoggingConfig};
use chain_notify::context::{AppContext, InitOptions};
use chain_notify::error::AppError;
use chain_notify::monitors::build_scheduler;

#[derive(Parser)]
#[command(name = "notifier", about = "On-chain account monitor and push notifier")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Fire every enabled job once, then exit
    #[arg(long)]
    once: bool,

    /// Keep state in process memory instead of Redis
    #[arg(long)]
    memory_cache: bool,

    /// Print notifications to stdout instead of sending them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(&args.config, args.dry_run);
    match &config {
        Ok(config) => init_tracing(&config.logging),
        Err(_) => init_tracing(&LoggingConfig::default()),
    }

    let result = match config {
        Ok(config) => {
            info!("Loaded config from {}", args.config.display());
            run(args, config).await
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: Args, config: AppConfig) -> Result<(), AppError> {
    let options = InitOptions {
        memory_cache: args.memory_cache,
        dry_run: config.notify.dry_run,
    };
    let ctx = AppContext::init(config, options).await?;
    ctx.seed().await;
    let scheduler = build_scheduler(&ctx)?;

    if args.once {
        info!(jobs = scheduler.jobs().len(), "running every job once");
        scheduler.run_once().await;
        ctx.shutdown();
        return Ok(());
    }

    let names: Vec<String> = scheduler.jobs().iter().map(|job| job.id()).collect();
    let mut timers = scheduler.start();
    info!(timers = timers.len(), "Scheduler started. Press Ctrl+C to stop.");

    let failed = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
        exit = first_exit(&mut timers, &names) => Some(exit),
    };

    if let Some((index, _)) = &failed {
        timers.swap_remove(*index);
    }
    scheduler.shutdown();
    for timer in timers {
        if let Err(e) = timer.await {
            warn!("timer task ended abnormally: {e}");
        }
    }
    ctx.shutdown();

    match failed {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

/// Resolves when the first timer task ends. Timers only return after a
/// shutdown request, so an early exit means the task panicked.
async fn first_exit(timers: &mut [JoinHandle<()>], names: &[String]) -> (usize, AppError) {
    if timers.is_empty() {
        std::future::pending::<()>().await;
    }
    let (result, index, _) = select_all(timers.iter_mut()).await;
    let name = names.get(index).cloned().unwrap_or_default();
    let err = match result {
        Err(e) if e.is_panic() => AppError::JobPanicked(name),
        _ => AppError::Other(anyhow::anyhow!("timer {name} exited unexpectedly")),
    };
    (index, err)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
