use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use chartpulse::{cron::jobs, CronScheduler, Settings, Storage};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let storage = Arc::new(Storage::new(&settings));

    if let Some(last) = storage.ledger.last_run().context("Failed to read run ledger")? {
        info!(
            "Last run at {} ({:?}, {} rows)",
            last.ts.format("%Y-%m-%d %H:%M:%S UTC"),
            last.status,
            last.rows_written()
        );
    }

    let args: Vec<String> = std::env::args().skip(1).collect();

    // `--normalize`: rewrite every log with canonical UTC timestamps.
    if args.iter().any(|arg| arg == "--normalize") {
        for domain in &settings.domains {
            let rows = storage
                .store
                .normalize_timestamps(&domain.schema())
                .with_context(|| format!("Failed to normalize {}", domain.name))?;
            storage.cache.invalidate(&domain.name).await;
            info!("[{}] normalized {} rows", domain.name, rows);
        }
        return Ok(());
    }

    // `--backfill`: write an hourly, forward-filled copy of every log.
    if args.iter().any(|arg| arg == "--backfill") {
        jobs::backfill::run(&storage, &settings)?;
        return Ok(());
    }

    // `--once`: a single ingestion pass followed by alerts, for external cron.
    if args.iter().any(|arg| arg == "--once") {
        jobs::ingest::run(&storage, &settings).await?;
        jobs::alerts::run(&storage, &settings).await?;
        return Ok(());
    }

    run_scheduler(settings, storage).await
}

async fn run_scheduler(settings: Arc<Settings>, storage: Arc<Storage>) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();

    let cron_scheduler = CronScheduler::new(storage, settings);

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - ingestion and alerts will run periodically");

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Chartpulse running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");
    cancellation_token.cancel();

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("All jobs stopped");
    Ok(())
}
