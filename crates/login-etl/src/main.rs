//! Login ETL daemon - main entry point

use anyhow::{Context, Result};
use login_etl_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use login_etl::{
    config::Config,
    pipeline::EtlLoop,
    queue::{BatchFetcher, SqsQueue},
    store::PgBatchLoader,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("login-etl")
        .filter_directives("login_etl=info,sqlx=warn,aws_config=warn,aws_smithy_runtime=warn")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting login ETL daemon");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        queue_url = %config.queue.queue_url,
        batch_size = config.pipeline.batch_size,
        visibility_timeout_secs = config.queue.visibility_timeout_secs,
        "Configuration loaded"
    );

    let queue = SqsQueue::from_config(&config.queue).await;
    let fetcher = BatchFetcher::new(queue).with_lease(config.queue.lease());

    let loader = PgBatchLoader::connect(&config.database)
        .await
        .context("Failed to connect to the database")?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let summary = EtlLoop::new(fetcher, loader)
        .with_batch_size(config.pipeline.batch_size)
        .with_idle_policy(config.pipeline.idle_policy())
        .with_ack_malformed(config.pipeline.ack_malformed)
        .run(cancel)
        .await
        .context("ETL loop terminated")?;

    info!(
        cycles = summary.cycles,
        received = summary.received,
        loaded = summary.loaded,
        parse_failures = summary.parse_failures,
        load_failures = summary.load_failures,
        "Login ETL daemon shut down gracefully"
    );

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing the current batch");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing the current batch");
        },
    }

    token.cancel();
}
