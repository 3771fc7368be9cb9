use std::sync::Arc;

use anyhow::Context;
use pulse_core::clock::{Clock, SystemClock};
use pulse_core::retry::RetryPolicy;
use pulse_db::store::{JobStore, PgJobStore};
use pulse_events::StatusPublisher;
use pulse_providers::ProviderRegistry;
use pulse_storage::{ArtifactUploader, S3ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_worker::config::{LogFormat, WorkerConfig};
use pulse_worker::dispatcher::Dispatcher;
use pulse_worker::processor::JobProcessor;
use pulse_worker::queue::SqsQueue;
use pulse_worker::server::{self, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "pulse_worker=debug,pulse_providers=info,pulse_storage=info,pulse_events=info,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
    tracing::info!(
        status_addr = %config.status_addr,
        max_in_flight = config.dispatcher.max_in_flight,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = pulse_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    pulse_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    pulse_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- AWS ---
    let mut aws_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()));
    if let Some(endpoint) = &config.aws_endpoint_url {
        aws_loader = aws_loader.endpoint_url(endpoint);
    }
    let aws = aws_loader.load().await;
    let sqs = aws_sdk_sqs::Client::new(&aws);
    let s3 = aws_sdk_s3::Client::from_conf(
        aws_sdk_s3::config::Builder::from(&aws)
            .force_path_style(config.aws_endpoint_url.is_some())
            .build(),
    );
    tracing::info!(region = %config.aws_region, bucket = %config.s3_bucket, "AWS clients created");

    // --- Providers ---
    let providers = ProviderRegistry::from_config(&config.providers, reqwest::Client::new());

    // --- Components ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));
    let publisher = Arc::new(StatusPublisher::new(Arc::clone(&store)));
    let objects = Arc::new(S3ObjectStore::new(s3, config.s3_bucket.clone(), clock));
    let uploader = ArtifactUploader::new(objects, config.artifact_url_ttl, RetryPolicy::default());
    let processor = Arc::new(JobProcessor::new(
        Arc::clone(&store),
        Arc::clone(&publisher),
        providers,
        uploader,
        RetryPolicy::default(),
    ));
    let queue = Arc::new(SqsQueue::new(
        sqs,
        config.queue_url.clone(),
        config.dead_letter_queue_url.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(queue, processor, config.dispatcher.clone()));

    let dispatcher_handle = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.run().await }
    });

    // --- Status server ---
    let app = server::router(ServerState {
        store,
        publisher: Arc::clone(&publisher),
        dispatcher: Arc::clone(&dispatcher),
    });
    let listener = tokio::net::TcpListener::bind(config.status_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.status_addr))?;
    tracing::info!(addr = %config.status_addr, "Starting status server");

    let server_shutdown = CancellationToken::new();
    let server_handle = tokio::spawn({
        let stopped = server_shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stopped.cancelled().await })
                .await
        }
    });

    shutdown_signal().await;

    // --- Shutdown ---
    // The status server keeps serving while in-flight jobs drain.
    dispatcher.stop();
    if let Err(e) = dispatcher_handle.await {
        tracing::error!(error = %e, "Dispatcher task failed");
    }

    // Open status streams re-read the store and finish.
    publisher.close_all();
    server_shutdown.cancel();
    server_handle
        .await
        .context("Status server task failed")?
        .context("Status server error")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
