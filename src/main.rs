use clap::Parser;
use dotenvy::dotenv;
use file_key_gateway::config::GatewayConfig;
use file_key_gateway::infrastructure::{database, storage};
use file_key_gateway::services::executor::TaskExecutor;
use file_key_gateway::services::lookup_table::LookupTable;
use file_key_gateway::services::pipeline::Pipelines;
use file_key_gateway::services::worker::spawn_workers;
use file_key_gateway::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the HTTP gateway
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Number of pipeline workers (overrides WORKER_COUNT)
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & Logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "file_key_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting file key gateway...");

    let mut config = GatewayConfig::from_env();
    if let Some(workers) = args.workers.filter(|n| *n > 0) {
        config.worker_count = workers;
    }
    info!(
        "🛡️  Config: Max Size={}MB, Bucket={}, Table={}, Workers={}, Job Timeout={:?}",
        config.max_file_size_mb,
        config.bucket_name,
        config.table_name,
        config.worker_count,
        config.job_timeout
    );

    tokio::fs::create_dir_all(&config.upload_path).await?;
    tokio::fs::create_dir_all(&config.download_path).await?;

    // 2. Collaborators
    let lookup_table: Arc<dyn LookupTable> =
        database::setup_lookup_table(&config.table_name).await?;
    let blob_store = storage::setup_storage(&config).await?;

    // 3. Task executor and workers
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (executor, queue) = TaskExecutor::new(config.queue_capacity, Some(config.job_timeout));
    let pipelines = Arc::new(Pipelines::from_config(
        blob_store.clone(),
        lookup_table.clone(),
        &config,
    ));
    let workers = spawn_workers(config.worker_count, queue, pipelines, shutdown_rx);
    info!("👷 {} workers started", workers.len());

    // 4. HTTP gateway
    let state = AppState {
        executor,
        lookup_table,
        blob_store,
        config: Arc::new(config),
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("✅ Gateway listening on: http://{}", addr);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    // 5. Stop workers once in-flight requests have drained
    info!("🛑 Shutting down workers...");
    let _ = shutdown_tx.send(true);
    for handle in workers {
        let _ = handle.await;
    }

    info!("👋 Gateway exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
