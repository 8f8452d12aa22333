pub mod ai;
pub mod config;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod upload;

use std::sync::Arc;

use ai::GeminiClient;
use config::{ServerArgs, WatchArgs};
use pipeline::Pipeline;
use services::clipboard::{Clipboard, NoClipboard, SystemClipboard};
use services::watcher::start_watcher;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use upload::{HttpUploader, Uploader};

/// Bounded queue between the watcher thread and the pipeline
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Load `.env` and install the tracing subscriber
pub fn init() {
    // Check current dir first, then the parent (running from a subfolder)
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path("../.env");
    }

    // Default: warn for most crates, info for ours
    // Use RUST_LOG=debug for verbose per-file logs
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,snapname=info,tower_http=info")),
        )
        .init();
}

/// Watch the configured folder until Ctrl-C
pub async fn run(args: WatchArgs) -> anyhow::Result<()> {
    let watch_dir = args.watch_dir()?;

    let describer = Arc::new(GeminiClient::new(args.gemini_config())?);

    let uploader: Option<Arc<dyn Uploader>> = match args.upload_endpoint() {
        Some(endpoint) => {
            tracing::info!("[Snapname] Uploading to {}", endpoint);
            Some(Arc::new(HttpUploader::new(endpoint, args.timeout())?))
        }
        None => {
            tracing::info!("[Snapname] Upload disabled, renaming only");
            None
        }
    };

    let clipboard: Arc<dyn Clipboard> = if args.no_clipboard {
        Arc::new(NoClipboard)
    } else {
        Arc::new(SystemClipboard)
    };

    let (sender, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let watcher = start_watcher(&watch_dir, sender)?;

    println!("Running and watching: {}", watcher.path().display());

    let pipeline = Arc::new(Pipeline::new(args.pipeline_config(), describer, uploader, clipboard));
    pipeline
        .run(receiver, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("[Snapname] Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    drop(watcher);
    tracing::info!("[Snapname] Stopped");

    Ok(())
}

/// Run the upload server until the process is stopped
pub async fn run_server(args: ServerArgs) -> anyhow::Result<()> {
    let config = args.server_config();
    server::serve(args.bind, config).await?;
    Ok(())
}
