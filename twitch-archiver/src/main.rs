use std::sync::Arc;

use anyhow::Context;
use stream_source::StreamSource;
use tokio_util::sync::CancellationToken;
use tracing::info;
use twitch_archiver::recorder::Supervisor;
use twitch_archiver::{Config, logging, signal};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = Config::resolve_path(std::env::args().nth(1));
    let config = Config::load(&config_path)
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;

    // Keep the file writer alive until exit.
    let _log_guard = logging::init_logging(&config.log_level, config.log_dir.as_deref())?;
    config.log_summary();

    let source = Arc::new(config.streamlink_source());
    info!(url = %source.url(), binary = %source.binary_path(), "using streamlink source");

    let shutdown = CancellationToken::new();
    signal::spawn_shutdown_listener(shutdown.clone());

    Supervisor::new(config, source).run(shutdown).await;

    info!("twitch-archiver stopped");
    Ok(())
}

