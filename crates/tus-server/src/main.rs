use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use lloggs::LoggingArgs;
use tracing::info;

use tus_server::config::DEFAULT_MAX_SIZE;
use tus_server::{Config, UploadEngine, api};

#[derive(Parser)]
#[command(name = "tus-server")]
#[command(about = "Resumable upload server for the TUS protocol")]
struct Args {
    /// Address to listen on
    #[arg(long, short, env = "TUS_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Storage directory path
    #[arg(long, short, env = "TUS_STORAGE")]
    storage: PathBuf,

    /// Largest upload accepted, in bytes
    #[arg(long, env = "TUS_MAX_SIZE", default_value_t = DEFAULT_MAX_SIZE)]
    max_size: u64,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let _guard = args.logging.setup(|v| match v {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    })?;

    let config = Config {
        listen_addr: args.listen,
        storage_path: args.storage,
        max_size: args.max_size,
    };
    info!(listen = %config.listen_addr, storage = ?config.storage_path, max_size = config.max_size, "Starting server");

    // Open session records and reconcile them with the upload files
    let engine = UploadEngine::open(&config).await?;
    info!(sessions = engine.list().len(), "Loaded upload sessions");

    let app = api::router(engine);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
