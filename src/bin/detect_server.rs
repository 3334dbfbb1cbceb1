//! detect_server - remote inference endpoint for `RemoteBackend`

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use live_detect::server::DEFAULT_SERVER_ADDR;
use live_detect::{DetectServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Listen address.
    #[arg(long, env = "DETECT_SERVER_ADDR", default_value = DEFAULT_SERVER_ADDR)]
    addr: String,
    /// Directory containing `.onnx` models.
    #[arg(long, env = "DETECT_SERVER_MODELS_DIR")]
    models_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(dir) = &args.models_dir {
        if !dir.is_dir() {
            return Err(anyhow!("models dir {} is not a directory", dir.display()));
        }
    }

    let server = DetectServer::new(ServerConfig {
        addr: args.addr,
        models_dir: args.models_dir,
    });
    log::info!("available models: {}", server.registry().list().join(", "));
    let handle = server.spawn()?;
    log::info!("detect server listening on {}", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("detect_server waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping detect server...");
    handle.stop()?;
    Ok(())
}
