use std::net::TcpListener;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ota_core::{AgentConfig, FileFlash, FileStore, OtaAgent, TcpTransport};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "OTA device agent served over TCP", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5555")]
    listen: String,

    /// Flash image file
    #[arg(long, default_value = "flash.bin")]
    flash: PathBuf,

    /// Directory holding persistent records
    #[arg(long, default_value = "nvs")]
    storage: PathBuf,

    /// Agent configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => AgentConfig::load_from_file(path)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => AgentConfig::default(),
    };

    let flash = FileFlash::open(&args.flash, config.flash_base(), config.flash_size())
        .with_context(|| format!("Opening flash image {}", args.flash.display()))?;
    let store = FileStore::open(&args.storage)
        .with_context(|| format!("Opening storage {}", args.storage.display()))?;
    let mut agent = OtaAgent::new(config, flash, store)?;

    let listener = TcpListener::bind(&args.listen)
        .with_context(|| format!("Binding {}", args.listen))?;
    info!(addr = %args.listen, "Waiting for host");

    // One host at a time; the session survives reconnects until it times out.
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        let transport = TcpTransport::from_stream(stream)?;
        info!(peer = ?transport.peer_addr(), "Host connected");
        if let Err(e) = agent.run(&transport) {
            warn!(error = %e, "Connection closed with error");
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
