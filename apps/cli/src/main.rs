use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ota_core::{
    FirmwareImage, HostConfig, OtaEvent, OtaHost, OtaObserver, TcpTransport, TracingObserver,
    VersionInfo,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "A/B OTA update host tool", long_about = None)]
struct Args {
    /// Address of the serial bridge (host:port)
    #[arg(long, default_value = "127.0.0.1:5555")]
    addr: String,

    /// Response timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the device's version registry
    Info,
    /// Upload a firmware image into the inactive slot
    Update {
        /// Binary file to upload
        #[arg(short, long)]
        file: String,

        /// Version number of the new image
        #[arg(long = "fw-version")]
        version: u32,
    },
}

/// Logs progress in 10% steps and forwards everything else to tracing.
#[derive(Default)]
struct ProgressLogger {
    last_step: AtomicU64,
}

impl OtaObserver for ProgressLogger {
    fn on_event(&self, event: &OtaEvent) {
        if let OtaEvent::Progress { current, total } = event {
            let step = if *total > 0 { current * 10 / total } else { 0 };
            if self.last_step.swap(step, Ordering::Relaxed) != step {
                info!("Progress: {}% ({}/{} bytes)", step * 10, current, total);
            }
        }
        TracingObserver.on_event(event);
    }
}

fn print_info(info: &VersionInfo) {
    println!("Current Version: {}", info.current_version);
    println!("Backup Version:  {}", info.backup_version);
    println!("Current Address: 0x{:08X}", info.current_address);
    println!("Backup Address:  0x{:08X}", info.backup_address);
}

fn run(args: Args) -> Result<()> {
    let transport = TcpTransport::connect(&args.addr)
        .with_context(|| format!("Failed to connect to {}", args.addr))?;
    let config = HostConfig {
        response_timeout: Duration::from_millis(args.timeout_ms),
        ..Default::default()
    };
    let host = OtaHost::with_observer(transport, config, Arc::new(ProgressLogger::default()));

    match args.command {
        Commands::Info => {
            let info = host.version_info()?;
            print_info(&info);
        }
        Commands::Update { file, version } => {
            let image = FirmwareImage::load(&file).with_context(|| format!("Loading {file}"))?;
            info!(file = %file, size = image.len(), packets = image.packet_count(), "Image loaded");

            let report = host.update(&image, version)?;
            info!(
                version = report.version,
                address = %format!("0x{:08X}", report.address),
                "Update successful"
            );

            let info = host.version_info()?;
            print_info(&info);
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
