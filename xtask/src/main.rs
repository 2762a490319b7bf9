use anyhow::Result;
use clap::{Parser, Subcommand};
use ota_core::FirmwareImage;
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the device agent
    Run,
    /// Write a test-pattern firmware image
    GenImage {
        /// Image size in bytes
        #[arg(long, default_value_t = 1024)]
        size: usize,
        /// Output file
        #[arg(long, default_value = "test_update.bin")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            let status = Command::new("cargo").arg("build").status()?;
            if !status.success() {
                anyhow::bail!("Build failed");
            }
        }
        Commands::Run => {
            println!("Running agent...");
            let status = Command::new("cargo")
                .arg("run")
                .arg("-p")
                .arg("ota-agent")
                .status()?;
            if !status.success() {
                anyhow::bail!("Run failed");
            }
        }
        Commands::GenImage { size, out } => {
            let image = FirmwareImage::test_pattern(*size)?;
            std::fs::write(out, image.as_bytes())?;
            println!("Created {} ({} bytes)", out.display(), image.len());
        }
    }

    Ok(())
}
