use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod check;
mod config;
mod enroll;
mod run;

use config::Config;

#[derive(Parser)]
#[command(name = "vigil", about = "Presence-based workstation guard")]
struct Cli {
    /// Config file (defaults to $VIGIL_CONFIG, then ~/.config/vigil/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and act when the enrolled user is away
    Run,
    /// Record reference embeddings of the enrolled user
    Enroll {
        /// Recording duration in seconds (overrides enroll.record_seconds)
        #[arg(short, long)]
        seconds: Option<u64>,
        /// Do not save face crops alongside the embeddings
        #[arg(long)]
        no_save_faces: bool,
    },
    /// Validate the configuration and reference embeddings
    Check,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = Config::load(cli.config.as_deref())?;
            run::run(config).await?;
        }
        Commands::Enroll {
            seconds,
            no_save_faces,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            let options = enroll::EnrollOptions {
                seconds: seconds.unwrap_or(config.enroll.record_seconds),
                save_faces: config.enroll.save_faces && !no_save_faces,
            };
            enroll::enroll(config, options).await?;
        }
        Commands::Check => {
            let config = Config::load(cli.config.as_deref())?;
            let summary = check::summarize(&config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Devices => {
            let devices = vigil_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}
