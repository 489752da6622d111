//! The `focalors` binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use focalors_runtime::{FocalorsConfig, FocalorsRuntime, RuntimeBuilder};

#[derive(Parser, Debug)]
#[command(name = "focalors", version, about = "A WeChat chat bridge", long_about = None)]
struct Args {
    /// Configuration file; searched for when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Configuration profile, overrides FOCALORS_PROFILE
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Log level, overrides the configured one
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Validate the configuration and exit
    Check,
}

impl Args {
    fn builder(&self) -> RuntimeBuilder {
        let mut builder = FocalorsRuntime::builder();
        if let Some(path) = &self.config {
            builder = builder.config_file(path);
        }
        if let Some(profile) = &self.profile {
            builder = builder.profile(profile);
        }
        if let Some(level) = &self.log_level {
            builder = builder.set("logging.level", level.as_str());
        }
        builder
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => {
            let runtime = args.builder().build().context("failed to build runtime")?;
            let report = runtime.run().await?;
            if !report.is_clean() {
                anyhow::bail!("{} component(s) failed to stop", report.failures.len());
            }
        }
        Commands::Check => {
            let config = args
                .builder()
                .load_config()
                .context("configuration is invalid")?;
            print_summary(&config);
        }
    }

    info!("Bye");
    Ok(())
}

fn print_summary(config: &FocalorsConfig) {
    println!("Configuration OK");
    println!("  master:   {}", config.master_id().unwrap_or("(none)"));
    println!("  store:    {:?}", config.store.backend);
    println!("  backend:  {}", config.backend.url);
    println!("  clients:  {}", config.clients.join(", "));
    println!("  log:      {} ({:?})", config.logging.level, config.logging.format);
}
