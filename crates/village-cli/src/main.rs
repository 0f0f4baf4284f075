use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use village::{logging, Settings};

mod demo;

/// Village task orchestration demo driver.
#[derive(Debug, Parser)]
#[command(name = "village", version, about)]
struct Cli {
    /// Settings file (defaults to ~/.village/settings.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fan out simulated agent calls over a pooled backend
    Demo(demo::DemoArgs),
    /// Print the effective settings as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load(Some(path.as_path()))
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    match cli.command {
        Commands::Demo(args) => {
            logging::init(&settings.logging).context("failed to initialize logging")?;
            demo::run(&settings, &args).await?;
        }
        Commands::Config => {
            let yaml = settings.to_yaml().context("failed to render settings")?;
            print!("{}", yaml);
        }
    }

    Ok(())
}
