//! KickCat command line.
//!
//! Usage:
//!   kickcat --remote-storage ./remote push-all
//!   kickcat pull --of issue --key number --value 12
//!
//! Storage paths and the log level can also come from `kickcat.toml`;
//! `RUST_LOG` overrides the level when set.

use anyhow::Result;
use clap::Parser;
use kickcat::{Cli, Config, Settings, log_filter};
use tracing::{debug, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, config)?;

    FmtSubscriber::builder()
        .with_env_filter(log_filter(
            settings.log_level,
            std::env::var("RUST_LOG").ok().as_deref(),
        ))
        .with_target(false)
        .compact()
        .init();

    debug!("Settings: {:?}", settings);
    info!(
        "Local storage {}, remote storage {}",
        settings.local_storage.display(),
        settings.remote_storage.display()
    );

    let summary = kickcat::run(&cli.command, &settings).await?;
    println!("{summary}");
    Ok(())
}
