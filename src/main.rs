use anyhow::{Context, Result};
use clap::Parser;
use genstart::bus::victron::VictronBus;
use genstart::bus::BusMonitor;
use genstart::config::Config;
use genstart::controller::Controller;
use genstart::logging::{get_logger, init_logging};
use genstart::settings::victron::VictronSettings;
use genstart::settings::SettingsMirror;
use std::path::PathBuf;
use std::sync::Arc;

/// Autonomous generator start/stop controller for Victron Venus OS
#[derive(Parser, Debug)]
#[command(name = "genstart", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the D-Bus service name suffix, e.g. "generator.startstop0"
    #[arg(short = 'n', long, value_name = "NAME")]
    name: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    if let Some(name) = &cli.name {
        config.service_name = name.clone();
    }

    match cli.verbose {
        0 => {}
        1 => config.logging.level = "DEBUG".to_string(),
        _ => config.logging.level = "TRACE".to_string(),
    }

    config.validate().context("invalid configuration")?;
    init_logging(&config.logging).context("failed to initialize logging")?;

    let logger = get_logger("main");
    logger.info(&format!(
        "genstart starting up, service=com.victronenergy.{}",
        config.service_name
    ));

    let bus: Arc<dyn BusMonitor> = VictronBus::connect()
        .await
        .context("failed to connect bus monitor to the system bus")?;
    let settings: Arc<dyn SettingsMirror> = VictronSettings::connect()
        .await
        .context("failed to connect settings mirror to the system bus")?;

    let controller = Controller::new(bus, settings, &config)
        .await
        .context("failed to initialize controller")?;

    match controller.run().await {
        Ok(()) => {
            logger.info("shut down cleanly");
            Ok(())
        }
        Err(e) => {
            logger.error(&format!("event loop terminated: {e}"));
            Err(anyhow::anyhow!("genstart terminated: {e}"))
        }
    }
}
