use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::{
    config::{self, SimConfig, CONFIG_PATH, FLY_COMMAND, SIM_COMMAND},
    logging::LogHandle,
};

#[cfg(feature = "production")]
pub mod production;
pub mod sim;

#[cfg(feature = "production")]
pub use production::CrazyflieApp;
pub use sim::SimApp;

pub const USAGE: &str = "\
Usage: followbot <command> [key=value ...]

Commands:
    sim    Follow obstacles in a simulated room
    fly    Follow obstacles with a Crazyflie (needs the `production` feature)

Values are read from app-config.toml, then the environment, then the arguments.";

/// Runs the command named by the first argument.
pub async fn run(args: &[String], log: &LogHandle) -> anyhow::Result<()> {
    let Some((command, rest)) = args.split_first() else {
        anyhow::bail!("No command provided\n\n{USAGE}");
    };
    let config_path = Path::new(CONFIG_PATH);

    let result = match command.as_str() {
        "sim" => {
            let config: SimConfig = config::load(config_path, &SIM_COMMAND, rest)?;
            log.set_level(config.control.log_level)?;
            info!("Starting simulation");
            SimApp::run(config).await
        }
        "fly" => {
            let config: config::FlyConfig = config::load(config_path, &FLY_COMMAND, rest)?;
            log.set_level(config.control.log_level)?;
            fly(config).await
        }
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        _ => anyhow::bail!("Unknown command: {command}\n\n{USAGE}"),
    };
    result.with_context(|| format!("Command {command} failed"))
}

#[cfg(feature = "production")]
async fn fly(config: config::FlyConfig) -> anyhow::Result<()> {
    CrazyflieApp::run(config).await
}

#[cfg(not(feature = "production"))]
async fn fly(_config: config::FlyConfig) -> anyhow::Result<()> {
    anyhow::bail!("This build has no radio support, rebuild with `--features production`")
}
