mod cli;
mod config;
mod error;
mod http;
mod logsink;
mod poc;
mod scan;
mod script;

use clap::Parser;
use cli::args::Cli;
use config::scan::ScanConfigInput;
use config::GlobalConfig;
use poc::store::JsonFileRepository;
use scan::controller::{RunStatus, ScanController, ScanEnvironment};
use script::ScriptRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const STOP_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let global = Arc::new(GlobalConfig::load_or_default(&cli.global_config)?);
    let repo = Arc::new(JsonFileRepository::load(&cli.poc_db)?);
    let scripts = Arc::new(ScriptRegistry::new(cli.scripts_dir.clone()));
    let raw: ScanConfigInput = serde_json::from_str(&std::fs::read_to_string(&cli.config)?)?;

    let mut controller = ScanController::new(ScanEnvironment {
        global,
        repo,
        scripts,
        log_dir: cli.log_dir.clone(),
        client_factory: None,
    });

    let (started, message) = controller.start(raw);
    if !started {
        anyhow::bail!(message);
    }
    info!(log_dir = %cli.log_dir.display(), "{message}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping scan");
                let (stopped, message) =
                    tokio::task::block_in_place(|| controller.stop(STOP_GRACE));
                if stopped {
                    info!("{message}");
                } else {
                    warn!("{message}");
                }
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if controller.status() == RunStatus::Completed {
                    info!("scan completed");
                    break;
                }
            }
        }
    }
    Ok(())
}
