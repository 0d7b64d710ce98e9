use clap::Parser;
use std::path::PathBuf;

/// Rule-driven web vulnerability scanner with declarative and scripted checks
#[derive(Parser, Debug)]
#[command(
    name = "pocscan",
    version,
    about = "Rule-driven web vulnerability scanner with declarative and scripted checks"
)]
pub struct Cli {
    /// Scan request file (JSON): targets, selected checks, mode, flags
    pub config: PathBuf,

    /// Network and retry configuration; defaults apply when the file is absent
    #[arg(long, default_value = "config/network.json")]
    pub global_config: PathBuf,

    /// Check definition store
    #[arg(long, default_value = "data/poc.json")]
    pub poc_db: PathBuf,

    /// Directory holding scripted-check shared libraries
    #[arg(long)]
    pub scripts_dir: Option<PathBuf>,

    /// Directory receiving the per-run core and result logs
    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,
}
